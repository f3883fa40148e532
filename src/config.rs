use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use config::{Config, Environment, File, FileFormat};
use kestrel_kinematics::{Ramsete, RobotKinematics};
use kestrel_motor::{FeedForwardGains, SimulationConfig};
use kestrel_navigation::{DEFAULT_ARC_STEP, ExecutorConfig, ProfilerConfig};
use serde::Deserialize;
use tracing::info;

const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

#[derive(Debug, Clone, Deserialize)]
pub struct RobotSettings {
    pub track_width: f64,
    pub wheel_circumference: f64,
    pub max_velocity: f64,
    pub max_acceleration: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RamseteSettings {
    pub b: f64,
    pub zeta: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutorSettings {
    pub period_ms: u64,
    #[serde(default)]
    pub accel_gain: f64,
    #[serde(default = "default_true")]
    pub log_samples: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoopSettings {
    pub period_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MotorSettings {
    pub period_ms: u64,
    pub gains: FeedForwardGains,
}

fn default_arc_step() -> f64 {
    DEFAULT_ARC_STEP
}

#[derive(Debug, Clone, Deserialize)]
pub struct MissionSettings {
    /// Path file to drive.
    pub path: PathBuf,
    /// Parameter step for arc-length integration.
    #[serde(default = "default_arc_step")]
    pub arc_step: f64,
    /// Where to write the tracking log as JSON, if anywhere.
    #[serde(default)]
    pub log_file: Option<PathBuf>,
}

/// Everything the mission runner needs, from `config/default.toml` with
/// `KESTREL_` environment overrides (e.g. `KESTREL_MISSION__PATH`).
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub robot: RobotSettings,
    pub ramsete: RamseteSettings,
    #[serde(default)]
    pub profiler: ProfilerConfig,
    pub executor: ExecutorSettings,
    pub odometry: LoopSettings,
    pub motor: MotorSettings,
    #[serde(default)]
    pub simulation: SimulationConfig,
    pub mission: MissionSettings,
}

impl Settings {
    pub fn load() -> anyhow::Result<Self> {
        info!("Loading configuration from {}", DEFAULT_CONFIG_PATH);
        let settings: Settings = Config::builder()
            .add_source(File::new(DEFAULT_CONFIG_PATH, FileFormat::Toml).required(true))
            .add_source(Environment::with_prefix("KESTREL").separator("__"))
            .build()
            .and_then(Config::try_deserialize)
            .with_context(|| format!("failed to load configuration from {DEFAULT_CONFIG_PATH}"))?;
        info!(?settings, "Configuration loaded");
        Ok(settings)
    }

    pub fn kinematics(&self) -> anyhow::Result<RobotKinematics> {
        let r = &self.robot;
        RobotKinematics::new(r.track_width, r.wheel_circumference, r.max_velocity, r.max_acceleration)
            .context("invalid [robot] settings")
    }

    pub fn controller(&self) -> anyhow::Result<Ramsete> {
        Ramsete::new(self.ramsete.b, self.ramsete.zeta).context("invalid [ramsete] settings")
    }

    pub fn executor(&self) -> ExecutorConfig {
        ExecutorConfig {
            period: Duration::from_millis(self.executor.period_ms),
            accel_gain: self.executor.accel_gain,
            log_samples: self.executor.log_samples,
        }
    }
}
