mod config;

use std::fs::File;
use std::io::BufWriter;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use kestrel_kinematics::Pose;
use kestrel_motor::devices::Side;
use kestrel_motor::{MotorLoop, SimulatedDrivebase, WheelChannel};
use kestrel_navigation::{
    Command, CommandError, CommandHandler, CommandKind, CommandTable, Mission, MissionReport, Odometry,
    OdometrySensors, Path, RunToken, TrajectoryExecutor, profile,
};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::Settings;

/// Attachment motors are not simulated; their commands are only logged.
struct LoggedAttachment;

impl CommandHandler for LoggedAttachment {
    fn execute(&self, command: &Command, token: &RunToken) -> Result<(), CommandError> {
        match command {
            Command::Attachment { name, rotations } => {
                info!(run = %token.id(), %name, rotations, "Attachment turned");
                Ok(())
            }
            other => Err(CommandError::Failed(format!("attachment handler got {:?}", other.kind()))),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    info!("Kestrel mission runner started.");
    let settings = Settings::load()?;
    let kinematics = settings.kinematics()?;
    let controller = settings.controller()?;
    info!(%kinematics, %controller, "Robot configured");

    let path = Path::load(&settings.mission.path, settings.mission.arc_step)
        .with_context(|| format!("failed to load path {}", settings.mission.path.display()))?;
    let trajectory = profile(&path, &kinematics, &settings.profiler).context("failed to profile path")?;
    let start = trajectory.waypoints()[0].pose();
    let mission = Mission::build(&path, trajectory)?;
    info!(
        segments = mission.segments().len(),
        duration = mission.duration(),
        "Mission built"
    );

    let base = SimulatedDrivebase::new(kinematics, settings.simulation);
    let channel = |side| WheelChannel {
        motor: Arc::new(base.wheel(side)),
        encoder: Arc::new(base.wheel(side)),
    };
    let motors = Arc::new(MotorLoop::spawn(
        channel(Side::Left),
        channel(Side::Right),
        settings.motor.gains,
        kinematics.wheel_circumference(),
        Duration::from_millis(settings.motor.period_ms),
    )?);

    let odometry = Odometry::new(
        OdometrySensors {
            left: Arc::new(base.wheel(Side::Left)),
            right: Arc::new(base.wheel(Side::Right)),
            heading: Arc::new(base.heading_sensor()),
        },
        kinematics,
        Duration::from_millis(settings.odometry.period_ms),
    );
    odometry.reset(start)?;
    odometry.start()?;

    let mut commands = CommandTable::with_defaults();
    commands.register(CommandKind::Attachment, Arc::new(LoggedAttachment));
    let executor = TrajectoryExecutor::new(
        motors.clone(),
        odometry.shared_pose(),
        kinematics,
        controller,
        Arc::new(commands),
        settings.executor(),
    );

    let run_control = executor.run_control();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Ctrl-C received, cancelling mission.");
            run_control.cancel();
        }
    });

    let result = executor.run_mission(&mission).await;

    if let Err(e) = odometry.stop() {
        error!(error = %e, "Odometry reported a fault.");
    }
    if let Err(e) = motors.shutdown() {
        error!(error = %e, "Motor loop reported an error.");
    }

    let report = result.context("mission failed")?;
    summarize(&report, &path, &odometry);
    if let Some(log_file) = &settings.mission.log_file {
        let writer = BufWriter::new(
            File::create(log_file).with_context(|| format!("failed to create {}", log_file.display()))?,
        );
        serde_json::to_writer_pretty(writer, &report).context("failed to write mission log")?;
        info!(file = %log_file.display(), samples = report.log.len(), "Mission log written");
    }
    Ok(())
}

fn summarize(report: &MissionReport, path: &Path, odometry: &Odometry) {
    let end = path.spline().position(path.spline().end());
    let pose = odometry.pose();
    let miss = pose.distance_to(&Pose::new(end.x, end.y, pose.theta));
    for failure in &report.command_failures {
        warn!(command = ?failure.command, error = %failure.error, "Command failed during mission");
    }
    info!(
        run = %report.run_id,
        cancelled = report.cancelled,
        segments_completed = report.segments_completed,
        samples = report.sample_count,
        final_pose = %pose,
        end_error = miss,
        "Mission summary"
    );
}
