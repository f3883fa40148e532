//! Run identifiers and cooperative cancellation.
//!
//! A [`RunControl`] holds the identifier of the mission attempt currently
//! allowed to act. Every long-running loop carries a [`RunToken`] and checks
//! it once per iteration; cancelling clears the identifier, so every token
//! of that run goes stale at once and its loops wind down without error.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

/// Longest single sleep between cancellation checks.
pub const CANCEL_POLL: Duration = Duration::from_millis(10);

/// Identifier of one mission attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct RunId(Uuid);

impl RunId {
    fn new() -> Self {
        RunId(Uuid::new_v4())
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Owner of the active run identifier.
#[derive(Debug, Clone, Default)]
pub struct RunControl {
    active: Arc<Mutex<Option<RunId>>>,
}

impl RunControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new run. Any previous run is invalidated.
    pub fn begin(&self) -> RunToken {
        let id = RunId::new();
        let previous = self.active.lock().replace(id);
        if let Some(previous) = previous {
            info!(%previous, run = %id, "Replacing active run");
        }
        RunToken {
            id,
            control: self.clone(),
        }
    }

    /// Invalidate whichever run is active.
    pub fn cancel(&self) {
        if let Some(id) = self.active.lock().take() {
            info!(run = %id, "Run cancelled");
        }
    }

    /// The active run, if any.
    pub fn active(&self) -> Option<RunId> {
        *self.active.lock()
    }
}

/// Handle carried by every loop acting on behalf of one run.
#[derive(Debug, Clone)]
pub struct RunToken {
    id: RunId,
    control: RunControl,
}

impl RunToken {
    pub fn id(&self) -> RunId {
        self.id
    }

    /// Whether this run is still the active one.
    pub fn is_active(&self) -> bool {
        *self.control.active.lock() == Some(self.id)
    }

    /// Invalidate this run, leaving any newer run untouched.
    pub fn cancel(&self) {
        let mut active = self.control.active.lock();
        if *active == Some(self.id) {
            *active = None;
        }
    }

    /// Sleep for `duration` in slices of at most [`CANCEL_POLL`].
    ///
    /// Returns `false` as soon as the run goes stale, `true` if the full
    /// duration elapsed with the run still active.
    pub async fn sleep(&self, duration: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + duration;
        self.sleep_until(deadline).await
    }

    /// Like [`RunToken::sleep`], with an absolute deadline.
    pub async fn sleep_until(&self, deadline: tokio::time::Instant) -> bool {
        loop {
            if !self.is_active() {
                return false;
            }
            let now = tokio::time::Instant::now();
            if now >= deadline {
                return true;
            }
            tokio::time::sleep((deadline - now).min(CANCEL_POLL)).await;
        }
    }

    /// Blocking variant of [`RunToken::sleep`] for command handlers running
    /// on the blocking pool.
    pub fn sleep_blocking(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if !self.is_active() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            std::thread::sleep((deadline - now).min(CANCEL_POLL));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_begin_replaces_previous_run() {
        let control = RunControl::new();
        let first = control.begin();
        assert!(first.is_active());

        let second = control.begin();
        assert!(!first.is_active());
        assert!(second.is_active());
        assert_ne!(first.id(), second.id());

        // a stale token cannot cancel the newer run
        first.cancel();
        assert!(second.is_active());
        second.cancel();
        assert_eq!(control.active(), None);
    }

    #[tokio::test]
    async fn test_sleep_returns_early_on_cancel() {
        let control = RunControl::new();
        let token = control.begin();

        let sleeper = tokio::spawn({
            let token = token.clone();
            async move {
                let started = Instant::now();
                let completed = token.sleep(Duration::from_secs(5)).await;
                (completed, started.elapsed())
            }
        });
        tokio::time::sleep(Duration::from_millis(30)).await;
        control.cancel();

        let (completed, elapsed) = sleeper.await.unwrap();
        assert!(!completed);
        assert!(elapsed < Duration::from_secs(1));
    }

    #[test]
    fn test_blocking_sleep_completes_when_active() {
        let token = RunControl::new().begin();
        assert!(token.sleep_blocking(Duration::from_millis(15)));
        token.cancel();
        assert!(!token.sleep_blocking(Duration::from_millis(15)));
    }
}
