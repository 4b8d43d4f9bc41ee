//! Periodic eviction of expired throttle windows.
//!
//! The throttler never spawns anything on its own. A host that wants bounded
//! memory starts a [`Sweeper`], which calls [`Throttle::clean`] on a fixed
//! interval from a tokio task.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

use crate::error::{Result, ThrottleError};
use crate::throttle::Throttle;

/// Handle to a running sweep task. Dropping it aborts the task.
pub struct Sweeper {
    stop: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl Sweeper {
    /// Start cleaning `throttle` every `every`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn<T>(throttle: Arc<T>, every: Duration) -> Result<Self>
    where
        T: Throttle + 'static,
    {
        if every.is_zero() {
            return Err(ThrottleError::Config(
                "clean interval must be greater than zero".to_string(),
            ));
        }

        let (stop_tx, mut stop_rx) = oneshot::channel();

        let task = tokio::spawn(async move {
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately
            ticker.tick().await;

            info!(interval = ?every, "Starting throttle sweeper");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        throttle.clean();
                        debug!(tracked = throttle.len(), "Sweep complete");
                    }
                    _ = &mut stop_rx => {
                        info!("Stopping throttle sweeper");
                        break;
                    }
                }
            }
        });

        Ok(Self {
            stop: Some(stop_tx),
            task: Some(task),
        })
    }

    /// Stop the sweep task and wait for it to exit.
    pub async fn shutdown(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for Sweeper {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
