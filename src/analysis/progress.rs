use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::abort_guard::AbortGuard;

/// Highest value the simulated progress reaches on its own.
pub const PROGRESS_CAP: u8 = 90;

/// Simulated progress for a request whose real progress is not observable.
///
/// The ticker raises the shared progress value by `step` every `period`
/// until it reaches [`PROGRESS_CAP`]. [`ProgressTicker::finish`] stops it
/// and publishes 100; dropping the ticker stops it without publishing.
pub struct ProgressTicker {
    task: AbortGuard,
    progress: watch::Sender<u8>,
}

impl ProgressTicker {
    /// Reset `progress` to 0 and start ticking.
    pub fn start(progress: watch::Sender<u8>, step: u8, period: Duration) -> Self {
        progress.send_replace(0);
        let tx = progress.clone();
        let task = AbortGuard::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // the first tick completes immediately
            interval.tick().await;
            loop {
                interval.tick().await;
                let mut reached_cap = false;
                // never lower a value that is already at the cap or complete
                tx.send_if_modified(|p| {
                    if *p >= PROGRESS_CAP {
                        reached_cap = true;
                        return false;
                    }
                    *p = p.saturating_add(step).min(PROGRESS_CAP);
                    reached_cap = *p >= PROGRESS_CAP;
                    true
                });
                if reached_cap {
                    break;
                }
            }
        });
        Self { task, progress }
    }

    /// Stop ticking and mark the operation complete.
    pub fn finish(self) {
        let Self { mut task, progress } = self;
        task.abort();
        progress.send_replace(100);
    }
}
