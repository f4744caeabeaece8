use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::executor::TaskRunner;

/// Periodically expires overdue deferred calls and forgets tasks that
/// finished more than `finished_ttl` ago.
pub struct ExpirySweeper {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl ExpirySweeper {
    pub fn spawn(runner: Arc<TaskRunner>, poll: Duration, finished_ttl: Duration) -> Self {
        let finished_ttl = TimeDelta::from_std(finished_ttl).unwrap_or(TimeDelta::MAX);
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = interval(poll);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(poll_ms = poll.as_millis() as u64, "Deferred-call sweeper started");

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let now = Utc::now();
                let expired = runner.expire_due(now);
                if expired > 0 {
                    debug!(expired, "Expired deferred calls");
                }
                if let Some(cutoff) = now.checked_sub_signed(finished_ttl) {
                    runner.purge_finished(cutoff);
                }
            }
            info!("Deferred-call sweeper stopped");
        });

        Self { cancel, handle }
    }

    pub async fn stop(self) {
        self.cancel.cancel();
        let _ = self.handle.await;
    }
}
