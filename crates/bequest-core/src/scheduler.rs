//! Periodic driver for [`ReleaseEngine::tick`].

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::release::{dispatch_notices, BeneficiaryNotifier, ReleaseEngine, TickReport};
use crate::store::VaultStore;

/// Control surface for a running release loop.
#[derive(Clone)]
pub struct ReleaseLoopHandle {
    /// Run a tick now instead of waiting for the interval.
    pub wake: Arc<Notify>,
    pub shutdown: CancellationToken,
}

/// Spawn the release loop. It ticks once immediately, then every `interval`
/// or whenever woken. Notices go to `notifier` after the tick has released
/// its locks; `on_report` sees every tick's outcome.
pub fn spawn_release_loop<F>(
    engine: Arc<ReleaseEngine>,
    store: Arc<VaultStore>,
    notifier: Arc<dyn BeneficiaryNotifier>,
    interval: Duration,
    on_report: F,
) -> (JoinHandle<()>, ReleaseLoopHandle)
where
    F: Fn(&TickReport) + Send + Sync + 'static,
{
    let wake = Arc::new(Notify::new());
    let shutdown = CancellationToken::new();
    let handle = ReleaseLoopHandle {
        wake: wake.clone(),
        shutdown: shutdown.clone(),
    };

    let task = tokio::spawn(async move {
        info!(interval_secs = interval.as_secs(), "release loop started");
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("release loop shutting down");
                    return;
                }
                _ = ticker.tick() => {}
                _ = wake.notified() => {
                    debug!("release loop woken early");
                }
            }

            match engine.tick(&store, Utc::now()) {
                Ok(report) => {
                    if !report.notices.is_empty() {
                        let delivered = dispatch_notices(notifier.as_ref(), &report.notices).await;
                        debug!(delivered, total = report.notices.len(), "notices dispatched");
                    }
                    on_report(&report);
                }
                Err(e) => error!("release tick failed: {}", e),
            }
        }
    });

    (task, handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::generate_key;
    use crate::events::EventBus;
    use crate::models::ReleaseStatus;
    use crate::release::{InheritancePlan, LogNotifier};
    use crate::settings::VaultSettings;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    #[tokio::test]
    async fn loop_unlocks_due_items_and_stops() {
        let dir = tempdir().unwrap();
        let events = EventBus::new();
        let store = Arc::new(
            VaultStore::open(dir.path(), generate_key(), 4096, events.clone()).unwrap(),
        );
        let engine = Arc::new(ReleaseEngine::new(&VaultSettings::default(), events, Utc::now()));
        let id = store.import_bytes("note.txt", b"hello", None).unwrap().id;
        engine
            .configure_inheritance(
                &store,
                id,
                InheritancePlan {
                    beneficiary_id: "heir".into(),
                    witness_ids: vec!["w1".into()],
                    unlock_date: Some(Utc::now() - chrono::Duration::hours(1)),
                    inactivity_days: None,
                },
                Utc::now(),
            )
            .unwrap();

        let unlocked = Arc::new(AtomicUsize::new(0));
        let seen = unlocked.clone();
        let (task, handle) = spawn_release_loop(
            engine,
            store.clone(),
            Arc::new(LogNotifier),
            Duration::from_secs(3600),
            move |report| {
                seen.fetch_add(report.unlocked.len(), Ordering::SeqCst);
            },
        );

        for _ in 0..50 {
            if unlocked.load(Ordering::SeqCst) > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        handle.wake.notify_one();
        handle.shutdown.cancel();
        task.await.unwrap();

        assert_eq!(unlocked.load(Ordering::SeqCst), 1);
        let status = store.get(id).unwrap().time_lock.unwrap().status;
        assert_eq!(status, ReleaseStatus::Unlocked);
    }
}
