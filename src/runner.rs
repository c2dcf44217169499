//! The background cleanup loop (spec.md §4.7): one cooperative task per
//! [`Handle`], ticking every `Options::clean_period`, sweeping every queue
//! and consumer group the catalog knows about, and terminating -- with
//! exactly one value sent on its error channel -- on the first store error
//! or on cancellation.

use crate::{CatalogStore, Error, EventStore, Handle, Notifier, Store};
use observability_deps::tracing::{error, info};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

/// Namespace for [`Handle::run`]; not constructed directly.
#[derive(Debug)]
pub struct Runner;

impl Runner {
    /// Spawn the background cleanup task for `handle`, stopping when `stop`
    /// is cancelled. Returns spec.md §6's `errorChannel`: it yields exactly
    /// once, `None` on a clean stop or `Some(error)` on the first
    /// `clean_all` failure.
    pub(crate) fn spawn<S>(handle: Handle<S>, stop: CancellationToken) -> oneshot::Receiver<Option<Error>>
    where
        S: Store + EventStore + CatalogStore + Notifier + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let period = handle.options.clean_period;

        tokio::spawn(async move {
            info!(?period, "bananaq background cleanup runner starting");
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            let outcome = loop {
                tokio::select! {
                    biased;
                    _ = stop.cancelled() => {
                        info!("bananaq background cleanup runner stopping");
                        break None;
                    }
                    _ = interval.tick() => {
                        if let Err(e) = handle.clean_all().await {
                            error!(error = %e, "bananaq background cleanup runner terminating on error");
                            break Some(e);
                        }
                    }
                }
            };

            // The receiving end may already have been dropped by a caller
            // that only wanted fire-and-forget cleanup; that is not this
            // task's problem to report.
            let _ = tx.send(outcome);
        });

        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{open, Options};
    use bananaq_store::MemStore;
    use bananaq_time::{SystemProvider, TimeProvider};
    use std::sync::Arc;

    #[tokio::test]
    async fn stop_signal_yields_none() {
        let store = Arc::new(MemStore::new());
        let time: Arc<dyn TimeProvider> = Arc::new(SystemProvider::new());
        let handle = open(store, time, Options::default());
        let stop = CancellationToken::new();
        let rx = Runner::spawn(handle, stop.clone());
        stop.cancel();
        let outcome = tokio::time::timeout(std::time::Duration::from_secs(1), rx)
            .await
            .expect("runner did not stop promptly")
            .expect("sender dropped without sending");
        assert!(outcome.is_none());
    }
}
