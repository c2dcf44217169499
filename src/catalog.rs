//! The set of known queues and, for each, known consumer groups (spec.md
//! §4.8), maintained as a side effect of `q_add`/`q_get` rather than as a
//! separate source of truth. Never cached across cleanup cycles (§9 "Global
//! state").

use crate::key::{decode_pair, encode_pair, CatalogKeys};
use bananaq_store::CatalogStore;
use std::sync::Arc;

/// Thin wrapper over the two catalog sets, backed by any [`CatalogStore`].
#[derive(Debug)]
pub struct Catalog {
    store: Arc<dyn CatalogStore>,
    keys: CatalogKeys,
}

impl Catalog {
    pub(crate) fn new(store: Arc<dyn CatalogStore>, keys: CatalogKeys) -> Self {
        Self { store, keys }
    }

    /// Record that `queue` exists. Idempotent.
    pub async fn record_queue(&self, queue: &str) -> bananaq_store::Result<()> {
        self.store.add_member(&self.keys.queues(), queue.to_string()).await
    }

    /// Record that `(queue, cg)` has been used. Idempotent.
    pub async fn record_consumer_group(&self, queue: &str, cg: &str) -> bananaq_store::Result<()> {
        self.store.add_member(&self.keys.consumer_groups(), encode_pair(queue, cg)).await
    }

    /// All known queue names.
    pub async fn queues(&self) -> bananaq_store::Result<Vec<String>> {
        self.store.members(&self.keys.queues()).await
    }

    /// All known `(queue, consumer_group)` pairs, optionally restricted to
    /// one queue.
    pub async fn consumer_groups(&self, queue: Option<&str>) -> bananaq_store::Result<Vec<(String, String)>> {
        let pairs = self.store.members(&self.keys.consumer_groups()).await?;
        Ok(pairs
            .into_iter()
            .filter_map(|p| decode_pair(&p))
            .filter(|(q, _)| queue.map_or(true, |want| want == q))
            .collect())
    }
}
