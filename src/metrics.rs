//! Best-effort metric bookkeeping for terminal queue-engine operations.
//!
//! Not named anywhere in spec.md, and excluded by nothing it names either —
//! an ambient concern carried regardless of the core's Non-goals. Purely
//! operational bookkeeping, never consulted by the engine's own logic.

use metric::{Metric, Registry, U64Counter};
use std::sync::Arc;

#[derive(Debug)]
pub(crate) struct Metrics {
    q_add: Option<Arc<Metric<U64Counter>>>,
    q_get_delivered: Option<Arc<Metric<U64Counter>>>,
    q_get_empty: Option<Arc<Metric<U64Counter>>>,
    q_ack_true: Option<Arc<Metric<U64Counter>>>,
    q_ack_false: Option<Arc<Metric<U64Counter>>>,
    clean_purged: Option<Arc<Metric<U64Counter>>>,
}

impl Metrics {
    pub(crate) fn new(registry: Option<&Registry>) -> Self {
        let reg = |name: &'static str, description: &'static str| registry.map(|r| r.register_counter(name, description));
        Self {
            q_add: reg("bananaq_q_add", "events added to a queue"),
            q_get_delivered: reg("bananaq_q_get_delivered", "q_get calls that delivered an event"),
            q_get_empty: reg("bananaq_q_get_empty", "q_get calls that found nothing to deliver"),
            q_ack_true: reg("bananaq_q_ack_true", "q_ack calls that acknowledged an event"),
            q_ack_false: reg("bananaq_q_ack_false", "q_ack calls that found nothing to acknowledge"),
            clean_purged: reg("bananaq_clean_purged", "events purged by a cleanup pass"),
        }
    }

    pub(crate) fn inc_q_add(&self, queue: &str) {
        Self::inc(&self.q_add, queue);
    }

    pub(crate) fn inc_q_get_delivered(&self, queue: &str) {
        Self::inc(&self.q_get_delivered, queue);
    }

    pub(crate) fn inc_q_get_empty(&self, queue: &str) {
        Self::inc(&self.q_get_empty, queue);
    }

    pub(crate) fn inc_q_ack_true(&self, queue: &str) {
        Self::inc(&self.q_ack_true, queue);
    }

    pub(crate) fn inc_q_ack_false(&self, queue: &str) {
        Self::inc(&self.q_ack_false, queue);
    }

    pub(crate) fn inc_clean_purged(&self, queue: &str, n: u64) {
        if let Some(m) = &self.clean_purged {
            m.recorder([("queue", queue.to_string())]).inc(n);
        }
    }

    fn inc(metric: &Option<Arc<Metric<U64Counter>>>, queue: &str) {
        if let Some(m) = metric {
            m.recorder([("queue", queue.to_string())]).inc(1);
        }
    }
}
