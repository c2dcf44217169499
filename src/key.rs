//! Deterministic naming of the per-queue and per-consumer-group ordered-set
//! keys from spec.md §3's data model table, plus the catalog keys (§4.8) and
//! the per-queue notification channel (§4.6).
//!
//! Every key a [`KeyNamer`] produces for one queue shares a single
//! [`KeyBase`]: that is what lets `q_get`'s bundle touch both `avail` and one
//! consumer group's `ptr`/`inprog`/`redo` atomically in a single call
//! (spec.md §5 "Atomicity boundary").

use bananaq_store::KeyBase;

/// Builds every role key for one queue.
#[derive(Debug, Clone)]
pub struct KeyNamer {
    base: String,
}

impl KeyNamer {
    /// Build a namer for `queue`, rooted under `prefix` (empty for none).
    pub fn new(prefix: &str, queue: &str) -> Self {
        let base = if prefix.is_empty() {
            format!("bananaq/{queue}/")
        } else {
            format!("{prefix}/bananaq/{queue}/")
        };
        Self { base }
    }

    /// This queue's [`KeyBase`], shared by every key this namer produces.
    pub fn key_base(&self) -> KeyBase {
        KeyBase::new(self.base.clone())
    }

    /// `queue/avail/by_id` — all non-expired events offered on the queue,
    /// scored by creation time.
    pub fn avail_by_id(&self) -> String {
        format!("{}avail/by_id", self.base)
    }

    /// `queue/avail/by_expire` — the same set, scored by expiration.
    pub fn avail_by_expire(&self) -> String {
        format!("{}avail/by_expire", self.base)
    }

    /// `queue/cg/inprog/by_id` — events handed to `cg` awaiting ack.
    pub fn inprog_by_id(&self, cg: &str) -> String {
        format!("{}{cg}/inprog/by_id", self.base)
    }

    /// `queue/cg/inprog/by_ack` — the same set, scored by ack deadline.
    pub fn inprog_by_ack(&self, cg: &str) -> String {
        format!("{}{cg}/inprog/by_ack", self.base)
    }

    /// `queue/cg/redo` — events that missed their ack deadline.
    pub fn redo(&self, cg: &str) -> String {
        format!("{}{cg}/redo", self.base)
    }

    /// `queue/cg/done` — events settled for `cg`.
    pub fn done(&self, cg: &str) -> String {
        format!("{}{cg}/done", self.base)
    }

    /// `queue/cg/in_use/by_expire` — union of inprog∪redo∪done for `cg`.
    pub fn in_use_by_expire(&self, cg: &str) -> String {
        format!("{}{cg}/in_use/by_expire", self.base)
    }

    /// `queue/cg/ptr` — the cursor: the `id.T` beyond which `cg` has
    /// consumed from `avail`.
    pub fn ptr(&self, cg: &str) -> String {
        format!("{}{cg}/ptr", self.base)
    }

    /// The notification channel this queue's `q_add` publishes on.
    pub fn notify_channel(&self) -> String {
        format!("{}notify", self.base)
    }
}

/// The two catalog set names (§4.8). Independent of any one queue's
/// [`KeyBase`]: catalog membership is plain string bookkeeping via
/// [`bananaq_store::CatalogStore`], not part of any queue's atomic bundle.
#[derive(Debug, Clone)]
pub struct CatalogKeys {
    prefix: String,
}

impl CatalogKeys {
    /// Build catalog key names rooted under `prefix` (empty for none).
    pub fn new(prefix: &str) -> Self {
        Self { prefix: prefix.to_string() }
    }

    /// The set of all known queue names.
    pub fn queues(&self) -> String {
        self.qualify("bananaq/catalog/queues")
    }

    /// The set of all known `(queue, consumer_group)` pairs, encoded per
    /// [`encode_pair`].
    pub fn consumer_groups(&self) -> String {
        self.qualify("bananaq/catalog/consumer_groups")
    }

    fn qualify(&self, suffix: &str) -> String {
        if self.prefix.is_empty() {
            suffix.to_string()
        } else {
            format!("{}/{suffix}", self.prefix)
        }
    }
}

/// The separator used to encode a `(queue, consumer_group)` pair as one
/// catalog-set member string. Chosen to be a character queue/cg names won't
/// plausibly contain, rather than a delimiter they might (like `/`).
const PAIR_SEP: char = '\u{1}';

/// Encode a `(queue, consumer_group)` pair as one catalog-set member.
pub fn encode_pair(queue: &str, cg: &str) -> String {
    format!("{queue}{PAIR_SEP}{cg}")
}

/// Decode a catalog-set member back into its `(queue, consumer_group)` pair.
/// Returns `None` for a malformed member (should not occur for members this
/// crate itself wrote).
pub fn decode_pair(member: &str) -> Option<(String, String)> {
    let (q, cg) = member.split_once(PAIR_SEP)?;
    Some((q.to_string(), cg.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn namer_shares_one_base_across_every_role_key() {
        let namer = KeyNamer::new("", "orders");
        let base = namer.key_base();
        assert!(base.owns(&namer.avail_by_id()));
        assert!(base.owns(&namer.avail_by_expire()));
        assert!(base.owns(&namer.inprog_by_id("billing")));
        assert!(base.owns(&namer.inprog_by_ack("billing")));
        assert!(base.owns(&namer.redo("billing")));
        assert!(base.owns(&namer.done("billing")));
        assert!(base.owns(&namer.in_use_by_expire("billing")));
        assert!(base.owns(&namer.ptr("billing")));
    }

    #[test]
    fn prefix_is_honored() {
        let namer = KeyNamer::new("tenant-a", "orders");
        assert!(namer.avail_by_id().starts_with("tenant-a/"));
    }

    #[test]
    fn pair_round_trips() {
        let encoded = encode_pair("orders", "billing");
        assert_eq!(decode_pair(&encoded), Some(("orders".to_string(), "billing".to_string())));
    }
}
