use crate::{action::QueryActions, error::Result, key::KeyBase, QueryResult};
use async_trait::async_trait;
use bananaq_time::{EventId, Time};
use bytes::Bytes;
use std::time::Duration;

/// The ordered-set backing store collaborator assumed by spec.md §1: a
/// store capable of executing a bundle of primitive operations atomically
/// over a set of keys sharing a common prefix.
///
/// Two implementations ship in this crate: [`crate::MemStore`], an
/// in-process store for tests, and [`crate::RedisStore`], which ships each
/// bundle as one Lua script to a real ordered-set server.
#[async_trait]
pub trait Store: std::fmt::Debug + Send + Sync {
    /// Execute `actions` atomically against the keys under `base`, as of
    /// logical time `now`. `now` is passed in rather than read by the
    /// store so that every comparison within one bundle (and every test)
    /// sees a single, consistent notion of "the present".
    async fn execute(&self, base: &KeyBase, now: Time, actions: QueryActions)
        -> Result<QueryResult>;
}

/// Maps an event id to its `(expire, contents)` pair, with a grace TTL past
/// the event's own expiration (spec.md §3's "Lifecycle" paragraph and §2's
/// "Event store" component).
#[async_trait]
pub trait EventStore: std::fmt::Debug + Send + Sync {
    /// Store `expire` and `contents` for `id`, to be retained for at least
    /// `ttl` (the caller computes `ttl = expire - now + grace`).
    async fn put(&self, id: EventId, expire: Time, ttl: Duration, contents: Bytes) -> Result<()>;

    /// Fetch the `(expire, contents)` pair previously stored for `id`, if
    /// still retained.
    async fn get(&self, id: EventId) -> Result<Option<(Time, Bytes)>>;
}

/// A live subscription to a notification channel, yielding once per
/// publish that happens after the subscription was registered.
#[async_trait]
pub trait Subscription: Send {
    /// Wait for the next notification, or for `timeout` to elapse.
    /// Returns `true` if a notification arrived, `false` on timeout.
    async fn recv(&mut self, timeout: Duration) -> bool;
}

/// The two well-known membership sets behind spec.md §4.8's catalog:
/// known queue names, and known `(queue, consumer_group)` pairs.
///
/// Kept separate from [`Store`] because catalog members are plain strings,
/// not [`EventId`]s, so they do not fit the ordered-set-of-events model
/// [`QueryActions`] is built around; a catalog add is a plain idempotent
/// set-membership write, not part of any atomicity boundary.
#[async_trait]
pub trait CatalogStore: std::fmt::Debug + Send + Sync {
    /// Idempotently add `member` to the named set.
    async fn add_member(&self, set: &str, member: String) -> Result<()>;

    /// List the named set's current members. Unknown sets are empty.
    async fn members(&self, set: &str) -> Result<Vec<String>>;
}

/// The notification fabric from spec.md §4.6: publish/subscribe over the
/// backing store, used to wake blocked [`Handle::q_get`] callers.
///
/// [`Handle::q_get`]: ../bananaq/struct.Handle.html#method.q_get
#[async_trait]
pub trait Notifier: std::fmt::Debug + Send + Sync {
    /// The concrete [`Subscription`] type this notifier produces.
    type Sub: Subscription;

    /// Publish a wakeup on `channel`.
    async fn publish(&self, channel: &str) -> Result<()>;

    /// Subscribe to `channel`. Must be called, and the returned
    /// subscription must be live, *before* the caller performs its first
    /// non-blocking attempt, to avoid the lost-wakeup race described in
    /// spec.md §5.
    async fn subscribe(&self, channel: &str) -> Result<Self::Sub>;
}
