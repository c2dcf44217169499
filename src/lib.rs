//! bananaq: a distributed, multi-consumer-group event queue whose clients
//! connect directly to a shared ordered-set backing store instead of
//! coordinating through a queue daemon.
//!
//! This crate is the queue engine: the key-space design, the
//! `QueryActions` compound-query language used to drive the store
//! atomically, the `q_add`/`q_get`/`q_ack` state machine, redelivery,
//! expiration, and background cleanup. It does not open a network
//! connection itself — [`Handle`] is generic over any backend that
//! implements [`bananaq_store::Store`], [`bananaq_store::EventStore`],
//! [`bananaq_store::CatalogStore`], and [`bananaq_store::Notifier`]; the
//! `bananaq_store` crate ships one such backend for tests (`MemStore`) and
//! one for production (`RedisStore`).
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(
    missing_debug_implementations,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]

mod catalog;
mod engine;
mod event;
mod key;
mod metrics;
mod runner;

pub use bananaq_store::{CatalogStore, EventStore, Notifier, Store, Subscription};
pub use bananaq_time::{Clock, EventId, SystemProvider, Time, TimeProvider};
pub use catalog::Catalog;
pub use engine::{ConsumerGroupStatus, QGetOptions, QStatus, QueueStatus};
pub use event::Event;
pub use key::{CatalogKeys, KeyNamer};
pub use runner::Runner;
pub use tokio_util::sync::CancellationToken;

use crate::metrics::Metrics;
use snafu::Snafu;
use std::{sync::Arc, time::Duration};

/// Errors a [`Handle`] method can return: spec.md §7.2's precondition
/// violations, plus a passthrough of §7.1's store/transport errors.
///
/// §7.3's "semantic no result" cases are never errors here: [`Handle::q_get`]
/// returns `Ok(None)`, [`Handle::q_ack`] returns `Ok(false)`.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    /// `q_add`/`q_get` called with an empty `Queue`.
    #[snafu(display("queue name must not be empty"))]
    EmptyQueue,

    /// `q_get`/`q_ack` called with an empty `ConsumerGroup`.
    #[snafu(display("consumer group name must not be empty"))]
    EmptyConsumerGroup,

    /// `q_add` called with an `Expire` not strictly after the current time.
    #[snafu(display("expire must be strictly after the current time"))]
    NonPositiveExpire,

    /// The backing store rejected or failed to execute a bundle.
    #[snafu(display("store error: {source}"))]
    Store {
        /// The underlying store error.
        source: bananaq_store::Error,
    },
}

impl From<bananaq_store::Error> for Error {
    fn from(source: bananaq_store::Error) -> Self {
        Self::Store { source }
    }
}

/// A specialized `Result` for this crate's errors.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Configuration knobs for [`open`] (spec.md §6).
#[derive(Debug, Clone)]
pub struct Options {
    /// Period of the background cleanup loop (§4.7). Default 60s.
    pub clean_period: Duration,
    /// Prefix shared by every key this handle produces. Default empty.
    pub key_prefix: String,
    /// Grace period added beyond an event's own expiration when it is
    /// retained in the event store (§3 "Lifecycle"). Default 30s.
    pub event_ttl_grace: Duration,
    /// Optional metric registry; when set, terminal queue-engine operations
    /// are counted under the `bananaq` namespace. Not part of any invariant.
    pub registry: Option<Arc<metric::Registry>>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            clean_period: Duration::from_secs(60),
            key_prefix: String::new(),
            event_ttl_grace: Duration::from_secs(30),
            registry: None,
        }
    }
}

/// A handle to one bananaq deployment: the library surface from spec.md §6.
///
/// Cheaply `Clone`-able; every clone shares the same backing store
/// connection, clock, and catalog. `S` is the concrete backend (typically
/// `bananaq_store::RedisStore` in production or `bananaq_store::MemStore`
/// in tests); it must implement every collaborator trait the core assumes.
#[derive(Debug)]
pub struct Handle<S> {
    pub(crate) store: Arc<S>,
    pub(crate) clock: Clock,
    pub(crate) options: Arc<Options>,
    pub(crate) catalog: Arc<Catalog>,
    pub(crate) metrics: Arc<Metrics>,
}

// Every field is already `Arc`-wrapped (or cheap to clone), so cloning a
// `Handle` never requires `S: Clone` -- only `#[derive(Clone)]` would
// mistakenly demand that, since it cannot see through the `Arc`.
impl<S> Clone for Handle<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            clock: self.clock.clone(),
            options: Arc::clone(&self.options),
            catalog: Arc::clone(&self.catalog),
            metrics: Arc::clone(&self.metrics),
        }
    }
}

/// Open a [`Handle`] over `store`, driven by `time`.
///
/// Mirrors spec.md §6's `Open(store, opts) -> Handle`. The clock is
/// supplied separately from the store so tests can pass a
/// [`bananaq_time::MockProvider`] for deterministic ack-deadline and expiry
/// scenarios, matching the split `bananaq_time` (and the teacher's
/// `iox_time`) uses throughout.
pub fn open<S>(store: Arc<S>, time: Arc<dyn TimeProvider>, options: Options) -> Handle<S>
where
    S: Store + EventStore + CatalogStore + Notifier + 'static,
{
    let catalog_keys = CatalogKeys::new(&options.key_prefix);
    let metrics = Metrics::new(options.registry.as_deref());
    let catalog_store: Arc<dyn CatalogStore> = store.clone();
    Handle {
        store,
        clock: Clock::new(time),
        options: Arc::new(options),
        catalog: Arc::new(Catalog::new(catalog_store, catalog_keys)),
        metrics: Arc::new(metrics),
    }
}

impl<S> Handle<S> {
    /// This handle's catalog of known queues and consumer groups.
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    fn namer(&self, queue: &str) -> KeyNamer {
        KeyNamer::new(&self.options.key_prefix, queue)
    }
}

impl<S> Handle<S>
where
    S: Store + EventStore + CatalogStore + Notifier + 'static,
{
    /// Start the background cleanup loop (spec.md §4.7, §6 `Handle.Run`).
    /// Must be invoked at most once per handle. `stop` cancels the loop;
    /// the returned channel yields exactly one value -- `None` on a clean
    /// stop, `Some(error)` on the first cleanup failure -- and the loop
    /// does not run again after that.
    pub fn run(&self, stop: CancellationToken) -> tokio::sync::oneshot::Receiver<Option<Error>> {
        Runner::spawn(self.clone(), stop)
    }
}
