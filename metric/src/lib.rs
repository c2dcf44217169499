//! Minimal metric instrumentation.
//!
//! Not part of any invariant in the queue engine's spec; this exists purely
//! as best-effort operational bookkeeping, registered the same way the
//! teacher codebase threads a `Registry` through constructors and pulls a
//! named instrument out of it once at startup.
#![warn(missing_debug_implementations, missing_docs, clippy::use_self)]

use parking_lot::Mutex;
use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

/// A monotonically increasing counter.
#[derive(Debug, Clone, Default)]
pub struct U64Counter(Arc<AtomicU64>);

impl U64Counter {
    /// Increment the counter by `delta`.
    pub fn inc(&self, delta: u64) {
        self.0.fetch_add(delta, Ordering::Relaxed);
    }

    /// Current value of the counter.
    pub fn fetch(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// A named family of instruments, one per distinct attribute set.
#[derive(Debug)]
pub struct Metric<T> {
    name: &'static str,
    instruments: Mutex<BTreeMap<Vec<(&'static str, String)>, T>>,
}

impl<T> Metric<T>
where
    T: Clone + Default,
{
    fn new(name: &'static str) -> Self {
        Self {
            name,
            instruments: Mutex::new(BTreeMap::new()),
        }
    }

    /// This metric's registered name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Return the instrument for `attributes`, creating it on first use.
    pub fn recorder(&self, attributes: impl Into<Vec<(&'static str, String)>>) -> T {
        let mut attrs = attributes.into();
        attrs.sort();
        self.instruments.lock().entry(attrs).or_default().clone()
    }
}

/// A registry of named metric families.
///
/// Held behind an `Arc` and threaded through constructors by the embedding
/// application; `bananaq::Options` accepts one optionally.
#[derive(Debug, Default)]
pub struct Registry {
    counters: Mutex<BTreeMap<&'static str, Arc<Metric<U64Counter>>>>,
}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or fetch an already-registered) counter family `name`.
    pub fn register_counter(&self, name: &'static str, _description: &'static str) -> Arc<Metric<U64Counter>> {
        self.counters
            .lock()
            .entry(name)
            .or_insert_with(|| Arc::new(Metric::new(name)))
            .clone()
    }
}
