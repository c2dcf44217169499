//! The ordered-set backing store abstraction and atomic query executor
//! that the bananaq queue engine is built on.
//!
//! This crate owns everything spec.md treats as an external collaborator
//! plus the language used to drive it atomically: the [`Store`] trait (the
//! Query Executor, §4.1), [`EventStore`] (the event blob store, §3), and
//! [`Notifier`] (the notification fabric, §4.6). [`MemStore`] backs tests;
//! [`RedisStore`] ships each bundle as one Lua script to a real Redis-like
//! server, which is what "atomic scripted operations" in spec.md §1 means
//! concretely.
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(
    missing_debug_implementations,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]

mod action;
mod error;
mod key;
mod mem;
mod redis_backend;
mod store;

pub use action::{Conditional, QueryAction, QueryActions, QueryOp, ScoreBound, ScoreSource, QueryResult, Selector, SingleSetValue};
pub use error::{Error, Result};
pub use key::KeyBase;
pub use mem::{MemStore, MemSubscription};
pub use redis_backend::{RedisConfig, RedisStore};
pub use store::{CatalogStore, EventStore, Notifier, Store, Subscription};
