//! The `Event` value spec.md §3 defines: a timestamped id, an absolute
//! expiration, and opaque contents.

use bananaq_time::{EventId, Time};
use bytes::Bytes;

/// One event delivered by [`crate::Handle::q_get`].
///
/// Invariant: `id.creation_time() <= expire`, checked by
/// [`crate::Handle::q_add`] before the event is ever stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    /// The event's globally unique, chronologically-sortable id.
    pub id: EventId,
    /// Absolute expiration timestamp.
    pub expire: Time,
    /// Opaque payload, as given to `q_add`.
    pub contents: Bytes,
}
