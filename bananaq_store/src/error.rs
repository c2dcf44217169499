use snafu::Snafu;

/// Errors a [`crate::Store`] can surface while executing a bundle.
///
/// Per spec.md §7.1: transport/store errors are surfaced to the caller
/// as-is and never retried inside this crate; there is no circuit breaker
/// or idempotency layer here, that is left to the embedding application.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    /// A key named by an action in the bundle does not start with the
    /// bundle's [`crate::KeyBase`] prefix.
    #[snafu(display("key `{key}` is not owned by key base `{base}`"))]
    UnknownKeyPrefix {
        /// The offending key.
        key: String,
        /// The bundle's key base.
        base: String,
    },

    /// The bundle itself is structurally invalid (e.g. a `SingleGet` with
    /// an empty key, or a range selector with `min > max`).
    #[snafu(display("malformed query bundle: {reason}"))]
    MalformedBundle {
        /// Human-readable description of what was wrong.
        reason: String,
    },

    /// The underlying transport to the backing store failed.
    #[snafu(display("store transport error: {source}"))]
    Transport {
        /// The underlying error.
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

/// A specialized `Result` for this crate's errors.
pub type Result<T, E = Error> = std::result::Result<T, E>;
