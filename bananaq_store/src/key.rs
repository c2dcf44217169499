use std::fmt::{Display, Formatter};

/// The shared key-prefix that scopes one atomic [`crate::QueryActions`]
/// bundle.
///
/// Every key named by an action in a bundle must start with the owning
/// `KeyBase`'s prefix. On a sharded store this keeps all keys touched by one
/// script on the same hash slot; here it is also the mechanism a [`Store`]
/// implementation uses to reject malformed bundles that reach across
/// queues.
///
/// [`Store`]: crate::Store
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyBase(String);

impl KeyBase {
    /// Wrap an already-computed prefix string.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self(prefix.into())
    }

    /// The prefix itself.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether `key` falls under this base.
    pub fn owns(&self, key: &str) -> bool {
        key.starts_with(self.0.as_str())
    }
}

impl Display for KeyBase {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
