//! The `QueryActions` language: the compound, atomically-executed bundle
//! that drives the backing ordered-set store. See [`crate::Store::execute`].

use bananaq_time::EventId;

/// One end of a score range used by a [`Selector::Range`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScoreBound {
    /// No bound on this side.
    Unbounded,
    /// Bounded by a literal score, inclusive.
    Inclusive(i64),
    /// Bounded by a literal score, exclusive.
    Exclusive(i64),
    /// Bounded, inclusive, by whatever value the named single-value key
    /// currently holds at the time this bundle executes. Used to bound a
    /// range selection by a cursor (`ptr`) read earlier in the same
    /// bundle, so the read-then-select stays atomic.
    InclusiveOfSingle(String),
    /// As [`ScoreBound::InclusiveOfSingle`], but exclusive.
    ExclusiveOfSingle(String),
}

impl ScoreBound {
    /// Convenience constructor matching "unset means unbounded".
    pub fn unbounded() -> Self {
        Self::Unbounded
    }
}

/// Populates the bundle's working set ("selector set") from the backing
/// store or from an explicit list, per spec.md §4.1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    /// Use exactly these ids, without consulting the store.
    Explicit(Vec<EventId>),
    /// Select members of the ordered set at `key` whose score falls within
    /// `[min, max]` (per the bound's own inclusivity), ascending order,
    /// capped at `count` members if set.
    Range {
        /// Key of the ordered set to select from.
        key: String,
        /// Lower bound.
        min: ScoreBound,
        /// Upper bound.
        max: ScoreBound,
        /// Maximum number of members to return.
        count: Option<usize>,
    },
    /// Select `id` from the ordered set at `key`, but only if its current
    /// score satisfies `[min, max]`. Produces a working set of zero or one
    /// ids. Used to check "is this event still in this set, and has its
    /// deadline not passed" atomically.
    IdScore {
        /// Key of the ordered set to check membership in.
        key: String,
        /// The id to check.
        id: EventId,
        /// Lower bound.
        min: ScoreBound,
        /// Upper bound.
        max: ScoreBound,
    },
}

/// Where a score comes from, shared by [`QueryOp::AddTo`] and
/// [`SingleSetValue::FromInput`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScoreSource {
    /// Use each event's own intrinsic `id.T` as its score (the "zero means
    /// use the id's creation time" rule from spec.md §4.1).
    Auto,
    /// Use this literal score for every member.
    Literal(i64),
    /// Use the member's *current* score in the named ordered-set key,
    /// skipping members that are not currently present there. Lets one
    /// bundle carry a role key's score (e.g. an event's `expire`, stored in
    /// `avail/by_expire`) into another role key without a separate round
    /// trip to read it first.
    CopyFrom(String),
}

/// The value a [`QueryOp::SingleSet`] writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SingleSetValue {
    /// A value fixed at bundle-construction time.
    Literal(i64),
    /// Derive the value from the current (at most one member) working set,
    /// per [`ScoreSource`]'s rules. A no-op if the working set is empty.
    /// This is how `ptr` is advanced to a selected event's `id.T` without
    /// the caller knowing in advance which event a selector will pick
    /// (spec.md §4.3's `maybeDone` tail: `SingleSet(ptr, id.T, IfNewer=true)`).
    FromInput(ScoreSource),
}

/// A gate on the bundle's current working set or on a key's emptiness.
/// Never mutates state. Paired with `break_if` on the containing
/// [`QueryAction`] to short-circuit the rest of the bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Conditional {
    /// Holds iff the working set is non-empty.
    IfInput,
    /// Holds iff the working set is empty.
    IfNoInput,
    /// Holds iff the named ordered set is non-empty.
    IfNotEmpty(String),
    /// Holds iff the named scalar (single-value) key currently has a value.
    /// Used to detect whether a consumer group's `ptr` cursor has ever been
    /// set, distinct from [`Conditional::IfNotEmpty`] which tests an
    /// ordered-set's membership rather than a scalar's presence.
    IfSingleSet(String),
}

/// One primitive operation. Exactly one of [`QueryOp`]'s variants; see
/// spec.md §4.1 for the seven-case union this implements (`Selector`,
/// `AddTo`, `RemoveFromInput`, `SingleSet`, `SingleGet`, `Delete`,
/// `Conditional`) plus the `Count` bookkeeping action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryOp {
    /// Repopulate the working set.
    Selector(Selector),
    /// Add the working set to each of `keys`, scored by `score`.
    AddTo {
        /// Target ordered-set keys.
        keys: Vec<String>,
        /// Score to insert members with.
        score: ScoreSource,
    },
    /// Remove the working set from each of `keys`.
    RemoveFromInput {
        /// Target ordered-set keys.
        keys: Vec<String>,
    },
    /// Set a scalar key, optionally only if `value` exceeds the current
    /// value (`if_newer`), implementing the `ptr` monotonicity rule.
    SingleSet {
        /// The scalar key.
        key: String,
        /// The candidate value.
        value: SingleSetValue,
        /// If true, only overwrite when `value` is greater than what is
        /// currently stored (or the key is unset).
        if_newer: bool,
    },
    /// Read a scalar key's current value into the result's `singles`.
    SingleGet {
        /// The scalar key.
        key: String,
    },
    /// Delete a scalar key.
    Delete {
        /// The scalar key.
        key: String,
    },
    /// A non-mutating gate; see [`Conditional`].
    Conditional(Conditional),
    /// Record `|working set|` into the result's `counts`, in the order
    /// encountered.
    Count,
}

/// One action in a bundle: an operation plus whether the bundle should stop
/// after it if the operation's condition holds.
///
/// For mutating ops, `break_if` means "stop if the working set ended up
/// empty" is not evaluated here -- only [`QueryOp::Conditional`] carries a
/// condition to test. `break_if` is meaningful on a `Conditional` action
/// (spec.md's "Combined with `Break: true`"); on every other op it is
/// simply `false`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryAction {
    /// The operation to perform.
    pub op: QueryOp,
    /// Stop executing the remainder of the bundle if this action is a
    /// [`QueryOp::Conditional`] whose gate holds.
    pub break_if: bool,
}

impl QueryAction {
    /// Build an action that never short-circuits the bundle.
    pub fn new(op: QueryOp) -> Self {
        Self {
            op,
            break_if: false,
        }
    }

    /// Build a [`QueryOp::Conditional`] action that breaks the bundle when
    /// its gate holds.
    pub fn break_when(cond: Conditional) -> Self {
        Self {
            op: QueryOp::Conditional(cond),
            break_if: true,
        }
    }

    /// A selector action.
    pub fn select(selector: Selector) -> Self {
        Self::new(QueryOp::Selector(selector))
    }

    /// An add-to action.
    pub fn add_to(keys: impl IntoIterator<Item = impl Into<String>>, score: ScoreSource) -> Self {
        Self::new(QueryOp::AddTo {
            keys: keys.into_iter().map(Into::into).collect(),
            score,
        })
    }

    /// A remove-from-input action.
    pub fn remove_from_input(keys: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self::new(QueryOp::RemoveFromInput {
            keys: keys.into_iter().map(Into::into).collect(),
        })
    }

    /// A single-set action with a value fixed at construction time.
    pub fn single_set(key: impl Into<String>, value: i64, if_newer: bool) -> Self {
        Self::new(QueryOp::SingleSet {
            key: key.into(),
            value: SingleSetValue::Literal(value),
            if_newer,
        })
    }

    /// A single-set action whose value is derived from the working set at
    /// execution time (see [`SingleSetValue::FromInput`]).
    pub fn single_set_from_input(key: impl Into<String>, source: ScoreSource, if_newer: bool) -> Self {
        Self::new(QueryOp::SingleSet {
            key: key.into(),
            value: SingleSetValue::FromInput(source),
            if_newer,
        })
    }

    /// A single-get action.
    pub fn single_get(key: impl Into<String>) -> Self {
        Self::new(QueryOp::SingleGet { key: key.into() })
    }

    /// A delete action.
    pub fn delete(key: impl Into<String>) -> Self {
        Self::new(QueryOp::Delete { key: key.into() })
    }

    /// A count action.
    pub fn count() -> Self {
        Self::new(QueryOp::Count)
    }
}

/// A sequence of [`QueryAction`]s, scoped to one [`crate::KeyBase`] and
/// executed atomically by a [`crate::Store`].
pub type QueryActions = Vec<QueryAction>;

/// The result of executing a [`QueryActions`] bundle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryResult {
    /// The working set as it stood when the bundle finished (or was broken
    /// out of), i.e. whatever the last [`Selector`] produced.
    pub ids: Vec<EventId>,
    /// One entry per [`QueryOp::Count`] action encountered, in order.
    pub counts: Vec<usize>,
    /// One entry per [`QueryOp::SingleGet`] action encountered, in order.
    pub singles: Vec<Option<i64>>,
}

impl QueryResult {
    /// Whether the working set is non-empty.
    pub fn has_input(&self) -> bool {
        !self.ids.is_empty()
    }
}

/// The keys one action references, used by every [`crate::Store`]
/// implementation to check the action stays within its bundle's
/// [`crate::KeyBase`] before anything executes.
pub(crate) fn referenced_keys(action: &QueryAction) -> Vec<String> {
    fn score_source_key(score: &ScoreSource) -> Option<String> {
        match score {
            ScoreSource::CopyFrom(key) => Some(key.clone()),
            ScoreSource::Auto | ScoreSource::Literal(_) => None,
        }
    }

    match &action.op {
        QueryOp::Selector(Selector::Range { key, .. }) => vec![key.clone()],
        QueryOp::Selector(Selector::IdScore { key, .. }) => vec![key.clone()],
        QueryOp::Selector(Selector::Explicit(_)) => vec![],
        QueryOp::AddTo { keys, score } => keys.iter().cloned().chain(score_source_key(score)).collect(),
        QueryOp::RemoveFromInput { keys } => keys.clone(),
        QueryOp::SingleSet { key, value, .. } => {
            let mut keys = vec![key.clone()];
            if let SingleSetValue::FromInput(source) = value {
                keys.extend(score_source_key(source));
            }
            keys
        }
        QueryOp::SingleGet { key } => vec![key.clone()],
        QueryOp::Delete { key } => vec![key.clone()],
        QueryOp::Conditional(Conditional::IfNotEmpty(key)) => vec![key.clone()],
        QueryOp::Conditional(Conditional::IfSingleSet(key)) => vec![key.clone()],
        QueryOp::Conditional(_) | QueryOp::Count => vec![],
    }
}
