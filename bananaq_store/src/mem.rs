//! An in-process [`Store`]/[`EventStore`]/[`Notifier`] implementation.
//!
//! `MemStore` evaluates a [`QueryActions`] bundle directly against
//! `BTreeMap`-backed ordered sets behind a single mutex, so "atomic" here
//! really just means "the mutex is held for the whole bundle". It exists
//! for unit and integration tests; [`crate::RedisStore`] is the
//! production-shaped implementation.

use crate::{
    action::{referenced_keys, Conditional, QueryActions, QueryOp, QueryResult, ScoreBound, ScoreSource, Selector, SingleSetValue},
    error::UnknownKeyPrefixSnafu,
    key::KeyBase,
    store::{CatalogStore, EventStore, Notifier, Store, Subscription},
    Result,
};
use async_trait::async_trait;
use bananaq_time::{EventId, Time};
use bytes::Bytes;
use observability_deps::tracing::trace;
use parking_lot::Mutex;
use snafu::ensure;
use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    time::Duration,
};
use tokio::sync::broadcast;

/// An ordered set of `(member, score)` pairs, ordered by score with ties
/// broken by member id, matching spec.md §3's data model exactly.
#[derive(Debug, Default)]
struct OrderedSet {
    by_score: BTreeMap<(i64, EventId), ()>,
    scores: HashMap<EventId, i64>,
}

impl OrderedSet {
    fn insert(&mut self, id: EventId, score: i64) {
        if let Some(&old) = self.scores.get(&id) {
            if old == score {
                return;
            }
            self.by_score.remove(&(old, id));
        }
        self.by_score.insert((score, id), ());
        self.scores.insert(id, score);
    }

    fn remove(&mut self, id: &EventId) {
        if let Some(score) = self.scores.remove(id) {
            self.by_score.remove(&(score, *id));
        }
    }

    fn score_of(&self, id: &EventId) -> Option<i64> {
        self.scores.get(id).copied()
    }

    fn is_empty(&self) -> bool {
        self.by_score.is_empty()
    }

    fn range(&self, min: Option<i64>, min_excl: bool, max: Option<i64>, max_excl: bool, count: Option<usize>) -> Vec<EventId> {
        let lo = min.unwrap_or(i64::MIN);
        let hi = max.unwrap_or(i64::MAX);
        let lo_bound = (lo, EventId::from_parts(bananaq_time::Time::ZERO, 0));
        let hi_bound = (
            hi,
            EventId::from_parts(bananaq_time::Time::from_timestamp_nanos(i64::MAX), u32::MAX),
        );
        let mut out = Vec::new();
        for (&(score, id), ()) in self.by_score.range(lo_bound..=hi_bound) {
            if min_excl && min == Some(score) {
                continue;
            }
            if max_excl && max == Some(score) {
                continue;
            }
            out.push(id);
            if let Some(count) = count {
                if out.len() >= count {
                    break;
                }
            }
        }
        out
    }
}

#[derive(Debug, Default)]
struct Data {
    sets: HashMap<String, OrderedSet>,
    singles: HashMap<String, i64>,
    events: HashMap<EventId, (Bytes, Time)>,
}

/// An in-process backing store for tests and local development.
#[derive(Debug)]
pub struct MemStore {
    data: Mutex<Data>,
    channels: Mutex<HashMap<String, broadcast::Sender<()>>>,
    catalog_sets: Mutex<HashMap<String, BTreeSet<String>>>,
}

impl Default for MemStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            data: Mutex::new(Data::default()),
            channels: Mutex::new(HashMap::new()),
            catalog_sets: Mutex::new(HashMap::new()),
        }
    }

    fn channel(&self, name: &str) -> broadcast::Sender<()> {
        self.channels
            .lock()
            .entry(name.to_string())
            .or_insert_with(|| broadcast::channel(64).0)
            .clone()
    }
}

fn resolve_bound(bound: &ScoreBound, singles: &HashMap<String, i64>) -> (Option<i64>, bool) {
    match bound {
        ScoreBound::Unbounded => (None, false),
        ScoreBound::Inclusive(v) => (Some(*v), false),
        ScoreBound::Exclusive(v) => (Some(*v), true),
        ScoreBound::InclusiveOfSingle(key) => (singles.get(key).copied(), false),
        ScoreBound::ExclusiveOfSingle(key) => (singles.get(key).copied(), true),
    }
}

fn check_keys(base: &KeyBase, keys: impl IntoIterator<Item = impl AsRef<str>>) -> Result<()> {
    for key in keys {
        let key = key.as_ref();
        ensure!(base.owns(key), UnknownKeyPrefixSnafu { key, base: base.as_str() });
    }
    Ok(())
}

#[async_trait]
impl Store for MemStore {
    async fn execute(&self, base: &KeyBase, now: Time, actions: QueryActions) -> Result<QueryResult> {
        for action in &actions {
            check_keys(base, referenced_keys(action))?;
        }
        let _ = now; // MemStore does not itself interpret `now`; callers encode it as literal bounds.

        let mut data = self.data.lock();
        let mut working: Vec<EventId> = Vec::new();
        let mut result = QueryResult::default();

        for action in actions {
            match action.op {
                QueryOp::Selector(selector) => {
                    working = match selector {
                        Selector::Explicit(ids) => ids,
                        Selector::Range { key, min, max, count } => {
                            let (lo, lo_excl) = resolve_bound(&min, &data.singles);
                            let (hi, hi_excl) = resolve_bound(&max, &data.singles);
                            let set = data.sets.entry(key).or_default();
                            set.range(lo, lo_excl, hi, hi_excl, count)
                        }
                        Selector::IdScore { key, id, min, max } => {
                            let (lo, lo_excl) = resolve_bound(&min, &data.singles);
                            let (hi, hi_excl) = resolve_bound(&max, &data.singles);
                            let set = data.sets.entry(key).or_default();
                            match set.score_of(&id) {
                                Some(score) => {
                                    let above = lo.map_or(true, |lo| if lo_excl { score > lo } else { score >= lo });
                                    let below = hi.map_or(true, |hi| if hi_excl { score < hi } else { score <= hi });
                                    if above && below {
                                        vec![id]
                                    } else {
                                        vec![]
                                    }
                                }
                                None => vec![],
                            }
                        }
                    };
                    trace!(n = working.len(), "selector populated working set");
                }
                QueryOp::AddTo { keys, score } => {
                    // Resolve `CopyFrom` against the pre-mutation snapshot of
                    // each referenced id's score, before any key in `keys`
                    // might itself be the copy source.
                    let resolved: Vec<(EventId, Option<i64>)> = working
                        .iter()
                        .map(|id| {
                            let s = match &score {
                                ScoreSource::Auto => Some(id.score()),
                                ScoreSource::Literal(v) => Some(*v),
                                ScoreSource::CopyFrom(src) => data.sets.get(src).and_then(|s| s.score_of(id)),
                            };
                            (*id, s)
                        })
                        .collect();
                    for key in keys {
                        let set = data.sets.entry(key).or_default();
                        for (id, s) in &resolved {
                            if let Some(s) = s {
                                set.insert(*id, *s);
                            }
                        }
                    }
                }
                QueryOp::RemoveFromInput { keys } => {
                    for key in keys {
                        let set = data.sets.entry(key).or_default();
                        for id in &working {
                            set.remove(id);
                        }
                    }
                }
                QueryOp::SingleSet { key, value, if_newer } => {
                    let resolved = match value {
                        SingleSetValue::Literal(v) => Some(v),
                        SingleSetValue::FromInput(source) => working.first().and_then(|id| match &source {
                            ScoreSource::Auto => Some(id.score()),
                            ScoreSource::Literal(v) => Some(*v),
                            ScoreSource::CopyFrom(src) => data.sets.get(src).and_then(|s| s.score_of(id)),
                        }),
                    };
                    if let Some(value) = resolved {
                        let entry = data.singles.entry(key);
                        match entry {
                            std::collections::hash_map::Entry::Occupied(mut o) => {
                                if !if_newer || value > *o.get() {
                                    o.insert(value);
                                }
                            }
                            std::collections::hash_map::Entry::Vacant(v) => {
                                v.insert(value);
                            }
                        }
                    }
                }
                QueryOp::SingleGet { key } => {
                    result.singles.push(data.singles.get(&key).copied());
                }
                QueryOp::Delete { key } => {
                    data.singles.remove(&key);
                }
                QueryOp::Conditional(cond) => {
                    let holds = match &cond {
                        Conditional::IfInput => !working.is_empty(),
                        Conditional::IfNoInput => working.is_empty(),
                        Conditional::IfNotEmpty(key) => {
                            data.sets.get(key).map_or(false, |s| !s.is_empty())
                        }
                        Conditional::IfSingleSet(key) => data.singles.contains_key(key),
                    };
                    if holds && action.break_if {
                        result.ids = working;
                        return Ok(result);
                    }
                }
                QueryOp::Count => {
                    result.counts.push(working.len());
                }
            }
        }

        result.ids = working;
        Ok(result)
    }
}

#[async_trait]
impl EventStore for MemStore {
    async fn put(&self, id: EventId, expire: Time, ttl: Duration, contents: Bytes) -> Result<()> {
        let _ = ttl; // MemStore retains everything for the life of the process; no real TTL to honor.
        let mut data = self.data.lock();
        data.events.insert(id, (contents, expire));
        Ok(())
    }

    async fn get(&self, id: EventId) -> Result<Option<(Time, Bytes)>> {
        let data = self.data.lock();
        Ok(data.events.get(&id).map(|(bytes, expire)| (*expire, bytes.clone())))
    }
}

#[async_trait]
impl CatalogStore for MemStore {
    async fn add_member(&self, set: &str, member: String) -> Result<()> {
        self.catalog_sets.lock().entry(set.to_string()).or_default().insert(member);
        Ok(())
    }

    async fn members(&self, set: &str) -> Result<Vec<String>> {
        Ok(self
            .catalog_sets
            .lock()
            .get(set)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default())
    }
}

/// A [`Subscription`] backed by a `tokio::sync::broadcast` channel.
#[derive(Debug)]
pub struct MemSubscription {
    rx: broadcast::Receiver<()>,
}

#[async_trait]
impl Subscription for MemSubscription {
    async fn recv(&mut self, timeout: Duration) -> bool {
        matches!(
            tokio::time::timeout(timeout, self.rx.recv()).await,
            Ok(Ok(())) | Ok(Err(broadcast::error::RecvError::Lagged(_)))
        )
    }
}

#[async_trait]
impl Notifier for MemStore {
    type Sub = MemSubscription;

    async fn publish(&self, channel: &str) -> Result<()> {
        // No receivers is a normal, non-error outcome: nobody is blocked.
        let _ = self.channel(channel).send(());
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<Self::Sub> {
        Ok(MemSubscription {
            rx: self.channel(channel).subscribe(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::QueryAction;

    fn id(n: i64) -> EventId {
        EventId::from_parts(Time::from_timestamp_nanos(n), 0)
    }

    #[tokio::test]
    async fn add_then_range_select_returns_ascending_order() {
        let store = MemStore::new();
        let base = KeyBase::new("bq/q1/");
        let actions = vec![
            QueryAction::select(Selector::Explicit(vec![id(30), id(10), id(20)])),
            QueryAction::add_to(["bq/q1/avail/by_id"], ScoreSource::Auto),
        ];
        store.execute(&base, Time::ZERO, actions).await.unwrap();

        let actions = vec![QueryAction::select(Selector::Range {
            key: "bq/q1/avail/by_id".into(),
            min: ScoreBound::Unbounded,
            max: ScoreBound::Unbounded,
            count: None,
        })];
        let result = store.execute(&base, Time::ZERO, actions).await.unwrap();
        assert_eq!(result.ids, vec![id(10), id(20), id(30)]);
    }

    #[tokio::test]
    async fn bundle_rejects_keys_outside_its_base() {
        let store = MemStore::new();
        let base = KeyBase::new("bq/q1/");
        let actions = vec![QueryAction::select(Selector::Range {
            key: "bq/q2/avail/by_id".into(),
            min: ScoreBound::Unbounded,
            max: ScoreBound::Unbounded,
            count: None,
        })];
        let err = store.execute(&base, Time::ZERO, actions).await.unwrap_err();
        assert!(matches!(err, crate::Error::UnknownKeyPrefix { .. }));
    }

    #[tokio::test]
    async fn single_set_if_newer_only_advances() {
        let store = MemStore::new();
        let base = KeyBase::new("bq/q1/cg1/");
        store
            .execute(&base, Time::ZERO, vec![QueryAction::single_set("bq/q1/cg1/ptr", 100, true)])
            .await
            .unwrap();
        store
            .execute(&base, Time::ZERO, vec![QueryAction::single_set("bq/q1/cg1/ptr", 50, true)])
            .await
            .unwrap();
        let result = store
            .execute(&base, Time::ZERO, vec![QueryAction::single_get("bq/q1/cg1/ptr")])
            .await
            .unwrap();
        assert_eq!(result.singles, vec![Some(100)]);
    }

    #[tokio::test]
    async fn add_to_copy_from_carries_another_keys_score() {
        let store = MemStore::new();
        let base = KeyBase::new("bq/q1/");
        store
            .execute(
                &base,
                Time::ZERO,
                vec![
                    QueryAction::select(Selector::Explicit(vec![id(5)])),
                    QueryAction::add_to(["bq/q1/avail/by_expire"], ScoreSource::Literal(999)),
                    QueryAction::add_to(["bq/q1/in_use/by_expire"], ScoreSource::CopyFrom("bq/q1/avail/by_expire".into())),
                ],
            )
            .await
            .unwrap();

        let result = store
            .execute(
                &base,
                Time::ZERO,
                vec![QueryAction::select(Selector::Range {
                    key: "bq/q1/in_use/by_expire".into(),
                    min: ScoreBound::Inclusive(999),
                    max: ScoreBound::Inclusive(999),
                    count: None,
                })],
            )
            .await
            .unwrap();
        assert_eq!(result.ids, vec![id(5)]);
    }

    #[tokio::test]
    async fn single_set_from_input_uses_selected_ids_own_score() {
        let store = MemStore::new();
        let base = KeyBase::new("bq/q1/cg1/");
        store
            .execute(
                &base,
                Time::ZERO,
                vec![
                    QueryAction::select(Selector::Explicit(vec![id(42)])),
                    QueryAction::single_set_from_input("bq/q1/cg1/ptr", ScoreSource::Auto, true),
                ],
            )
            .await
            .unwrap();
        let result = store
            .execute(&base, Time::ZERO, vec![QueryAction::single_get("bq/q1/cg1/ptr")])
            .await
            .unwrap();
        assert_eq!(result.singles, vec![Some(42)]);
    }

    #[tokio::test]
    async fn break_if_stops_remaining_actions() {
        let store = MemStore::new();
        let base = KeyBase::new("bq/q1/cg1/");
        let actions = vec![
            QueryAction::select(Selector::Explicit(vec![id(1)])),
            QueryAction::break_when(Conditional::IfInput),
            QueryAction::count(), // never reached
        ];
        let result = store.execute(&base, Time::ZERO, actions).await.unwrap();
        assert!(result.counts.is_empty());
        assert_eq!(result.ids, vec![id(1)]);
    }

    #[tokio::test]
    async fn event_store_round_trips_contents() {
        let store = MemStore::new();
        let eid = id(1);
        let expire = Time::from_timestamp_nanos(1_000);
        store
            .put(eid, expire, Duration::from_secs(30), Bytes::from_static(b"hello"))
            .await
            .unwrap();
        let got = store.get(eid).await.unwrap();
        assert_eq!(got, Some((expire, Bytes::from_static(b"hello"))));
    }

    #[tokio::test]
    async fn catalog_members_are_deduplicated_and_listed() {
        let store = MemStore::new();
        store.add_member("bq/catalog/queues", "q1".into()).await.unwrap();
        store.add_member("bq/catalog/queues", "q2".into()).await.unwrap();
        store.add_member("bq/catalog/queues", "q1".into()).await.unwrap();
        let mut members = store.members("bq/catalog/queues").await.unwrap();
        members.sort();
        assert_eq!(members, vec!["q1".to_string(), "q2".to_string()]);
    }

    #[tokio::test]
    async fn publish_wakes_an_existing_subscription() {
        let store = MemStore::new();
        let mut sub = store.subscribe("bq/q1/notify").await.unwrap();
        store.publish("bq/q1/notify").await.unwrap();
        assert!(sub.recv(Duration::from_millis(50)).await);
    }
}
