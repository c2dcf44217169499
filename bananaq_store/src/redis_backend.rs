//! A [`Store`]/[`EventStore`]/[`Notifier`] implementation over a real
//! Redis-shaped ordered-set server, shipping each [`QueryActions`] bundle
//! as one Lua script (`bananaq_exec.lua`) so it runs as the single atomic
//! scripted operation spec.md §1 assumes the backing store can perform.

use crate::{
    action::{referenced_keys, Conditional, QueryActions, QueryOp, QueryResult, ScoreBound, ScoreSource, Selector, SingleSetValue},
    error::{MalformedBundleSnafu, UnknownKeyPrefixSnafu},
    key::KeyBase,
    store::{CatalogStore, EventStore, Notifier, Store, Subscription},
    Error, Result,
};
use async_trait::async_trait;
use bananaq_time::{EventId, Time};
use bytes::Bytes;
use futures::StreamExt;
use observability_deps::tracing::debug;
use redis::{aio::ConnectionManager, AsyncCommands, Client, Script};
use serde_json::{json, Value};
use snafu::ensure;
use std::time::Duration;

const SCRIPT_SRC: &str = include_str!("lua/bananaq_exec.lua");

fn transport(e: impl std::error::Error + Send + Sync + 'static) -> Error {
    Error::Transport { source: Box::new(e) }
}

/// Connection details for [`RedisStore`].
///
/// Deliberately minimal: connection pooling to the backing store is a
/// non-goal of the core (spec.md §1); an embedding application that wants
/// pooling puts a pool in front of the `redis::Client` this wraps.
#[derive(Debug, Clone)]
pub struct RedisConfig {
    /// A `redis://` connection URL.
    pub url: String,
}

impl RedisConfig {
    /// Build a config pointed at `url`.
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

/// A [`Store`] backed by a real Redis-shaped server.
#[derive(Debug)]
pub struct RedisStore {
    conn: ConnectionManager,
    pubsub_client: Client,
    script: Script,
}

impl RedisStore {
    /// Connect to the server described by `config`.
    pub async fn connect(config: RedisConfig) -> Result<Self> {
        let client = Client::open(config.url.clone()).map_err(transport)?;
        let conn = client
            .get_tokio_connection_manager()
            .await
            .map_err(transport)?;
        Ok(Self {
            conn,
            pubsub_client: client,
            script: Script::new(SCRIPT_SRC),
        })
    }
}

fn encode_bound(b: &ScoreBound) -> Value {
    match b {
        ScoreBound::Unbounded => json!({"kind": "unbounded"}),
        ScoreBound::Inclusive(v) => json!({"kind": "inclusive", "value": v}),
        ScoreBound::Exclusive(v) => json!({"kind": "exclusive", "value": v}),
        ScoreBound::InclusiveOfSingle(key) => json!({"kind": "inclusive_of_single", "key": key}),
        ScoreBound::ExclusiveOfSingle(key) => json!({"kind": "exclusive_of_single", "key": key}),
    }
}

fn encode_selector(s: &Selector) -> Value {
    match s {
        Selector::Explicit(ids) => {
            json!({"kind": "explicit", "ids": ids.iter().map(EventId::to_string).collect::<Vec<_>>()})
        }
        Selector::Range { key, min, max, count } => json!({
            "kind": "range",
            "key": key,
            "min": encode_bound(min),
            "max": encode_bound(max),
            "count": count,
        }),
        Selector::IdScore { key, id, min, max } => json!({
            "kind": "id_score",
            "key": key,
            "id": id.to_string(),
            "min": encode_bound(min),
            "max": encode_bound(max),
        }),
    }
}

fn encode_score_source(s: &ScoreSource) -> Value {
    match s {
        ScoreSource::Auto => json!({"kind": "auto"}),
        ScoreSource::Literal(v) => json!({"kind": "literal", "value": v}),
        ScoreSource::CopyFrom(key) => json!({"kind": "copy_from", "key": key}),
    }
}

fn encode_single_set_value(v: &SingleSetValue) -> Value {
    match v {
        SingleSetValue::Literal(n) => json!({"kind": "literal", "value": n}),
        SingleSetValue::FromInput(source) => json!({"kind": "from_input", "source": encode_score_source(source)}),
    }
}

fn encode_conditional(c: &Conditional) -> Value {
    match c {
        Conditional::IfInput => json!({"kind": "if_input"}),
        Conditional::IfNoInput => json!({"kind": "if_no_input"}),
        Conditional::IfNotEmpty(key) => json!({"kind": "if_not_empty", "key": key}),
        Conditional::IfSingleSet(key) => json!({"kind": "if_single_set", "key": key}),
    }
}

fn encode_op(op: &QueryOp) -> Value {
    match op {
        QueryOp::Selector(s) => json!({"kind": "selector", "selector": encode_selector(s)}),
        QueryOp::AddTo { keys, score } => json!({"kind": "add_to", "keys": keys, "score": encode_score_source(score)}),
        QueryOp::RemoveFromInput { keys } => json!({"kind": "remove_from_input", "keys": keys}),
        QueryOp::SingleSet { key, value, if_newer } => {
            json!({"kind": "single_set", "key": key, "value": encode_single_set_value(value), "if_newer": if_newer})
        }
        QueryOp::SingleGet { key } => json!({"kind": "single_get", "key": key}),
        QueryOp::Delete { key } => json!({"kind": "delete", "key": key}),
        QueryOp::Conditional(c) => json!({"kind": "conditional", "cond": encode_conditional(c)}),
        QueryOp::Count => json!({"kind": "count"}),
    }
}

fn encode_actions(actions: &QueryActions) -> Value {
    Value::Array(
        actions
            .iter()
            .map(|a| json!({"op": encode_op(&a.op), "break_if": a.break_if}))
            .collect(),
    )
}

fn parse_id(s: &str) -> Result<EventId> {
    let (nanos, seq) = s.split_once('-').context_malformed(s)?;
    let nanos: i64 = nanos.parse().map_err(|_| malformed(s))?;
    let seq: u32 = seq.parse().map_err(|_| malformed(s))?;
    Ok(EventId::from_parts(Time::from_timestamp_nanos(nanos), seq))
}

fn malformed(s: &str) -> Error {
    Error::MalformedBundle {
        reason: format!("server returned an unparseable event id: {s}"),
    }
}

trait OptionContextExt<T> {
    fn context_malformed(self, s: &str) -> Result<T>;
}

impl<T> OptionContextExt<T> for Option<T> {
    fn context_malformed(self, s: &str) -> Result<T> {
        self.ok_or_else(|| malformed(s))
    }
}

fn decode_result(raw: &str) -> Result<QueryResult> {
    let value: Value = serde_json::from_str(raw).map_err(transport)?;
    let ids = value["ids"]
        .as_array()
        .context_malformed(raw)?
        .iter()
        .map(|v| parse_id(v.as_str().unwrap_or_default()))
        .collect::<Result<Vec<_>>>()?;
    let counts = value["counts"]
        .as_array()
        .context_malformed(raw)?
        .iter()
        .map(|v| v.as_u64().unwrap_or_default() as usize)
        .collect();
    let singles = value["singles"]
        .as_array()
        .context_malformed(raw)?
        .iter()
        .map(|v| v.as_i64())
        .collect();
    Ok(QueryResult { ids, counts, singles })
}

#[async_trait]
impl Store for RedisStore {
    async fn execute(&self, base: &KeyBase, now: Time, actions: QueryActions) -> Result<QueryResult> {
        for action in &actions {
            for key in referenced_keys(action) {
                ensure!(base.owns(&key), UnknownKeyPrefixSnafu { key, base: base.as_str() });
            }
        }
        ensure!(!actions.is_empty(), MalformedBundleSnafu { reason: "empty bundle" });

        let payload = encode_actions(&actions).to_string();
        debug!(base = %base, n_actions = actions.len(), "executing bundle");

        let mut conn = self.conn.clone();
        let raw: String = self
            .script
            .key(base.as_str())
            .arg(now.timestamp_nanos())
            .arg(payload)
            .invoke_async(&mut conn)
            .await
            .map_err(transport)?;
        decode_result(&raw)
    }
}

#[async_trait]
impl EventStore for RedisStore {
    async fn put(&self, id: EventId, expire: Time, ttl: Duration, contents: Bytes) -> Result<()> {
        let mut conn = self.conn.clone();
        let key = format!("bananaq/event/{id}");
        let ttl_secs = ttl.as_secs().max(1);
        let _: () = redis::pipe()
            .atomic()
            .hset(&key, "expire", expire.timestamp_nanos())
            .hset(&key, "contents", contents.to_vec())
            .expire(&key, ttl_secs as i64)
            .query_async(&mut conn)
            .await
            .map_err(transport)?;
        Ok(())
    }

    async fn get(&self, id: EventId) -> Result<Option<(Time, Bytes)>> {
        let mut conn = self.conn.clone();
        let key = format!("bananaq/event/{id}");
        let (expire, contents): (Option<i64>, Option<Vec<u8>>) =
            conn.hget(&key, ("expire", "contents")).await.map_err(transport)?;
        Ok(match (expire, contents) {
            (Some(expire), Some(contents)) => Some((Time::from_timestamp_nanos(expire), Bytes::from(contents))),
            _ => None,
        })
    }
}

#[async_trait]
impl CatalogStore for RedisStore {
    async fn add_member(&self, set: &str, member: String) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.sadd(set, member).await.map_err(transport)?;
        Ok(())
    }

    async fn members(&self, set: &str) -> Result<Vec<String>> {
        let mut conn = self.conn.clone();
        conn.smembers(set).await.map_err(transport)
    }
}

/// A live Redis pub/sub subscription.
#[derive(Debug)]
pub struct RedisSubscription {
    pubsub: redis::aio::PubSub,
}

#[async_trait]
impl Subscription for RedisSubscription {
    async fn recv(&mut self, timeout: Duration) -> bool {
        let next = self.pubsub.on_message().next();
        matches!(tokio::time::timeout(timeout, next).await, Ok(Some(_)))
    }
}

#[async_trait]
impl Notifier for RedisStore {
    type Sub = RedisSubscription;

    async fn publish(&self, channel: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.publish(channel, 1u8).await.map_err(transport)?;
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<Self::Sub> {
        let conn = self
            .pubsub_client
            .get_async_connection()
            .await
            .map_err(transport)?;
        let mut pubsub = conn.into_pubsub();
        pubsub.subscribe(channel).await.map_err(transport)?;
        Ok(RedisSubscription { pubsub })
    }
}
