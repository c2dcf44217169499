//! The queue engine: `q_add`, `q_get`, `q_ack`, `clean`, `clean_available`,
//! `clean_all`, and `q_status` (spec.md §4.2–§4.8). Each of these composes
//! one or more [`bananaq_store::QueryActions`] bundles against a single
//! queue's [`bananaq_store::KeyBase`], per §5's atomicity boundary.

use crate::{
    key::KeyNamer, EmptyConsumerGroupSnafu, EmptyQueueSnafu, Event, Handle, NonPositiveExpireSnafu,
    Result,
};
use bananaq_store::{
    CatalogStore, Conditional, EventStore, Notifier, QueryAction, ScoreBound, ScoreSource,
    Selector, Store, Subscription,
};
use bananaq_time::{EventId, Time};
use bytes::Bytes;
use observability_deps::tracing::{debug, warn};
use snafu::ensure;
use std::{collections::HashMap, time::Duration};

/// Inputs to [`Handle::q_get`] beyond `queue`/`consumer_group` (spec.md §6).
#[derive(Debug, Clone, Default)]
pub struct QGetOptions {
    /// How long a delivered event has to be acknowledged before it is
    /// considered missed and redelivered by [`Handle::clean`]. `None` means
    /// no ack is required: the event is marked `done` immediately.
    pub ack_deadline: Option<Duration>,
    /// How long to wait for an event to become available if none is ready
    /// immediately. `None` means return immediately (spec.md §4.3
    /// "Non-blocking path"); `Some(d)` runs the "Blocking path".
    pub block_for: Option<Duration>,
}

/// Per-`(queue, consumer_group)` counts reported by [`Handle::q_status`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsumerGroupStatus {
    /// Events in this queue's `avail` not yet offered to this group.
    pub available: usize,
    /// Events handed to this group, awaiting acknowledgment.
    pub in_progress: usize,
    /// Events that missed their ack deadline and await redelivery.
    pub redo: usize,
}

/// Per-queue counts reported by [`Handle::q_status`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueStatus {
    /// Total non-expired events currently in this queue's `avail` set.
    pub total: usize,
    /// Status broken down by consumer group.
    pub per_consumer_group: HashMap<String, ConsumerGroupStatus>,
}

/// The result shape of [`Handle::q_status`] (spec.md §6).
pub type QStatus = HashMap<String, QueueStatus>;

/// The `maybeDone` tail shared by all three `q_get` stanzas (spec.md §4.3):
/// advance the cursor to the selected event, then file it into `inprog` (if
/// an ack is required) or straight into `done`, carrying the event's
/// `expire` into `in_use/by_expire` from `avail/by_expire` via
/// [`ScoreSource::CopyFrom`] rather than a second round trip.
fn maybe_done_actions(namer: &KeyNamer, cg: &str, ack_deadline_nanos: Option<i64>) -> Vec<QueryAction> {
    let mut actions = vec![QueryAction::single_set_from_input(namer.ptr(cg), ScoreSource::Auto, true)];
    let in_use = namer.in_use_by_expire(cg);
    let carry_expire = ScoreSource::CopyFrom(namer.avail_by_expire());
    match ack_deadline_nanos {
        Some(deadline) => {
            actions.push(QueryAction::add_to([namer.inprog_by_id(cg)], ScoreSource::Literal(0)));
            actions.push(QueryAction::add_to([namer.inprog_by_ack(cg)], ScoreSource::Literal(deadline)));
            actions.push(QueryAction::add_to([in_use], carry_expire));
        }
        None => {
            actions.push(QueryAction::add_to([namer.done(cg)], ScoreSource::Literal(0)));
            actions.push(QueryAction::add_to([in_use], carry_expire));
        }
    }
    actions
}

impl<S> Handle<S>
where
    S: Store + EventStore + CatalogStore + Notifier + 'static,
{
    /// Add a new event to `queue`, expiring at `expire` (spec.md §4.2).
    pub async fn q_add(&self, queue: impl Into<String>, expire: Time, contents: impl Into<Bytes>) -> Result<EventId> {
        let queue = queue.into();
        ensure!(!queue.is_empty(), EmptyQueueSnafu);
        let now = self.clock.now();
        ensure!(expire > now, NonPositiveExpireSnafu);
        let contents = contents.into();

        let id = self.clock.new_id();
        let namer = self.namer(&queue);
        let grace_nanos = self.options.event_ttl_grace.as_nanos() as i64;
        let ttl_nanos = (expire.timestamp_nanos() - now.timestamp_nanos() + grace_nanos).max(1);
        let ttl = Duration::from_nanos(ttl_nanos as u64);

        // Event-store write precedes the index write (spec.md §5 "Atomicity
        // boundary") so a reader can never observe an `avail` entry whose
        // blob is absent.
        self.store.put(id, expire, ttl, contents).await?;

        let actions = vec![
            QueryAction::select(Selector::Explicit(vec![id])),
            QueryAction::add_to([namer.avail_by_id()], ScoreSource::Auto),
            QueryAction::add_to([namer.avail_by_expire()], ScoreSource::Literal(expire.timestamp_nanos())),
        ];
        self.store.execute(&namer.key_base(), now, actions).await?;

        self.catalog.record_queue(&queue).await?;
        self.store.publish(&namer.notify_channel()).await?;
        self.metrics.inc_q_add(&queue);
        debug!(queue, %id, "q_add");
        Ok(id)
    }

    /// One non-blocking attempt to deliver an event to `(queue, cg)`: the
    /// three stanzas of spec.md §4.3, run as a single atomic bundle.
    async fn q_get_once(&self, queue: &str, cg: &str, ack_deadline: Option<Duration>) -> Result<Option<Event>> {
        let now = self.clock.now();
        let now_nanos = now.timestamp_nanos();
        let namer = self.namer(queue);
        let ack_deadline_nanos = ack_deadline.and_then(|d| now.checked_add(d)).map(|t| t.timestamp_nanos());

        let mut actions = Vec::new();

        // Stanza A: redo wins.
        actions.push(QueryAction::select(Selector::Range {
            key: namer.in_use_by_expire(cg),
            min: ScoreBound::unbounded(),
            max: ScoreBound::Exclusive(now_nanos),
            count: None,
        }));
        actions.push(QueryAction::remove_from_input([namer.redo(cg), namer.in_use_by_expire(cg)]));
        actions.push(QueryAction::select(Selector::Range {
            key: namer.redo(cg),
            min: ScoreBound::unbounded(),
            max: ScoreBound::unbounded(),
            count: Some(1),
        }));
        actions.push(QueryAction::remove_from_input([namer.redo(cg)]));
        actions.extend(maybe_done_actions(&namer, cg, ack_deadline_nanos));
        actions.push(QueryAction::break_when(Conditional::IfInput));

        // Stanza B: avail beyond the cursor.
        actions.push(QueryAction::select(Selector::Range {
            key: namer.avail_by_expire(),
            min: ScoreBound::unbounded(),
            max: ScoreBound::Exclusive(now_nanos),
            count: None,
        }));
        actions.push(QueryAction::remove_from_input([namer.avail_by_id(), namer.avail_by_expire()]));
        actions.push(QueryAction::select(Selector::Range {
            key: namer.avail_by_id(),
            min: ScoreBound::ExclusiveOfSingle(namer.ptr(cg)),
            max: ScoreBound::unbounded(),
            count: Some(1),
        }));
        actions.extend(maybe_done_actions(&namer, cg, ack_deadline_nanos));
        actions.push(QueryAction::break_when(Conditional::IfInput));

        // Stanza C: cursor absent -- this group has never consumed anything.
        actions.push(QueryAction::break_when(Conditional::IfSingleSet(namer.ptr(cg))));
        actions.push(QueryAction::select(Selector::Range {
            key: namer.avail_by_id(),
            min: ScoreBound::unbounded(),
            max: ScoreBound::unbounded(),
            count: Some(1),
        }));
        actions.extend(maybe_done_actions(&namer, cg, ack_deadline_nanos));

        let result = self.store.execute(&namer.key_base(), now, actions).await?;
        let Some(&id) = result.ids.first() else {
            self.metrics.inc_q_get_empty(queue);
            return Ok(None);
        };

        match self.store.get(id).await? {
            Some((expire, contents)) => {
                self.metrics.inc_q_get_delivered(queue);
                debug!(queue, cg, %id, "q_get delivered");
                Ok(Some(Event { id, expire, contents }))
            }
            None => {
                warn!(queue, cg, %id, "selected id has no event-store entry; treating as empty");
                Ok(None)
            }
        }
    }

    /// Deliver the next event for `(queue, consumer_group)` (spec.md §4.3).
    ///
    /// With `opts.block_for` unset, tries once and returns immediately.
    /// With it set, subscribes to this queue's notification channel
    /// *before* the first attempt (the lost-wakeup-safe ordering from §5),
    /// then retries on every wakeup until an event is delivered or the
    /// window elapses.
    pub async fn q_get(&self, queue: impl Into<String>, consumer_group: impl Into<String>, opts: QGetOptions) -> Result<Option<Event>> {
        let queue = queue.into();
        let cg = consumer_group.into();
        ensure!(!queue.is_empty(), EmptyQueueSnafu);
        ensure!(!cg.is_empty(), EmptyConsumerGroupSnafu);
        self.catalog.record_consumer_group(&queue, &cg).await?;

        match opts.block_for {
            None => self.q_get_once(&queue, &cg, opts.ack_deadline).await,
            Some(block_for) => {
                let namer = self.namer(&queue);
                let mut sub = self.store.subscribe(&namer.notify_channel()).await?;
                let deadline = tokio::time::Instant::now() + block_for;
                loop {
                    if let Some(event) = self.q_get_once(&queue, &cg, opts.ack_deadline).await? {
                        return Ok(Some(event));
                    }
                    let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
                    if remaining.is_zero() {
                        return Ok(None);
                    }
                    if !sub.recv(remaining).await {
                        return Ok(None);
                    }
                }
            }
        }
    }

    /// Acknowledge `event_id` for `(queue, consumer_group)` (spec.md §4.4).
    /// Idempotent: returns `false` on a second call for the same id, or a
    /// call past the ack deadline.
    pub async fn q_ack(&self, queue: &str, consumer_group: &str, event_id: EventId) -> Result<bool> {
        ensure!(!queue.is_empty(), EmptyQueueSnafu);
        ensure!(!consumer_group.is_empty(), EmptyConsumerGroupSnafu);
        let now = self.clock.now();
        let now_nanos = now.timestamp_nanos();
        let namer = self.namer(queue);

        let actions = vec![
            QueryAction::select(Selector::Range {
                key: namer.in_use_by_expire(consumer_group),
                min: ScoreBound::unbounded(),
                max: ScoreBound::Exclusive(now_nanos),
                count: None,
            }),
            QueryAction::remove_from_input([
                namer.inprog_by_id(consumer_group),
                namer.inprog_by_ack(consumer_group),
                namer.in_use_by_expire(consumer_group),
            ]),
            QueryAction::select(Selector::IdScore {
                key: namer.inprog_by_ack(consumer_group),
                id: event_id,
                min: ScoreBound::Inclusive(now_nanos),
                max: ScoreBound::unbounded(),
            }),
            QueryAction::remove_from_input([namer.inprog_by_id(consumer_group), namer.inprog_by_ack(consumer_group)]),
            QueryAction::add_to([namer.done(consumer_group)], ScoreSource::Literal(0)),
        ];

        let result = self.store.execute(&namer.key_base(), now, actions).await?;
        let acked = result.has_input();
        if acked {
            self.metrics.inc_q_ack_true(queue);
        } else {
            self.metrics.inc_q_ack_false(queue);
        }
        debug!(queue, consumer_group, %event_id, acked, "q_ack");
        Ok(acked)
    }

    /// Sweep expired and deadline-missed events for one consumer group, and
    /// reset its cursor once fully drained (spec.md §4.5).
    pub async fn clean(&self, queue: &str, consumer_group: &str) -> Result<()> {
        let now = self.clock.now();
        let now_nanos = now.timestamp_nanos();
        let namer = self.namer(queue);

        let actions = vec![
            // Purge ids whose event has expired out of every role they might hold.
            QueryAction::select(Selector::Range {
                key: namer.in_use_by_expire(consumer_group),
                min: ScoreBound::unbounded(),
                max: ScoreBound::Exclusive(now_nanos),
                count: None,
            }),
            QueryAction::count(),
            QueryAction::remove_from_input([
                namer.inprog_by_id(consumer_group),
                namer.inprog_by_ack(consumer_group),
                namer.redo(consumer_group),
                namer.done(consumer_group),
                namer.in_use_by_expire(consumer_group),
            ]),
            // Deadline-missed: migrate inprog -> redo.
            QueryAction::select(Selector::Range {
                key: namer.inprog_by_ack(consumer_group),
                min: ScoreBound::unbounded(),
                max: ScoreBound::Exclusive(now_nanos),
                count: None,
            }),
            QueryAction::remove_from_input([namer.inprog_by_id(consumer_group), namer.inprog_by_ack(consumer_group)]),
            QueryAction::add_to([namer.redo(consumer_group)], ScoreSource::Literal(0)),
            // If nothing remains in avail at or before the cursor, the group has
            // drained completely; let it restart from the beginning.
            QueryAction::select(Selector::Range {
                key: namer.avail_by_id(),
                min: ScoreBound::unbounded(),
                max: ScoreBound::InclusiveOfSingle(namer.ptr(consumer_group)),
                count: Some(1),
            }),
            QueryAction::break_when(Conditional::IfInput),
            QueryAction::delete(namer.ptr(consumer_group)),
        ];

        let result = self.store.execute(&namer.key_base(), now, actions).await?;
        self.metrics.inc_clean_purged(queue, result.counts.first().copied().unwrap_or(0) as u64);
        Ok(())
    }

    /// Sweep expired events out of a queue's `avail` set (spec.md §4.6).
    pub async fn clean_available(&self, queue: &str) -> Result<()> {
        let now = self.clock.now();
        let now_nanos = now.timestamp_nanos();
        let namer = self.namer(queue);

        let actions = vec![
            QueryAction::select(Selector::Range {
                key: namer.avail_by_expire(),
                min: ScoreBound::unbounded(),
                max: ScoreBound::Exclusive(now_nanos),
                count: None,
            }),
            QueryAction::count(),
            QueryAction::remove_from_input([namer.avail_by_id(), namer.avail_by_expire()]),
        ];

        let result = self.store.execute(&namer.key_base(), now, actions).await?;
        self.metrics.inc_clean_purged(queue, result.counts.first().copied().unwrap_or(0) as u64);
        Ok(())
    }

    /// Run [`Handle::clean_available`] and [`Handle::clean`] over every
    /// queue and consumer group known to the catalog (spec.md §4.7).
    pub async fn clean_all(&self) -> Result<()> {
        for queue in self.catalog.queues().await? {
            self.clean_available(&queue).await?;
        }
        for (queue, cg) in self.catalog.consumer_groups(None).await? {
            self.clean(&queue, &cg).await?;
        }
        Ok(())
    }

    /// Report per-queue, per-consumer-group counts (spec.md §6 `QStatus`).
    /// With `filter` unset, enumerates every queue and consumer group known
    /// to the catalog; otherwise reports only the given `queue -> [cg]`
    /// pairs.
    pub async fn q_status(&self, filter: Option<HashMap<String, Vec<String>>>) -> Result<QStatus> {
        let targets: Vec<(String, Vec<String>)> = match filter {
            Some(map) => map.into_iter().collect(),
            None => {
                let mut by_queue: HashMap<String, Vec<String>> = HashMap::new();
                for queue in self.catalog.queues().await? {
                    by_queue.entry(queue).or_default();
                }
                for (queue, cg) in self.catalog.consumer_groups(None).await? {
                    by_queue.entry(queue).or_default().push(cg);
                }
                by_queue.into_iter().collect()
            }
        };

        let now = self.clock.now();
        let mut status = QStatus::new();
        for (queue, cgs) in targets {
            let namer = self.namer(&queue);
            let base = namer.key_base();

            let total_result = self
                .store
                .execute(
                    &base,
                    now,
                    vec![
                        QueryAction::select(Selector::Range {
                            key: namer.avail_by_id(),
                            min: ScoreBound::unbounded(),
                            max: ScoreBound::unbounded(),
                            count: None,
                        }),
                        QueryAction::count(),
                    ],
                )
                .await?;
            let total = total_result.counts.first().copied().unwrap_or(0);

            let mut per_consumer_group = HashMap::new();
            for cg in cgs {
                let cg_result = self
                    .store
                    .execute(
                        &base,
                        now,
                        vec![
                            QueryAction::select(Selector::Range {
                                key: namer.avail_by_id(),
                                min: ScoreBound::ExclusiveOfSingle(namer.ptr(&cg)),
                                max: ScoreBound::unbounded(),
                                count: None,
                            }),
                            QueryAction::count(),
                            QueryAction::select(Selector::Range {
                                key: namer.inprog_by_id(&cg),
                                min: ScoreBound::unbounded(),
                                max: ScoreBound::unbounded(),
                                count: None,
                            }),
                            QueryAction::count(),
                            QueryAction::select(Selector::Range {
                                key: namer.redo(&cg),
                                min: ScoreBound::unbounded(),
                                max: ScoreBound::unbounded(),
                                count: None,
                            }),
                            QueryAction::count(),
                        ],
                    )
                    .await?;
                per_consumer_group.insert(
                    cg,
                    ConsumerGroupStatus {
                        available: cg_result.counts.first().copied().unwrap_or(0),
                        in_progress: cg_result.counts.get(1).copied().unwrap_or(0),
                        redo: cg_result.counts.get(2).copied().unwrap_or(0),
                    },
                );
            }
            status.insert(queue, QueueStatus { total, per_consumer_group });
        }
        Ok(status)
    }
}
