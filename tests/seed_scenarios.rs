//! The six literal seed scenarios from spec.md §8, run against `MemStore`
//! with a `MockProvider` clock so ack-deadline and expiry behavior is
//! deterministic. Scenario 4 (blocking `q_get`) necessarily runs on real
//! wall-clock time, per §8's own note.

use bananaq::{open, CatalogStore, Event, KeyNamer, Options, QGetOptions, Store};
use bananaq_store::{MemStore, QueryAction, ScoreBound, Selector};
use bananaq_time::{EventId, MockProvider, Time, TimeProvider};
use bytes::Bytes;
use std::{sync::Arc, time::Duration};

fn mock_handle(start_nanos: i64) -> (Arc<MemStore>, Arc<MockProvider>, bananaq::Handle<MemStore>) {
    let store = Arc::new(MemStore::new());
    let mock = Arc::new(MockProvider::new(Time::from_timestamp_nanos(start_nanos)));
    let time: Arc<dyn TimeProvider> = mock.clone();
    let handle = open(store.clone(), time, Options::default());
    (store, mock, handle)
}

async fn ids_in(store: &MemStore, base: &bananaq_store::KeyBase, now: Time, key: String) -> Vec<EventId> {
    let actions = vec![QueryAction::select(Selector::Range {
        key,
        min: ScoreBound::unbounded(),
        max: ScoreBound::unbounded(),
        count: None,
    })];
    store.execute(base, now, actions).await.unwrap().ids
}

/// Directly insert `ids` into `cg`'s `redo` set, bypassing the engine, as
/// spec.md §8 scenario 2's "Inject e4, e5 directly into redo" does.
async fn inject_into_redo(store: &MemStore, namer: &KeyNamer, now: Time, cg: &str, ids: &[EventId]) {
    let actions = vec![
        QueryAction::select(Selector::Explicit(ids.to_vec())),
        QueryAction::add_to([namer.redo(cg)], bananaq_store::ScoreSource::Literal(0)),
    ];
    store.execute(&namer.key_base(), now, actions).await.unwrap();
}

#[tokio::test]
async fn scenario_1_single_add_is_visible_in_both_avail_views_and_the_event_store() {
    let (store, mock, handle) = mock_handle(1_000_000_000);
    let now = mock.now();
    let expire = now.checked_add(Duration::from_secs(10)).unwrap();
    let id1 = handle.q_add("q", expire, Bytes::from_static(b"a")).await.unwrap();

    let namer = KeyNamer::new("", "q");
    let base = namer.key_base();
    assert_eq!(ids_in(&store, &base, now, namer.avail_by_id()).await, vec![id1]);
    assert_eq!(ids_in(&store, &base, now, namer.avail_by_expire()).await, vec![id1]);

    let (event_expire, contents) = store.get(id1).await.unwrap().expect("event stored");
    assert_eq!(event_expire, expire);
    assert_eq!(contents, Bytes::from_static(b"a"));
}

#[tokio::test]
async fn scenario_2_redo_priority_and_delivery_order() {
    let (store, mock, handle) = mock_handle(1_000_000_000);
    let namer = KeyNamer::new("", "q");

    let mut ids = Vec::new();
    for _ in 0..6 {
        let now = mock.now();
        let expire = now.checked_add(Duration::from_secs(3600)).unwrap();
        ids.push(handle.q_add("q", expire, Bytes::from_static(b"x")).await.unwrap());
        mock.inc(Duration::from_millis(1));
    }
    let [e0, e1, e2, e3, e4, e5]: [EventId; 6] = ids.clone().try_into().unwrap();

    let with_ack = QGetOptions { ack_deadline: Some(Duration::from_secs(1)), block_for: None };
    let without_ack = QGetOptions { ack_deadline: None, block_for: None };

    let got0 = handle.q_get("q", "cg", with_ack.clone()).await.unwrap().unwrap();
    let got1 = handle.q_get("q", "cg", with_ack.clone()).await.unwrap().unwrap();
    assert_eq!(got0.id, e0);
    assert_eq!(got1.id, e1);

    let now = mock.now();
    let mut inprog = ids_in(&store, &namer.key_base(), now, namer.inprog_by_id("cg")).await;
    inprog.sort();
    let mut expect = vec![e0, e1];
    expect.sort();
    assert_eq!(inprog, expect);

    let got2 = handle.q_get("q", "cg", without_ack.clone()).await.unwrap().unwrap();
    let got3 = handle.q_get("q", "cg", without_ack.clone()).await.unwrap().unwrap();
    assert_eq!(got2.id, e2);
    assert_eq!(got3.id, e3);

    let now = mock.now();
    let mut done = ids_in(&store, &namer.key_base(), now, namer.done("cg")).await;
    done.sort();
    let mut expect = vec![e2, e3];
    expect.sort();
    assert_eq!(done, expect);
    let inprog_unchanged = ids_in(&store, &namer.key_base(), now, namer.inprog_by_id("cg")).await;
    assert_eq!(inprog_unchanged.len(), 2);

    inject_into_redo(&store, &namer, mock.now(), "cg", &[e4, e5]).await;

    let got4 = handle.q_get("q", "cg", without_ack.clone()).await.unwrap().unwrap();
    let got5 = handle.q_get("q", "cg", without_ack.clone()).await.unwrap().unwrap();
    assert_eq!(got4.id, e4);
    assert_eq!(got5.id, e5);

    let now = mock.now();
    let mut done = ids_in(&store, &namer.key_base(), now, namer.done("cg")).await;
    done.sort();
    let mut expect = vec![e2, e3, e4, e5];
    expect.sort();
    assert_eq!(done, expect);
    assert!(ids_in(&store, &namer.key_base(), now, namer.redo("cg")).await.is_empty());

    let empty = handle.q_get("q", "cg", without_ack).await.unwrap();
    assert!(empty.is_none());
}

#[tokio::test]
async fn scenario_3_late_arrival_with_earlier_expire_is_still_delivered_by_creation_order() {
    let (_store, mock, handle) = mock_handle(1_000_000_000);
    let without_ack = QGetOptions { ack_deadline: None, block_for: None };

    let mut last_id = None;
    for _ in 0..6 {
        let now = mock.now();
        let expire = now.checked_add(Duration::from_secs(3600)).unwrap();
        last_id = Some(handle.q_add("q", expire, Bytes::from_static(b"x")).await.unwrap());
        mock.inc(Duration::from_millis(1));
        handle.q_get("q", "cg", without_ack.clone()).await.unwrap();
    }
    let _e5 = last_id.unwrap();

    // id7's expire (now + 5s) is earlier than every prior event's (now +
    // 3600s), but delivery order is by creation time, not expire.
    let now = mock.now();
    let id7_expire = now.checked_add(Duration::from_secs(5)).unwrap();
    let id7 = handle.q_add("q", id7_expire, Bytes::from_static(b"late")).await.unwrap();

    let got = handle.q_get("q", "cg", without_ack).await.unwrap().unwrap();
    assert_eq!(got.id, id7);
    assert_eq!(got.contents, Bytes::from_static(b"late"));
}

#[tokio::test(flavor = "multi_thread")]
async fn scenario_4_blocking_q_get_wakes_on_add() {
    let store = Arc::new(MemStore::new());
    let time: Arc<dyn TimeProvider> = Arc::new(bananaq_time::SystemProvider::new());
    let handle = open(store, time, Options::default());

    let empty_handle = handle.clone();
    let started = std::time::Instant::now();
    let empty = empty_handle
        .q_get(
            "q",
            "cg",
            QGetOptions { ack_deadline: None, block_for: Some(Duration::from_millis(300)) },
        )
        .await
        .unwrap();
    assert!(empty.is_none());
    assert!(started.elapsed() >= Duration::from_millis(280));

    let producer = handle.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        let now = bananaq_time::SystemProvider::new().now();
        producer
            .q_add("q", now.checked_add(Duration::from_secs(10)).unwrap(), Bytes::from_static(b"woke"))
            .await
            .unwrap();
    });

    let started = std::time::Instant::now();
    let got = handle
        .q_get(
            "q",
            "cg",
            QGetOptions { ack_deadline: None, block_for: Some(Duration::from_secs(2)) },
        )
        .await
        .unwrap()
        .expect("event delivered to blocked q_get");
    assert_eq!(got.contents, Bytes::from_static(b"woke"));
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(80) && elapsed < Duration::from_secs(2));
}

#[tokio::test]
async fn scenario_5_ack_window_is_exact_and_idempotent() {
    let (_store, mock, handle) = mock_handle(1_000_000_000);

    let expire = mock.now().checked_add(Duration::from_secs(3600)).unwrap();
    let missed_id = handle.q_add("q", expire, Bytes::from_static(b"missed")).await.unwrap();
    let acked_id = handle.q_add("q", expire, Bytes::from_static(b"acked")).await.unwrap();

    // Deliver both with a deadline 10ms in the future, then advance past it
    // for the first and stay before it for the second.
    let got_missed = handle
        .q_get("q", "cg", QGetOptions { ack_deadline: Some(Duration::from_millis(10)), block_for: None })
        .await
        .unwrap()
        .unwrap();
    assert_eq!(got_missed.id, missed_id);
    mock.inc(Duration::from_millis(20));
    let ok = handle.q_ack("q", "cg", missed_id).await.unwrap();
    assert!(!ok, "ack after the deadline must return false");

    handle.clean("q", "cg").await.unwrap();

    let got_acked = handle
        .q_get("q", "cg", QGetOptions { ack_deadline: Some(Duration::from_secs(10)), block_for: None })
        .await
        .unwrap()
        .unwrap();
    assert_eq!(got_acked.id, acked_id);
    let ok = handle.q_ack("q", "cg", acked_id).await.unwrap();
    assert!(ok, "ack before the deadline must return true");
    let second = handle.q_ack("q", "cg", acked_id).await.unwrap();
    assert!(!second, "a second ack for the same event must return false");
}

#[tokio::test]
async fn scenario_6_clean_purges_expired_ids_and_migrates_missed_deadlines() {
    let (store, mock, handle) = mock_handle(1_000_000_000);
    let namer = KeyNamer::new("", "q");
    let base = namer.key_base();

    let short_expire = mock.now().checked_add(Duration::from_millis(50)).unwrap();
    let long_expire = mock.now().checked_add(Duration::from_secs(3600)).unwrap();

    let expired_inprog = handle.q_add("q", short_expire, Bytes::from_static(b"a")).await.unwrap();
    let live_inprog = handle.q_add("q", long_expire, Bytes::from_static(b"b")).await.unwrap();
    let expired_done = handle.q_add("q", short_expire, Bytes::from_static(b"c")).await.unwrap();
    let live_done = handle.q_add("q", long_expire, Bytes::from_static(b"d")).await.unwrap();

    // Deliver the inprog pair with a deadline already in the past so Clean
    // must migrate `live_inprog` to redo.
    let missed_deadline = QGetOptions { ack_deadline: Some(Duration::from_nanos(1)), block_for: None };
    let a = handle.q_get("q", "cg", missed_deadline.clone()).await.unwrap().unwrap();
    let b = handle.q_get("q", "cg", missed_deadline).await.unwrap().unwrap();
    assert_eq!(vec![a.id, b.id].into_iter().collect::<std::collections::HashSet<_>>(), [expired_inprog, live_inprog].into_iter().collect());

    let no_ack = QGetOptions { ack_deadline: None, block_for: None };
    let c = handle.q_get("q", "cg", no_ack.clone()).await.unwrap().unwrap();
    let d = handle.q_get("q", "cg", no_ack).await.unwrap().unwrap();
    assert_eq!(vec![c.id, d.id].into_iter().collect::<std::collections::HashSet<_>>(), [expired_done, live_done].into_iter().collect());

    // Advance past the short expiry (and past the 1ns ack deadline, already
    // elapsed) but not past the long one.
    mock.inc(Duration::from_millis(200));
    let now = mock.now();

    handle.clean("q", "cg").await.unwrap();

    let in_use = ids_in(&store, &base, now, namer.in_use_by_expire("cg")).await;
    assert!(!in_use.contains(&expired_inprog));
    assert!(!in_use.contains(&expired_done));
    assert!(in_use.contains(&live_inprog));
    assert!(in_use.contains(&live_done));

    let redo = ids_in(&store, &base, now, namer.redo("cg")).await;
    assert_eq!(redo, vec![live_inprog]);

    let inprog = ids_in(&store, &base, now, namer.inprog_by_id("cg")).await;
    assert!(inprog.is_empty());

    let done = ids_in(&store, &base, now, namer.done("cg")).await;
    assert_eq!(done, vec![live_done]);
}
