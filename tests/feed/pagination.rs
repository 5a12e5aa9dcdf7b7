//! Sequence controller: paging, at-most-one in flight, query changes, errors.

use shelf_feed::{
    BusMessage, ContentFilter, Cursor, FeedError, FetchState, IgnoreReason, QueryKey,
    SentinelOutcome, SortMode, Topic,
};

use crate::support::{client, post, quote, review, StubBackend};

fn recent() -> QueryKey {
    QueryKey::new(ContentFilter::All, SortMode::Recent, "")
}

fn cursors(backend: &StubBackend) -> Vec<Option<Cursor>> {
    backend.fetch_calls().into_iter().map(|(_, c)| c).collect()
}

// ============================================================================
// Paging
// ============================================================================

#[tokio::test]
async fn pages_append_until_the_backend_runs_out() {
    let backend = StubBackend::new();
    backend.page(None, vec![quote("q1", 3), review("r1", 1)], Some("c2"));
    backend.page(Some("c2"), vec![post("p1", 0)], None);
    let client = client(&backend);
    let view = client.controller(recent());

    assert_eq!(
        view.on_sentinel_visible().await.unwrap(),
        SentinelOutcome::Appended { items: 2, exhausted: false }
    );
    assert_eq!(
        view.on_sentinel_visible().await.unwrap(),
        SentinelOutcome::Appended { items: 1, exhausted: true }
    );
    assert_eq!(
        view.on_sentinel_visible().await.unwrap(),
        SentinelOutcome::Ignored(IgnoreReason::Exhausted)
    );

    let snapshot = view.snapshot().unwrap();
    let ids: Vec<&str> = snapshot.items.iter().map(|e| e.id.as_str()).collect();
    assert_eq!(ids, vec!["q1", "r1", "p1"]);
    assert_eq!(snapshot.state, FetchState::Idle);
    assert!(!snapshot.has_more);
    assert_eq!(cursors(&backend), vec![None, Some(Cursor::new("c2"))]);
}

#[tokio::test]
async fn empty_first_page_is_terminal() {
    let backend = StubBackend::new();
    let client = client(&backend);
    let view = client.controller(recent());

    assert_eq!(
        view.on_sentinel_visible().await.unwrap(),
        SentinelOutcome::Appended { items: 0, exhausted: true }
    );
    assert!(view.snapshot().unwrap().items.is_empty());
    assert_eq!(
        view.on_sentinel_visible().await.unwrap(),
        SentinelOutcome::Ignored(IgnoreReason::Exhausted)
    );
    assert_eq!(backend.fetch_calls().len(), 1);
}

#[tokio::test]
async fn two_rapid_sentinel_signals_issue_one_request() {
    let backend = StubBackend::new();
    backend.page(None, vec![quote("q1", 3)], Some("c2"));
    let gate = backend.hold_fetches();
    let client = client(&backend);
    let view = client.controller(recent());

    let first = view.sentinel().visible().expect("controller alive");
    backend.fetch_started.notified().await;
    assert_eq!(view.snapshot().unwrap().state, FetchState::Loading);

    assert_eq!(
        view.on_sentinel_visible().await.unwrap(),
        SentinelOutcome::Ignored(IgnoreReason::Busy)
    );

    gate.open();
    assert_eq!(
        first.await.unwrap().unwrap(),
        SentinelOutcome::Appended { items: 1, exhausted: false }
    );
    assert_eq!(backend.fetch_calls().len(), 1);
}

#[tokio::test]
async fn cancelled_fetch_returns_the_view_to_idle() {
    let backend = StubBackend::new();
    backend.page(None, vec![quote("q1", 3)], Some("c2"));
    let gate = backend.hold_fetches();
    let client = client(&backend);
    let view = client.controller(recent());

    let fetch = view.sentinel().visible().expect("controller alive");
    backend.fetch_started.notified().await;
    fetch.abort();
    assert!(fetch.await.unwrap_err().is_cancelled());

    assert_eq!(view.snapshot().unwrap().state, FetchState::Idle);
    gate.open();
    assert_eq!(
        view.on_sentinel_visible().await.unwrap(),
        SentinelOutcome::Appended { items: 1, exhausted: false }
    );
    assert_eq!(cursors(&backend), vec![None, None]);
}

#[tokio::test]
async fn panicking_callback_fetch_does_not_wedge_the_view() {
    let backend = StubBackend::new();
    backend.page(None, vec![quote("q1", 3)], None);
    backend.panic_next_fetch();
    let client = client(&backend);
    let view = client.controller(recent());
    let on_visible = view.sentinel().into_callback();

    on_visible();
    backend.fetch_started.notified().await;
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }

    assert_eq!(view.snapshot().unwrap().state, FetchState::Idle);
    assert_eq!(
        view.on_sentinel_visible().await.unwrap(),
        SentinelOutcome::Appended { items: 1, exhausted: true }
    );
    assert_eq!(backend.fetch_calls().len(), 2);
}

// ============================================================================
// Query changes
// ============================================================================

#[tokio::test]
async fn sort_change_discards_pages_and_restarts_from_the_top() {
    let backend = StubBackend::new();
    backend.page(None, vec![quote("q1", 3), quote("q2", 5)], Some("c2"));
    let client = client(&backend);
    let mut feed_events = client.subscribe(&[Topic::Feed]);
    let view = client.controller(recent());
    view.on_sentinel_visible().await.unwrap();

    let trending = recent().with_sort(SortMode::Trending);
    view.set_query(trending.clone()).unwrap();

    let snapshot = view.snapshot().unwrap();
    assert!(snapshot.items.is_empty());
    assert_eq!(snapshot.state, FetchState::Idle);
    assert!(!client.cache().contains_query(&recent()).unwrap());
    assert_eq!(
        feed_events.drain(),
        vec![BusMessage::FeedInvalidated {
            previous: recent(),
            current: Some(trending.clone()),
        }]
    );

    view.on_sentinel_visible().await.unwrap();
    let calls = backend.fetch_calls();
    assert_eq!(calls.last(), Some(&(trending, None)));
}

#[tokio::test]
async fn setting_the_same_query_keeps_pages() {
    let backend = StubBackend::new();
    backend.page(None, vec![quote("q1", 3)], Some("c2"));
    let client = client(&backend);
    let view = client.controller(recent());
    view.on_sentinel_visible().await.unwrap();

    view.set_query(recent()).unwrap();

    assert_eq!(view.snapshot().unwrap().items.len(), 1);
}

#[tokio::test]
async fn responses_for_a_replaced_query_are_discarded() {
    let backend = StubBackend::new();
    backend.page(None, vec![quote("q1", 3)], Some("c2"));
    let gate = backend.hold_fetches();
    let client = client(&backend);
    let view = client.controller(recent());

    let in_flight = view.sentinel().visible().expect("controller alive");
    backend.fetch_started.notified().await;

    let search = recent().with_search("middlemarch");
    view.set_query(search.clone()).unwrap();
    gate.open();

    assert_eq!(in_flight.await.unwrap().unwrap(), SentinelOutcome::Discarded);
    let snapshot = view.snapshot().unwrap();
    assert!(snapshot.items.is_empty());
    assert_eq!(snapshot.state, FetchState::Idle);
    assert!(!client.cache().contains_query(&recent()).unwrap());
}

#[tokio::test]
async fn unmount_drops_pages_and_ignores_signals() {
    let backend = StubBackend::new();
    backend.page(None, vec![quote("q1", 3)], Some("c2"));
    let client = client(&backend);
    let mut feed_events = client.subscribe(&[Topic::Feed]);
    let view = client.controller(recent());
    view.on_sentinel_visible().await.unwrap();

    view.unmount().unwrap();

    assert!(client.cache().queries().unwrap().is_empty());
    assert_eq!(view.active_query().unwrap(), None);
    assert_eq!(
        view.on_sentinel_visible().await.unwrap(),
        SentinelOutcome::Ignored(IgnoreReason::Unmounted)
    );
    assert_eq!(
        feed_events.drain(),
        vec![BusMessage::FeedInvalidated {
            previous: recent(),
            current: None,
        }]
    );
}

#[tokio::test]
async fn views_sharing_a_query_keep_its_pages_until_the_last_leaves() {
    let backend = StubBackend::new();
    backend.page(None, vec![quote("q1", 3), quote("q2", 5)], Some("c2"));
    let client = client(&backend);
    let first = client.controller(recent());
    let second = client.controller(recent());
    first.on_sentinel_visible().await.unwrap();
    assert_eq!(second.snapshot().unwrap().items.len(), 2);

    second.unmount().unwrap();

    assert_eq!(first.snapshot().unwrap().items.len(), 2);
    assert_eq!(client.cache().views(&recent()), 1);

    drop(first);
    assert!(!client.cache().contains_query(&recent()).unwrap());
    assert_eq!(client.cache().views(&recent()), 0);
}

#[tokio::test]
async fn switching_one_view_away_leaves_the_other_intact() {
    let backend = StubBackend::new();
    backend.page(None, vec![quote("q1", 3), quote("q2", 5)], Some("c2"));
    backend.page(Some("c2"), vec![post("p1", 0)], None);
    let client = client(&backend);
    let first = client.controller(recent());
    let second = client.controller(recent());
    first.on_sentinel_visible().await.unwrap();

    second.set_query(recent().with_sort(SortMode::Trending)).unwrap();

    assert_eq!(first.snapshot().unwrap().items.len(), 2);
    assert!(second.snapshot().unwrap().items.is_empty());

    // coming back joins the pages already loaded and continues from them
    second.set_query(recent()).unwrap();
    assert_eq!(second.snapshot().unwrap().items.len(), 2);
    assert_eq!(
        second.on_sentinel_visible().await.unwrap(),
        SentinelOutcome::Appended { items: 1, exhausted: true }
    );
    assert_eq!(first.snapshot().unwrap().items.len(), 3);
    assert_eq!(cursors(&backend), vec![None, Some(Cursor::new("c2"))]);
}

#[tokio::test]
async fn sentinel_outliving_its_view_does_nothing() {
    let backend = StubBackend::new();
    let client = client(&backend);
    let sentinel = client.controller(recent()).sentinel();

    assert!(sentinel.visible().is_none());
    assert!(backend.fetch_calls().is_empty());
}

// ============================================================================
// Errors
// ============================================================================

#[tokio::test]
async fn failure_waits_for_retry_with_the_same_cursor() {
    let backend = StubBackend::new();
    backend.page(None, vec![quote("q1", 3)], Some("c2"));
    backend.page(Some("c2"), vec![quote("q2", 5)], None);
    let client = client(&backend);
    let view = client.controller(recent());
    view.on_sentinel_visible().await.unwrap();

    backend.fail_next_fetch(FeedError::Network("connection reset".into()));
    let err = view.on_sentinel_visible().await.unwrap_err();
    assert!(err.is_retryable());

    let snapshot = view.snapshot().unwrap();
    assert_eq!(snapshot.state, FetchState::Error);
    assert_eq!(snapshot.error, Some(err));
    assert_eq!(snapshot.items.len(), 1);

    assert_eq!(
        view.on_sentinel_visible().await.unwrap(),
        SentinelOutcome::Ignored(IgnoreReason::Failed)
    );
    assert_eq!(backend.fetch_calls().len(), 2);

    assert_eq!(
        view.retry().await.unwrap(),
        SentinelOutcome::Appended { items: 1, exhausted: true }
    );
    assert_eq!(
        cursors(&backend),
        vec![None, Some(Cursor::new("c2")), Some(Cursor::new("c2"))]
    );
    assert_eq!(view.snapshot().unwrap().error, None);
}

#[tokio::test]
async fn retry_without_a_failure_is_ignored() {
    let backend = StubBackend::new();
    let client = client(&backend);
    let view = client.controller(recent());

    assert_eq!(
        view.retry().await.unwrap(),
        SentinelOutcome::Ignored(IgnoreReason::NothingToRetry)
    );
    assert!(backend.fetch_calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn slow_pages_time_out_into_the_error_state() {
    let backend = StubBackend::new();
    let _gate = backend.hold_fetches();
    let client = client(&backend);
    let view = client.controller(recent());

    let err = view.on_sentinel_visible().await.unwrap_err();

    assert!(err.to_string().contains("timed out"));
    assert_eq!(view.snapshot().unwrap().state, FetchState::Error);
}

#[tokio::test]
async fn backend_rejections_are_not_retryable() {
    let backend = StubBackend::new();
    backend.fail_next_fetch(FeedError::Backend {
        status: 400,
        message: "unknown sort".into(),
    });
    let client = client(&backend);
    let view = client.controller(recent());

    let err = view.on_sentinel_visible().await.unwrap_err();

    assert!(!err.is_retryable());
    assert_eq!(view.snapshot().unwrap().state, FetchState::Error);
}
