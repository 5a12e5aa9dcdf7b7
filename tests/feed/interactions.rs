//! Optimistic like/save: speculative writes, reconcile, rollback, queueing.

use std::sync::Arc;

use shelf_feed::{
    BusMessage, ContentFilter, ContentKey, ContentKind, FeedClient, FeedController, FeedError,
    Interaction, InteractionPatch, Notice, QueryKey, SortMode, Topic,
};

use crate::support::{client, quote, review, StubBackend};

fn all_recent() -> QueryKey {
    QueryKey::new(ContentFilter::All, SortMode::Recent, "")
}

fn likes(client: &FeedClient<StubBackend>, key: &QueryKey) -> Vec<u32> {
    client
        .cache()
        .envelopes(key)
        .unwrap()
        .iter()
        .map(|e| e.likes)
        .collect()
}

fn liked(client: &FeedClient<StubBackend>, key: &QueryKey) -> Vec<bool> {
    client
        .cache()
        .envelopes(key)
        .unwrap()
        .iter()
        .map(|e| e.is_liked)
        .collect()
}

struct Loaded {
    backend: Arc<StubBackend>,
    client: Arc<FeedClient<StubBackend>>,
    _view: Arc<FeedController<StubBackend>>,
}

/// Client with `{all, recent, ""}` loaded as quotes Q1 (3 likes) and Q2 (5 likes).
async fn loaded() -> Loaded {
    let backend = StubBackend::new();
    backend.page(None, vec![quote("q1", 3), quote("q2", 5)], None);
    backend.seed_likes(ContentKey::new(ContentKind::Quote, "q1"), 3);
    let client = client(&backend);
    let view = client.controller(all_recent());
    view.on_sentinel_visible().await.unwrap();
    Loaded {
        backend,
        client,
        _view: view,
    }
}

// ============================================================================
// Like
// ============================================================================

#[tokio::test]
async fn like_is_visible_before_the_server_answers() {
    let Loaded { backend, client, _view } = loaded().await;
    let gate = backend.hold_mutations();

    let worker = Arc::clone(&client);
    let first = tokio::spawn(async move { worker.like(ContentKind::Quote, "q1").await });
    backend.mutation_started.notified().await;

    assert_eq!(likes(&client, &all_recent()), vec![4, 5]);
    assert_eq!(liked(&client, &all_recent()), vec![true, false]);

    // a second like on the same item waits for the first to resolve
    let worker = Arc::clone(&client);
    let second = tokio::spawn(async move { worker.like(ContentKind::Quote, "q1").await });
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    assert_eq!(backend.mutation_calls().len(), 1);
    assert!(client
        .coordinator()
        .is_pending(&ContentKey::new(ContentKind::Quote, "q1")));

    gate.open();
    let reconciled = first.await.unwrap().unwrap();
    assert_eq!(reconciled.likes, Some(4));
    assert_eq!(reconciled.is_liked, Some(true));

    // the queued interaction toggles from the reconciled state
    let undone = second.await.unwrap().unwrap();
    assert_eq!(undone, InteractionPatch::new().likes(3).liked(false));
    assert_eq!(likes(&client, &all_recent()), vec![3, 5]);

    let q1 = ContentKey::new(ContentKind::Quote, "q1");
    assert_eq!(
        backend.mutation_calls(),
        vec![
            (q1.clone(), Interaction::Like, true),
            (q1.clone(), Interaction::Like, false),
        ]
    );
    assert!(!client.coordinator().is_pending(&q1));
}

#[tokio::test]
async fn server_counts_override_the_speculative_ones() {
    let backend = StubBackend::new();
    backend.page(None, vec![quote("q1", 3)], None);
    // someone else liked it meanwhile
    backend.seed_likes(ContentKey::new(ContentKind::Quote, "q1"), 9);
    let client = client(&backend);
    let view = client.controller(all_recent());
    view.on_sentinel_visible().await.unwrap();

    client.like(ContentKind::Quote, "q1").await.unwrap();

    assert_eq!(likes(&client, &all_recent()), vec![10]);
}

#[tokio::test]
async fn network_failure_rolls_back_and_notifies() {
    let Loaded { backend, client, _view } = loaded().await;
    let mut notices = client.subscribe(&[Topic::Notices]);
    backend.fail_next_mutation(FeedError::Network("connection refused".into()));

    let err = client.like(ContentKind::Quote, "q1").await.unwrap_err();

    assert!(err.is_retryable());
    assert_eq!(likes(&client, &all_recent()), vec![3, 5]);
    assert_eq!(liked(&client, &all_recent()), vec![false, false]);

    let received = notices.drain();
    assert_eq!(received.len(), 1);
    match &received[0] {
        BusMessage::Notice(Notice {
            key,
            action,
            message,
        }) => {
            assert_eq!(key, &ContentKey::new(ContentKind::Quote, "q1"));
            assert_eq!(*action, Interaction::Like);
            assert!(message.contains("like"));
        }
        other => panic!("expected a notice, got {:?}", other),
    }
}

#[tokio::test]
async fn backend_rejections_carry_their_message_into_the_notice() {
    let Loaded { backend, client, _view } = loaded().await;
    let mut notices = client.subscribe(&[Topic::Notices]);
    backend.fail_next_mutation(FeedError::Backend {
        status: 403,
        message: "account suspended".into(),
    });

    client.like(ContentKind::Quote, "q2").await.unwrap_err();

    assert_eq!(likes(&client, &all_recent()), vec![3, 5]);
    match notices.try_next() {
        Some(BusMessage::Notice(notice)) => assert!(notice.message.contains("account suspended")),
        other => panic!("expected a notice, got {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn slow_mutations_time_out_and_roll_back() {
    let Loaded { backend, client, _view } = loaded().await;
    let _gate = backend.hold_mutations();

    let err = client.like(ContentKind::Quote, "q1").await.unwrap_err();

    assert!(err.to_string().contains("timed out"));
    assert_eq!(likes(&client, &all_recent()), vec![3, 5]);
}

#[tokio::test]
async fn cancelled_like_restores_the_item_and_frees_its_queue() {
    let Loaded { backend, client, _view } = loaded().await;
    let _gate = backend.hold_mutations();
    let q1 = ContentKey::new(ContentKind::Quote, "q1");

    let worker = Arc::clone(&client);
    let like = tokio::spawn(async move { worker.like(ContentKind::Quote, "q1").await });
    backend.mutation_started.notified().await;
    assert_eq!(likes(&client, &all_recent()), vec![4, 5]);
    assert!(client.coordinator().is_pending(&q1));

    like.abort();
    assert!(like.await.unwrap_err().is_cancelled());

    assert_eq!(likes(&client, &all_recent()), vec![3, 5]);
    assert_eq!(liked(&client, &all_recent()), vec![false, false]);
    assert!(!client.coordinator().is_pending(&q1));
}

#[tokio::test]
async fn cancelled_waiter_leaves_the_queue_to_the_running_like() {
    let Loaded { backend, client, _view } = loaded().await;
    let gate = backend.hold_mutations();
    let q1 = ContentKey::new(ContentKind::Quote, "q1");

    let worker = Arc::clone(&client);
    let first = tokio::spawn(async move { worker.like(ContentKind::Quote, "q1").await });
    backend.mutation_started.notified().await;

    let worker = Arc::clone(&client);
    let queued = tokio::spawn(async move { worker.like(ContentKind::Quote, "q1").await });
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    queued.abort();
    assert!(queued.await.unwrap_err().is_cancelled());
    assert!(client.coordinator().is_pending(&q1));

    gate.open();
    first.await.unwrap().unwrap();

    assert_eq!(likes(&client, &all_recent()), vec![4, 5]);
    assert_eq!(backend.mutation_calls().len(), 1);
    assert!(!client.coordinator().is_pending(&q1));
}

#[tokio::test]
async fn uncached_items_are_rejected_without_a_request() {
    let Loaded { backend, client, _view } = loaded().await;

    let err = client.like(ContentKind::Quote, "missing").await.unwrap_err();

    assert_eq!(
        err,
        FeedError::NotCached(ContentKey::new(ContentKind::Quote, "missing"))
    );
    assert!(backend.mutation_calls().is_empty());
}

// ============================================================================
// Fan-out and identity
// ============================================================================

#[tokio::test]
async fn likes_reach_every_view_holding_the_item() {
    let backend = StubBackend::new();
    backend.page(None, vec![quote("q1", 3), review("r1", 2)], None);
    let client = client(&backend);
    let all = client.controller(all_recent());
    let quotes = client.controller(all_recent().with_filter(ContentFilter::Quote));
    all.on_sentinel_visible().await.unwrap();
    quotes.on_sentinel_visible().await.unwrap();

    client.like(ContentKind::Quote, "q1").await.unwrap();

    let in_all = &all.snapshot().unwrap().items[0];
    let in_quotes = &quotes.snapshot().unwrap().items[0];
    assert_eq!((in_all.likes, in_all.is_liked), (4, true));
    assert_eq!((in_quotes.likes, in_quotes.is_liked), (4, true));
}

#[tokio::test]
async fn same_id_in_another_kind_is_left_alone() {
    let backend = StubBackend::new();
    backend.page(None, vec![quote("7", 1), review("7", 1)], None);
    let client = client(&backend);
    let view = client.controller(all_recent());
    view.on_sentinel_visible().await.unwrap();

    client.like(ContentKind::Review, "7").await.unwrap();

    assert_eq!(likes(&client, &all_recent()), vec![1, 2]);
    assert_eq!(liked(&client, &all_recent()), vec![false, true]);
}

// ============================================================================
// Save
// ============================================================================

#[tokio::test]
async fn confirmed_saves_notify_the_profile() {
    let Loaded { client, _view, .. } = loaded().await;
    let mut profile = client.subscribe(&[Topic::Profile]);

    client.save(ContentKind::Quote, "q2").await.unwrap();

    let saved: Vec<bool> = client
        .cache()
        .envelopes(&all_recent())
        .unwrap()
        .iter()
        .map(|e| e.is_saved)
        .collect();
    assert_eq!(saved, vec![false, true]);
    assert_eq!(likes(&client, &all_recent()), vec![3, 5]);
    assert_eq!(
        profile.drain(),
        vec![BusMessage::SavesChanged {
            key: ContentKey::new(ContentKind::Quote, "q2"),
            saved: true,
        }]
    );
}

#[tokio::test]
async fn failed_saves_roll_back_without_touching_the_profile() {
    let Loaded { backend, client, _view } = loaded().await;
    let mut profile = client.subscribe(&[Topic::Profile]);
    backend.fail_next_mutation(FeedError::Network("offline".into()));

    client.save(ContentKind::Quote, "q1").await.unwrap_err();

    assert!(client
        .cache()
        .envelopes(&all_recent())
        .unwrap()
        .iter()
        .all(|e| !e.is_saved));
    assert!(profile.drain().is_empty());
    assert_eq!(client.bus().messages(Topic::Notices).len(), 1);
}
