/// Cleanup queue tests
///
/// Dispatcher-level behaviour: due-time gating, unknown kinds, task
/// isolation, and idempotent draining.
/// Run with: cargo test --test cleanup_queue_tests
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;

use fleetstate::{
    CleanupConfig, CleanupKind, CleanupRecord, CleanupStore, Clock, InMemoryBackend,
    InMemoryCleanupStore, ManualClock, State,
};

fn harness() -> (Arc<InMemoryBackend>, Arc<InMemoryCleanupStore>, State) {
    let store = Arc::new(InMemoryCleanupStore::new());
    let backend = Arc::new(InMemoryBackend::new(store.clone()));
    let state = State::new(backend.clone(), store.clone());
    (backend, store, state)
}

#[tokio::test]
async fn drain_completes_charm_cleanup() {
    let (backend, _, state) = harness();
    backend.add_charm("ch:amd64/ubuntu-1", 0).await.unwrap();

    state
        .enqueue_cleanup(CleanupKind::Charm, "ch:amd64/ubuntu-1", vec![])
        .await
        .unwrap();
    assert!(state.has_pending_cleanups().await.unwrap());

    state.run_cleanup().await.unwrap();
    assert!(!state.has_pending_cleanups().await.unwrap());
    assert!(!backend.charm_exists("ch:amd64/ubuntu-1").await);
}

#[tokio::test]
async fn charm_back_in_use_is_left_alone() {
    let (backend, _, state) = harness();
    backend.add_charm("ch:amd64/ubuntu-1", 1).await.unwrap();

    state
        .enqueue_cleanup(CleanupKind::Charm, "ch:amd64/ubuntu-1", vec![])
        .await
        .unwrap();
    state.run_cleanup().await.unwrap();

    // The task completed without touching the charm.
    assert!(!state.has_pending_cleanups().await.unwrap());
    assert!(backend.charm_exists("ch:amd64/ubuntu-1").await);
}

#[tokio::test]
async fn unknown_kind_stays_pending() {
    let (_, store, state) = harness();

    let mut record = CleanupRecord::new(CleanupKind::Charm, "something", vec![]);
    record.kind = "resourceBlob".to_string();
    store.insert(record).await.unwrap();

    state.run_cleanup().await.unwrap();
    state.run_cleanup().await.unwrap();
    assert!(state.has_pending_cleanups().await.unwrap());
}

#[tokio::test]
async fn failing_task_does_not_block_others() {
    let (backend, store, state) = harness();
    backend.add_charm("ch:amd64/ubuntu-1", 0).await.unwrap();

    // Three args is beyond any version of the dyingUnit schema.
    store
        .insert(CleanupRecord::new(
            CleanupKind::DyingUnit,
            "myapp/0",
            vec![json!(true), json!(true), json!(true)],
        ))
        .await
        .unwrap();
    state
        .enqueue_cleanup(CleanupKind::Charm, "ch:amd64/ubuntu-1", vec![])
        .await
        .unwrap();

    state.run_cleanup().await.unwrap();

    // The charm task completed; the malformed one is still pending.
    assert!(!backend.charm_exists("ch:amd64/ubuntu-1").await);
    assert_eq!(store.count().await.unwrap(), 1);
}

#[tokio::test]
async fn deferred_task_waits_for_its_deadline() {
    let store = Arc::new(InMemoryCleanupStore::new());
    let backend = Arc::new(InMemoryBackend::new(store.clone()));
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let state = State::with_clock(
        backend.clone(),
        store.clone(),
        CleanupConfig::default(),
        clock.clone(),
    );
    backend.add_charm("ch:amd64/ubuntu-1", 0).await.unwrap();

    let deadline = clock.now() + Duration::from_secs(300);
    state
        .enqueue_cleanup_at(deadline, CleanupKind::Charm, "ch:amd64/ubuntu-1", vec![])
        .await
        .unwrap();

    state.run_cleanup().await.unwrap();
    assert!(backend.charm_exists("ch:amd64/ubuntu-1").await);
    assert!(state.has_pending_cleanups().await.unwrap());

    clock.advance(Duration::from_secs(300));
    state.run_cleanup().await.unwrap();
    assert!(!backend.charm_exists("ch:amd64/ubuntu-1").await);
    assert!(!state.has_pending_cleanups().await.unwrap());
}

#[tokio::test]
async fn draining_twice_is_harmless() {
    let (backend, _, state) = harness();
    backend.add_charm("ch:amd64/ubuntu-1", 0).await.unwrap();
    state
        .enqueue_cleanup(CleanupKind::Charm, "ch:amd64/ubuntu-1", vec![])
        .await
        .unwrap();

    state.run_cleanup().await.unwrap();
    state.run_cleanup().await.unwrap();
    assert!(!state.has_pending_cleanups().await.unwrap());
}

#[tokio::test]
async fn missing_target_counts_as_success() {
    let (_, _, state) = harness();

    // No such unit anywhere; by convention the task still completes.
    state
        .enqueue_cleanup(CleanupKind::DyingUnit, "ghost/7", vec![])
        .await
        .unwrap();
    state.run_cleanup().await.unwrap();
    assert!(!state.has_pending_cleanups().await.unwrap());
}
