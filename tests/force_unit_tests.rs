/// Forced unit teardown tests
///
/// The escalation chain dyingUnit -> forceDestroyUnit -> forceRemoveUnit,
/// including retry on blocking dependents.
/// Run with: cargo test --test force_unit_tests
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use fleetstate::backend::{DestroyUnitParams, StorageOps, UnitOps};
use fleetstate::core::{StorageId, UnitName};
use fleetstate::{
    CleanupConfig, CleanupKind, InMemoryBackend, InMemoryCleanupStore, Life, ManualClock, State,
};

struct Harness {
    backend: Arc<InMemoryBackend>,
    clock: Arc<ManualClock>,
    state: State,
}

fn forced_harness(force_timeout: Duration) -> Harness {
    let store = Arc::new(InMemoryCleanupStore::new());
    let backend = Arc::new(InMemoryBackend::new(store.clone()));
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let state = State::with_clock(
        backend.clone(),
        store,
        CleanupConfig::new().force_timeout(force_timeout),
        clock.clone(),
    );
    Harness {
        backend,
        clock,
        state,
    }
}

async fn settle(state: &State) {
    for _ in 0..20 {
        if !state.has_pending_cleanups().await.unwrap() {
            return;
        }
        state.run_cleanup().await.unwrap();
    }
    panic!("cleanup queue did not settle");
}

#[tokio::test]
async fn force_destroy_escalates_through_backstops() {
    let h = forced_harness(Duration::from_secs(60));
    h.backend.add_application("web").await.unwrap();
    h.backend.add_unit("web", "web/0").await.unwrap();
    h.backend.add_subordinate("web/0", "logger/0").await.unwrap();

    h.backend
        .destroy_unit(
            &UnitName::from("web/0"),
            DestroyUnitParams {
                destroy_storage: false,
                force: true,
            },
        )
        .await
        .unwrap();
    assert_eq!(
        h.backend.unit_life(&UnitName::from("web/0")).await.unwrap(),
        Life::Dying
    );

    // The graceful cleanup runs now; the force backstop is not due yet.
    h.state.run_cleanup().await.unwrap();
    assert!(h.backend.unit_exists("web/0").await);
    assert!(h.state.has_pending_cleanups().await.unwrap());

    // Past the force timeout the backstops take the unit all the way.
    h.clock.advance(Duration::from_secs(61));
    h.state.run_cleanup().await.unwrap();
    h.clock.advance(Duration::from_secs(61));
    settle(&h.state).await;

    assert!(!h.backend.unit_exists("web/0").await);
    assert!(!h.backend.unit_exists("logger/0").await);
}

#[tokio::test]
async fn force_destroy_retries_while_dependents_block() {
    let h = forced_harness(Duration::ZERO);
    h.backend.add_application("web").await.unwrap();
    h.backend.add_unit("web", "web/0").await.unwrap();
    h.backend.add_subordinate("web/0", "logger/0").await.unwrap();
    h.backend.add_storage("logs/0", &["logger/0"]).await.unwrap();

    h.state
        .enqueue_cleanup(CleanupKind::ForceDestroyedUnit, "web/0", vec![])
        .await
        .unwrap();

    // The subordinate is pinned by its storage attachment, so the unit
    // can't reach Dead and the task stays pending.
    h.state.run_cleanup().await.unwrap();
    assert!(h.backend.unit_exists("web/0").await);
    assert!(h.state.has_pending_cleanups().await.unwrap());

    // Unpin the subordinate; the retry now converges.
    h.backend
        .remove_storage_attachment(&StorageId::from("logs/0"), &UnitName::from("logger/0"), true)
        .await
        .unwrap();
    for _ in 0..10 {
        h.clock.advance(Duration::from_secs(1));
        if !h.state.has_pending_cleanups().await.unwrap() {
            break;
        }
        h.state.run_cleanup().await.unwrap();
    }

    assert!(!h.backend.unit_exists("web/0").await);
    assert!(!h.backend.unit_exists("logger/0").await);
    assert!(!h.state.has_pending_cleanups().await.unwrap());
}

#[tokio::test]
async fn force_remove_drops_lingering_attachments() {
    let h = forced_harness(Duration::ZERO);
    h.backend.add_application("db").await.unwrap();
    h.backend.add_unit("db", "db/0").await.unwrap();
    h.backend.add_storage("data/0", &["db/0"]).await.unwrap();

    h.state
        .enqueue_cleanup(CleanupKind::ForceRemoveUnit, "db/0", vec![])
        .await
        .unwrap();
    h.state.run_cleanup().await.unwrap();

    // Removed while Alive with an attachment still present.
    assert!(!h.backend.unit_exists("db/0").await);
    assert!(
        h.backend
            .attachment_life("data/0", "db/0")
            .await
            .unwrap_err()
            .is_not_found()
    );
}

#[tokio::test]
async fn backstop_deadline_respects_configured_timeout() {
    let h = forced_harness(Duration::from_secs(600));
    h.backend.add_application("web").await.unwrap();
    h.backend.add_unit("web", "web/0").await.unwrap();
    h.backend.add_subordinate("web/0", "logger/0").await.unwrap();

    h.backend
        .destroy_unit(
            &UnitName::from("web/0"),
            DestroyUnitParams {
                destroy_storage: false,
                force: true,
            },
        )
        .await
        .unwrap();
    h.state.run_cleanup().await.unwrap();

    // Just short of the deadline nothing fires.
    h.clock.advance(Duration::from_secs(599));
    h.state.run_cleanup().await.unwrap();
    assert!(h.backend.unit_exists("web/0").await);

    h.clock.advance(Duration::from_secs(2));
    h.state.run_cleanup().await.unwrap();
    h.clock.advance(Duration::from_secs(601));
    settle(&h.state).await;
    assert!(!h.backend.unit_exists("web/0").await);
}
