/// Dying unit tests
///
/// Graceful unit teardown: relation departure, storage handling, and
/// the dying-application fan-out.
/// Run with: cargo test --test dying_unit_tests
use std::sync::Arc;

use fleetstate::backend::{ApplicationOps, DestroyUnitParams, UnitOps};
use fleetstate::core::{ApplicationName, UnitName};
use fleetstate::{InMemoryBackend, InMemoryCleanupStore, Life, State};

fn harness() -> (Arc<InMemoryBackend>, State) {
    let store = Arc::new(InMemoryCleanupStore::new());
    let backend = Arc::new(InMemoryBackend::new(store.clone()));
    let state = State::new(backend.clone(), store);
    (backend, state)
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
async fn unblocked_unit_is_removed_outright() {
    let (backend, state) = harness();
    backend.add_application("web").await.unwrap();
    backend.add_unit("web", "web/0").await.unwrap();

    backend
        .destroy_unit(&UnitName::from("web/0"), DestroyUnitParams::default())
        .await
        .unwrap();

    // Nothing depended on the unit, so no task was even queued.
    assert!(!backend.unit_exists("web/0").await);
    assert!(!state.has_pending_cleanups().await.unwrap());
}

#[tokio::test]
async fn dying_unit_departs_its_relations() {
    let (backend, state) = harness();
    backend.add_application("web").await.unwrap();
    backend.add_application("db").await.unwrap();
    backend.add_unit("web", "web/0").await.unwrap();
    backend.add_unit("db", "db/0").await.unwrap();
    backend
        .add_relation("web:db db:server", &["web/0", "db/0"])
        .await
        .unwrap();

    backend
        .destroy_unit(&UnitName::from("web/0"), DestroyUnitParams::default())
        .await
        .unwrap();
    assert_eq!(
        backend.unit_life(&UnitName::from("web/0")).await.unwrap(),
        Life::Dying
    );

    settle(&state).await;

    // Departure was signalled, but scope membership is the agent's to
    // give up.
    assert!(
        backend
            .relation_departing("web:db db:server", "web/0")
            .await
            .unwrap()
    );
    assert!(
        backend
            .relation_has_member("web:db db:server", "web/0")
            .await
            .unwrap()
    );
}

#[tokio::test]
async fn dying_unit_keeps_storage_instances_by_default() {
    let (backend, state) = harness();
    backend.add_application("db").await.unwrap();
    backend.add_unit("db", "db/0").await.unwrap();
    backend.add_storage("data/0", &["db/0"]).await.unwrap();

    backend
        .destroy_unit(&UnitName::from("db/0"), DestroyUnitParams::default())
        .await
        .unwrap();
    settle(&state).await;

    // Attachment dying, instance untouched.
    assert_eq!(
        backend.attachment_life("data/0", "db/0").await.unwrap(),
        Life::Dying
    );
    assert_eq!(backend.storage_life("data/0").await.unwrap(), Life::Alive);
}

#[tokio::test]
async fn dying_unit_can_take_its_storage_down() {
    let (backend, state) = harness();
    backend.add_application("db").await.unwrap();
    backend.add_unit("db", "db/0").await.unwrap();
    backend.add_storage("data/0", &["db/0"]).await.unwrap();

    backend
        .destroy_unit(
            &UnitName::from("db/0"),
            DestroyUnitParams {
                destroy_storage: true,
                force: false,
            },
        )
        .await
        .unwrap();
    settle(&state).await;

    assert_eq!(backend.storage_life("data/0").await.unwrap(), Life::Dying);
    assert_eq!(
        backend.attachment_life("data/0", "db/0").await.unwrap(),
        Life::Dying
    );
}

#[tokio::test]
async fn dying_application_destroys_its_units() {
    let (backend, state) = harness();
    backend.add_application("web").await.unwrap();
    backend.add_unit("web", "web/0").await.unwrap();
    backend.add_unit("web", "web/1").await.unwrap();

    backend
        .destroy_application(&ApplicationName::from("web"), Default::default())
        .await
        .unwrap();
    assert_eq!(
        backend.application_life("web").await.unwrap(),
        Life::Dying
    );

    settle(&state).await;

    assert!(!backend.unit_exists("web/0").await);
    assert!(!backend.unit_exists("web/1").await);
}

#[tokio::test]
async fn destroying_application_can_drop_offers() {
    let (backend, state) = harness();
    backend
        .add_application_with_offers("web", &["public-web"])
        .await
        .unwrap();

    backend
        .destroy_application(
            &ApplicationName::from("web"),
            fleetstate::DestroyApplicationParams {
                remove_offers: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();
    settle(&state).await;

    assert!(backend.application_offers("web").await.unwrap().is_empty());
}
