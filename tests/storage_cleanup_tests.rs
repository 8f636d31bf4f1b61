/// Storage cleanup tests
///
/// Dying storage instances, and the filesystem/volume release paths a
/// dying host goes through.
/// Run with: cargo test --test storage_cleanup_tests
use std::sync::Arc;

use fleetstate::backend::{MachineOps, StorageOps};
use fleetstate::core::{Host, MachineId, StorageId};
use fleetstate::{CleanupKind, InMemoryBackend, InMemoryCleanupStore, Life, State};

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
async fn dying_storage_detaches_every_attachment() {
    let (backend, state) = harness();
    backend.add_application("db").await.unwrap();
    backend.add_unit("db", "db/0").await.unwrap();
    backend.add_unit("db", "db/1").await.unwrap();
    backend.add_storage("data/0", &["db/0", "db/1"]).await.unwrap();

    backend
        .destroy_storage_instance(&StorageId::from("data/0"), true, false)
        .await
        .unwrap();
    settle(&state).await;

    assert_eq!(backend.storage_life("data/0").await.unwrap(), Life::Dying);
    assert_eq!(
        backend.attachment_life("data/0", "db/0").await.unwrap(),
        Life::Dying
    );
    assert_eq!(
        backend.attachment_life("data/0", "db/1").await.unwrap(),
        Life::Dying
    );
}

#[tokio::test]
async fn released_storage_is_flagged_before_dying() {
    let (backend, state) = harness();
    backend.add_application("db").await.unwrap();
    backend.add_unit("db", "db/0").await.unwrap();
    backend.add_storage("data/0", &["db/0"]).await.unwrap();

    backend
        .release_storage_instance(&StorageId::from("data/0"), true, false)
        .await
        .unwrap();
    settle(&state).await;

    assert!(backend.storage_released("data/0").await.unwrap());
    assert_eq!(backend.storage_life("data/0").await.unwrap(), Life::Dying);
}

#[tokio::test]
async fn dying_machine_releases_its_disks() {
    let (backend, state) = harness();
    backend.add_machine("0").await.unwrap();
    let host = Host::Machine(MachineId::from("0"));
    backend
        .add_filesystem("fs-root", host.clone(), false, None)
        .await
        .unwrap();
    backend.add_volume("vol-1", host.clone(), true).await.unwrap();

    backend
        .destroy_machine(&MachineId::from("0"))
        .await
        .unwrap();
    settle(&state).await;

    // The non-detachable filesystem went with the machine; the
    // detachable volume was merely detached.
    assert!(!backend.filesystem_exists("fs-root").await);
    assert_eq!(
        backend
            .volume_attachment_life(&host, "vol-1")
            .await
            .unwrap(),
        Life::Dying
    );
}

#[tokio::test]
async fn manual_machine_keeps_its_disks() {
    let (backend, state) = harness();
    backend.add_machine("0").await.unwrap();
    backend.set_manual("0").await.unwrap();
    let host = Host::Machine(MachineId::from("0"));
    backend
        .add_filesystem("fs-root", host.clone(), false, None)
        .await
        .unwrap();

    backend
        .destroy_machine(&MachineId::from("0"))
        .await
        .unwrap();
    settle(&state).await;

    // Marked dying but never removed; the host outlives the model.
    assert!(backend.filesystem_exists("fs-root").await);
    assert_eq!(
        backend
            .filesystem_attachment_life(&host, "fs-root")
            .await
            .unwrap(),
        Life::Alive
    );
}

#[tokio::test]
async fn volume_backed_filesystem_frees_its_volume() {
    let (backend, state) = harness();
    backend.add_machine("0").await.unwrap();
    let host = Host::Machine(MachineId::from("0"));
    backend.add_volume("vol-1", host.clone(), true).await.unwrap();
    backend
        .add_filesystem("fs-data", host.clone(), false, Some("vol-1"))
        .await
        .unwrap();

    backend
        .destroy_machine(&MachineId::from("0"))
        .await
        .unwrap();
    settle(&state).await;

    // Removing the filesystem unblocked the volume detach.
    assert!(!backend.filesystem_exists("fs-data").await);
    assert_eq!(
        backend
            .volume_attachment_life(&host, "vol-1")
            .await
            .unwrap(),
        Life::Dying
    );
}

#[tokio::test]
async fn detachable_volume_backed_attachment_is_removed() {
    let (backend, state) = harness();
    backend.add_machine("0").await.unwrap();
    let host = Host::Machine(MachineId::from("0"));
    backend.add_volume("vol-1", host.clone(), true).await.unwrap();
    // Detachable, so not host-provisioned: the filesystem survives the
    // machine, but its attachment must not pin the backing volume.
    backend
        .add_filesystem("fs-data", host.clone(), true, Some("vol-1"))
        .await
        .unwrap();

    backend
        .destroy_machine(&MachineId::from("0"))
        .await
        .unwrap();
    settle(&state).await;

    assert!(backend.filesystem_exists("fs-data").await);
    assert!(
        backend
            .filesystem_attachment_life(&host, "fs-data")
            .await
            .unwrap_err()
            .is_not_found()
    );
    // The volume still contains the filesystem, so its own detach waits
    // for the filesystem's removal.
    assert_eq!(
        backend
            .volume_attachment_life(&host, "vol-1")
            .await
            .unwrap(),
        Life::Alive
    );
}

#[tokio::test]
async fn detachable_attachment_is_left_to_its_own_lifecycle() {
    let (backend, state) = harness();
    backend.add_machine("0").await.unwrap();
    let host = Host::Machine(MachineId::from("0"));
    backend
        .add_filesystem("fs-data", host.clone(), true, None)
        .await
        .unwrap();

    backend
        .destroy_machine(&MachineId::from("0"))
        .await
        .unwrap();
    settle(&state).await;

    // Detached but not removed; its own deprovisioning finishes it.
    assert!(backend.filesystem_exists("fs-data").await);
    assert_eq!(
        backend
            .filesystem_attachment_life(&host, "fs-data")
            .await
            .unwrap(),
        Life::Dying
    );
}

#[tokio::test]
async fn dying_volume_and_filesystem_attachments_detach() {
    let (backend, state) = harness();
    backend.add_machine("0").await.unwrap();
    let host = Host::Machine(MachineId::from("0"));
    backend.add_volume("vol-1", host.clone(), true).await.unwrap();
    backend
        .add_filesystem("fs-data", host.clone(), true, None)
        .await
        .unwrap();

    state
        .enqueue_cleanup(CleanupKind::AttachmentsForDyingVolume, "vol-1", vec![])
        .await
        .unwrap();
    state
        .enqueue_cleanup(CleanupKind::AttachmentsForDyingFilesystem, "fs-data", vec![])
        .await
        .unwrap();
    settle(&state).await;

    assert_eq!(
        backend
            .volume_attachment_life(&host, "vol-1")
            .await
            .unwrap(),
        Life::Dying
    );
    assert_eq!(
        backend
            .filesystem_attachment_life(&host, "fs-data")
            .await
            .unwrap(),
        Life::Dying
    );
}
