//! Drives the swap location `Deployment` hands out all the way through
//! `DiskSwapper` and back, the way `perform_swap_out`/`restore_from_swap`
//! in `controller::event_loop` actually call it: via
//! `SwapLocation::as_uri()` (the `local://<path>` form sent over the wire
//! in a `SWAP_REQUEST`), never a bare filesystem path. Also exercises
//! `Deployment::delete_swap` reclaiming the same directory `swap_out`
//! wrote to, matching spec.md §4.7/§4.12's reclamation-on-delete.

use praas::common::Buffer;
use praas::control_plane::{Deployment, LocalDeployment};
use praas::mailbox::{Mailbox, MailboxSnapshotEntry};
use praas::swapper::{DiskSwapper, Swapper};

#[test]
fn swap_out_then_swap_in_round_trips_through_the_deployment_uri() {
    let root = tempfile::tempdir().unwrap();
    let deployment = LocalDeployment::new(root.path().to_str().unwrap());

    let location = deployment.new_swap_location("myapp", "proc-0");
    let uri = location.as_uri();
    assert!(uri.starts_with("local://"));

    let mut mailbox = Mailbox::new();
    mailbox.state("counter", Buffer::from(vec![1, 2, 3]));
    mailbox.put("greeting", "proc-a", Buffer::from(b"hi".to_vec())).unwrap();
    let entries = mailbox.all_state();

    let swapper = DiskSwapper::new();
    let bytes_written = swapper.swap_out(&uri, &entries, None).unwrap();
    assert_eq!(bytes_written, 5);

    // swap_out must have landed under the deployment's own root, not a
    // `local:` subdirectory of the process's current working directory.
    assert!(root.path().join("myapp").join("proc-0").join("state").join("counter").exists());

    let (restored_entries, files_dir) = swapper.swap_in(&uri).unwrap();
    assert!(files_dir.is_none());

    let mut restored = Mailbox::new();
    restored.restore(restored_entries);
    assert_eq!(restored.try_state("counter").unwrap().as_slice(), &[1, 2, 3]);
    assert_eq!(restored.try_get("greeting", "proc-a").unwrap().as_slice(), b"hi");

    // delete_swap must agree with swap_out/swap_in on the on-disk path: it
    // reclaims exactly the directory that was just written to.
    deployment.delete_swap(&location).unwrap();
    assert!(!root.path().join("myapp").join("proc-0").exists());
}

#[test]
fn state_entries_survive_swap_but_consumable_messages_do_not_duplicate() {
    let root = tempfile::tempdir().unwrap();
    let deployment = LocalDeployment::new(root.path().to_str().unwrap());
    let location = deployment.new_swap_location("myapp", "proc-1");
    let uri = location.as_uri();

    let mut mailbox = Mailbox::new();
    mailbox.state("k", Buffer::from(vec![7]));
    let entries = mailbox.all_state();

    let swapper = DiskSwapper::new();
    swapper.swap_out(&uri, &entries, None).unwrap();

    let (restored_entries, _) = swapper.swap_in(&uri).unwrap();
    assert_eq!(restored_entries.len(), 1);
    assert!(matches!(
        &restored_entries[0],
        MailboxSnapshotEntry::State { name, .. } if name == "k"
    ));
}
