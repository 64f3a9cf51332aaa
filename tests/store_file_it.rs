mod common;

// std
use std::{
	sync::{
		Arc,
		atomic::{AtomicUsize, Ordering},
	},
	time::Duration as StdDuration,
};
// self
use common::*;
use device_flow_broker::{
	state::{PersistedState, store_key},
	store::{FileStore, LockController, SyncStore},
};

fn open(dir: &tempfile::TempDir) -> FileStore<PersistedState> {
	FileStore::open(dir.path(), &store_key(CLIENT_ID))
		.expect("File store should open.")
		.with_poll_interval(StdDuration::from_millis(20))
}

#[tokio::test]
async fn instances_exclude_each_other_and_see_each_others_writes() {
	let dir = tempfile::tempdir().expect("Temporary directory should be created.");
	let first = open(&dir);
	let second = open(&dir);
	let notified = Arc::new(AtomicUsize::new(0));

	second.add_listener({
		let notified = notified.clone();

		Arc::new(move || {
			notified.fetch_add(1, Ordering::SeqCst);
		})
	});

	let mut guard = first.lock(None).await.expect("First instance should get the lock.");
	let blocked = tokio::time::timeout(StdDuration::from_millis(100), second.lock(None)).await;

	assert!(blocked.is_err(), "The second instance must wait while the first holds the lock.");

	guard.set(Some(&fresh_state("1001"))).expect("Write should succeed.");
	drop(guard);

	let mut second_guard = tokio::time::timeout(StdDuration::from_secs(2), second.lock(None))
		.await
		.expect("Lock should be handed over once released.")
		.expect("Lock should be granted.");

	assert_eq!(
		second_guard.get().expect("Read should succeed.").map(|state| state.user_id),
		Some(user("1001"))
	);

	second_guard.remove().expect("Delete should succeed.");
	drop(second_guard);

	tokio::time::sleep(StdDuration::from_millis(200)).await;

	assert!(notified.load(Ordering::SeqCst) >= 1, "Foreign writes must reach the listeners.");
	assert_eq!(first.get().expect("Read should succeed."), None);
}

#[tokio::test]
async fn closed_controllers_reject_pending_waits() {
	let dir = tempfile::tempdir().expect("Temporary directory should be created.");
	let first = open(&dir);
	let second = open(&dir);
	let controller = LockController::new();
	let guard = first.lock(None).await.expect("First instance should get the lock.");
	let (result, ()) = tokio::join!(second.lock(Some(&controller)), async {
		tokio::time::sleep(StdDuration::from_millis(50)).await;
		controller.close();
	});

	assert!(result.is_err(), "Closing the controller must reject the wait.");
	assert_eq!(controller.waiting(), 0);

	drop(guard);
}

#[tokio::test]
async fn brokers_follow_sign_ins_of_other_processes() {
	let dir = tempfile::tempdir().expect("Temporary directory should be created.");
	let signing_http = ScriptedHttp::new([Reply::Json(200, validate_body("1001"))]);
	let signing = scripted_broker(Arc::new(open(&dir)), &signing_http);
	let observer_http = ScriptedHttp::new([Reply::Json(200, validate_body("1001"))]);
	let observer = scripted_broker(Arc::new(open(&dir)), &observer_http);

	assert!(observer.current_scopes_for_user(&user("1001")).is_empty());

	signing
		.set_credential(fresh_state("1001").credential, vec!["chat".into()])
		.await
		.expect("Sign-in should succeed.");
	tokio::time::sleep(StdDuration::from_millis(200)).await;

	assert!(
		observer.current_scopes_for_user(&user("1001")).contains("chat:read"),
		"The observer learns about the sign-in through the change watcher."
	);

	let token = observer.any_access_token().await.expect("Observer read should succeed.");

	assert_eq!(token.user_id, user("1001"));
	assert_eq!(observer_http.request_count(), 1);
}
