mod common;

// std
use std::{sync::Arc, time::Duration as StdDuration};
// crates.io
use serde_json::json;
use time::Duration;
// self
use common::*;
use device_flow_broker::{
	error::Error,
	flows::AuthProvider,
	state::PersistedState,
	store::{MemoryStore, SyncStore},
};

fn seeded(state: PersistedState) -> MemoryStore<PersistedState> {
	MemoryStore::with_value(Some(state))
}

fn stored(store: &MemoryStore<PersistedState>) -> Option<PersistedState> {
	store.get().expect("Store read should succeed.")
}

async fn overwrite(store: &MemoryStore<PersistedState>, state: Option<&PersistedState>) {
	let mut guard = store.lock(None).await.expect("Store lock should be granted.");

	guard.set(state).expect("Store write should succeed.");
}

fn unavailable() -> Reply {
	Reply::Json(503, json!({ "message": "service unavailable" }))
}

#[tokio::test]
async fn concurrent_reads_share_one_refresh() {
	let store = seeded(expired_state("1001"));
	let http = ScriptedHttp::new([
		Reply::Json(200, token_body("access-new", "refresh-new")),
		Reply::Json(200, validate_body("1001")),
	]);
	let broker = scripted_broker(Arc::new(store.clone()), &http);
	let (first, second, third) = tokio::join!(
		broker.any_access_token(),
		broker.any_access_token(),
		broker.access_token_for_intent("chat", &[]),
	);

	for token in [
		first.expect("First read should succeed."),
		second.expect("Second read should succeed."),
		third.expect("Third read should succeed.").expect("The credential serves `chat`."),
	] {
		assert_eq!(token.access_token().expose(), "access-new");
	}

	assert_eq!(http.request_count(), 2, "One refresh and one validation for every caller.");
	assert_eq!(broker.metrics().refresh_calls(), 1);
	assert_eq!(broker.metrics().validation_calls(), 1);

	let state = stored(&store).expect("State should remain.");

	assert_eq!(
		state.credential.refresh_token.as_ref().map(|token| token.expose()),
		Some("refresh-new")
	);
	assert!(broker.current_scopes_for_user(&user("1001")).contains("chat:read"));
}

#[tokio::test]
async fn first_read_of_an_instance_revalidates() {
	let store = seeded(fresh_state("1001"));
	let http = ScriptedHttp::new([Reply::Json(200, validate_body("1001"))]);
	let broker = scripted_broker(Arc::new(store), &http);

	broker.any_access_token().await.expect("Startup read should succeed.");
	broker.any_access_token().await.expect("Second read should succeed.");

	assert_eq!(http.request_count(), 1, "Only the first read validates a recently verified token.");
}

#[tokio::test]
async fn user_filters_hide_foreign_credentials() {
	let store = seeded(fresh_state("A"));
	let http = ScriptedHttp::default();
	let broker = scripted_broker(Arc::new(store.clone()), &http);
	let stranger = user("B");

	assert!(
		broker
			.access_token_for_user(&stranger, &[])
			.await
			.expect("A foreign credential is not an error.")
			.is_none()
	);
	assert!(matches!(
		broker.refresh_access_token_for_user(&stranger).await,
		Err(Error::UserMismatch { .. })
	));

	let token = broker
		.access_token_for_user(&user("A"), &[scopes(&["chat:read"])])
		.await
		.expect("Owner read should succeed.")
		.expect("Owner should get the credential.");

	assert_eq!(token.user_id, user("A"));
	assert!(broker.current_scopes_for_user(&stranger).is_empty());

	overwrite(&store, Some(&fresh_state("A").with_error(Some(error_record("e-1", 1))))).await;

	assert!(
		broker
			.access_token_for_user(&stranger, &[])
			.await
			.expect("A foreign errored credential is still hidden.")
			.is_none()
	);
	assert!(matches!(
		broker.access_token_for_user(&user("A"), &[]).await,
		Err(Error::Recoverable { count: 1, .. })
	));
	assert_eq!(http.request_count(), 0);

	broker.close();
}

#[tokio::test]
async fn intent_reads_filter_and_missing_scopes_fail() {
	let store = seeded(fresh_state("1001"));
	let http = ScriptedHttp::new([Reply::Json(200, validate_body("1001"))]);
	let broker = scripted_broker(Arc::new(store), &http);

	assert!(
		broker.access_token_for_intent("chat", &[]).await.expect("Read should succeed.").is_some()
	);
	assert!(
		broker.access_token_for_intent("alerts", &[]).await.expect("Read should succeed.").is_none()
	);
	assert!(matches!(
		broker.access_token_for_intent("chat", &[scopes(&["moderator:read"])]).await,
		Err(Error::InsufficientScope { .. })
	));
	assert!(matches!(
		AuthProvider::user_access_token(&broker).await,
		Ok(Some(token)) if token.user_id == user("1001")
	));
}

#[tokio::test]
async fn recorded_failure_is_retried_by_the_timer() {
	let store = seeded(fresh_state("1001"));
	let http = ScriptedHttp::new([unavailable(), Reply::Json(200, validate_body("1001"))]);
	let broker = scripted_broker(Arc::new(store.clone()), &http);
	let err = broker.any_access_token().await.expect_err("Validation failure should surface.");
	let Error::Recoverable { id, count, message } = err else {
		panic!("Expected a recorded failure, got {err:?}.");
	};

	assert_eq!(count, 1);
	assert!(message.starts_with("token validation failed"));
	assert_eq!(
		stored(&store).and_then(|state| state.error_record).map(|record| record.id),
		Some(id)
	);

	tokio::time::sleep(StdDuration::from_millis(1_500)).await;

	let healed = stored(&store).expect("State should remain.");

	assert!(healed.error_record.is_none(), "The timer retry should clear the failure.");
	assert_eq!(http.request_count(), 2);

	let token = broker.any_access_token().await.expect("Read after the retry should succeed.");

	assert_eq!(token.access_token().expose(), "access-fresh");
	assert_eq!(http.request_count(), 2);
}

#[tokio::test]
async fn backoff_restarts_after_a_healed_failure() {
	let store = seeded(fresh_state("1001"));
	let http = ScriptedHttp::new([
		unavailable(),
		Reply::Json(200, validate_body("1001")),
		unavailable(),
		Reply::Json(200, token_body("access-retry", "refresh-retry")),
		Reply::Json(200, validate_body("1001")),
	]);
	let broker = scripted_broker(Arc::new(store.clone()), &http);

	assert!(matches!(
		broker.any_access_token().await,
		Err(Error::Recoverable { count: 1, .. })
	));

	tokio::time::sleep(StdDuration::from_millis(1_500)).await;

	assert!(stored(&store).expect("State should remain.").error_record.is_none());

	assert!(matches!(
		broker.refresh_access_token_for_user(&user("1001")).await,
		Err(Error::Recoverable { count: 1, .. })
	));

	let record = stored(&store)
		.and_then(|state| state.error_record)
		.expect("The refresh failure should be recorded.");

	assert!(record.force_refresh_on_retry);

	tokio::time::sleep(StdDuration::from_millis(1_500)).await;

	let healed = stored(&store).expect("State should remain.");

	assert!(healed.error_record.is_none(), "The second failure is retried after the base delay.");
	assert_eq!(healed.credential.access_token.expose(), "access-retry");
	assert_eq!(http.request_count(), 5);
}

#[tokio::test]
async fn scope_failures_keep_the_validation_they_waited_for() {
	let store = seeded(expired_state("1001"));
	let http = ScriptedHttp::new([
		Reply::Json(200, token_body("access-new", "refresh-new")),
		Reply::Json(200, validate_body("1001")),
	]);
	let broker = scripted_broker(Arc::new(store.clone()), &http);

	assert!(matches!(
		broker.access_token_for_intent("chat", &[scopes(&["moderator:read"])]).await,
		Err(Error::InsufficientScope { .. })
	));

	let state = stored(&store).expect("State should remain.");

	assert!(state.last_verified.is_some(), "The verified state must be persisted.");
	assert_eq!(state.credential.access_token.expose(), "access-new");

	let token = broker.any_access_token().await.expect("Follow-up read should succeed.");

	assert_eq!(token.access_token().expose(), "access-new");
	assert_eq!(broker.metrics().validation_calls(), 1);
	assert_eq!(http.request_count(), 2);
}

#[tokio::test]
async fn stale_retry_leaves_newer_failures_alone() {
	let store = seeded(fresh_state("1001"));
	let http = ScriptedHttp::new([unavailable()]);
	let broker = scripted_broker(Arc::new(store.clone()), &http);

	broker.any_access_token().await.expect_err("Validation failure should surface.");

	let newer = fresh_state("1001").with_error(Some(error_record("e-2", 5)));

	overwrite(&store.attach(), Some(&newer)).await;
	tokio::time::sleep(StdDuration::from_millis(1_500)).await;

	assert_eq!(stored(&store), Some(newer), "A stale retry must not touch the state.");
	assert_eq!(http.request_count(), 1);

	broker.close();
}

#[tokio::test]
async fn rejected_refresh_token_signs_the_user_out() {
	let store = seeded(expired_state("1001"));
	let http = ScriptedHttp::new([Reply::Json(
		400,
		json!({ "status": 400, "message": "Invalid refresh token" }),
	)]);
	let broker = scripted_broker(Arc::new(store.clone()), &http);

	assert!(matches!(broker.any_access_token().await, Err(Error::NoCredential)));
	assert_eq!(stored(&store), None);
	assert!(broker.current_scopes_for_user(&user("1001")).is_empty());
	assert!(broker.user_access_token().await.expect("Empty store is not an error.").is_none());
}

#[tokio::test]
async fn set_credential_validates_before_storing() {
	let store = MemoryStore::<PersistedState>::new();
	let http = ScriptedHttp::new([
		Reply::Json(401, json!({ "status": 401, "message": "invalid access token" })),
		Reply::Json(200, validate_body("1001")),
	]);
	let broker = scripted_broker(Arc::new(store.clone()), &http);
	let credential =
		credential("access-set", Some("refresh-set"), Some(Duration::hours(1)), Duration::ZERO);
	let err = broker
		.set_credential(credential.clone(), vec!["chat".into()])
		.await
		.expect_err("Rejected credentials must not be stored.");

	assert!(matches!(&err, Error::InvalidToken { reason } if reason == "invalid access token"));
	assert_eq!(stored(&store), None);

	let state = broker
		.set_credential(credential, vec!["chat".into()])
		.await
		.expect("Valid credentials should be stored.");

	assert_eq!(state.user_id, user("1001"));
	assert_eq!(stored(&store), Some(state));
	assert!(broker.current_scopes_for_user(&user("1001")).contains("chat:read"));

	broker.sign_out().await.expect("Sign-out should succeed.");

	assert_eq!(stored(&store), None);
	assert!(broker.current_scopes_for_user(&user("1001")).is_empty());
	assert_eq!(http.request_count(), 2);
}

#[tokio::test]
async fn closed_instances_reject_reads_until_reset() {
	let store = seeded(fresh_state("1001"));
	let http = ScriptedHttp::new([Reply::Json(200, validate_body("1001"))]);
	let broker = scripted_broker(Arc::new(store.clone()), &http);
	let guard = store.lock(None).await.expect("External lock should be granted.");
	let waiting = tokio::spawn({
		let broker = broker.clone();

		async move { broker.any_access_token().await }
	});

	tokio::time::sleep(StdDuration::from_millis(50)).await;
	broker.reset();

	let err = waiting
		.await
		.expect("Waiting task should not panic.")
		.expect_err("Reset must reject pending waits.");

	assert!(err.is_lock_closed());

	drop(guard);

	let token = broker.any_access_token().await.expect("Reset instances accept new reads.");

	assert_eq!(token.user_id, user("1001"));

	broker.close();

	assert!(broker.is_closed());
	assert!(
		broker.any_access_token().await.expect_err("Closed instances reject reads.").is_lock_closed()
	);
	assert!(broker.current_scopes_for_user(&user("1001")).is_empty());

	// Sign-in bypasses the controller.
	let http_after = ScriptedHttp::new([Reply::Json(200, validate_body("2002"))]);
	let other = scripted_broker(Arc::new(store.attach()), &http_after);

	other.close();
	other
		.set_credential(fresh_state("2002").credential, Vec::new())
		.await
		.expect("Sign-in works on a closed instance.");

	assert_eq!(stored(&store).map(|state| state.user_id), Some(user("2002")));
}
