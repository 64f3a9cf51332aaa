#![cfg(feature = "reqwest")]

mod common;

// std
use std::sync::Arc;
// crates.io
use httpmock::prelude::*;
use serde_json::json;
// self
use common::*;
use device_flow_broker::{
	CancellationToken,
	error::Error,
	flows::{BrokerBuilder, ReqwestBroker},
	state::PersistedState,
	store::{MemoryStore, SyncStore},
};

fn reqwest_broker(server: &MockServer, store: &MemoryStore<PersistedState>) -> ReqwestBroker {
	BrokerBuilder::new(Arc::new(store.clone()), descriptor(&server.base_url()), CLIENT_ID)
		.build()
		.expect("Reqwest broker should build.")
}

#[tokio::test]
async fn refresh_singleflight_hits_provider_once() {
	let server = MockServer::start_async().await;
	let store = MemoryStore::with_value(Some(expired_state("1001")));
	let broker = reqwest_broker(&server, &store);
	let refresh = server
		.mock_async(|when, then| {
			when.method(POST)
				.path("/oauth2/token")
				.form_urlencoded_tuple("grant_type", "refresh_token")
				.form_urlencoded_tuple("refresh_token", "refresh-old")
				.form_urlencoded_tuple("client_id", CLIENT_ID);
			then.status(200)
				.header("content-type", "application/json")
				.json_body(token_body("access-singleflight", "refresh-singleflight"));
		})
		.await;
	let validate = server
		.mock_async(|when, then| {
			when.method(GET)
				.path("/oauth2/validate")
				.header("authorization", "OAuth access-singleflight");
			then.status(200)
				.header("content-type", "application/json")
				.json_body(validate_body("1001"));
		})
		.await;
	let (first, second, third) = tokio::join!(
		broker.any_access_token(),
		broker.any_access_token(),
		broker.access_token_for_intent("chat", &[]),
	);

	assert_eq!(
		first.expect("First read should succeed.").access_token().expose(),
		"access-singleflight"
	);
	assert_eq!(
		second.expect("Second read should succeed.").access_token().expose(),
		"access-singleflight"
	);
	assert!(
		third.expect("Intent read should succeed.").is_some(),
		"Intent reads queue behind the running evaluation."
	);

	refresh.assert_calls_async(1).await;
	validate.assert_calls_async(1).await;
}

#[tokio::test]
async fn device_sign_in_round_trip() {
	let server = MockServer::start_async().await;
	let store = MemoryStore::<PersistedState>::new();
	let broker = reqwest_broker(&server, &store);
	let device = server
		.mock_async(|when, then| {
			when.method(POST)
				.path("/oauth2/device")
				.form_urlencoded_tuple("client_id", CLIENT_ID)
				.form_urlencoded_tuple("scopes", "chat:read");
			then.status(200)
				.header("content-type", "application/json")
				.json_body(device_body(0, 600));
		})
		.await;
	let token = server
		.mock_async(|when, then| {
			when.method(POST)
				.path("/oauth2/token")
				.form_urlencoded_tuple("device_code", "device-123");
			then.status(200)
				.header("content-type", "application/json")
				.json_body(token_body("access-device", "refresh-device"));
		})
		.await;
	let validate = server
		.mock_async(|when, then| {
			when.method(GET).path("/oauth2/validate");
			then.status(200)
				.header("content-type", "application/json")
				.json_body(validate_body("1001"));
		})
		.await;
	let state = broker
		.sign_in(scopes(&["chat:read"]), vec!["chat".into()], CancellationToken::new(), |_| ())
		.await
		.expect("Sign-in should succeed.");

	assert_eq!(state.credential.access_token.expose(), "access-device");
	assert_eq!(store.get().expect("Store read should succeed."), Some(state));

	device.assert_calls_async(1).await;
	token.assert_calls_async(1).await;
	validate.assert_calls_async(1).await;
}

#[tokio::test]
async fn revoked_token_is_discarded() {
	let server = MockServer::start_async().await;
	let store = MemoryStore::with_value(Some(fresh_state("1001")));
	let broker = reqwest_broker(&server, &store);
	let validate = server
		.mock_async(|when, then| {
			when.method(GET).path("/oauth2/validate");
			then.status(401)
				.header("content-type", "application/json")
				.json_body(json!({ "status": 401, "message": "invalid access token" }));
		})
		.await;
	let refresh = server
		.mock_async(|when, then| {
			when.method(POST).path("/oauth2/token");
			then.status(400)
				.header("content-type", "application/json")
				.json_body(json!({ "status": 400, "message": "Invalid refresh token" }));
		})
		.await;

	assert!(matches!(broker.any_access_token().await, Err(Error::NoCredential)));
	assert_eq!(store.get().expect("Store read should succeed."), None);

	validate.assert_calls_async(1).await;
	refresh.assert_calls_async(1).await;
}
