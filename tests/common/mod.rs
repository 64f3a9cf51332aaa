//! Fixtures shared by the integration tests.

#![allow(dead_code)]

// std
use std::{collections::VecDeque, io, pin::Pin, sync::Arc};
// crates.io
use oauth2::{
	AsyncHttpClient, HttpClientError, HttpRequest, HttpResponse,
	http::{Response, header::CONTENT_TYPE},
};
use parking_lot::Mutex;
use serde_json::{Value, json};
use time::{Duration, OffsetDateTime};
use url::Url;
// self
use device_flow_broker::{
	auth::{Credential, ErrorId, ProviderId, ScopeSet, UserId},
	flows::{Broker, BrokerBuilder, StateStore},
	http::{ResponseMetadata, ResponseMetadataSlot, TokenHttpClient},
	oauth::GenericTransportErrorMapper,
	provider::{ProviderDescriptor, ProviderQuirks},
	state::{ErrorRecord, PersistedState},
};

pub const CLIENT_ID: &str = "client-under-test";

pub type ScriptedBroker = Broker<ScriptedHttp, GenericTransportErrorMapper>;

/// Canned answer of the scripted transport.
#[derive(Clone, Debug)]
pub enum Reply {
	/// JSON body with the given status.
	Json(u16, Value),
	/// Connection timeout before any status arrived.
	Timeout,
}

/// Request observed by the scripted transport.
#[derive(Clone, Debug)]
pub struct Recorded {
	pub method: String,
	pub uri: String,
	pub body: String,
	pub authorization: Option<String>,
}

/// Transport answering requests from a queue of canned replies.
#[derive(Clone, Debug, Default)]
pub struct ScriptedHttp {
	replies: Arc<Mutex<VecDeque<Reply>>>,
	requests: Arc<Mutex<Vec<Recorded>>>,
}
impl ScriptedHttp {
	pub fn new(replies: impl IntoIterator<Item = Reply>) -> Self {
		let http = Self::default();

		http.replies.lock().extend(replies);

		http
	}

	pub fn push(&self, reply: Reply) {
		self.replies.lock().push_back(reply);
	}

	pub fn requests(&self) -> Vec<Recorded> {
		self.requests.lock().clone()
	}

	pub fn request_count(&self) -> usize {
		self.requests.lock().len()
	}

	fn answer(&self, request: &HttpRequest) -> Reply {
		self.requests.lock().push(Recorded {
			method: request.method().to_string(),
			uri: request.uri().to_string(),
			body: String::from_utf8_lossy(request.body()).into_owned(),
			authorization: request
				.headers()
				.get("authorization")
				.and_then(|value| value.to_str().ok())
				.map(str::to_owned),
		});

		self.replies.lock().pop_front().expect("Scripted transport ran out of replies.")
	}
}
impl TokenHttpClient for ScriptedHttp {
	type Handle = ScriptedHandle;
	type TransportError = io::Error;

	fn with_metadata(&self, slot: ResponseMetadataSlot) -> Self::Handle {
		ScriptedHandle { http: self.clone(), slot }
	}
}

/// Handle handed to the provider client for one request.
#[derive(Debug)]
pub struct ScriptedHandle {
	http: ScriptedHttp,
	slot: ResponseMetadataSlot,
}
impl<'c> AsyncHttpClient<'c> for ScriptedHandle {
	type Error = HttpClientError<io::Error>;
	type Future =
		Pin<Box<dyn Future<Output = Result<HttpResponse, Self::Error>> + 'c + Send>>;

	fn call(&'c self, request: HttpRequest) -> Self::Future {
		Box::pin(async move {
			self.slot.take();

			match self.http.answer(&request) {
				Reply::Timeout => Err(HttpClientError::Io(io::Error::new(
					io::ErrorKind::TimedOut,
					"scripted connection timeout",
				))),
				Reply::Json(status, body) => {
					self.slot.store(ResponseMetadata { status: Some(status) });

					Ok(Response::builder()
						.status(status)
						.header(CONTENT_TYPE, "application/json")
						.body(body.to_string().into_bytes())
						.expect("Scripted response should build."))
				},
			}
		})
	}
}

/// Twitch-shaped descriptor rooted at `base`.
pub fn descriptor(base: &str) -> ProviderDescriptor {
	let url = |path: &str| {
		Url::parse(&format!("{base}{path}")).expect("Fixture endpoint should parse.")
	};

	ProviderDescriptor::builder(ProviderId::new("mock").expect("Provider id should be valid."))
		.device_authorization_endpoint(url("/oauth2/device"))
		.token_endpoint(url("/oauth2/token"))
		.introspection_endpoint(url("/oauth2/validate"))
		.quirks(ProviderQuirks {
			scope_param: "scopes".into(),
			scope_on_token_request: true,
			..Default::default()
		})
		.build()
		.expect("Fixture descriptor should build.")
}

pub fn scripted_broker(store: StateStore, http: &ScriptedHttp) -> ScriptedBroker {
	BrokerBuilder::new(store, descriptor("https://id.provider.test"), CLIENT_ID)
		.build_with(http.clone(), GenericTransportErrorMapper)
}

pub fn scopes(values: &[&str]) -> ScopeSet {
	ScopeSet::new(values.iter().copied()).expect("Scope fixture should be valid.")
}

pub fn user(id: &str) -> UserId {
	UserId::new(id).expect("User fixture should be valid.")
}

/// Credential obtained `age` ago with the given lifetime.
pub fn credential(
	access: &str,
	refresh: Option<&str>,
	lifetime: Option<Duration>,
	age: Duration,
) -> Credential {
	Credential::builder(access)
		.maybe_refresh_token(refresh.map(str::to_owned))
		.scopes(scopes(&["chat:read"]))
		.maybe_expires_in(lifetime)
		.obtained_at(OffsetDateTime::now_utc() - age)
		.build()
		.expect("Credential fixture should build.")
}

/// Unexpired credential verified a minute ago.
pub fn fresh_state(user_id: &str) -> PersistedState {
	let credential =
		credential("access-fresh", Some("refresh-fresh"), Some(Duration::hours(4)), Duration::ZERO);

	PersistedState::new(credential, user(user_id), vec!["chat".into()])
		.with_last_verified(Some(OffsetDateTime::now_utc() - Duration::minutes(1)))
}

/// Credential past its lifetime that can still be refreshed.
pub fn expired_state(user_id: &str) -> PersistedState {
	let credential =
		credential("access-old", Some("refresh-old"), Some(Duration::hours(1)), Duration::hours(2));

	PersistedState::new(credential, user(user_id), vec!["chat".into()])
		.with_last_verified(Some(OffsetDateTime::now_utc() - Duration::hours(2)))
}

pub fn error_record(id: &str, count: u32) -> ErrorRecord {
	ErrorRecord {
		id: ErrorId::new(id).expect("Error id fixture should be valid."),
		message: "token validation failed: upstream hiccup".into(),
		stack: None,
		count,
		occurred_at: OffsetDateTime::now_utc(),
		force_refresh_on_retry: false,
	}
}

pub fn device_body(interval: u64, expires_in: u64) -> Value {
	json!({
		"device_code": "device-123",
		"user_code": "ABCD-EFGH",
		"verification_uri": "https://id.provider.test/activate",
		"expires_in": expires_in,
		"interval": interval,
	})
}

pub fn token_body(access: &str, refresh: &str) -> Value {
	json!({
		"access_token": access,
		"refresh_token": refresh,
		"expires_in": 14_400,
		"scope": ["chat:read"],
		"token_type": "bearer",
	})
}

pub fn validate_body(user_id: &str) -> Value {
	json!({
		"client_id": CLIENT_ID,
		"login": "streamer",
		"scopes": ["chat:read"],
		"user_id": user_id,
		"expires_in": 14_000,
	})
}

pub fn oauth_error(code: &str) -> Value {
	json!({ "error": code })
}
