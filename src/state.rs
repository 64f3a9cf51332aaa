//! Persisted credential state shared by every engine instance through one store key.

pub mod codec;
pub mod legacy;

pub use legacy::*;

// self
use crate::{
	_prelude::*,
	auth::{Credential, ErrorId, ScopeSet, UserId},
	state::codec::{epoch_ms, option_epoch_ms},
};

/// Upper bound of the exponential retry backoff.
pub const MAX_RETRY_DELAY: Duration = Duration::minutes(10);
/// Delay applied after the first failure.
pub const BASE_RETRY_DELAY: Duration = Duration::seconds(1);

/// Builds the store key under which a client's state is persisted.
pub fn store_key(client_id: &str) -> String {
	format!("{client_id}-auth")
}

/// Snapshot persisted for the authenticated user.
///
/// `error_record` is present exactly when the last chain evaluation failed recoverably. When it is
/// absent the credential is believed valid as of `last_verified` (or never verified).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedState {
	/// Current credential.
	#[serde(alias = "token")]
	pub credential: Credential,
	/// User owning the credential, as reported by introspection.
	pub user_id: UserId,
	/// Intent labels the credential may be selected by.
	#[serde(default)]
	pub intents: Vec<String>,
	/// Instant of the last successful introspection.
	#[serde(default, with = "option_epoch_ms", alias = "lastVerifiedEpochMs")]
	pub last_verified: Option<OffsetDateTime>,
	/// Last recoverable failure, if the credential is currently in an errored state.
	#[serde(default, alias = "error")]
	pub error_record: Option<ErrorRecord>,
}
impl PersistedState {
	/// Creates a freshly signed-in state without verification or error history.
	pub fn new(credential: Credential, user_id: UserId, intents: Vec<String>) -> Self {
		Self { credential, user_id, intents, last_verified: None, error_record: None }
	}

	/// Marks the state as verified at `instant`.
	pub fn with_last_verified(mut self, instant: Option<OffsetDateTime>) -> Self {
		self.last_verified = instant;

		self
	}

	/// Replaces the error record.
	pub fn with_error(mut self, record: Option<ErrorRecord>) -> Self {
		self.error_record = record;

		self
	}

	/// Returns `true` when the credential is bound to `intent`.
	pub fn has_intent(&self, intent: &str) -> bool {
		self.intents.iter().any(|candidate| candidate == intent)
	}

	/// Granted scopes of the current credential.
	pub fn scopes(&self) -> &ScopeSet {
		&self.credential.scopes
	}

	/// Returns `true` when the last verification is missing or older than `max_age`.
	pub fn needs_verification(&self, now: OffsetDateTime, max_age: Duration) -> bool {
		match self.last_verified {
			Some(verified) => now - verified > max_age,
			None => true,
		}
	}
}

/// Recoverable failure recorded in the persisted state.
///
/// `count` grows across consecutive failures and drives the retry backoff. `id` is regenerated for
/// every new failure so retries can detect that someone else already replaced or resolved it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorRecord {
	/// Unique identifier of this failure.
	pub id: ErrorId,
	/// Human-readable failure message.
	pub message: String,
	/// Optional error chain rendering for diagnostics.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub stack: Option<String>,
	/// Consecutive failure count, starting at one.
	pub count: u32,
	/// Instant the failure was recorded.
	#[serde(with = "epoch_ms", alias = "time", alias = "occurredAtEpochMs")]
	pub occurred_at: OffsetDateTime,
	/// Whether the retry must refresh the credential before anything else.
	#[serde(default, alias = "forceRefresh")]
	pub force_refresh_on_retry: bool,
}
impl ErrorRecord {
	/// Records `error` as the failure following `previous`.
	pub fn follow(
		previous: Option<&ErrorRecord>,
		error: &(dyn StdError + 'static),
		force_refresh_on_retry: bool,
	) -> Self {
		Self {
			id: ErrorId::generate(),
			message: error.to_string(),
			stack: render_sources(error),
			count: previous.map_or(0, |record| record.count).saturating_add(1),
			occurred_at: codec::now_millis(),
			force_refresh_on_retry,
		}
	}

	/// Backoff delay for this failure: `min(10 min, 1 s * 2^(count - 1))`.
	pub fn retry_delay(&self) -> Duration {
		let exponent = self.count.saturating_sub(1).min(30);
		let delay = BASE_RETRY_DELAY.saturating_mul(1_i32 << exponent);

		delay.min(MAX_RETRY_DELAY)
	}

	/// Instant at which the failure should be retried.
	pub fn retry_at(&self) -> OffsetDateTime {
		self.occurred_at + self.retry_delay()
	}
}

fn render_sources(error: &(dyn StdError + 'static)) -> Option<String> {
	let mut lines = Vec::new();
	let mut source = error.source();

	while let Some(cause) = source {
		lines.push(format!("caused by: {cause}"));

		source = cause.source();
	}

	if lines.is_empty() { None } else { Some(lines.join("\n")) }
}
