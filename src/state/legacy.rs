//! Migration of browser-era credential records.
//!
//! Older clients persisted the bare provider token under `twitch/<user id>` next to a separate
//! `userId` entry. Those records carry no verification or error history, so the migrated state is
//! treated as never verified and gets introspected on its first use.

// self
use crate::{
	_prelude::*,
	auth::{Credential, ScopeSet, TokenSecret, UserId},
	state::{
		PersistedState,
		codec::{epoch_ms, option_seconds},
	},
};

/// Bare token record written by browser-era clients.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyAccessToken {
	/// Access token secret.
	pub access_token: TokenSecret,
	/// Refresh token secret.
	#[serde(default)]
	pub refresh_token: Option<TokenSecret>,
	/// Granted scopes.
	#[serde(default)]
	pub scope: ScopeSet,
	/// Lifetime in seconds relative to the obtainment timestamp.
	#[serde(default, with = "option_seconds")]
	pub expires_in: Option<Duration>,
	/// Epoch-millisecond timestamp the token was obtained at.
	#[serde(with = "epoch_ms")]
	pub obtainment_timestamp: OffsetDateTime,
}
impl LegacyAccessToken {
	/// Key under which browser-era clients stored the token of `user_id`.
	pub fn storage_key(user_id: &UserId) -> String {
		format!("twitch/{user_id}")
	}

	/// Parses a raw legacy record.
	pub fn parse(raw: &str) -> Result<Self, serde_path_to_error::Error<serde_json::Error>> {
		let mut deserializer = serde_json::Deserializer::from_str(raw);

		serde_path_to_error::deserialize(&mut deserializer)
	}

	/// Converts the legacy token into an unverified [`PersistedState`].
	pub fn into_state(self, user_id: UserId, intents: Vec<String>) -> PersistedState {
		let credential = Credential {
			access_token: self.access_token,
			refresh_token: self.refresh_token,
			scopes: self.scope,
			expires_in: self.expires_in,
			obtained_at: self.obtainment_timestamp,
		};

		PersistedState::new(credential, user_id, intents)
	}
}

#[cfg(test)]
mod tests {
	// crates.io
	use time::macros::datetime;
	// self
	use super::*;

	#[test]
	fn migrates_browser_era_tokens() {
		let raw = r#"{
			"accessToken": "a",
			"refreshToken": "r",
			"scope": ["chat:read"],
			"expiresIn": 14000,
			"obtainmentTimestamp": 1735689600000
		}"#;
		let user = UserId::new("1234").expect("User fixture should be valid.");
		let legacy = LegacyAccessToken::parse(raw).expect("Legacy token should parse.");
		let state = legacy.into_state(user.clone(), vec!["chat".into()]);

		assert_eq!(LegacyAccessToken::storage_key(&user), "twitch/1234");
		assert_eq!(state.user_id, user);
		assert_eq!(state.credential.access_token.expose(), "a");
		assert_eq!(state.credential.obtained_at, datetime!(2025-01-01 00:00 UTC));
		assert_eq!(state.credential.expires_in, Some(Duration::seconds(14_000)));
		assert!(state.last_verified.is_none());
		assert!(state.error_record.is_none());
	}

	#[test]
	fn reports_the_failing_path() {
		let err = LegacyAccessToken::parse(r#"{"accessToken":"a","obtainmentTimestamp":"soon"}"#)
			.expect_err("Non-numeric timestamps must be rejected.");

		assert_eq!(err.path().to_string(), "obtainmentTimestamp");
	}
}
