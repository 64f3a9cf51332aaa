//! JSON shapes exchanged with provider endpoints.

// self
use crate::{_prelude::*, auth::ScopeSet};

/// Device authorization response (RFC 8628 section 3.2).
#[derive(Debug, Deserialize)]
pub(crate) struct DeviceAuthorizationBody {
	pub device_code: String,
	pub user_code: String,
	pub verification_uri: String,
	#[serde(default)]
	pub verification_uri_complete: Option<String>,
	pub expires_in: u64,
	#[serde(default)]
	pub interval: Option<u64>,
}

/// Successful token endpoint response.
#[derive(Debug, Deserialize)]
pub(crate) struct TokenBody {
	pub access_token: String,
	#[serde(default)]
	pub expires_in: Option<u64>,
	#[serde(default)]
	pub refresh_token: Option<String>,
	#[serde(default)]
	pub scope: Option<ScopeSet>,
}

/// Error response in either the OAuth `{error, error_description}` shape or the provider
/// `{status, message}` shape. Some providers send both at once.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct ErrorBody {
	#[serde(default)]
	pub error: Option<String>,
	#[serde(default)]
	pub error_description: Option<String>,
	#[serde(default)]
	pub status: Option<u16>,
	#[serde(default)]
	pub message: Option<String>,
}

/// Answer of a `validate`-style introspection endpoint.
#[derive(Debug, Deserialize)]
pub(crate) struct ValidateBody {
	#[serde(default)]
	pub client_id: Option<String>,
	#[serde(default)]
	pub login: Option<String>,
	#[serde(default)]
	pub scopes: Option<ScopeSet>,
	#[serde(default)]
	pub user_id: Option<String>,
	#[serde(default)]
	pub expires_in: Option<i64>,
}

/// RFC 7662 introspection answer.
#[derive(Debug, Deserialize)]
pub(crate) struct IntrospectionBody {
	pub active: bool,
	#[serde(default)]
	pub scope: Option<ScopeSet>,
	#[serde(default)]
	pub client_id: Option<String>,
	#[serde(default)]
	pub username: Option<String>,
	#[serde(default)]
	pub sub: Option<String>,
	#[serde(default)]
	pub user_id: Option<String>,
	#[serde(default)]
	pub exp: Option<i64>,
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn error_body_accepts_both_shapes() {
		let oauth: ErrorBody =
			serde_json::from_str(r#"{"error":"slow_down","error_description":"Back off."}"#)
				.expect("OAuth error body should parse.");
		let provider: ErrorBody =
			serde_json::from_str(r#"{"status":400,"message":"authorization_pending"}"#)
				.expect("Provider error body should parse.");

		assert_eq!(oauth.error.as_deref(), Some("slow_down"));
		assert_eq!(provider.status, Some(400));
		assert_eq!(provider.message.as_deref(), Some("authorization_pending"));
	}

	#[test]
	fn token_body_accepts_array_and_string_scopes() {
		let array: TokenBody = serde_json::from_str(
			r#"{"access_token":"a","token_type":"bearer","scope":["chat:read","clips:edit"]}"#,
		)
		.expect("Array scopes should parse.");
		let joined: TokenBody =
			serde_json::from_str(r#"{"access_token":"a","scope":"chat:read clips:edit"}"#)
				.expect("Joined scopes should parse.");

		assert_eq!(array.scope, joined.scope);
		assert!(array.expires_in.is_none());
	}
}
