// self
use crate::_prelude::*;

/// How the introspection endpoint is called and answered.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntrospectionStyle {
	/// `GET` with an `Authorization: OAuth <token>` header; a 401 marks the token invalid and the
	/// answer carries `client_id`, `login`, `scopes`, `user_id`, and `expires_in`.
	#[default]
	Validate,
	/// RFC 7662 `POST` with a `token` form field; `active: false` marks the token invalid.
	Rfc7662,
}

/// Provider-specific quirks that influence how requests are shaped.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderQuirks {
	/// Form field carrying the requested scopes.
	pub scope_param: String,
	/// Whether the requested scopes accompany every device token poll.
	pub scope_on_token_request: bool,
	/// Character used to join scopes when constructing the scope parameter.
	pub scope_delimiter: char,
	/// Introspection protocol spoken by the introspection endpoint.
	pub introspection: IntrospectionStyle,
}
impl Default for ProviderQuirks {
	fn default() -> Self {
		Self {
			scope_param: "scope".into(),
			scope_on_token_request: false,
			scope_delimiter: ' ',
			introspection: IntrospectionStyle::default(),
		}
	}
}
