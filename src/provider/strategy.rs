//! Provider strategy hooks that customize provider calls.
//!
//! Implementations decorate outgoing form requests and normalize error classification without
//! tying flows to any particular HTTP client.

// self
use crate::_prelude::*;

/// Provider-specific answer sent for an unknown or consumed device code.
pub const INVALID_DEVICE_CODE: &str = "invalid device code";
/// Provider-specific answer sent for a rejected refresh token.
pub const INVALID_REFRESH_TOKEN: &str = "Invalid refresh token";

/// Strategy hook that allows providers to decorate requests and classify errors.
///
/// Implementors are required to be `Send + Sync`, and the hooks use crate-owned data types so
/// downstream crates never depend on reqwest-specific structures. Override only what you need;
/// `augment_form` has a default no-op implementation.
pub trait ProviderStrategy: Send + Sync {
	/// Maps a provider error response into the engine taxonomy.
	fn classify_error(&self, ctx: &ProviderErrorContext) -> ProviderErrorKind;

	/// Gives providers a chance to add custom form parameters before dispatching.
	///
	/// The default implementation does nothing, which is enough for most providers.
	fn augment_form(&self, _endpoint: EndpointKind, _form: &mut BTreeMap<String, String>) {}
}

/// Provider endpoints called by the engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EndpointKind {
	/// Device authorization request.
	DeviceAuthorization,
	/// Token endpoint polled with the device code.
	DeviceToken,
	/// Token endpoint called with the refresh token.
	Refresh,
	/// Token introspection (validation) endpoint.
	Introspection,
}
impl EndpointKind {
	/// Returns a stable label suitable for messages.
	pub const fn as_str(self) -> &'static str {
		match self {
			EndpointKind::DeviceAuthorization => "device authorization",
			EndpointKind::DeviceToken => "device token",
			EndpointKind::Refresh => "refresh",
			EndpointKind::Introspection => "introspection",
		}
	}
}
impl Display for EndpointKind {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Canonical provider error categories used by strategies.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ProviderErrorKind {
	/// The user has not completed the device authorization yet.
	AuthorizationPending,
	/// The client polls too fast and must add five seconds to its interval.
	SlowDown,
	/// The user denied the authorization request.
	AccessDenied,
	/// The device code expired.
	ExpiredToken,
	/// Grant rejected, including provider-specific invalid device code and invalid refresh
	/// token answers.
	InvalidGrant,
	/// Client authentication failed.
	InvalidClient,
	/// The client is not allowed to use this grant.
	UnauthorizedClient,
	/// The request is malformed.
	InvalidRequest,
	/// The requested scope is invalid or exceeds what was granted.
	InvalidScope,
	/// The grant type is not supported by the provider.
	UnsupportedGrantType,
	/// Failure is temporary.
	Transient,
	/// Unrecognized error code.
	Unknown,
}
impl ProviderErrorKind {
	/// Returns a stable label suitable for messages and metrics.
	pub const fn as_str(self) -> &'static str {
		match self {
			ProviderErrorKind::AuthorizationPending => "authorization_pending",
			ProviderErrorKind::SlowDown => "slow_down",
			ProviderErrorKind::AccessDenied => "access_denied",
			ProviderErrorKind::ExpiredToken => "expired_token",
			ProviderErrorKind::InvalidGrant => "invalid_grant",
			ProviderErrorKind::InvalidClient => "invalid_client",
			ProviderErrorKind::UnauthorizedClient => "unauthorized_client",
			ProviderErrorKind::InvalidRequest => "invalid_request",
			ProviderErrorKind::InvalidScope => "invalid_scope",
			ProviderErrorKind::UnsupportedGrantType => "unsupported_grant_type",
			ProviderErrorKind::Transient => "transient",
			ProviderErrorKind::Unknown => "unknown",
		}
	}

	/// Returns `true` for the expected polling states of the device flow.
	pub const fn is_polling_state(self) -> bool {
		matches!(self, ProviderErrorKind::AuthorizationPending | ProviderErrorKind::SlowDown)
	}
}
impl Display for ProviderErrorKind {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Context passed to provider strategies when classifying errors.
///
/// The struct keeps only primitive data (status codes, OAuth fields, provider message) so
/// strategies stay decoupled from any HTTP client.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProviderErrorContext {
	/// Endpoint that produced the failure.
	pub endpoint: EndpointKind,
	/// HTTP status code returned by the provider, when available.
	pub http_status: Option<u16>,
	/// Provider-supplied OAuth `error` field.
	pub oauth_error: Option<String>,
	/// Provider-supplied OAuth `error_description` field.
	pub error_description: Option<String>,
	/// Provider-specific `message` field.
	pub provider_message: Option<String>,
	/// Provider-specific `status` field.
	pub provider_status: Option<u16>,
}
impl ProviderErrorContext {
	/// Creates a new context scoped to the provided endpoint.
	pub fn new(endpoint: EndpointKind) -> Self {
		Self {
			endpoint,
			http_status: None,
			oauth_error: None,
			error_description: None,
			provider_message: None,
			provider_status: None,
		}
	}

	/// Adds an HTTP status code.
	pub fn with_http_status(mut self, status: u16) -> Self {
		self.http_status = Some(status);

		self
	}

	/// Adds the OAuth error code string returned by the provider.
	pub fn with_oauth_error(mut self, error: impl Into<String>) -> Self {
		self.oauth_error = Some(error.into());

		self
	}

	/// Adds the OAuth `error_description` field.
	pub fn with_error_description(mut self, description: impl Into<String>) -> Self {
		self.error_description = Some(description.into());

		self
	}

	/// Adds a provider-specific message and status.
	pub fn with_provider_message(mut self, message: impl Into<String>, status: Option<u16>) -> Self {
		self.provider_message = Some(message.into());
		self.provider_status = status;

		self
	}

	/// The code identifying the failure.
	///
	/// A recognized OAuth `error` wins; otherwise the provider message is used, since some
	/// providers pair a generic `error` (`"Bad Request"`) with the meaningful `message`.
	pub fn code(&self) -> &str {
		match (self.oauth_error.as_deref(), self.provider_message.as_deref()) {
			(Some(error), _) if match_oauth_code(error).is_some() => error,
			(_, Some(message)) => message,
			(Some(error), None) => error,
			(None, None) => "",
		}
	}
}

/// Default strategy applying RFC 6749 / RFC 8628 codes plus the provider-specific messages.
///
/// It prioritizes the structured `error` field, then the provider `message` field (which some
/// providers use to carry the OAuth code itself), and finally the HTTP status code.
#[derive(Debug, Default)]
pub struct DefaultProviderStrategy;
impl Display for DefaultProviderStrategy {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("default-provider-strategy")
	}
}
impl ProviderStrategy for DefaultProviderStrategy {
	fn classify_error(&self, ctx: &ProviderErrorContext) -> ProviderErrorKind {
		if let Some(kind) = ctx.oauth_error.as_deref().and_then(match_oauth_code) {
			return kind;
		}
		if let Some(kind) = ctx.provider_message.as_deref().and_then(match_provider_message) {
			return kind;
		}

		classify_status(ctx.http_status)
	}
}

fn match_oauth_code(value: &str) -> Option<ProviderErrorKind> {
	let kind = match value {
		"authorization_pending" => ProviderErrorKind::AuthorizationPending,
		"slow_down" => ProviderErrorKind::SlowDown,
		"access_denied" => ProviderErrorKind::AccessDenied,
		"expired_token" => ProviderErrorKind::ExpiredToken,
		"invalid_grant" => ProviderErrorKind::InvalidGrant,
		"invalid_client" => ProviderErrorKind::InvalidClient,
		"unauthorized_client" => ProviderErrorKind::UnauthorizedClient,
		"invalid_request" => ProviderErrorKind::InvalidRequest,
		"invalid_scope" => ProviderErrorKind::InvalidScope,
		"unsupported_grant_type" => ProviderErrorKind::UnsupportedGrantType,
		"temporarily_unavailable" | "server_error" => ProviderErrorKind::Transient,
		_ => return None,
	};

	Some(kind)
}

fn match_provider_message(message: &str) -> Option<ProviderErrorKind> {
	if message.eq_ignore_ascii_case(INVALID_DEVICE_CODE)
		|| message.eq_ignore_ascii_case(INVALID_REFRESH_TOKEN)
	{
		return Some(ProviderErrorKind::InvalidGrant);
	}

	match_oauth_code(message)
}

fn classify_status(status: Option<u16>) -> ProviderErrorKind {
	match status {
		Some(429) => ProviderErrorKind::Transient,
		Some(code) if code >= 500 => ProviderErrorKind::Transient,
		_ => ProviderErrorKind::Unknown,
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	fn classify(ctx: ProviderErrorContext) -> ProviderErrorKind {
		DefaultProviderStrategy.classify_error(&ctx)
	}

	#[test]
	fn oauth_codes_take_priority() {
		let ctx = ProviderErrorContext::new(EndpointKind::DeviceToken)
			.with_http_status(400)
			.with_oauth_error("slow_down")
			.with_provider_message("ignored", None);

		assert_eq!(classify(ctx), ProviderErrorKind::SlowDown);
	}

	#[test]
	fn provider_messages_are_recognized() {
		let pending = ProviderErrorContext::new(EndpointKind::DeviceToken)
			.with_provider_message("authorization_pending", Some(400));
		let device = ProviderErrorContext::new(EndpointKind::DeviceToken)
			.with_provider_message(INVALID_DEVICE_CODE, Some(400));
		let refresh = ProviderErrorContext::new(EndpointKind::Refresh)
			.with_oauth_error("Bad Request")
			.with_provider_message(INVALID_REFRESH_TOKEN, Some(400));

		assert_eq!(classify(pending), ProviderErrorKind::AuthorizationPending);
		assert_eq!(classify(device), ProviderErrorKind::InvalidGrant);
		assert_eq!(classify(refresh.clone()), ProviderErrorKind::InvalidGrant);
		assert_eq!(refresh.code(), INVALID_REFRESH_TOKEN);
	}

	#[test]
	fn unknown_codes_fall_back_to_status() {
		let unknown = ProviderErrorContext::new(EndpointKind::Refresh)
			.with_http_status(400)
			.with_oauth_error("something_new");
		let overloaded = ProviderErrorContext::new(EndpointKind::Refresh).with_http_status(503);

		assert_eq!(classify(unknown), ProviderErrorKind::Unknown);
		assert_eq!(classify(overloaded), ProviderErrorKind::Transient);
		assert!(ProviderErrorKind::AuthorizationPending.is_polling_state());
		assert!(!ProviderErrorKind::AccessDenied.is_polling_state());
	}
}
