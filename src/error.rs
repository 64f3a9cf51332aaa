//! Engine-level error types shared across the device poller, the token chain, and stores.

// self
use crate::{
	_prelude::*,
	auth::{ErrorId, UserId},
	provider::ProviderErrorKind,
};

/// Engine-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Canonical engine error exposed by public APIs.
#[derive(Debug, ThisError)]
pub enum Error {
	/// Storage-layer failure, including a lock wait rejected by a closed controller.
	#[error("{0}")]
	Storage(
		#[from]
		#[source]
		crate::store::StoreError,
	),
	/// Local configuration problem.
	#[error(transparent)]
	Config(#[from] ConfigError),
	/// Temporary upstream failure; retry with backoff.
	#[error(transparent)]
	Transient(#[from] TransientError),
	/// Transport failure (DNS, TCP, TLS, timeouts).
	#[error(transparent)]
	Transport(#[from] TransportError),
	/// Provider answered with a terminal OAuth or provider-specific error.
	#[error(transparent)]
	Provider(#[from] ProviderRejection),

	/// The credential can no longer be used and must be replaced by a new sign-in.
	#[error("Credential is no longer usable: {reason}.")]
	InvalidToken {
		/// Provider- or engine-supplied reason string.
		reason: String,
	},
	/// A caller asked for a specific user but the stored credential belongs to someone else.
	#[error("Stored credential belongs to user `{actual}`, not `{expected}`.")]
	UserMismatch {
		/// User the caller asked for.
		expected: UserId,
		/// User bound to the stored credential.
		actual: UserId,
	},
	/// Stored credential does not cover any scope of a required scope set.
	#[error("Credential lacks the required scopes: {reason}.")]
	InsufficientScope {
		/// Description of the unmet scope requirement.
		reason: String,
	},
	/// A forced retry addressed a failure that has since been resolved or replaced.
	#[error("Retry of failure `{error_id}` is stale; the stored state changed in the meantime.")]
	StaleRetry {
		/// Identifier of the failure the caller wanted to retry.
		error_id: ErrorId,
	},
	/// The last chain evaluation failed and the failure was recorded for a backoff retry.
	#[error("Could not obtain an access token: {message}.")]
	Recoverable {
		/// Identifier of the recorded failure.
		id: ErrorId,
		/// Recorded failure message.
		message: String,
		/// Number of consecutive failures of this kind.
		count: u32,
	},
	/// No credential is stored (or the stored one was discarded as unrecoverable).
	#[error("No credential is available.")]
	NoCredential,
	/// The device code expired before the user approved the request.
	#[error("Device code expired before the user completed authorization.")]
	DeviceCodeExpired,
	/// The operation was aborted through its cancellation signal.
	#[error("Operation was cancelled.")]
	Cancelled,
}
impl Error {
	/// Returns `true` when the error means the stored credential must be discarded.
	///
	/// Invalid tokens and rejected grants (including provider-specific "invalid refresh token"
	/// answers) cannot be fixed by retrying.
	pub fn is_unrecoverable_credential(&self) -> bool {
		match self {
			Self::InvalidToken { .. } => true,
			Self::Provider(rejection) => rejection.kind == ProviderErrorKind::InvalidGrant,
			_ => false,
		}
	}

	/// Returns `true` when a lock wait was rejected because its controller closed.
	pub fn is_lock_closed(&self) -> bool {
		matches!(self, Self::Storage(crate::store::StoreError::LockClosed { .. }))
	}

	/// Returns `true` for connection-timeout-class transport failures.
	pub fn is_connection_timeout(&self) -> bool {
		matches!(self, Self::Transport(TransportError::Timeout { .. }))
	}
}

/// Terminal rejection returned by the provider's token or device endpoints.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
#[error("Provider rejected the request with `{code}` ({kind})")]
pub struct ProviderRejection {
	/// Engine classification of the failure.
	pub kind: ProviderErrorKind,
	/// OAuth `error` code, or the provider-specific `message` when no code was sent.
	pub code: String,
	/// Optional OAuth `error_description` (not meant for end users).
	pub description: Option<String>,
	/// HTTP status code of the failing response.
	pub status: Option<u16>,
}

/// Configuration and validation failures raised by the engine.
#[derive(Debug, ThisError)]
pub enum ConfigError {
	/// HTTP client could not be constructed.
	#[error("HTTP client could not be constructed.")]
	HttpClientBuild {
		/// Underlying transport builder failure.
		#[source]
		source: BoxError,
	},
	/// HTTP request construction failed.
	#[error(transparent)]
	HttpRequest(#[from] oauth2::http::Error),
	/// Scope values cannot be normalized.
	#[error("Scopes are invalid.")]
	InvalidScope(#[from] crate::auth::ScopeValidationError),
	/// An identifier returned by the provider failed validation.
	#[error("Identifier is invalid.")]
	InvalidIdentifier(#[from] crate::auth::IdentifierError),
	/// Credential builder validation failed.
	#[error("Unable to build credential.")]
	CredentialBuild(#[from] crate::auth::CredentialBuilderError),
	/// Provider returned an excessively large `expires_in`.
	#[error("The expires_in value exceeds the supported range.")]
	ExpiresInOutOfRange,
	/// Validation kept rejecting freshly refreshed credentials.
	#[error("Token validation still fails after {attempts} refresh attempts.")]
	ValidationLoop {
		/// Nested refresh attempts made before giving up.
		attempts: u8,
	},
}
impl ConfigError {
	/// Wraps a transport's builder failure inside [`ConfigError`].
	pub fn http_client_build(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::HttpClientBuild { source: Box::new(src) }
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for ConfigError {
	fn from(e: ReqwestError) -> Self {
		Self::http_client_build(e)
	}
}

/// Temporary failure variants (safe to retry).
#[derive(Debug, ThisError)]
pub enum TransientError {
	/// Provider returned an unexpected but non-fatal response.
	#[error("The {endpoint} endpoint returned an unexpected response: {message}.")]
	Endpoint {
		/// Endpoint label (device authorization, token, introspection).
		endpoint: &'static str,
		/// Summary of the failure.
		message: String,
		/// HTTP status code, when available.
		status: Option<u16>,
	},
	/// Provider responded with JSON that does not match the expected shape.
	#[error("The {endpoint} endpoint returned malformed JSON.")]
	ResponseParse {
		/// Endpoint label (device authorization, token, introspection).
		endpoint: &'static str,
		/// Structured parsing failure including the JSON path.
		#[source]
		source: serde_path_to_error::Error<serde_json::Error>,
		/// HTTP status code, when available.
		status: Option<u16>,
	},
}

/// Transport-level failures (network, IO).
#[derive(Debug, ThisError)]
pub enum TransportError {
	/// Underlying HTTP client reported a network failure.
	#[error("Network error occurred while calling the provider.")]
	Network {
		/// Transport-specific network error.
		#[source]
		source: BoxError,
	},
	/// Connecting to or reading from the provider timed out.
	#[error("Request to the provider timed out.")]
	Timeout {
		/// Transport-specific timeout error.
		#[source]
		source: BoxError,
	},
	/// Underlying IO failure surfaced during transport.
	#[error("I/O error occurred while calling the provider.")]
	Io(#[from] std::io::Error),
}
impl TransportError {
	/// Wraps a transport-specific network error.
	pub fn network(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::Network { source: Box::new(src) }
	}

	/// Wraps a transport-specific timeout error.
	pub fn timeout(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::Timeout { source: Box::new(src) }
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for TransportError {
	fn from(e: ReqwestError) -> Self {
		if e.is_timeout() { Self::timeout(e) } else { Self::network(e) }
	}
}
