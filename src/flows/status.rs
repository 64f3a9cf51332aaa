//! Presentation states of a sign-in attempt.

// self
use crate::{
	_prelude::*,
	auth::UserId,
	error::ProviderRejection,
	oauth::DeviceAuthorizationGrant,
	provider::{INVALID_DEVICE_CODE, INVALID_REFRESH_TOKEN, ProviderErrorKind},
	state::PersistedState,
};

/// Text shown for failures without a more specific label.
pub const UNKNOWN_ERROR_LABEL: &str =
	"Unknown authentication error: Please refresh browser source and try again";
/// Text shown once the device code expired.
pub const TIMED_OUT_LABEL: &str =
	"Authentication timed out: Please refresh browser source and try again";

/// What a sign-in screen should show for the current poller or chain outcome.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SignInStatus {
	/// Nothing is known yet.
	Loading,
	/// The user must visit the verification URI and enter the user code.
	AwaitingUser(DeviceAuthorizationGrant),
	/// A credential is stored for this user.
	Authenticated(UserId),
	/// The provider answered with a standard OAuth error.
	OAuthError {
		/// Classified error.
		kind: ProviderErrorKind,
		/// Human-readable label.
		label: &'static str,
	},
	/// The provider answered with one of its own error messages.
	ProviderError {
		/// Provider message.
		code: String,
		/// Human-readable label.
		label: &'static str,
	},
	/// Any other failure.
	Unknown(String),
	/// The device code expired before the user approved it.
	TimedOut,
}
impl SignInStatus {
	/// Maps the outcome of [`Broker::sign_in`](crate::flows::Broker::sign_in) or of a chain read.
	pub fn from_result(result: &Result<PersistedState>) -> Self {
		match result {
			Ok(state) => Self::Authenticated(state.user_id.clone()),
			Err(e) => Self::from_error(e),
		}
	}

	/// Maps a poller or chain failure.
	pub fn from_error(error: &Error) -> Self {
		match error {
			Error::DeviceCodeExpired => Self::TimedOut,
			Error::Provider(rejection) => Self::from_rejection(rejection),
			other => Self::Unknown(other.to_string()),
		}
	}

	fn from_rejection(rejection: &ProviderRejection) -> Self {
		if let Some(label) = provider_label(&rejection.code) {
			return Self::ProviderError { code: rejection.code.clone(), label };
		}

		match oauth_label(rejection.kind) {
			Some(label) => Self::OAuthError { kind: rejection.kind, label },
			None => Self::Unknown(rejection.to_string()),
		}
	}

	/// Returns `true` once no further progress is expected without user action.
	pub fn is_terminal(&self) -> bool {
		!matches!(self, Self::Loading | Self::AwaitingUser(_))
	}

	/// Text to display.
	pub fn label(&self) -> String {
		match self {
			Self::Loading => "Loading...".into(),
			Self::AwaitingUser(grant) => format!(
				"Go to {} and enter code {}.",
				grant.verification_uri_complete, grant.user_code
			),
			Self::Authenticated(user_id) => format!("Signed in as {user_id}."),
			Self::OAuthError { label, .. } | Self::ProviderError { label, .. } => (*label).into(),
			Self::Unknown(_) => UNKNOWN_ERROR_LABEL.into(),
			Self::TimedOut => TIMED_OUT_LABEL.into(),
		}
	}
}
impl Display for SignInStatus {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(&self.label())
	}
}

fn provider_label(code: &str) -> Option<&'static str> {
	if code.eq_ignore_ascii_case(INVALID_DEVICE_CODE) {
		Some("Invalid Device Code")
	} else if code.eq_ignore_ascii_case(INVALID_REFRESH_TOKEN) {
		Some("Invalid Refresh Token")
	} else {
		None
	}
}

fn oauth_label(kind: ProviderErrorKind) -> Option<&'static str> {
	let label = match kind {
		ProviderErrorKind::AccessDenied => "Access Denied",
		ProviderErrorKind::AuthorizationPending => "Authorization Pending",
		ProviderErrorKind::ExpiredToken => "Expired Token",
		ProviderErrorKind::InvalidClient => "Invalid Client",
		ProviderErrorKind::InvalidGrant => "Invalid Grant",
		ProviderErrorKind::InvalidRequest => "Invalid Request",
		ProviderErrorKind::InvalidScope => "Invalid Scope",
		ProviderErrorKind::SlowDown => "Slow Down",
		ProviderErrorKind::UnauthorizedClient => "Unauthorized Client",
		ProviderErrorKind::UnsupportedGrantType => "Unsupported Grant Type",
		ProviderErrorKind::Transient | ProviderErrorKind::Unknown => return None,
	};

	Some(label)
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	fn rejection(kind: ProviderErrorKind, code: &str) -> Error {
		Error::Provider(ProviderRejection {
			kind,
			code: code.into(),
			description: None,
			status: Some(400),
		})
	}

	#[test]
	fn provider_messages_win_over_oauth_codes() {
		let status =
			SignInStatus::from_error(&rejection(ProviderErrorKind::InvalidGrant, "invalid device code"));

		assert_eq!(
			status,
			SignInStatus::ProviderError {
				code: "invalid device code".into(),
				label: "Invalid Device Code"
			}
		);

		let status = SignInStatus::from_error(&rejection(
			ProviderErrorKind::InvalidGrant,
			"Invalid refresh token",
		));

		assert_eq!(status.label(), "Invalid Refresh Token");
	}

	#[test]
	fn oauth_errors_get_labels() {
		let status =
			SignInStatus::from_error(&rejection(ProviderErrorKind::AccessDenied, "access_denied"));

		assert_eq!(
			status,
			SignInStatus::OAuthError { kind: ProviderErrorKind::AccessDenied, label: "Access Denied" }
		);
		assert!(status.is_terminal());
	}

	#[test]
	fn expiry_and_other_failures_are_distinct() {
		assert_eq!(SignInStatus::from_error(&Error::DeviceCodeExpired), SignInStatus::TimedOut);
		assert_eq!(SignInStatus::TimedOut.label(), TIMED_OUT_LABEL);

		let unknown = SignInStatus::from_error(&Error::NoCredential);

		assert!(matches!(unknown, SignInStatus::Unknown(_)));
		assert_eq!(unknown.label(), UNKNOWN_ERROR_LABEL);

		let transient = SignInStatus::from_error(&rejection(ProviderErrorKind::Transient, "oops"));

		assert!(matches!(transient, SignInStatus::Unknown(_)));
		assert!(!SignInStatus::Loading.is_terminal());
	}
}
