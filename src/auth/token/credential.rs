//! Credential model, freshness checks, and builder.

// self
use crate::{
	_prelude::*,
	auth::{ScopeSet, TokenSecret},
	state::codec::{self, epoch_ms, option_seconds},
};

/// Default preemptive refresh window applied by [`Credential::is_expired_at`] callers.
pub const DEFAULT_EXPIRY_SKEW: Duration = Duration::seconds(60);

/// Errors produced by [`CredentialBuilder`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum CredentialBuilderError {
	/// Issued when the access token value is empty.
	#[error("Access token cannot be empty.")]
	EmptyAccessToken,
	/// Issued when a negative lifetime was configured.
	#[error("Credential lifetime cannot be negative.")]
	NegativeExpiry,
}

/// Access/refresh token pair with its granted scopes and issuance metadata.
///
/// Expiry is kept relative to `obtained_at` rather than as an absolute instant so clock drift
/// between issuance and persistence does not shift it.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credential {
	/// Access token secret; callers must avoid logging it.
	pub access_token: TokenSecret,
	/// Refresh token secret, if the provider issued one.
	#[serde(default)]
	pub refresh_token: Option<TokenSecret>,
	/// Normalized scopes granted to this credential.
	#[serde(default, alias = "scope")]
	pub scopes: ScopeSet,
	/// Lifetime relative to [`obtained_at`](Self::obtained_at); `None` never expires.
	#[serde(default, with = "option_seconds", alias = "expiresInSeconds")]
	pub expires_in: Option<Duration>,
	/// Instant the provider issued the credential (millisecond precision).
	#[serde(with = "epoch_ms", alias = "obtainmentTimestamp", alias = "obtainedAtEpochMs")]
	pub obtained_at: OffsetDateTime,
}
impl Credential {
	/// Returns a builder seeded with the access token value.
	pub fn builder(access_token: impl Into<String>) -> CredentialBuilder {
		CredentialBuilder::new(access_token.into())
	}

	/// Absolute expiry instant, if the credential expires at all.
	pub fn expires_at(&self) -> Option<OffsetDateTime> {
		self.expires_in.map(|lifetime| self.obtained_at + lifetime)
	}

	/// Returns `true` once `instant` is within `skew` of the expiry instant.
	pub fn is_expired_at(&self, instant: OffsetDateTime, skew: Duration) -> bool {
		match self.expires_at() {
			Some(expires_at) => instant >= expires_at - skew,
			None => false,
		}
	}

	/// Checks expiry against the current clock using [`DEFAULT_EXPIRY_SKEW`].
	pub fn is_expired(&self) -> bool {
		self.is_expired_at(OffsetDateTime::now_utc(), DEFAULT_EXPIRY_SKEW)
	}
}
impl Debug for Credential {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("Credential")
			.field("access_token", &self.access_token)
			.field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
			.field("scopes", &self.scopes)
			.field("expires_in", &self.expires_in)
			.field("obtained_at", &self.obtained_at)
			.finish()
	}
}

/// Builder for [`Credential`].
#[derive(Clone, Debug)]
pub struct CredentialBuilder {
	access_token: TokenSecret,
	refresh_token: Option<TokenSecret>,
	scopes: ScopeSet,
	expires_in: Option<Duration>,
	obtained_at: Option<OffsetDateTime>,
}
impl CredentialBuilder {
	fn new(access_token: String) -> Self {
		Self {
			access_token: TokenSecret::new(access_token),
			refresh_token: None,
			scopes: ScopeSet::default(),
			expires_in: None,
			obtained_at: None,
		}
	}

	/// Provides the refresh token value.
	pub fn refresh_token(mut self, token: impl Into<String>) -> Self {
		self.refresh_token = Some(TokenSecret::new(token));

		self
	}

	/// Optionally provides the refresh token value.
	pub fn maybe_refresh_token(mut self, token: Option<String>) -> Self {
		self.refresh_token = token.map(TokenSecret::new);

		self
	}

	/// Sets the granted scopes.
	pub fn scopes(mut self, scopes: ScopeSet) -> Self {
		self.scopes = scopes;

		self
	}

	/// Sets the lifetime relative to the obtained instant.
	pub fn expires_in(mut self, lifetime: Duration) -> Self {
		self.expires_in = Some(lifetime);

		self
	}

	/// Optionally sets the lifetime relative to the obtained instant.
	pub fn maybe_expires_in(mut self, lifetime: Option<Duration>) -> Self {
		self.expires_in = lifetime;

		self
	}

	/// Sets the obtained instant; defaults to the current clock.
	pub fn obtained_at(mut self, instant: OffsetDateTime) -> Self {
		self.obtained_at = Some(instant);

		self
	}

	/// Consumes the builder and produces a [`Credential`].
	pub fn build(self) -> Result<Credential, CredentialBuilderError> {
		if self.access_token.expose().is_empty() {
			return Err(CredentialBuilderError::EmptyAccessToken);
		}
		if self.expires_in.is_some_and(Duration::is_negative) {
			return Err(CredentialBuilderError::NegativeExpiry);
		}

		Ok(Credential {
			access_token: self.access_token,
			refresh_token: self.refresh_token,
			scopes: self.scopes,
			expires_in: self.expires_in,
			obtained_at: codec::truncate_to_millis(
				self.obtained_at.unwrap_or_else(OffsetDateTime::now_utc),
			),
		})
	}
}
