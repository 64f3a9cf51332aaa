//! Provider descriptor data structures shared by the device poller, the token chain, and sign-in.
//!
//! The module exposes validated metadata and supporting builder utilities so one provider can be
//! described in a transport-agnostic way.

/// Builder API for assembling provider descriptors.
pub mod builder;
/// Provider-specific quirk toggles.
pub mod quirks;

pub use builder::*;
pub use quirks::*;

// self
use crate::{_prelude::*, auth::ProviderId};

/// Device authorization endpoint of the Twitch identity service.
pub const TWITCH_DEVICE_AUTHORIZATION_URL: &str = "https://id.twitch.tv/oauth2/device";
/// Token endpoint of the Twitch identity service.
pub const TWITCH_TOKEN_URL: &str = "https://id.twitch.tv/oauth2/token";
/// Token validation endpoint of the Twitch identity service.
pub const TWITCH_VALIDATE_URL: &str = "https://id.twitch.tv/oauth2/validate";

/// Endpoint set declared by a provider descriptor.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderEndpoints {
	/// Device authorization endpoint (RFC 8628 section 3.1).
	pub device_authorization: Url,
	/// Token endpoint used for device code polls and refreshes.
	pub token: Url,
	/// Endpoint used to validate a token and learn its owner.
	pub introspection: Url,
}

/// Immutable provider descriptor consumed by the engine.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderDescriptor {
	/// Descriptor identifier.
	pub id: ProviderId,
	/// Endpoint definitions exposed by the provider.
	pub endpoints: ProviderEndpoints,
	/// Provider-specific quirks.
	pub quirks: ProviderQuirks,
}
impl ProviderDescriptor {
	/// Creates a new builder for the provided identifier.
	pub fn builder(id: ProviderId) -> ProviderDescriptorBuilder {
		ProviderDescriptorBuilder::new(id)
	}

	/// Descriptor for the Twitch identity service.
	///
	/// Twitch names the scope parameter `scopes`, expects the scopes again on every device token
	/// poll, and validates tokens through its `validate` endpoint.
	pub fn twitch() -> Result<Self, ProviderDescriptorError> {
		let id = ProviderId::new("twitch").map_err(|_| ProviderDescriptorError::InvalidIdentifier)?;

		Self::builder(id)
			.device_authorization_endpoint(parse_preset(TWITCH_DEVICE_AUTHORIZATION_URL)?)
			.token_endpoint(parse_preset(TWITCH_TOKEN_URL)?)
			.introspection_endpoint(parse_preset(TWITCH_VALIDATE_URL)?)
			.quirks(ProviderQuirks {
				scope_param: "scopes".into(),
				scope_on_token_request: true,
				..Default::default()
			})
			.build()
	}
}

fn parse_preset(url: &'static str) -> Result<Url, ProviderDescriptorError> {
	Url::parse(url).map_err(|_| ProviderDescriptorError::InsecureEndpoint {
		endpoint: "preset",
		url: url.into(),
	})
}
