// std
use std::net::IpAddr;
// self
use crate::{
	_prelude::*,
	auth::ProviderId,
	provider::{ProviderDescriptor, ProviderEndpoints, ProviderQuirks},
};

/// Errors raised while constructing or validating descriptors.
#[derive(Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum ProviderDescriptorError {
	/// Device authorization endpoint is mandatory.
	#[error("Missing device authorization endpoint.")]
	MissingDeviceAuthorizationEndpoint,
	/// Token endpoint is mandatory.
	#[error("Missing token endpoint.")]
	MissingTokenEndpoint,
	/// Introspection endpoint is mandatory; unvalidated tokens are never trusted.
	#[error("Missing introspection endpoint.")]
	MissingIntrospectionEndpoint,
	/// Endpoints must use HTTPS unless they point at a loopback host.
	#[error("The {endpoint} endpoint must use HTTPS: {url}.")]
	InsecureEndpoint {
		/// Which endpoint failed validation.
		endpoint: &'static str,
		/// Endpoint URL that failed validation.
		url: String,
	},
	/// Reject scope delimiters that are control characters.
	#[error("Scope delimiter must be a printable character.")]
	InvalidScopeDelimiter {
		/// Invalid delimiter that was supplied.
		delimiter: char,
	},
	/// The scope parameter name must not be empty.
	#[error("Scope parameter name must not be empty.")]
	EmptyScopeParam,
	/// A preset identifier failed validation.
	#[error("Provider identifier is invalid.")]
	InvalidIdentifier,
}

/// Builder for [`ProviderDescriptor`] values.
#[derive(Debug)]
pub struct ProviderDescriptorBuilder {
	/// Identifier for the descriptor being constructed.
	pub id: ProviderId,
	/// Device authorization endpoint.
	pub device_authorization_endpoint: Option<Url>,
	/// Token endpoint used for device code polls and refreshes.
	pub token_endpoint: Option<Url>,
	/// Endpoint used to validate tokens.
	pub introspection_endpoint: Option<Url>,
	/// Provider-specific quirks.
	pub quirks: ProviderQuirks,
}
impl ProviderDescriptorBuilder {
	/// Creates a new builder seeded with the provided identifier.
	pub fn new(id: ProviderId) -> Self {
		Self {
			id,
			device_authorization_endpoint: None,
			token_endpoint: None,
			introspection_endpoint: None,
			quirks: ProviderQuirks::default(),
		}
	}

	/// Sets the device authorization endpoint.
	pub fn device_authorization_endpoint(mut self, url: Url) -> Self {
		self.device_authorization_endpoint = Some(url);

		self
	}

	/// Sets the token endpoint.
	pub fn token_endpoint(mut self, url: Url) -> Self {
		self.token_endpoint = Some(url);

		self
	}

	/// Sets the introspection endpoint.
	pub fn introspection_endpoint(mut self, url: Url) -> Self {
		self.introspection_endpoint = Some(url);

		self
	}

	/// Overrides the provider quirks.
	pub fn quirks(mut self, quirks: ProviderQuirks) -> Self {
		self.quirks = quirks;

		self
	}

	/// Consumes the builder and validates the resulting descriptor.
	pub fn build(self) -> Result<ProviderDescriptor, ProviderDescriptorError> {
		let device_authorization = self
			.device_authorization_endpoint
			.ok_or(ProviderDescriptorError::MissingDeviceAuthorizationEndpoint)?;
		let token = self.token_endpoint.ok_or(ProviderDescriptorError::MissingTokenEndpoint)?;
		let introspection =
			self.introspection_endpoint.ok_or(ProviderDescriptorError::MissingIntrospectionEndpoint)?;
		let descriptor = ProviderDescriptor {
			id: self.id,
			endpoints: ProviderEndpoints { device_authorization, token, introspection },
			quirks: self.quirks,
		};

		descriptor.validate()?;

		Ok(descriptor)
	}
}

impl ProviderDescriptor {
	/// Validates invariants for the descriptor.
	fn validate(&self) -> Result<(), ProviderDescriptorError> {
		validate_endpoint("device authorization", &self.endpoints.device_authorization)?;
		validate_endpoint("token", &self.endpoints.token)?;
		validate_endpoint("introspection", &self.endpoints.introspection)?;
		validate_scope_delimiter(self.quirks.scope_delimiter)?;

		if self.quirks.scope_param.trim().is_empty() {
			return Err(ProviderDescriptorError::EmptyScopeParam);
		}

		Ok(())
	}
}

fn validate_endpoint(name: &'static str, url: &Url) -> Result<(), ProviderDescriptorError> {
	if url.scheme() == "https" || (url.scheme() == "http" && is_loopback(url)) {
		Ok(())
	} else {
		Err(ProviderDescriptorError::InsecureEndpoint { endpoint: name, url: url.to_string() })
	}
}

fn is_loopback(url: &Url) -> bool {
	match url.host_str() {
		Some("localhost") => true,
		Some(host) => host
			.trim_start_matches('[')
			.trim_end_matches(']')
			.parse::<IpAddr>()
			.map(|ip| ip.is_loopback())
			.unwrap_or(false),
		None => false,
	}
}

fn validate_scope_delimiter(delimiter: char) -> Result<(), ProviderDescriptorError> {
	if delimiter.is_control() {
		Err(ProviderDescriptorError::InvalidScopeDelimiter { delimiter })
	} else {
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	fn builder(base: &str) -> ProviderDescriptorBuilder {
		let url = |path: &str| {
			Url::parse(&format!("{base}{path}")).expect("Endpoint URL fixture should parse.")
		};

		ProviderDescriptor::builder(ProviderId::new("mock").expect("Provider id should be valid."))
			.device_authorization_endpoint(url("/device"))
			.token_endpoint(url("/token"))
			.introspection_endpoint(url("/validate"))
	}

	#[test]
	fn loopback_http_endpoints_are_accepted() {
		builder("http://127.0.0.1:8080").build().expect("Loopback IPv4 should be accepted.");
		builder("http://localhost:8080").build().expect("Localhost should be accepted.");
		builder("http://[::1]:8080").build().expect("Loopback IPv6 should be accepted.");
	}

	#[test]
	fn remote_http_endpoints_are_rejected() {
		let err = builder("http://id.example.com").build().expect_err("Plain HTTP must fail.");

		assert!(matches!(err, ProviderDescriptorError::InsecureEndpoint { endpoint: "device authorization", .. }));
	}

	#[test]
	fn missing_endpoints_and_bad_quirks_are_rejected() {
		let id = ProviderId::new("mock").expect("Provider id should be valid.");
		let err = ProviderDescriptor::builder(id).build().expect_err("Empty builder must fail.");

		assert_eq!(err, ProviderDescriptorError::MissingDeviceAuthorizationEndpoint);

		let err = builder("https://id.example.com")
			.quirks(ProviderQuirks { scope_delimiter: '\n', ..Default::default() })
			.build()
			.expect_err("Control delimiter must fail.");

		assert_eq!(err, ProviderDescriptorError::InvalidScopeDelimiter { delimiter: '\n' });

		let err = builder("https://id.example.com")
			.quirks(ProviderQuirks { scope_param: " ".into(), ..Default::default() })
			.build()
			.expect_err("Blank scope parameter must fail.");

		assert_eq!(err, ProviderDescriptorError::EmptyScopeParam);
	}
}
