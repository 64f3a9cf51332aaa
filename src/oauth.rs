//! Provider client speaking the device authorization, token, and introspection endpoints.
//!
//! [`ProviderClient`] shapes form requests according to the descriptor quirks, dispatches them
//! through a [`TokenHttpClient`], and turns responses into engine values. Only `200` and `400`
//! answers carrying `application/json` are interpreted; anything else is a transient failure.

mod wire;

pub use oauth2;

// std
use std::io::ErrorKind as IoErrorKind;
// crates.io
use oauth2::{
	AsyncHttpClient, HttpClientError, HttpRequest, HttpResponse,
	http::{
		Method, Request,
		header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE},
	},
};
use serde::de::DeserializeOwned;
// self
use crate::{
	_prelude::*,
	auth::{Credential, ScopeSet, TokenSecret, UserId},
	error::{ConfigError, ProviderRejection, TransientError, TransportError},
	http::{ResponseMetadata, ResponseMetadataSlot, TokenHttpClient},
	oauth::wire::{DeviceAuthorizationBody, ErrorBody, IntrospectionBody, TokenBody, ValidateBody},
	provider::{
		EndpointKind, IntrospectionStyle, ProviderDescriptor, ProviderErrorContext, ProviderStrategy,
	},
	state::codec,
};

/// `grant_type` value of device code polls (RFC 8628 section 3.4).
pub const DEVICE_CODE_GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:device_code";
/// Poll interval used when the provider omits `interval`.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::seconds(5);

/// Boxed future returned by [`TokenEndpoint`] calls.
pub type EndpointFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + 'a + Send>>;

/// Token endpoint operations the token chain depends on.
pub trait TokenEndpoint
where
	Self: Send + Sync,
{
	/// Exchanges the credential's refresh token for a new credential.
	///
	/// Scopes and refresh token of `credential` are carried over when the provider omits them.
	fn refresh<'a>(&'a self, credential: &'a Credential) -> EndpointFuture<'a, Credential>;

	/// Validates `access_token` and reports its owner and granted scopes.
	fn introspect<'a>(
		&'a self,
		access_token: &'a TokenSecret,
	) -> EndpointFuture<'a, TokenIntrospection>;
}

/// Maps HTTP transport failures into engine [`Error`] values.
pub trait TransportErrorMapper<E>
where
	Self: 'static + Send + Sync,
	E: 'static + Send + Sync + StdError,
{
	/// Converts an [`HttpClientError`] emitted by the transport into an engine error.
	fn map_transport_error(
		&self,
		strategy: &dyn ProviderStrategy,
		endpoint: EndpointKind,
		metadata: Option<&ResponseMetadata>,
		error: HttpClientError<E>,
	) -> Error;
}

/// Default mapper for reqwest-backed transports.
///
/// Reqwest timeouts become [`TransportError::Timeout`], which the device poller answers by
/// doubling its interval.
#[cfg(feature = "reqwest")]
#[derive(Clone, Debug, Default)]
pub struct ReqwestTransportErrorMapper;
#[cfg(feature = "reqwest")]
impl TransportErrorMapper<ReqwestError> for ReqwestTransportErrorMapper {
	fn map_transport_error(
		&self,
		_strategy: &dyn ProviderStrategy,
		endpoint: EndpointKind,
		meta: Option<&ResponseMetadata>,
		err: HttpClientError<ReqwestError>,
	) -> Error {
		match err {
			HttpClientError::Reqwest(inner) if inner.is_builder() =>
				ConfigError::from(*inner).into(),
			HttpClientError::Reqwest(inner) => TransportError::from(*inner).into(),
			other => map_common_transport_error(endpoint, meta, other),
		}
	}
}

/// Mapper for transports whose errors carry no timeout signal of their own.
///
/// I/O errors of kind [`TimedOut`](IoErrorKind::TimedOut) are still reported as timeouts.
#[derive(Clone, Debug, Default)]
pub struct GenericTransportErrorMapper;
impl<E> TransportErrorMapper<E> for GenericTransportErrorMapper
where
	E: 'static + Send + Sync + StdError,
{
	fn map_transport_error(
		&self,
		_strategy: &dyn ProviderStrategy,
		endpoint: EndpointKind,
		meta: Option<&ResponseMetadata>,
		err: HttpClientError<E>,
	) -> Error {
		match err {
			HttpClientError::Reqwest(inner) => TransportError::network(*inner).into(),
			other => map_common_transport_error(endpoint, meta, other),
		}
	}
}

/// Device authorization issued by the provider, to be shown to the user.
#[derive(Clone, PartialEq, Eq)]
pub struct DeviceAuthorizationGrant {
	/// Code polled against the token endpoint; never shown to the user.
	pub device_code: TokenSecret,
	/// Code the user enters at the verification URI.
	pub user_code: String,
	/// Page where the user enters the code.
	pub verification_uri: String,
	/// Page with the code pre-filled; falls back to [`verification_uri`](Self::verification_uri).
	pub verification_uri_complete: String,
	/// Lifetime of the device code.
	pub expires_in: Duration,
	/// Minimum wait between token polls.
	pub interval: Duration,
}
impl Debug for DeviceAuthorizationGrant {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("DeviceAuthorizationGrant")
			.field("device_code", &self.device_code)
			.field("user_code", &self.user_code)
			.field("verification_uri", &self.verification_uri)
			.field("verification_uri_complete", &self.verification_uri_complete)
			.field("expires_in", &self.expires_in)
			.field("interval", &self.interval)
			.finish()
	}
}
impl TryFrom<DeviceAuthorizationBody> for DeviceAuthorizationGrant {
	type Error = ConfigError;

	fn try_from(body: DeviceAuthorizationBody) -> Result<Self, Self::Error> {
		let expires_in = seconds(body.expires_in)?;
		let interval = body.interval.map(seconds).transpose()?.unwrap_or(DEFAULT_POLL_INTERVAL);
		let verification_uri_complete =
			body.verification_uri_complete.unwrap_or_else(|| body.verification_uri.clone());

		Ok(Self {
			device_code: TokenSecret::new(body.device_code),
			user_code: body.user_code,
			verification_uri: body.verification_uri,
			verification_uri_complete,
			expires_in,
			interval,
		})
	}
}

/// What the provider reports about a valid access token.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TokenIntrospection {
	/// User owning the token.
	pub user_id: UserId,
	/// Scopes granted to the token.
	pub scopes: ScopeSet,
	/// Remaining lifetime, when reported.
	pub expires_in: Option<Duration>,
	/// Client the token was issued to, when reported.
	pub client_id: Option<String>,
	/// Login name of the owner, when reported.
	pub login: Option<String>,
}

/// HTTP client for the three provider endpoints used by the engine.
pub struct ProviderClient<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	descriptor: ProviderDescriptor,
	strategy: Arc<dyn ProviderStrategy>,
	client_id: String,
	client_secret: Option<String>,
	http_client: Arc<C>,
	error_mapper: Arc<M>,
}
impl<C, M> ProviderClient<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Creates a client for `descriptor` using the caller-provided transport and mapper.
	pub fn new(
		descriptor: ProviderDescriptor,
		strategy: Arc<dyn ProviderStrategy>,
		client_id: impl Into<String>,
		http_client: impl Into<Arc<C>>,
		error_mapper: impl Into<Arc<M>>,
	) -> Self {
		Self {
			descriptor,
			strategy,
			client_id: client_id.into(),
			client_secret: None,
			http_client: http_client.into(),
			error_mapper: error_mapper.into(),
		}
	}

	/// Sets the client secret sent with token and introspection requests.
	pub fn with_client_secret(mut self, secret: impl Into<String>) -> Self {
		self.client_secret = Some(secret.into());

		self
	}

	/// Descriptor this client talks to.
	pub fn descriptor(&self) -> &ProviderDescriptor {
		&self.descriptor
	}

	/// OAuth client identifier.
	pub fn client_id(&self) -> &str {
		&self.client_id
	}

	/// Requests a device authorization for `scopes`.
	pub async fn request_device_authorization(
		&self,
		scopes: &ScopeSet,
	) -> Result<DeviceAuthorizationGrant> {
		let endpoint = EndpointKind::DeviceAuthorization;
		let mut form = self.base_form();

		self.insert_scopes(&mut form, scopes);

		let request = self.form_request(endpoint, &self.descriptor.endpoints.device_authorization, form)?;
		let response = self.execute(endpoint, request).await?;
		let body = self.decode::<DeviceAuthorizationBody>(endpoint, &response)?;

		Ok(DeviceAuthorizationGrant::try_from(body)?)
	}

	/// Polls the token endpoint once with the device code.
	///
	/// `authorization_pending` and `slow_down` answers surface as [`Error::Provider`] so the caller
	/// decides how to continue.
	pub async fn poll_device_token(
		&self,
		grant: &DeviceAuthorizationGrant,
		scopes: &ScopeSet,
	) -> Result<Credential> {
		let endpoint = EndpointKind::DeviceToken;
		let mut form = self.base_form();

		if self.descriptor.quirks.scope_on_token_request {
			self.insert_scopes(&mut form, scopes);
		}

		form.insert("device_code".into(), grant.device_code.expose().to_owned());
		form.insert("grant_type".into(), DEVICE_CODE_GRANT_TYPE.into());

		let request = self.form_request(endpoint, &self.descriptor.endpoints.token, form)?;
		let response = self.execute(endpoint, request).await?;
		let body = self.decode::<TokenBody>(endpoint, &response)?;

		credential_from(body, scopes, None)
	}

	async fn refresh_credential(&self, credential: &Credential) -> Result<Credential> {
		let endpoint = EndpointKind::Refresh;
		let refresh_token = credential.refresh_token.as_ref().ok_or_else(|| Error::InvalidToken {
			reason: "no refresh token is stored".into(),
		})?;
		let mut form = self.base_form();

		form.insert("grant_type".into(), "refresh_token".into());
		form.insert("refresh_token".into(), refresh_token.expose().to_owned());

		let request = self.form_request(endpoint, &self.descriptor.endpoints.token, form)?;
		let response = self.execute(endpoint, request).await?;
		let body = self.decode::<TokenBody>(endpoint, &response)?;

		credential_from(body, &credential.scopes, Some(refresh_token))
	}

	async fn introspect_token(&self, access_token: &TokenSecret) -> Result<TokenIntrospection> {
		let endpoint = EndpointKind::Introspection;
		let url = &self.descriptor.endpoints.introspection;

		match self.descriptor.quirks.introspection {
			IntrospectionStyle::Validate => {
				let request = Request::builder()
					.method(Method::GET)
					.uri(url.as_str())
					.header(ACCEPT, "application/json")
					.header(AUTHORIZATION, format!("OAuth {}", access_token.expose()))
					.body(Vec::new())
					.map_err(ConfigError::from)?;
				let response = self.execute(endpoint, request).await?;

				reject_unauthorized(&response)?;

				let body = self.decode::<ValidateBody>(endpoint, &response)?;

				into_introspection(body.user_id, body.scopes, body.expires_in, body.client_id, body.login)
			},
			IntrospectionStyle::Rfc7662 => {
				let mut form = self.base_form();

				form.insert("token".into(), access_token.expose().to_owned());

				let request = self.form_request(endpoint, url, form)?;
				let response = self.execute(endpoint, request).await?;

				reject_unauthorized(&response)?;

				let body = self.decode::<IntrospectionBody>(endpoint, &response)?;

				if !body.active {
					return Err(Error::InvalidToken { reason: "token is not active".into() });
				}

				let expires_in =
					body.exp.map(|exp| exp - OffsetDateTime::now_utc().unix_timestamp());

				into_introspection(
					body.user_id.or(body.sub),
					body.scope,
					expires_in,
					body.client_id,
					body.username,
				)
			},
		}
	}

	fn base_form(&self) -> BTreeMap<String, String> {
		let mut form = BTreeMap::new();

		form.insert("client_id".into(), self.client_id.clone());

		if let Some(secret) = &self.client_secret {
			form.insert("client_secret".into(), secret.clone());
		}

		form
	}

	fn insert_scopes(&self, form: &mut BTreeMap<String, String>, scopes: &ScopeSet) {
		let quirks = &self.descriptor.quirks;

		form.insert(quirks.scope_param.clone(), scopes.join(quirks.scope_delimiter));
	}

	fn form_request(
		&self,
		endpoint: EndpointKind,
		url: &Url,
		mut form: BTreeMap<String, String>,
	) -> Result<HttpRequest> {
		self.strategy.augment_form(endpoint, &mut form);

		let body = url::form_urlencoded::Serializer::new(String::new()).extend_pairs(&form).finish();

		Request::builder()
			.method(Method::POST)
			.uri(url.as_str())
			.header(ACCEPT, "application/json")
			.header(CONTENT_TYPE, "application/x-www-form-urlencoded")
			.body(body.into_bytes())
			.map_err(|e| ConfigError::from(e).into())
	}

	async fn execute(&self, endpoint: EndpointKind, request: HttpRequest) -> Result<HttpResponse> {
		let meta = ResponseMetadataSlot::default();
		let handle = self.http_client.with_metadata(meta.clone());

		handle.call(request).await.map_err(|err| {
			self.error_mapper.map_transport_error(
				self.strategy.as_ref(),
				endpoint,
				meta.take().as_ref(),
				err,
			)
		})
	}

	fn decode<T>(&self, endpoint: EndpointKind, response: &HttpResponse) -> Result<T>
	where
		T: DeserializeOwned,
	{
		let status = response.status().as_u16();

		match status {
			200 | 400 if !is_json(response) => Err(TransientError::Endpoint {
				endpoint: endpoint.as_str(),
				message: format!("unexpected content-type `{}`", content_type(response)),
				status: Some(status),
			}
			.into()),
			200 => parse_json(endpoint, status, response.body()),
			400 => Err(self.rejection(endpoint, status, response.body())),
			_ => Err(TransientError::Endpoint {
				endpoint: endpoint.as_str(),
				message: format!("status {status}"),
				status: Some(status),
			}
			.into()),
		}
	}

	fn rejection(&self, endpoint: EndpointKind, status: u16, body: &[u8]) -> Error {
		let body = match parse_json::<ErrorBody>(endpoint, status, body) {
			Ok(body) => body,
			Err(e) => return e,
		};
		let mut ctx = ProviderErrorContext::new(endpoint).with_http_status(status);

		if let Some(error) = body.error {
			ctx = ctx.with_oauth_error(error);
		}
		if let Some(description) = body.error_description {
			ctx = ctx.with_error_description(description);
		}
		if let Some(message) = body.message {
			ctx = ctx.with_provider_message(message, body.status);
		}

		let kind = self.strategy.classify_error(&ctx);

		ProviderRejection {
			kind,
			code: ctx.code().to_owned(),
			description: ctx.error_description.clone(),
			status: Some(status),
		}
		.into()
	}
}
impl<C, M> TokenEndpoint for ProviderClient<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	fn refresh<'a>(&'a self, credential: &'a Credential) -> EndpointFuture<'a, Credential> {
		Box::pin(self.refresh_credential(credential))
	}

	fn introspect<'a>(
		&'a self,
		access_token: &'a TokenSecret,
	) -> EndpointFuture<'a, TokenIntrospection> {
		Box::pin(self.introspect_token(access_token))
	}
}
impl<C, M> Debug for ProviderClient<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("ProviderClient")
			.field("descriptor", &self.descriptor.id)
			.field("client_id", &self.client_id)
			.field("client_secret_set", &self.client_secret.is_some())
			.finish()
	}
}

fn credential_from(
	body: TokenBody,
	fallback_scopes: &ScopeSet,
	fallback_refresh: Option<&TokenSecret>,
) -> Result<Credential> {
	let expires_in = body.expires_in.map(seconds).transpose()?;
	let refresh_token =
		body.refresh_token.or_else(|| fallback_refresh.map(|token| token.expose().to_owned()));
	let scopes = body.scope.unwrap_or_else(|| fallback_scopes.clone());

	Credential::builder(body.access_token)
		.maybe_refresh_token(refresh_token)
		.scopes(scopes)
		.maybe_expires_in(expires_in)
		.obtained_at(codec::now_millis())
		.build()
		.map_err(|e| ConfigError::from(e).into())
}

fn into_introspection(
	user_id: Option<String>,
	scopes: Option<ScopeSet>,
	expires_in: Option<i64>,
	client_id: Option<String>,
	login: Option<String>,
) -> Result<TokenIntrospection> {
	let user_id = user_id
		.filter(|id| !id.is_empty())
		.ok_or_else(|| Error::InvalidToken { reason: "token is not bound to a user".into() })?;

	Ok(TokenIntrospection {
		user_id: UserId::new(user_id).map_err(ConfigError::from)?,
		scopes: scopes.unwrap_or_default(),
		expires_in: expires_in.map(Duration::seconds),
		client_id,
		login,
	})
}

fn reject_unauthorized(response: &HttpResponse) -> Result<()> {
	if response.status().as_u16() != 401 {
		return Ok(());
	}

	let message = serde_json::from_slice::<ErrorBody>(response.body())
		.ok()
		.and_then(|body| body.message.or(body.error))
		.unwrap_or_else(|| "introspection endpoint answered 401".into());

	Err(Error::InvalidToken { reason: message })
}

fn parse_json<T>(endpoint: EndpointKind, status: u16, body: &[u8]) -> Result<T>
where
	T: DeserializeOwned,
{
	let mut deserializer = serde_json::Deserializer::from_slice(body);

	serde_path_to_error::deserialize(&mut deserializer).map_err(|source| {
		TransientError::ResponseParse { endpoint: endpoint.as_str(), source, status: Some(status) }
			.into()
	})
}

fn is_json(response: &HttpResponse) -> bool {
	content_type(response).split(';').next().map(str::trim).is_some_and(|essence| {
		essence.eq_ignore_ascii_case("application/json")
	})
}

fn content_type(response: &HttpResponse) -> &str {
	response.headers().get(CONTENT_TYPE).and_then(|value| value.to_str().ok()).unwrap_or_default()
}

fn seconds(value: u64) -> Result<Duration, ConfigError> {
	i64::try_from(value).map(Duration::seconds).map_err(|_| ConfigError::ExpiresInOutOfRange)
}

fn map_common_transport_error<E>(
	endpoint: EndpointKind,
	meta: Option<&ResponseMetadata>,
	err: HttpClientError<E>,
) -> Error
where
	E: 'static + Send + Sync + StdError,
{
	let status = meta.and_then(|value| value.status);

	match err {
		HttpClientError::Http(inner) => ConfigError::from(inner).into(),
		HttpClientError::Io(inner) if inner.kind() == IoErrorKind::TimedOut =>
			TransportError::timeout(inner).into(),
		HttpClientError::Io(inner) => TransportError::Io(inner).into(),
		HttpClientError::Other(message) => TransientError::Endpoint {
			endpoint: endpoint.as_str(),
			message: format!("HTTP client error: {message}"),
			status,
		}
		.into(),
		other => TransientError::Endpoint {
			endpoint: endpoint.as_str(),
			message: format!("unhandled HTTP client error: {other}"),
			status,
		}
		.into(),
	}
}
