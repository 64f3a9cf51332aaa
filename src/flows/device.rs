//! Device authorization poller (RFC 8628).
//!
//! Sign-in happens in two steps. [`Broker::start_device_authorization`] asks the provider for a
//! device code and returns a [`PendingDeviceAuthorization`] exposing the user-facing
//! [`DeviceAuthorizationGrant`]. [`PendingDeviceAuthorization::wait`] then polls the token
//! endpoint until the user approves, the device code expires, a terminal error arrives, or the
//! cancellation token fires. A single cancellation token covers both the sleeps between polls
//! and in-flight requests.

// std
use std::time::Duration as StdDuration;
// crates.io
use tokio::time::{self as tokio_time, Instant};
// self
use crate::{
	_prelude::*,
	auth::{Credential, ScopeSet},
	flows::Broker,
	http::TokenHttpClient,
	oauth::{DeviceAuthorizationGrant, ProviderClient, TransportErrorMapper},
	obs::{self, FlowKind, FlowOutcome, FlowSpan},
	provider::ProviderErrorKind,
	state::PersistedState,
};

/// Interval increase demanded by a `slow_down` answer.
pub const SLOW_DOWN_INCREMENT: Duration = Duration::seconds(5);
/// Lower bound of the interval after a connection timeout.
pub const MIN_TIMEOUT_BACKOFF: Duration = Duration::seconds(1);

const KIND: FlowKind = FlowKind::DeviceAuthorization;

impl<C, M> Broker<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Requests a device code for `scopes`.
	///
	/// The returned handle exposes the grant to display and polls for the credential once
	/// [`wait`](PendingDeviceAuthorization::wait) is awaited. Cancelling `cancel` aborts the
	/// request and any later polling with [`Error::Cancelled`].
	pub async fn start_device_authorization(
		&self,
		scopes: ScopeSet,
		cancel: CancellationToken,
	) -> Result<PendingDeviceAuthorization<C, M>> {
		let span = FlowSpan::new(KIND, "start_device_authorization");

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);

		let client = self.inner.client.clone();
		let result = span
			.instrument(async move {
				let grant = tokio::select! {
					biased;
					_ = cancel.cancelled() => return Err(Error::Cancelled),
					grant = client.request_device_authorization(&scopes) => grant?,
				};

				obs::debug_event(
					KIND,
					format_args!(
						"device code issued, expires in {}, polling every {}",
						grant.expires_in, grant.interval
					),
				);

				Ok(PendingDeviceAuthorization::new(client, grant, scopes, cancel))
			})
			.await;

		if result.is_err() {
			obs::record_flow_outcome(KIND, FlowOutcome::Failure);
		}

		result
	}

	/// Runs the whole device flow, handing the grant to `on_grant` before polling starts.
	pub async fn device_authorization<F>(
		&self,
		scopes: ScopeSet,
		cancel: CancellationToken,
		on_grant: F,
	) -> Result<Credential>
	where
		F: FnOnce(&DeviceAuthorizationGrant),
	{
		let pending = self.start_device_authorization(scopes, cancel).await?;

		on_grant(pending.grant());

		pending.wait().await
	}

	/// Runs the device flow and stores the resulting credential bound to `intents`.
	///
	/// The credential is introspected and persisted through
	/// [`set_credential`](Broker::set_credential), replacing whatever was stored before.
	pub async fn sign_in<F>(
		&self,
		scopes: ScopeSet,
		intents: Vec<String>,
		cancel: CancellationToken,
		on_grant: F,
	) -> Result<PersistedState>
	where
		F: FnOnce(&DeviceAuthorizationGrant),
	{
		let credential = self.device_authorization(scopes, cancel, on_grant).await?;

		self.set_credential(credential, intents).await
	}
}

/// Device authorization waiting for the user's approval.
pub struct PendingDeviceAuthorization<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	client: Arc<ProviderClient<C, M>>,
	grant: DeviceAuthorizationGrant,
	scopes: ScopeSet,
	deadline: Instant,
	cancel: CancellationToken,
}
impl<C, M> PendingDeviceAuthorization<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	fn new(
		client: Arc<ProviderClient<C, M>>,
		grant: DeviceAuthorizationGrant,
		scopes: ScopeSet,
		cancel: CancellationToken,
	) -> Self {
		let deadline = Instant::now() + to_std(grant.expires_in);

		Self { client, grant, scopes, deadline, cancel }
	}

	/// Grant to show to the user.
	pub fn grant(&self) -> &DeviceAuthorizationGrant {
		&self.grant
	}

	/// Scopes requested for the credential.
	pub fn scopes(&self) -> &ScopeSet {
		&self.scopes
	}

	/// Cancellation token aborting the poll.
	pub fn cancellation_token(&self) -> &CancellationToken {
		&self.cancel
	}

	/// Polls the token endpoint until the user approves or the flow ends.
	///
	/// `authorization_pending` keeps the interval, `slow_down` raises it by
	/// [`SLOW_DOWN_INCREMENT`], and connection timeouts double it (to at least
	/// [`MIN_TIMEOUT_BACKOFF`]). Every other failure is terminal. Once the device code's lifetime has elapsed the poll stops with
	/// [`Error::DeviceCodeExpired`] without issuing another request.
	pub async fn wait(self) -> Result<Credential> {
		let span = FlowSpan::new(KIND, "wait");
		let result = span.instrument(self.poll()).await;

		match &result {
			Ok(_) => obs::record_flow_outcome(KIND, FlowOutcome::Success),
			Err(_) => obs::record_flow_outcome(KIND, FlowOutcome::Failure),
		}

		result
	}

	async fn poll(self) -> Result<Credential> {
		let mut interval = self.grant.interval;

		loop {
			tokio::select! {
				biased;
				_ = self.cancel.cancelled() => return Err(Error::Cancelled),
				_ = tokio_time::sleep(to_std(interval)) => (),
			}

			if Instant::now() >= self.deadline {
				obs::warn_event(KIND, "device code expired before the user approved it");

				return Err(Error::DeviceCodeExpired);
			}

			let polled = tokio::select! {
				biased;
				_ = self.cancel.cancelled() => return Err(Error::Cancelled),
				polled = self.client.poll_device_token(&self.grant, &self.scopes) => polled,
			};

			match polled {
				Ok(credential) => return Ok(credential),
				Err(Error::Provider(rejection))
					if rejection.kind == ProviderErrorKind::AuthorizationPending => (),
				Err(Error::Provider(rejection)) if rejection.kind == ProviderErrorKind::SlowDown => {
					interval += SLOW_DOWN_INCREMENT;

					obs::debug_event(KIND, format_args!("slow_down received, polling every {interval}"));
				},
				Err(e) if e.is_connection_timeout() => {
					interval = interval.saturating_mul(2).max(MIN_TIMEOUT_BACKOFF);

					obs::debug_event(KIND, format_args!("poll timed out, backing off to {interval}"));
				},
				Err(e) => return Err(e),
			}
		}
	}
}
impl<C, M> Debug for PendingDeviceAuthorization<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("PendingDeviceAuthorization")
			.field("grant", &self.grant)
			.field("scopes", &self.scopes)
			.field("deadline", &self.deadline)
			.finish()
	}
}

fn to_std(duration: Duration) -> StdDuration {
	duration.try_into().unwrap_or_default()
}
