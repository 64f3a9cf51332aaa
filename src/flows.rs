//! Engine flows exposed through the [`Broker`] façade.
//!
//! The broker owns one [`ProviderClient`], one shared [`SyncStore`], and the per-instance state
//! layered on top of it: the lock controller cancelling this instance's pending lock waits, the
//! error-retry timer, and the advisory scope cache. Sign-in runs through the device authorization
//! poller ([`Broker::start_device_authorization`]); everything afterwards goes through the
//! [`AuthProvider`] capability surface, which evaluates the [`TokenChain`] under the store lock.

pub mod access;
pub mod chain;
pub mod device;
pub mod metrics;
pub mod status;

pub(crate) mod retry;

pub use access::*;
pub use chain::*;
pub use device::*;
pub use metrics::*;
pub use status::*;

// std
use std::sync::atomic::AtomicBool;
// self
use crate::{
	_prelude::*,
	auth::{ScopeSet, UserId},
	flows::retry::RetryTimer,
	http::TokenHttpClient,
	oauth::{ProviderClient, TransportErrorMapper},
	obs::{self, FlowKind},
	provider::{DefaultProviderStrategy, ProviderDescriptor, ProviderStrategy},
	state::PersistedState,
	store::{ListenerId, LockController, SyncStore},
};
#[cfg(feature = "reqwest")]
use crate::{http::ReqwestHttpClient, oauth::ReqwestTransportErrorMapper};

#[cfg(feature = "reqwest")]
/// Broker specialized for the crate's default reqwest transport stack.
pub type ReqwestBroker = Broker<ReqwestHttpClient, ReqwestTransportErrorMapper>;

/// Store type shared by every broker bound to the same key.
pub type StateStore = Arc<dyn SyncStore<PersistedState>>;

/// Token lifecycle engine for one client and one store key.
///
/// Clones share the same instance state (controller, retry timer, scope cache). Separate
/// instances built over the same store key coordinate through the store lock only.
pub struct Broker<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	pub(crate) inner: Arc<BrokerInner<C, M>>,
}
impl<C, M> Broker<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Provider client used for every outbound call.
	pub fn client(&self) -> &ProviderClient<C, M> {
		&self.inner.client
	}

	/// Store this broker reads and writes.
	pub fn store(&self) -> &StateStore {
		&self.inner.store
	}

	/// Engine counters of this instance.
	pub fn metrics(&self) -> &EngineMetrics {
		&self.inner.metrics
	}

	/// Timing knobs applied to every chain evaluation.
	pub fn settings(&self) -> ChainSettings {
		self.inner.settings
	}

	/// Cancels every lock wait issued so far and installs a fresh controller.
	///
	/// Pending calls fail with a lock-closed storage error; later calls proceed normally.
	pub fn reset(&self) {
		let previous =
			std::mem::replace(&mut *self.inner.controller.write(), Arc::new(LockController::new()));

		previous.close();
		obs::debug_event(FlowKind::Store, "lock controller reset");
	}

	/// Tears the instance down.
	///
	/// Pending lock waits are rejected and every later call fails the same way. Critical sections
	/// already holding the lock run to completion. The retry timer is cancelled and the scope
	/// cache cleared.
	pub fn close(&self) {
		self.inner.controller.read().close();
		self.inner.retry.cancel();
		*self.inner.scope_cache.write() = None;

		if let Some(id) = self.inner.listener.lock().take() {
			self.inner.store.remove_listener(id);
		}
	}

	/// Returns `true` once [`close`](Self::close) ran.
	pub fn is_closed(&self) -> bool {
		self.inner.controller.read().is_closed()
	}
}
impl<C, M> Clone for Broker<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	fn clone(&self) -> Self {
		Self { inner: self.inner.clone() }
	}
}
impl<C, M> Debug for Broker<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("Broker")
			.field("client", &self.inner.client)
			.field("chain", &self.inner.chain)
			.field("settings", &self.inner.settings)
			.field("closed", &self.is_closed())
			.finish()
	}
}

/// Configuration collected before a [`Broker`] is built.
pub struct BrokerBuilder {
	store: StateStore,
	descriptor: ProviderDescriptor,
	client_id: String,
	client_secret: Option<String>,
	strategy: Arc<dyn ProviderStrategy>,
	settings: ChainSettings,
	chain: TokenChain,
}
impl BrokerBuilder {
	/// Starts configuring a broker for `descriptor` and `client_id` over `store`.
	pub fn new(
		store: StateStore,
		descriptor: ProviderDescriptor,
		client_id: impl Into<String>,
	) -> Self {
		Self {
			store,
			descriptor,
			client_id: client_id.into(),
			client_secret: None,
			strategy: Arc::new(DefaultProviderStrategy),
			settings: ChainSettings::default(),
			chain: TokenChain::standard(),
		}
	}

	/// Replaces the provider error classification.
	pub fn strategy(mut self, strategy: Arc<dyn ProviderStrategy>) -> Self {
		self.strategy = strategy;

		self
	}

	/// Sends `secret` with token and introspection requests.
	pub fn with_client_secret(mut self, secret: impl Into<String>) -> Self {
		self.client_secret = Some(secret.into());

		self
	}

	/// Treats credentials expiring within `skew` as expired (defaults to
	/// [`DEFAULT_EXPIRY_SKEW`](crate::auth::DEFAULT_EXPIRY_SKEW)).
	pub fn with_expiry_skew(mut self, skew: Duration) -> Self {
		self.settings.expiry_skew = skew;

		self
	}

	/// Introspects credentials verified longer than `max_age` ago (defaults to
	/// [`DEFAULT_REVALIDATE_AFTER`]).
	pub fn with_revalidate_after(mut self, max_age: Duration) -> Self {
		self.settings.revalidate_after = max_age;

		self
	}

	/// Replaces the standard token chain.
	pub fn with_chain(mut self, chain: TokenChain) -> Self {
		self.chain = chain;

		self
	}

	/// Builds the broker over a caller-provided transport and error mapper.
	pub fn build_with<C, M>(
		self,
		http_client: impl Into<Arc<C>>,
		error_mapper: impl Into<Arc<M>>,
	) -> Broker<C, M>
	where
		C: ?Sized + TokenHttpClient,
		M: ?Sized + TransportErrorMapper<C::TransportError>,
	{
		let mut client = ProviderClient::new(
			self.descriptor,
			self.strategy,
			self.client_id,
			http_client,
			error_mapper,
		);

		if let Some(secret) = self.client_secret {
			client = client.with_client_secret(secret);
		}

		let inner = Arc::new(BrokerInner {
			client: Arc::new(client),
			store: self.store,
			chain: self.chain,
			settings: self.settings,
			metrics: Default::default(),
			controller: RwLock::new(Arc::new(LockController::new())),
			scope_cache: Default::default(),
			retry: Default::default(),
			startup: AtomicBool::new(true),
			listener: Default::default(),
		});
		let weak = Arc::downgrade(&inner);
		let listener = inner.store.add_listener(Arc::new(move || {
			if let Some(inner) = weak.upgrade() {
				inner.sync_scope_cache();
			}
		}));

		*inner.listener.lock() = Some(listener);

		Broker { inner }
	}

	/// Builds the broker over the default reqwest transport.
	#[cfg(feature = "reqwest")]
	pub fn build(self) -> Result<ReqwestBroker> {
		let http_client = ReqwestHttpClient::try_default()?;

		Ok(self.build_with(http_client, ReqwestTransportErrorMapper))
	}
}
impl Debug for BrokerBuilder {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("BrokerBuilder")
			.field("descriptor", &self.descriptor.id)
			.field("client_id", &self.client_id)
			.field("client_secret_set", &self.client_secret.is_some())
			.field("settings", &self.settings)
			.field("chain", &self.chain)
			.finish()
	}
}

pub(crate) struct BrokerInner<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	pub(crate) client: Arc<ProviderClient<C, M>>,
	pub(crate) store: StateStore,
	pub(crate) chain: TokenChain,
	pub(crate) settings: ChainSettings,
	pub(crate) metrics: EngineMetrics,
	pub(crate) controller: RwLock<Arc<LockController>>,
	pub(crate) scope_cache: RwLock<Option<(UserId, ScopeSet)>>,
	pub(crate) retry: RetryTimer,
	pub(crate) startup: AtomicBool,
	listener: Mutex<Option<ListenerId>>,
}
impl<C, M> BrokerInner<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	pub(crate) fn controller(&self) -> Arc<LockController> {
		self.controller.read().clone()
	}

	pub(crate) fn cache_scopes(&self, state: Option<&PersistedState>) {
		*self.scope_cache.write() =
			state.map(|state| (state.user_id.clone(), state.credential.scopes.clone()));
	}

	fn sync_scope_cache(&self) {
		match self.store.get() {
			Ok(state) => self.cache_scopes(state.as_ref()),
			Err(e) => obs::warn_event(
				FlowKind::Store,
				format_args!("failed to re-read state after a change: {e}"),
			),
		}
	}
}
impl<C, M> Drop for BrokerInner<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	fn drop(&mut self) {
		if let Some(id) = self.listener.get_mut().take() {
			self.store.remove_listener(id);
		}
	}
}
