//! Credential access through the token chain.
//!
//! Every read acquires the store lock through this instance's lock controller, evaluates the
//! [`TokenChain`](crate::flows::TokenChain) against the freshest stored state, persists the
//! outcome, and then refreshes the scope cache and the error-retry timer. Only one evaluation per
//! store key is in flight at any time, across every instance sharing the key.

// std
use std::sync::atomic::Ordering;
// self
use crate::{
	_prelude::*,
	auth::{Credential, ErrorId, ScopeSet, TokenSecret, UserId},
	flows::{Broker, ChainContext, ChainOptions, chain::stages},
	http::TokenHttpClient,
	oauth::{TokenEndpoint, TransportErrorMapper},
	obs::{self, FlowKind, FlowOutcome, FlowSpan},
	state::{ErrorRecord, PersistedState, codec},
};

/// Boxed future returned by [`AuthProvider`] calls.
pub type AuthFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + 'a + Send>>;

/// Credential handed out to API callers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UserAccessToken {
	/// Current credential.
	pub credential: Credential,
	/// User owning the credential.
	pub user_id: UserId,
	/// Intents the credential is bound to.
	pub intents: Vec<String>,
}
impl UserAccessToken {
	/// Bearer token to send with API requests.
	pub fn access_token(&self) -> &TokenSecret {
		&self.credential.access_token
	}

	/// Granted scopes.
	pub fn scopes(&self) -> &ScopeSet {
		&self.credential.scopes
	}

	/// Returns `true` when the credential may be selected by `intent`.
	///
	/// A credential bound to no intent serves every intent.
	pub fn serves_intent(&self, intent: &str) -> bool {
		self.intents.is_empty() || self.intents.iter().any(|candidate| candidate == intent)
	}
}
impl From<PersistedState> for UserAccessToken {
	fn from(state: PersistedState) -> Self {
		Self { credential: state.credential, user_id: state.user_id, intents: state.intents }
	}
}

/// Capability surface consumed by API callers.
pub trait AuthProvider
where
	Self: Send + Sync,
{
	/// OAuth client identifier.
	fn client_id(&self) -> &str;

	/// Scopes last observed for `user_id`; empty when another user (or nobody) is signed in.
	///
	/// The answer comes from a local cache and is advisory only.
	fn current_scopes_for_user(&self, user_id: &UserId) -> ScopeSet;

	/// Credential of `user_id`, or `None` when someone else (or nobody) is signed in.
	fn access_token_for_user<'a>(
		&'a self,
		user_id: &'a UserId,
		scope_sets: &'a [ScopeSet],
	) -> AuthFuture<'a, Option<UserAccessToken>>;

	/// Credential bound to `intent`, or `None`.
	fn access_token_for_intent<'a>(
		&'a self,
		intent: &'a str,
		scope_sets: &'a [ScopeSet],
	) -> AuthFuture<'a, Option<UserAccessToken>>;

	/// Whatever credential is stored; fails with [`Error::NoCredential`] when there is none.
	fn any_access_token(&self) -> AuthFuture<'_, UserAccessToken>;

	/// Whatever credential is stored, or `None`.
	fn user_access_token(&self) -> AuthFuture<'_, Option<UserAccessToken>>;

	/// Refreshes the credential of `user_id`.
	///
	/// Fails with [`Error::UserMismatch`] when someone else is signed in.
	fn refresh_access_token_for_user<'a>(
		&'a self,
		user_id: &'a UserId,
	) -> AuthFuture<'a, UserAccessToken>;

	/// Refreshes the credential bound to `intent`.
	fn refresh_access_token_for_intent<'a>(
		&'a self,
		intent: &'a str,
	) -> AuthFuture<'a, UserAccessToken>;

	/// Validates `credential` and stores it, replacing any previous state.
	fn set_credential(
		&self,
		credential: Credential,
		intents: Vec<String>,
	) -> AuthFuture<'_, PersistedState>;

	/// Deletes the stored state.
	fn sign_out(&self) -> AuthFuture<'_, ()>;
}

impl<C, M> Broker<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// See [`AuthProvider::current_scopes_for_user`].
	pub fn current_scopes_for_user(&self, user_id: &UserId) -> ScopeSet {
		match &*self.inner.scope_cache.read() {
			Some((cached_user, scopes)) if cached_user == user_id => scopes.clone(),
			_ => ScopeSet::default(),
		}
	}

	/// See [`AuthProvider::access_token_for_user`].
	pub async fn access_token_for_user(
		&self,
		user_id: &UserId,
		scope_sets: &[ScopeSet],
	) -> Result<Option<UserAccessToken>> {
		let options =
			ChainOptions::default().for_user(user_id.clone()).scope_sets(scope_sets.to_vec());

		match self.access("access_token_for_user", options).await {
			Err(Error::UserMismatch { .. }) => Ok(None),
			result => result,
		}
	}

	/// See [`AuthProvider::access_token_for_intent`].
	pub async fn access_token_for_intent(
		&self,
		intent: &str,
		scope_sets: &[ScopeSet],
	) -> Result<Option<UserAccessToken>> {
		let options = ChainOptions::default().scope_sets(scope_sets.to_vec());
		let token = self.access("access_token_for_intent", options).await?;

		Ok(token.filter(|token| token.serves_intent(intent)))
	}

	/// See [`AuthProvider::any_access_token`].
	pub async fn any_access_token(&self) -> Result<UserAccessToken> {
		self.access("any_access_token", ChainOptions::default()).await?.ok_or(Error::NoCredential)
	}

	/// See [`AuthProvider::user_access_token`].
	pub async fn user_access_token(&self) -> Result<Option<UserAccessToken>> {
		self.access("user_access_token", ChainOptions::default()).await
	}

	/// See [`AuthProvider::refresh_access_token_for_user`].
	pub async fn refresh_access_token_for_user(&self, user_id: &UserId) -> Result<UserAccessToken> {
		let options = ChainOptions::default().force_refresh(true).for_user(user_id.clone());

		self.access("refresh_access_token_for_user", options).await?.ok_or(Error::NoCredential)
	}

	/// See [`AuthProvider::refresh_access_token_for_intent`].
	pub async fn refresh_access_token_for_intent(&self, intent: &str) -> Result<UserAccessToken> {
		let options = ChainOptions::default().force_refresh(true);
		let token = self.access("refresh_access_token_for_intent", options).await?;

		token.filter(|token| token.serves_intent(intent)).ok_or(Error::NoCredential)
	}

	/// See [`AuthProvider::set_credential`].
	///
	/// The credential is introspected before anything is written; the write itself bypasses the
	/// lock controller so sign-in completes even while the instance is being reset.
	pub async fn set_credential(
		&self,
		credential: Credential,
		intents: Vec<String>,
	) -> Result<PersistedState> {
		const KIND: FlowKind = FlowKind::SetCredential;

		let span = FlowSpan::new(KIND, "set_credential");

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);

		let result = span
			.instrument(async move {
				self.inner.metrics.record_validation_call();

				let verified_at = codec::now_millis();
				let info =
					TokenEndpoint::introspect(self.inner.client.as_ref(), &credential.access_token)
						.await?;
				let state = stages::apply_introspection(
					PersistedState::new(credential, info.user_id.clone(), intents),
					info,
					verified_at,
				);

				{
					let mut guard = self.inner.store.lock(None).await?;

					guard.set(Some(&state))?;
				}

				self.inner.startup.store(false, Ordering::SeqCst);
				self.observe(Some(&state));

				obs::debug_event(KIND, format_args!("signed in as {}", state.user_id));

				Ok(state)
			})
			.await;

		match &result {
			Ok(_) => obs::record_flow_outcome(KIND, FlowOutcome::Success),
			Err(_) => obs::record_flow_outcome(KIND, FlowOutcome::Failure),
		}

		result
	}

	/// See [`AuthProvider::sign_out`].
	pub async fn sign_out(&self) -> Result<()> {
		let controller = self.inner.controller();

		{
			let mut guard = self.inner.store.lock(Some(&controller)).await?;

			guard.remove()?;
		}

		self.observe(None);

		Ok(())
	}

	async fn access(
		&self,
		stage: &'static str,
		options: ChainOptions,
	) -> Result<Option<UserAccessToken>> {
		let user_filter = options.user_id.clone();
		let Some(mut state) = self.run_chain(stage, options).await? else {
			return Ok(None);
		};

		if let Some(record) = state.error_record.take() {
			if let Some(expected) = user_filter
				&& expected != state.user_id
			{
				return Err(Error::UserMismatch { expected, actual: state.user_id });
			}

			return Err(Error::Recoverable {
				id: record.id,
				message: record.message,
				count: record.count,
			});
		}

		Ok(Some(state.into()))
	}

	/// Evaluates the token chain under the store lock and persists the outcome.
	pub(crate) fn run_chain(
		&self,
		stage: &'static str,
		options: ChainOptions,
	) -> AuthFuture<'_, Option<PersistedState>> {
		const KIND: FlowKind = FlowKind::Chain;

		let span = FlowSpan::new(KIND, stage);

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);

		Box::pin(async move {
			let result = span.instrument(self.evaluate_locked(options)).await;

			match &result {
				Ok(_) => obs::record_flow_outcome(KIND, FlowOutcome::Success),
				Err(_) => obs::record_flow_outcome(KIND, FlowOutcome::Failure),
			}

			result
		})
	}

	async fn evaluate_locked(&self, options: ChainOptions) -> Result<Option<PersistedState>> {
		let inner = &self.inner;
		let controller = inner.controller();
		let guard = inner.store.lock(Some(&controller)).await?;
		let Some(current) = guard.get()? else {
			drop(guard);
			self.observe(None);

			return Ok(None);
		};
		let options = if inner.startup.swap(false, Ordering::SeqCst) {
			ChainOptions {
				force_validation: true,
				force_retry_error_id: current.error_record.as_ref().map(|record| record.id.clone()),
				..options
			}
		} else {
			options
		};
		let guard = Mutex::new(guard);
		let written = Mutex::new(current.clone());
		let publish = |state: &PersistedState| -> Result<()> {
			guard.lock().set(Some(state))?;
			*written.lock() = state.clone();

			Ok(())
		};
		let ctx = ChainContext {
			endpoint: inner.client.as_ref(),
			settings: inner.settings,
			metrics: &inner.metrics,
			on_refresh: &publish,
			on_verified: &publish,
		};
		let outcome = inner.chain.evaluate(current, options, &ctx).await;
		let mut guard = guard.into_inner();
		let written = written.into_inner();
		let next = match outcome {
			Ok(next) => next,
			Err(e) if !records_failure(&e) => {
				drop(guard);
				self.observe(Some(&written));

				return Err(e);
			},
			Err(e) => {
				obs::warn_event(FlowKind::Chain, format_args!("unhandled chain failure: {e}"));
				inner.metrics.record_failure();

				let record = ErrorRecord::follow(written.error_record.as_ref(), &e, false);

				Some(written.clone().with_error(Some(record)))
			},
		};

		if next.as_ref() != Some(&written) {
			guard.set(next.as_ref())?;
		}

		drop(guard);
		self.observe(next.as_ref());

		Ok(next)
	}

	/// Updates the scope cache and the retry timer after `state` was observed under the lock.
	fn observe(&self, state: Option<&PersistedState>) {
		self.inner.cache_scopes(state);

		match state.and_then(|state| state.error_record.as_ref()) {
			Some(record) if !self.is_closed() => {
				let weak = Arc::downgrade(&self.inner);
				let error_id = record.id.clone();

				self.inner.retry.schedule(record, move || async move {
					if let Some(inner) = weak.upgrade() {
						Broker { inner }.retry_failure(error_id).await;
					}
				});
			},
			_ => self.inner.retry.cancel(),
		}
	}

	async fn retry_failure(&self, error_id: ErrorId) {
		const KIND: FlowKind = FlowKind::Retry;

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);

		let options = ChainOptions::default().retry(Some(error_id.clone()));

		match self.run_chain("retry", options).await {
			Ok(Some(state)) if state.error_record.is_none() => {
				obs::record_flow_outcome(KIND, FlowOutcome::Success);
				obs::debug_event(KIND, format_args!("retry of failure {error_id} succeeded"));
			},
			Ok(Some(_)) => {
				obs::record_flow_outcome(KIND, FlowOutcome::Failure);
				obs::debug_event(KIND, format_args!("retry of failure {error_id} failed again"));
			},
			Ok(None) => {
				obs::record_flow_outcome(KIND, FlowOutcome::Success);
				obs::debug_event(
					KIND,
					format_args!("retry of failure {error_id} discarded the credential"),
				);
			},
			Err(Error::StaleRetry { .. }) => {
				obs::record_flow_outcome(KIND, FlowOutcome::Success);
				obs::debug_event(KIND, format_args!("failure {error_id} was already handled"));
			},
			Err(e) => {
				obs::record_flow_outcome(KIND, FlowOutcome::Failure);
				obs::warn_event(KIND, format_args!("retry of failure {error_id} failed: {e}"));
			},
		}
	}
}
impl<C, M> AuthProvider for Broker<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	fn client_id(&self) -> &str {
		self.inner.client.client_id()
	}

	fn current_scopes_for_user(&self, user_id: &UserId) -> ScopeSet {
		Broker::current_scopes_for_user(self, user_id)
	}

	fn access_token_for_user<'a>(
		&'a self,
		user_id: &'a UserId,
		scope_sets: &'a [ScopeSet],
	) -> AuthFuture<'a, Option<UserAccessToken>> {
		Box::pin(Broker::access_token_for_user(self, user_id, scope_sets))
	}

	fn access_token_for_intent<'a>(
		&'a self,
		intent: &'a str,
		scope_sets: &'a [ScopeSet],
	) -> AuthFuture<'a, Option<UserAccessToken>> {
		Box::pin(Broker::access_token_for_intent(self, intent, scope_sets))
	}

	fn any_access_token(&self) -> AuthFuture<'_, UserAccessToken> {
		Box::pin(Broker::any_access_token(self))
	}

	fn user_access_token(&self) -> AuthFuture<'_, Option<UserAccessToken>> {
		Box::pin(Broker::user_access_token(self))
	}

	fn refresh_access_token_for_user<'a>(
		&'a self,
		user_id: &'a UserId,
	) -> AuthFuture<'a, UserAccessToken> {
		Box::pin(Broker::refresh_access_token_for_user(self, user_id))
	}

	fn refresh_access_token_for_intent<'a>(
		&'a self,
		intent: &'a str,
	) -> AuthFuture<'a, UserAccessToken> {
		Box::pin(Broker::refresh_access_token_for_intent(self, intent))
	}

	fn set_credential(
		&self,
		credential: Credential,
		intents: Vec<String>,
	) -> AuthFuture<'_, PersistedState> {
		Box::pin(Broker::set_credential(self, credential, intents))
	}

	fn sign_out(&self) -> AuthFuture<'_, ()> {
		Box::pin(Broker::sign_out(self))
	}
}

/// Failures the chain raises on purpose are returned as they are; anything else is recorded.
fn records_failure(error: &Error) -> bool {
	!matches!(
		error,
		Error::StaleRetry { .. }
			| Error::UserMismatch { .. }
			| Error::InsufficientScope { .. }
			| Error::Storage(_)
			| Error::Cancelled
	)
}
