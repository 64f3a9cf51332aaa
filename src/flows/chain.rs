//! Token decision chain evaluated under the store lock.
//!
//! A [`TokenChain`] is an ordered list of [`ChainStage`]s. Every stage receives the current
//! [`PersistedState`] together with a [`Next`] continuation standing for the remaining stages, so
//! it can short-circuit (return without calling `next`), fall through (`next.run`), or re-enter an
//! earlier stage (`next.rewind_to`). The standard chain is:
//!
//! 1. [`ErrorGuard`]: stale retry detection and short-circuit on recorded failures.
//! 2. [`IdentityGuard`]: user filter.
//! 3. [`RefreshStage`]: refresh grant when forced, demanded by the error record, or expired.
//! 4. [`IdentityGuard`]: user filter.
//! 5. [`ValidationStage`]: introspection when forced, retried, or stale.
//! 6. [`IdentityGuard`]: user filter plus scope-set requirements.
//!
//! A result of `Ok(None)` means no usable credential remains and the state must be deleted.

pub(crate) mod stages;

pub use stages::*;

// self
use crate::{
	_prelude::*,
	auth::{DEFAULT_EXPIRY_SKEW, ErrorId, ScopeSet, UserId},
	flows::EngineMetrics,
	oauth::TokenEndpoint,
	state::PersistedState,
};

/// Nested refresh attempts triggered by failing validation before the failure is recorded.
pub const MAX_VALIDATION_LOOPS: u8 = 2;
/// Age after which a credential is introspected again.
pub const DEFAULT_REVALIDATE_AFTER: Duration = Duration::hours(1);

/// Boxed future returned by chain stages.
pub type ChainFuture<'a> =
	Pin<Box<dyn Future<Output = Result<Option<PersistedState>>> + 'a + Send>>;

/// Side channel invoked with intermediate states that must be persisted even if a later stage fails.
pub type PublishHook<'a> = dyn Fn(&PersistedState) -> Result<()> + 'a + Send + Sync;

/// Per-evaluation switches and filters.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChainOptions {
	/// Refresh even when the credential is still fresh.
	pub force_refresh: bool,
	/// Introspect even when the last verification is recent.
	pub force_validation: bool,
	/// Retry exactly this recorded failure; any other state is a stale retry.
	pub force_retry_error_id: Option<ErrorId>,
	/// Only accept a credential owned by this user.
	pub user_id: Option<UserId>,
	/// Every non-empty set must share at least one scope with the credential.
	pub scope_sets: Vec<ScopeSet>,
	/// Refresh re-entries already made by the validation stage.
	pub loop_count: u8,
}
impl ChainOptions {
	/// Sets [`force_refresh`](Self::force_refresh).
	pub fn force_refresh(mut self, force: bool) -> Self {
		self.force_refresh = force;

		self
	}

	/// Sets [`force_validation`](Self::force_validation).
	pub fn force_validation(mut self, force: bool) -> Self {
		self.force_validation = force;

		self
	}

	/// Sets [`force_retry_error_id`](Self::force_retry_error_id).
	pub fn retry(mut self, error_id: Option<ErrorId>) -> Self {
		self.force_retry_error_id = error_id;

		self
	}

	/// Sets [`user_id`](Self::user_id).
	pub fn for_user(mut self, user_id: UserId) -> Self {
		self.user_id = Some(user_id);

		self
	}

	/// Sets [`scope_sets`](Self::scope_sets).
	pub fn scope_sets(mut self, scope_sets: Vec<ScopeSet>) -> Self {
		self.scope_sets = scope_sets;

		self
	}
}

/// Timing knobs shared by every evaluation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChainSettings {
	/// Credentials expiring within this window count as expired.
	pub expiry_skew: Duration,
	/// Verification age after which the credential is introspected again.
	pub revalidate_after: Duration,
}
impl Default for ChainSettings {
	fn default() -> Self {
		Self { expiry_skew: DEFAULT_EXPIRY_SKEW, revalidate_after: DEFAULT_REVALIDATE_AFTER }
	}
}

/// Collaborators available to the stages of one evaluation.
pub struct ChainContext<'a> {
	/// Provider token endpoint.
	pub endpoint: &'a dyn TokenEndpoint,
	/// Timing knobs.
	pub settings: ChainSettings,
	/// Counters updated by the stages.
	pub metrics: &'a EngineMetrics,
	/// Called with the refreshed state as soon as a refresh succeeds.
	pub on_refresh: &'a PublishHook<'a>,
	/// Called with the verified state before the filters after validation run.
	pub on_verified: &'a PublishHook<'a>,
}
impl Debug for ChainContext<'_> {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("ChainContext").field("settings", &self.settings).finish()
	}
}

/// One decision unit of a [`TokenChain`].
pub trait ChainStage
where
	Self: Send + Sync,
{
	/// Stable stage name, used to rewind to the stage.
	fn name(&self) -> &'static str;

	/// Evaluates the stage; `next` runs the stages that follow.
	fn evaluate<'a>(
		&'a self,
		state: PersistedState,
		options: ChainOptions,
		ctx: &'a ChainContext<'a>,
		next: Next<'a>,
	) -> ChainFuture<'a>;
}

/// Continuation handed to a stage.
#[derive(Clone, Copy)]
pub struct Next<'a> {
	chain: &'a TokenChain,
	index: usize,
	ctx: &'a ChainContext<'a>,
}
impl<'a> Next<'a> {
	/// Runs the remaining stages; past the last stage the state is returned unchanged.
	pub fn run(self, state: PersistedState, options: ChainOptions) -> ChainFuture<'a> {
		self.chain.run_from(self.index, state, options, self.ctx)
	}

	/// Re-enters the chain at the first stage named `stage`.
	///
	/// Falls back to [`run`](Self::run) when the chain has no such stage.
	pub fn rewind_to(
		self,
		stage: &str,
		state: PersistedState,
		options: ChainOptions,
	) -> ChainFuture<'a> {
		let index = self.chain.position(stage).unwrap_or(self.index);

		self.chain.run_from(index, state, options, self.ctx)
	}
}
impl Debug for Next<'_> {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("Next").field("index", &self.index).finish()
	}
}

/// Ordered list of stages producing a new persisted state from an old one.
#[derive(Clone)]
pub struct TokenChain {
	stages: Vec<Arc<dyn ChainStage>>,
}
impl TokenChain {
	/// Builds a chain from custom stages.
	pub fn new(stages: Vec<Arc<dyn ChainStage>>) -> Self {
		Self { stages }
	}

	/// Builds the standard six-stage chain.
	pub fn standard() -> Self {
		Self::new(vec![
			Arc::new(ErrorGuard),
			Arc::new(IdentityGuard::users()),
			Arc::new(RefreshStage),
			Arc::new(IdentityGuard::users()),
			Arc::new(ValidationStage),
			Arc::new(IdentityGuard::users_and_scopes()),
		])
	}

	/// Stage names in evaluation order.
	pub fn stage_names(&self) -> Vec<&'static str> {
		self.stages.iter().map(|stage| stage.name()).collect()
	}

	/// Evaluates the whole chain against `state`.
	pub fn evaluate<'a>(
		&'a self,
		state: PersistedState,
		options: ChainOptions,
		ctx: &'a ChainContext<'a>,
	) -> ChainFuture<'a> {
		ctx.metrics.record_chain_run();

		self.run_from(0, state, options, ctx)
	}

	fn run_from<'a>(
		&'a self,
		index: usize,
		state: PersistedState,
		options: ChainOptions,
		ctx: &'a ChainContext<'a>,
	) -> ChainFuture<'a> {
		match self.stages.get(index) {
			Some(stage) =>
				stage.evaluate(state, options, ctx, Next { chain: self, index: index + 1, ctx }),
			None => Box::pin(async move { Ok(Some(state)) }),
		}
	}

	fn position(&self, name: &str) -> Option<usize> {
		self.stages.iter().position(|stage| stage.name() == name)
	}
}
impl Default for TokenChain {
	fn default() -> Self {
		Self::standard()
	}
}
impl Debug for TokenChain {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_list().entries(self.stage_names()).finish()
	}
}
