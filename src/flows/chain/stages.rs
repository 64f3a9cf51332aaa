// self
use crate::{
	_prelude::*,
	error::ConfigError,
	flows::chain::{
		ChainContext, ChainFuture, ChainOptions, ChainStage, MAX_VALIDATION_LOOPS, Next,
	},
	oauth::TokenIntrospection,
	obs::{self, FlowKind},
	state::{ErrorRecord, PersistedState, codec},
};

/// Rejects stale retries and stops at failures someone else recorded.
///
/// With a retry id the state must still carry exactly that failure, otherwise
/// [`Error::StaleRetry`] is raised and nothing is touched. Without one, a recorded failure ends
/// the evaluation with the errored state unchanged.
#[derive(Clone, Copy, Debug, Default)]
pub struct ErrorGuard;
impl ErrorGuard {
	/// Stage name.
	pub const NAME: &'static str = "error_guard";
}
impl ChainStage for ErrorGuard {
	fn name(&self) -> &'static str {
		Self::NAME
	}

	fn evaluate<'a>(
		&'a self,
		state: PersistedState,
		options: ChainOptions,
		ctx: &'a ChainContext<'a>,
		next: Next<'a>,
	) -> ChainFuture<'a> {
		let requested = options.force_retry_error_id.clone();
		let recorded = state.error_record.as_ref().map(|record| record.id.clone());

		match (requested, recorded) {
			(Some(requested), Some(recorded)) if requested == recorded => next.run(state, options),
			(Some(error_id), _) => Box::pin(async move { Err(Error::StaleRetry { error_id }) }),
			(None, Some(_)) => {
				ctx.metrics.record_short_circuit();

				Box::pin(async move { Ok(Some(state)) })
			},
			(None, None) => next.run(state, options),
		}
	}
}

/// Enforces the user filter and, optionally, the scope-set requirements.
#[derive(Clone, Copy, Debug)]
pub struct IdentityGuard {
	enforce_scopes: bool,
}
impl IdentityGuard {
	/// Stage name.
	pub const NAME: &'static str = "identity";

	/// Guard checking only the user filter.
	pub const fn users() -> Self {
		Self { enforce_scopes: false }
	}

	/// Guard checking the user filter and every required scope set.
	pub const fn users_and_scopes() -> Self {
		Self { enforce_scopes: true }
	}

	fn check(&self, state: &PersistedState, options: &ChainOptions) -> Result<()> {
		if let Some(expected) = &options.user_id
			&& *expected != state.user_id
		{
			return Err(Error::UserMismatch {
				expected: expected.clone(),
				actual: state.user_id.clone(),
			});
		}

		if self.enforce_scopes {
			let granted = state.scopes();

			if let Some(missing) =
				options.scope_sets.iter().find(|set| !set.is_empty() && !set.intersects(granted))
			{
				return Err(Error::InsufficientScope {
					reason: format!("none of `{}` is granted", missing.join(' ')),
				});
			}
		}

		Ok(())
	}
}
impl ChainStage for IdentityGuard {
	fn name(&self) -> &'static str {
		Self::NAME
	}

	fn evaluate<'a>(
		&'a self,
		state: PersistedState,
		options: ChainOptions,
		_ctx: &'a ChainContext<'a>,
		next: Next<'a>,
	) -> ChainFuture<'a> {
		match self.check(&state, &options) {
			Ok(()) => next.run(state, options),
			Err(e) => Box::pin(async move { Err(e) }),
		}
	}
}

/// Refreshes the credential when forced, demanded by the error record, or expired.
#[derive(Clone, Copy, Debug, Default)]
pub struct RefreshStage;
impl RefreshStage {
	/// Stage name.
	pub const NAME: &'static str = "refresh";
}
impl ChainStage for RefreshStage {
	fn name(&self) -> &'static str {
		Self::NAME
	}

	fn evaluate<'a>(
		&'a self,
		state: PersistedState,
		options: ChainOptions,
		ctx: &'a ChainContext<'a>,
		next: Next<'a>,
	) -> ChainFuture<'a> {
		Box::pin(async move {
			let demanded =
				state.error_record.as_ref().is_some_and(|record| record.force_refresh_on_retry);
			let expired =
				state.credential.is_expired_at(OffsetDateTime::now_utc(), ctx.settings.expiry_skew);

			if !options.force_refresh && !demanded && !expired {
				return next.run(state, options).await;
			}
			if state.credential.refresh_token.is_none() {
				obs::warn_event(
					FlowKind::Refresh,
					"credential cannot be refreshed without a refresh token",
				);

				return Ok(None);
			}

			ctx.metrics.record_refresh_call();

			let credential = match ctx.endpoint.refresh(&state.credential).await {
				Ok(credential) => credential,
				Err(e) => return Ok(record_failure(ctx, state, &e, "token refresh failed", true)),
			};

			obs::debug_event(
				FlowKind::Refresh,
				format_args!("refreshed credential {}", credential.access_token.fingerprint()),
			);

			let refreshed =
				PersistedState { credential, last_verified: None, error_record: None, ..state };

			(ctx.on_refresh)(&refreshed)?;

			next.run(refreshed, options).await
		})
	}
}

/// Introspects the credential when forced, retried, or stale.
///
/// An invalid-token answer re-enters the [`RefreshStage`] with a forced refresh, at most
/// [`MAX_VALIDATION_LOOPS`] times, before a [`ConfigError::ValidationLoop`] failure is recorded.
#[derive(Clone, Copy, Debug, Default)]
pub struct ValidationStage;
impl ValidationStage {
	/// Stage name.
	pub const NAME: &'static str = "validation";
}
impl ChainStage for ValidationStage {
	fn name(&self) -> &'static str {
		Self::NAME
	}

	fn evaluate<'a>(
		&'a self,
		state: PersistedState,
		options: ChainOptions,
		ctx: &'a ChainContext<'a>,
		next: Next<'a>,
	) -> ChainFuture<'a> {
		Box::pin(async move {
			let now = OffsetDateTime::now_utc();

			if !options.force_validation
				&& options.force_retry_error_id.is_none()
				&& !state.needs_verification(now, ctx.settings.revalidate_after)
			{
				return next.run(state, options).await;
			}

			ctx.metrics.record_validation_call();

			let verified_at = codec::now_millis();

			match ctx.endpoint.introspect(&state.credential.access_token).await {
				Ok(info) => {
					let verified = apply_introspection(state, info, verified_at);

					(ctx.on_verified)(&verified)?;

					next.run(verified, options).await
				},
				Err(e) if e.is_unrecoverable_credential() => {
					if options.loop_count >= MAX_VALIDATION_LOOPS {
						let e =
							Error::from(ConfigError::ValidationLoop { attempts: options.loop_count });

						return Ok(record_failure(ctx, state, &e, "token validation failed", false));
					}

					obs::debug_event(
						FlowKind::Validation,
						format_args!("credential rejected ({e}), refreshing before validating again"),
					);

					let options = ChainOptions {
						force_refresh: true,
						loop_count: options.loop_count + 1,
						..options
					};

					next.rewind_to(RefreshStage::NAME, state, options).await
				},
				Err(e) => Ok(record_failure(ctx, state, &e, "token validation failed", false)),
			}
		})
	}
}

/// Folds an introspection answer into the state and marks it verified.
pub(crate) fn apply_introspection(
	mut state: PersistedState,
	info: TokenIntrospection,
	verified_at: OffsetDateTime,
) -> PersistedState {
	state.user_id = info.user_id;
	state.credential.scopes = info.scopes;

	if let Some(remaining) = info.expires_in {
		let lifetime = verified_at + remaining - state.credential.obtained_at;

		state.credential.expires_in = Some(Duration::seconds(lifetime.whole_seconds()));
	}

	state.last_verified = Some(verified_at);
	state.error_record = None;

	state
}

/// Turns a stage failure into the next state.
///
/// Unusable credentials yield `None`; everything else is recorded as a follow-up failure.
fn record_failure(
	ctx: &ChainContext<'_>,
	state: PersistedState,
	error: &Error,
	context: &str,
	force_refresh_on_retry: bool,
) -> Option<PersistedState> {
	if error.is_unrecoverable_credential() {
		obs::warn_event(FlowKind::Chain, format_args!("{context}, discarding credential: {error}"));

		return None;
	}

	obs::warn_event(FlowKind::Chain, format_args!("{context}: {error}"));
	ctx.metrics.record_failure();

	let mut record = ErrorRecord::follow(state.error_record.as_ref(), error, force_refresh_on_retry);

	record.message = format!("{context}: {}", record.message);

	Some(state.with_error(Some(record)))
}
