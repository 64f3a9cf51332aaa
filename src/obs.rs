//! Optional observability helpers for engine flows.
//!
//! # Feature Flags
//!
//! - Enable `tracing` to emit structured spans named `device_flow_broker.flow` with the `flow`
//!   (operation) and `stage` (call site) fields, plus warn/debug events for retries and failures.
//! - Enable `metrics` to increment the `device_flow_broker_flow_total` counter for every
//!   attempt/success/failure, labeled by `flow` + `outcome`, and to report the backoff of every
//!   scheduled retry through `device_flow_broker_retry_delay_seconds`.

mod metrics;
mod tracing;

pub use metrics::*;
pub use tracing::*;

// self
use crate::_prelude::*;

/// Operations observed by the engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FlowKind {
	/// Device authorization request plus token polling.
	DeviceAuthorization,
	/// Refresh token grant issued by the token chain.
	Refresh,
	/// Token introspection issued by the token chain or sign-in.
	Validation,
	/// One full token chain evaluation under the store lock.
	Chain,
	/// Sign-in write of a freshly obtained credential.
	SetCredential,
	/// Scheduled retry of a recorded failure.
	Retry,
	/// Durable store maintenance (watchers, lock waits).
	Store,
}
impl FlowKind {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			FlowKind::DeviceAuthorization => "device_authorization",
			FlowKind::Refresh => "refresh",
			FlowKind::Validation => "validation",
			FlowKind::Chain => "chain",
			FlowKind::SetCredential => "set_credential",
			FlowKind::Retry => "retry",
			FlowKind::Store => "store",
		}
	}
}
impl Display for FlowKind {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Outcome labels recorded for each attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FlowOutcome {
	/// Entry to an engine operation.
	Attempt,
	/// Successful completion.
	Success,
	/// Failure propagated back to the caller.
	Failure,
}
impl FlowOutcome {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			FlowOutcome::Attempt => "attempt",
			FlowOutcome::Success => "success",
			FlowOutcome::Failure => "failure",
		}
	}
}
impl Display for FlowOutcome {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}
