//! Engine call counters.

// std
use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters describing what the engine did on the wire and in the chain.
#[derive(Debug, Default)]
pub struct EngineMetrics {
	chain_runs: AtomicU64,
	refresh_calls: AtomicU64,
	validation_calls: AtomicU64,
	recorded_failures: AtomicU64,
	short_circuits: AtomicU64,
}
impl EngineMetrics {
	/// Returns the number of token chain evaluations.
	pub fn chain_runs(&self) -> u64 {
		self.chain_runs.load(Ordering::Relaxed)
	}

	/// Returns the number of refresh grants sent to the token endpoint.
	pub fn refresh_calls(&self) -> u64 {
		self.refresh_calls.load(Ordering::Relaxed)
	}

	/// Returns the number of introspection calls, including sign-in validation.
	pub fn validation_calls(&self) -> u64 {
		self.validation_calls.load(Ordering::Relaxed)
	}

	/// Returns the number of failures recorded as error records.
	pub fn recorded_failures(&self) -> u64 {
		self.recorded_failures.load(Ordering::Relaxed)
	}

	/// Returns the number of evaluations that stopped at an existing error record.
	pub fn short_circuits(&self) -> u64 {
		self.short_circuits.load(Ordering::Relaxed)
	}

	pub(crate) fn record_chain_run(&self) {
		self.chain_runs.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_refresh_call(&self) {
		self.refresh_calls.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_validation_call(&self) {
		self.validation_calls.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_failure(&self) {
		self.recorded_failures.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_short_circuit(&self) {
		self.short_circuits.fetch_add(1, Ordering::Relaxed);
	}
}
