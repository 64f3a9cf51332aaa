// std
use std::time::Duration as StdDuration;
// self
use crate::obs::{FlowKind, FlowOutcome};

/// Records a flow outcome via the global metrics recorder (when enabled).
pub fn record_flow_outcome(kind: FlowKind, outcome: FlowOutcome) {
	#[cfg(feature = "metrics")]
	{
		metrics::counter!(
			"device_flow_broker_flow_total",
			"flow" => kind.as_str(),
			"outcome" => outcome.as_str()
		)
		.increment(1);
	}

	#[cfg(not(feature = "metrics"))]
	{
		let _ = (kind, outcome);
	}
}

/// Records the backoff chosen for a recorded failure and its consecutive failure count.
pub fn record_retry_scheduled(delay: StdDuration, failures: u32) {
	#[cfg(feature = "metrics")]
	{
		metrics::histogram!("device_flow_broker_retry_delay_seconds").record(delay.as_secs_f64());
		metrics::gauge!("device_flow_broker_consecutive_failures").set(f64::from(failures));
	}

	#[cfg(not(feature = "metrics"))]
	{
		let _ = (delay, failures);
	}
}
