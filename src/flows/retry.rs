//! Process-local timer retrying the currently recorded failure with exponential backoff.

// std
use std::{
	sync::atomic::{AtomicU64, Ordering},
	time::Duration as StdDuration,
};
// crates.io
use tokio::{runtime::Handle, task::JoinHandle};
// self
use crate::{
	_prelude::*,
	auth::ErrorId,
	obs::{self, FlowKind},
	state::ErrorRecord,
};

/// Single retry timer owned by one engine instance.
///
/// At most one retry is pending at any time. The delay is measured from the failure's
/// `occurred_at`, so every instance observing the same failure converges on the same instant.
#[derive(Debug, Default)]
pub(crate) struct RetryTimer {
	slot: Arc<Mutex<Option<PendingRetry>>>,
	generation: AtomicU64,
}
impl RetryTimer {
	/// Error id the pending retry addresses, if any.
	#[cfg(test)]
	pub(crate) fn scheduled(&self) -> Option<ErrorId> {
		self.slot.lock().as_ref().map(|pending| pending.error_id.clone())
	}

	/// Schedules `fire` for `record` unless a retry for the same failure is already pending.
	///
	/// Any retry for a different failure is cancelled first.
	pub(crate) fn schedule<F, Fut>(&self, record: &ErrorRecord, fire: F)
	where
		F: 'static + Send + FnOnce() -> Fut,
		Fut: 'static + Send + Future<Output = ()>,
	{
		let mut slot = self.slot.lock();

		if slot.as_ref().is_some_and(|pending| pending.error_id == record.id) {
			return;
		}
		if let Some(previous) = slot.take() {
			previous.handle.abort();
		}

		let Ok(runtime) = Handle::try_current() else {
			obs::warn_event(FlowKind::Retry, "no async runtime available, retry not scheduled");

			return;
		};
		let delay = (record.retry_at() - OffsetDateTime::now_utc()).max(Duration::ZERO);
		let delay: StdDuration = delay.try_into().unwrap_or_default();
		let generation = self.generation.fetch_add(1, Ordering::Relaxed);
		let own_slot = Arc::downgrade(&self.slot);
		let handle = runtime.spawn(async move {
			tokio::time::sleep(delay).await;

			// Leave the slot before firing so the retry can schedule its successor.
			if let Some(slot) = own_slot.upgrade() {
				let mut slot = slot.lock();

				if slot.as_ref().is_some_and(|pending| pending.generation == generation) {
					slot.take();
				}
			}

			fire().await;
		});

		obs::record_retry_scheduled(delay, record.count);
		obs::debug_event(
			FlowKind::Retry,
			format_args!("retry of failure {} scheduled in {delay:?}", record.id),
		);

		*slot = Some(PendingRetry { error_id: record.id.clone(), generation, handle });
	}

	/// Cancels the pending retry, if any.
	pub(crate) fn cancel(&self) {
		if let Some(pending) = self.slot.lock().take() {
			pending.handle.abort();
		}
	}
}
impl Drop for RetryTimer {
	fn drop(&mut self) {
		self.cancel();
	}
}

#[derive(Debug)]
struct PendingRetry {
	error_id: ErrorId,
	generation: u64,
	handle: JoinHandle<()>,
}

#[cfg(test)]
mod tests {
	// std
	use std::sync::atomic::AtomicUsize;
	// self
	use super::*;
	use crate::state::codec;

	fn record(id: &str, count: u32) -> ErrorRecord {
		ErrorRecord {
			id: ErrorId::new(id).expect("Error id fixture should be valid."),
			message: "boom".into(),
			stack: None,
			count,
			occurred_at: codec::now_millis(),
			force_refresh_on_retry: false,
		}
	}

	#[tokio::test(start_paused = true)]
	async fn fires_once_per_failure_after_backoff() {
		let timer = RetryTimer::default();
		let fired = Arc::new(AtomicUsize::new(0));
		let failure = record("e1", 3);

		for _ in 0..2 {
			let fired = fired.clone();

			timer.schedule(&failure, move || async move {
				fired.fetch_add(1, Ordering::SeqCst);
			});
		}

		assert_eq!(timer.scheduled().as_deref(), Some("e1"));

		tokio::time::sleep(StdDuration::from_millis(3_900)).await;

		assert_eq!(fired.load(Ordering::SeqCst), 0, "Third failure waits four seconds.");

		tokio::time::sleep(StdDuration::from_millis(200)).await;

		assert_eq!(fired.load(Ordering::SeqCst), 1);
		assert!(timer.scheduled().is_none());
	}

	#[tokio::test(start_paused = true)]
	async fn new_failures_replace_and_cancel_clears() {
		let timer = RetryTimer::default();
		let fired = Arc::new(Mutex::new(Vec::new()));

		for id in ["e1", "e2"] {
			let fired = fired.clone();

			timer.schedule(&record(id, 1), move || async move {
				fired.lock().push(id);
			});
		}

		tokio::time::sleep(StdDuration::from_secs(2)).await;

		assert_eq!(*fired.lock(), vec!["e2"]);

		let fired_after_cancel = fired.clone();

		timer.schedule(&record("e3", 1), move || async move {
			fired_after_cancel.lock().push("e3");
		});
		timer.cancel();
		tokio::time::sleep(StdDuration::from_secs(2)).await;

		assert_eq!(*fired.lock(), vec!["e2"]);
		assert!(timer.scheduled().is_none());
	}
}
