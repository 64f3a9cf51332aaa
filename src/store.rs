//! Synchronized store contracts shared by every engine instance bound to one key.
//!
//! A store holds a single value. Reads through [`SyncStore::get`] are advisory snapshots; every
//! mutation happens through a [`StoreGuard`] obtained from [`SyncStore::lock`], which excludes all
//! other instances of the same key (including instances in other processes for
//! [`FileStore`]). Every write fires the registered change listeners of every instance.

pub mod file;
pub mod lock;
pub mod memory;

pub use file::FileStore;
pub use lock::{LockController, WaitTicket};
pub use memory::MemoryStore;

// std
use std::sync::atomic::{AtomicU64, Ordering};
// self
use crate::_prelude::*;

/// Boxed future returned by store operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + 'a + Send>>;

/// Payload-free change callback; listeners re-read through [`SyncStore::get`].
pub type ChangeListener = Arc<dyn Fn() + Send + Sync>;

/// Single-value store shared across engine instances.
pub trait SyncStore<V>
where
	Self: Send + Sync,
	V: Send,
{
	/// Returns the current value without taking the lock.
	fn get(&self) -> Result<Option<V>, StoreError>;

	/// Acquires exclusive access across every instance of the store key.
	///
	/// When a controller is supplied the wait is registered with it; closing the controller
	/// rejects the wait with [`StoreError::LockClosed`] instead of granting access.
	fn lock<'a>(
		&'a self,
		controller: Option<&'a LockController>,
	) -> StoreFuture<'a, Box<dyn StoreGuard<V> + 'a>>;

	/// Registers a change listener fired for local writes and writes by other instances.
	fn add_listener(&self, listener: ChangeListener) -> ListenerId;

	/// Removes a listener, returning `true` when it was registered.
	fn remove_listener(&self, id: ListenerId) -> bool;

	/// Removes every listener registered on this instance.
	fn remove_all_listeners(&self);
}

/// Exclusive access to a store value; dropping the guard releases the lock.
pub trait StoreGuard<V>
where
	Self: Send,
{
	/// Reads the current value.
	fn get(&self) -> Result<Option<V>, StoreError>;

	/// Persists `value` (or deletes it for `None`) and notifies listeners before returning.
	fn set(&mut self, value: Option<&V>) -> Result<(), StoreError>;

	/// Deletes the stored value.
	fn remove(&mut self) -> Result<(), StoreError> {
		self.set(None)
	}
}

/// Error type produced by [`SyncStore`] implementations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum StoreError {
	/// Serialization failures surfaced by the backend.
	#[error("Serialization error: {message}.")]
	Serialization {
		/// Human-readable error payload.
		message: String,
	},
	/// Backend-level failure for the storage engine.
	#[error("Backend failure: {message}.")]
	Backend {
		/// Human-readable error payload.
		message: String,
	},
	/// A lock wait was rejected because its controller closed.
	#[error("Lock controller is closed: {reason}.")]
	LockClosed {
		/// Why the wait was rejected.
		reason: String,
	},
}

/// Handle returned by [`SyncStore::add_listener`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Listener registry owned by one store instance.
#[derive(Default)]
pub struct ChangeListeners {
	next_id: AtomicU64,
	entries: Mutex<Vec<(ListenerId, ChangeListener)>>,
}
impl ChangeListeners {
	/// Registers a listener.
	pub fn add(&self, listener: ChangeListener) -> ListenerId {
		let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));

		self.entries.lock().push((id, listener));

		id
	}

	/// Removes a listener, returning `true` when it was registered.
	pub fn remove(&self, id: ListenerId) -> bool {
		let mut entries = self.entries.lock();
		let before = entries.len();

		entries.retain(|(candidate, _)| *candidate != id);

		entries.len() != before
	}

	/// Removes every listener.
	pub fn clear(&self) {
		self.entries.lock().clear();
	}

	/// Number of registered listeners.
	pub fn len(&self) -> usize {
		self.entries.lock().len()
	}

	/// Returns `true` when no listener is registered.
	pub fn is_empty(&self) -> bool {
		self.entries.lock().is_empty()
	}

	/// Invokes every listener.
	///
	/// The registry is snapshotted first so listeners may add or remove listeners.
	pub fn notify(&self) {
		let snapshot =
			self.entries.lock().iter().map(|(_, listener)| listener.clone()).collect::<Vec<_>>();

		for listener in snapshot {
			listener();
		}
	}
}
impl Debug for ChangeListeners {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("ChangeListeners").field("len", &self.len()).finish()
	}
}

/// Runs a lock acquisition, registering the wait with `controller` when one is supplied.
///
/// Closing the controller while the acquisition is pending drops the acquisition future. A wait
/// that resolves after the controller closed releases the acquired guard and fails.
pub(crate) async fn acquire_with<T, F>(
	controller: Option<&LockController>,
	acquire: F,
) -> Result<T, StoreError>
where
	F: Future<Output = Result<T, StoreError>>,
{
	let Some(controller) = controller else {
		return acquire.await;
	};
	let ticket = controller.start_waiting()?;
	let outcome = tokio::select! {
		biased;
		_ = ticket.cancelled() => Err(lock::closed_error()),
		acquired = acquire => acquired,
	};

	controller.stop_waiting(ticket)?;

	outcome
}

#[cfg(test)]
mod tests {
	// std
	use std::sync::atomic::AtomicUsize;
	// self
	use super::*;

	#[test]
	fn listeners_can_be_added_removed_and_notified() {
		let hits = Arc::new(AtomicUsize::new(0));
		let listeners = ChangeListeners::default();
		let first = listeners.add({
			let hits = hits.clone();

			Arc::new(move || {
				hits.fetch_add(1, Ordering::SeqCst);
			})
		});
		let _second = listeners.add({
			let hits = hits.clone();

			Arc::new(move || {
				hits.fetch_add(10, Ordering::SeqCst);
			})
		});

		listeners.notify();

		assert_eq!(hits.load(Ordering::SeqCst), 11);
		assert!(listeners.remove(first));
		assert!(!listeners.remove(first));

		listeners.notify();

		assert_eq!(hits.load(Ordering::SeqCst), 21);

		listeners.clear();

		assert!(listeners.is_empty());
	}

	#[tokio::test]
	async fn acquisition_fails_once_controller_closed() {
		let controller = LockController::new();
		let pending = acquire_with(Some(&controller), std::future::pending::<Result<(), _>>());
		let closer = async {
			tokio::task::yield_now().await;

			assert_eq!(controller.waiting(), 1);

			controller.close();
		};
		let (outcome, ()) = tokio::join!(pending, closer);
		let err = outcome.expect_err("Closed controllers must reject pending waits.");

		assert!(matches!(err, StoreError::LockClosed { .. }));
		assert_eq!(controller.waiting(), 0);
	}

	#[tokio::test]
	async fn acquisition_without_controller_runs_directly() {
		let value = acquire_with(None, async { Ok::<_, StoreError>(7) })
			.await
			.expect("Uncontrolled acquisition should succeed.");

		assert_eq!(value, 7);
	}
}
