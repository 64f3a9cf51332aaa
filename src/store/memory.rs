//! In-process [`SyncStore`] for tests and single-process deployments.

// crates.io
use async_lock::MutexGuard as AsyncMutexGuard;
// self
use crate::{
	_prelude::*,
	store::{
		self, ChangeListener, ChangeListeners, ListenerId, LockController, StoreError, StoreFuture,
		StoreGuard, SyncStore,
	},
};

/// Shared in-memory cell.
///
/// Clones are the same instance. [`attach`](Self::attach) creates another instance over the same
/// cell with its own listener registry, the way a second process would open the same durable key.
pub struct MemoryStore<V> {
	shared: Arc<Shared<V>>,
	listeners: Arc<ChangeListeners>,
}
impl<V> MemoryStore<V> {
	/// Creates an empty store.
	pub fn new() -> Self {
		Self::with_value(None)
	}

	/// Creates a store seeded with `value`.
	pub fn with_value(value: Option<V>) -> Self {
		let shared = Arc::new(Shared {
			value: RwLock::new(value),
			lock: AsyncMutex::new(()),
			instances: Mutex::new(Vec::new()),
		});

		Self::register(shared)
	}

	/// Opens another instance over the same cell.
	pub fn attach(&self) -> Self {
		Self::register(self.shared.clone())
	}

	fn register(shared: Arc<Shared<V>>) -> Self {
		let listeners = Arc::new(ChangeListeners::default());

		shared.instances.lock().push(Arc::downgrade(&listeners));

		Self { shared, listeners }
	}

	fn notify_instances(&self) {
		let live = {
			let mut instances = self.shared.instances.lock();

			instances.retain(|instance| instance.strong_count() > 0);

			instances.iter().filter_map(Weak::upgrade).collect::<Vec<_>>()
		};

		for listeners in live {
			listeners.notify();
		}
	}
}
impl<V> Clone for MemoryStore<V> {
	fn clone(&self) -> Self {
		Self { shared: self.shared.clone(), listeners: self.listeners.clone() }
	}
}
impl<V> Default for MemoryStore<V> {
	fn default() -> Self {
		Self::new()
	}
}
impl<V> Debug for MemoryStore<V> {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("MemoryStore").field("listeners", &self.listeners).finish()
	}
}
impl<V> SyncStore<V> for MemoryStore<V>
where
	V: 'static + Clone + Send + Sync,
{
	fn get(&self) -> Result<Option<V>, StoreError> {
		Ok(self.shared.value.read().clone())
	}

	fn lock<'a>(
		&'a self,
		controller: Option<&'a LockController>,
	) -> StoreFuture<'a, Box<dyn StoreGuard<V> + 'a>> {
		Box::pin(async move {
			let lock =
				store::acquire_with(controller, async { Ok(self.shared.lock.lock().await) }).await?;

			Ok(Box::new(MemoryGuard { store: self, _lock: lock }) as Box<dyn StoreGuard<V> + 'a>)
		})
	}

	fn add_listener(&self, listener: ChangeListener) -> ListenerId {
		self.listeners.add(listener)
	}

	fn remove_listener(&self, id: ListenerId) -> bool {
		self.listeners.remove(id)
	}

	fn remove_all_listeners(&self) {
		self.listeners.clear();
	}
}

struct Shared<V> {
	value: RwLock<Option<V>>,
	lock: AsyncMutex<()>,
	instances: Mutex<Vec<Weak<ChangeListeners>>>,
}

struct MemoryGuard<'a, V> {
	store: &'a MemoryStore<V>,
	_lock: AsyncMutexGuard<'a, ()>,
}
impl<V> StoreGuard<V> for MemoryGuard<'_, V>
where
	V: 'static + Clone + Send + Sync,
{
	fn get(&self) -> Result<Option<V>, StoreError> {
		Ok(self.store.shared.value.read().clone())
	}

	fn set(&mut self, value: Option<&V>) -> Result<(), StoreError> {
		*self.store.shared.value.write() = value.cloned();

		self.store.notify_instances();

		Ok(())
	}
}
