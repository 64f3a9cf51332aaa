//! File-backed [`SyncStore`] shared by processes on the same host.
//!
//! Each key maps to one JSON file under the store directory. Mutual exclusion across processes
//! uses an OS advisory lock on a sibling `.lock` file, behind an in-process FIFO queue. Other
//! processes learn about writes through a watcher task that polls the file digest while at least
//! one listener is registered.

// std
use std::{
	fs::{self, File, OpenOptions, TryLockError},
	io::{ErrorKind, Write},
	marker::PhantomData,
	path::{Path, PathBuf},
	sync::atomic::{AtomicU64, Ordering},
	time::Duration as StdDuration,
};
// crates.io
use async_lock::MutexGuard as AsyncMutexGuard;
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};
use tokio::{runtime::Handle, task::JoinHandle, time::MissedTickBehavior};
// self
use crate::{
	_prelude::*,
	obs::{self, FlowKind},
	store::{
		self, ChangeListener, ChangeListeners, ListenerId, LockController, StoreError, StoreFuture,
		StoreGuard, SyncStore,
	},
};

/// Default interval of the cross-process change watcher.
pub const DEFAULT_POLL_INTERVAL: StdDuration = StdDuration::from_millis(500);

const LOCK_RETRY_MIN: StdDuration = StdDuration::from_millis(5);
const LOCK_RETRY_MAX: StdDuration = StdDuration::from_millis(100);

type Digest32 = [u8; 32];

/// One durable key persisted as a JSON file.
///
/// Every [`open`](Self::open) call creates a separate instance with its own listener registry;
/// clones share the instance.
pub struct FileStore<V> {
	inner: Arc<FileInner>,
	_value: PhantomData<fn() -> V>,
}
impl<V> FileStore<V> {
	/// Opens the store for `key` under `dir`, creating the directory if needed.
	pub fn open(dir: impl AsRef<Path>, key: &str) -> Result<Self, StoreError> {
		let dir = dir.as_ref();

		fs::create_dir_all(dir).map_err(|e| StoreError::Backend {
			message: format!("Failed to create store directory {}: {e}", dir.display()),
		})?;

		let stem = URL_SAFE_NO_PAD.encode(Sha256::digest(key.as_bytes()));
		let path = dir.join(format!("{stem}.json"));
		let inner = FileInner {
			lock_path: dir.join(format!("{stem}.lock")),
			tmp_path: dir.join(format!("{stem}.json.tmp")),
			last_seen: Mutex::new(read_digest(&path)?),
			path,
			queue: AsyncMutex::new(()),
			listeners: ChangeListeners::default(),
			poll_interval_ms: AtomicU64::new(DEFAULT_POLL_INTERVAL.as_millis() as u64),
			watcher: Mutex::new(None),
		};

		Ok(Self { inner: Arc::new(inner), _value: PhantomData })
	}

	/// Overrides the interval of the cross-process change watcher.
	pub fn with_poll_interval(self, interval: StdDuration) -> Self {
		let millis = interval.as_millis().clamp(1, u64::MAX as u128) as u64;

		self.inner.poll_interval_ms.store(millis, Ordering::Relaxed);

		self
	}

	/// Path of the JSON file backing this key.
	pub fn path(&self) -> &Path {
		&self.inner.path
	}

	fn ensure_watcher(&self) {
		let mut watcher = self.inner.watcher.lock();

		if watcher.as_ref().is_some_and(|handle| !handle.is_finished()) {
			return;
		}

		let Ok(runtime) = Handle::try_current() else {
			obs::warn_event(
				FlowKind::Store,
				"No async runtime available; changes from other processes will not be observed.",
			);

			return;
		};
		let weak = Arc::downgrade(&self.inner);
		let period = StdDuration::from_millis(self.inner.poll_interval_ms.load(Ordering::Relaxed));

		*watcher = Some(runtime.spawn(async move {
			let mut ticker = tokio::time::interval(period);

			ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

			loop {
				ticker.tick().await;

				let Some(inner) = weak.upgrade() else { break };

				if inner.listeners.is_empty() {
					break;
				}

				inner.poll_external_change();
			}
		}));
	}

	fn stop_watcher_if_idle(&self) {
		if self.inner.listeners.is_empty()
			&& let Some(handle) = self.inner.watcher.lock().take()
		{
			handle.abort();
		}
	}
}
impl<V> Clone for FileStore<V> {
	fn clone(&self) -> Self {
		Self { inner: self.inner.clone(), _value: PhantomData }
	}
}
impl<V> Debug for FileStore<V> {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("FileStore")
			.field("path", &self.inner.path)
			.field("listeners", &self.inner.listeners)
			.finish()
	}
}
impl<V> SyncStore<V> for FileStore<V>
where
	V: 'static + Send + Serialize + DeserializeOwned,
{
	fn get(&self) -> Result<Option<V>, StoreError> {
		self.inner.read_value()
	}

	fn lock<'a>(
		&'a self,
		controller: Option<&'a LockController>,
	) -> StoreFuture<'a, Box<dyn StoreGuard<V> + 'a>> {
		Box::pin(async move {
			let guard = store::acquire_with(controller, self.inner.acquire()).await?;

			Ok(Box::new(FileGuard { inner: &self.inner, _held: guard, _value: PhantomData })
				as Box<dyn StoreGuard<V> + 'a>)
		})
	}

	fn add_listener(&self, listener: ChangeListener) -> ListenerId {
		let id = self.inner.listeners.add(listener);

		self.ensure_watcher();

		id
	}

	fn remove_listener(&self, id: ListenerId) -> bool {
		let removed = self.inner.listeners.remove(id);

		self.stop_watcher_if_idle();

		removed
	}

	fn remove_all_listeners(&self) {
		self.inner.listeners.clear();
		self.stop_watcher_if_idle();
	}
}

struct FileInner {
	path: PathBuf,
	lock_path: PathBuf,
	tmp_path: PathBuf,
	queue: AsyncMutex<()>,
	listeners: ChangeListeners,
	last_seen: Mutex<Option<Digest32>>,
	poll_interval_ms: AtomicU64,
	watcher: Mutex<Option<JoinHandle<()>>>,
}
impl FileInner {
	async fn acquire(&self) -> Result<HeldLock<'_>, StoreError> {
		let queue = self.queue.lock().await;
		let file = OpenOptions::new()
			.create(true)
			.truncate(false)
			.write(true)
			.open(&self.lock_path)
			.map_err(|e| StoreError::Backend {
				message: format!("Failed to open {}: {e}", self.lock_path.display()),
			})?;
		let mut backoff = LOCK_RETRY_MIN;

		loop {
			match file.try_lock() {
				Ok(()) => break,
				Err(TryLockError::WouldBlock) => {
					tokio::time::sleep(backoff).await;

					backoff = (backoff * 2).min(LOCK_RETRY_MAX);
				},
				Err(TryLockError::Error(e)) =>
					return Err(StoreError::Backend {
						message: format!("Failed to lock {}: {e}", self.lock_path.display()),
					}),
			}
		}

		Ok(HeldLock { file, _queue: queue })
	}

	fn read_value<V>(&self) -> Result<Option<V>, StoreError>
	where
		V: DeserializeOwned,
	{
		let Some(bytes) = read_bytes(&self.path)? else {
			return Ok(None);
		};
		let mut deserializer = serde_json::Deserializer::from_slice(&bytes);

		serde_path_to_error::deserialize(&mut deserializer).map(Some).map_err(|e| {
			StoreError::Serialization {
				message: format!("Failed to parse {}: {e}", self.path.display()),
			}
		})
	}

	fn write_value<V>(&self, value: Option<&V>) -> Result<(), StoreError>
	where
		V: Serialize,
	{
		let digest = match value {
			Some(value) => {
				let serialized =
					serde_json::to_vec_pretty(value).map_err(|e| StoreError::Serialization {
						message: format!("Failed to serialize store value: {e}"),
					})?;

				self.replace_file(&serialized)?;

				Some(Sha256::digest(&serialized).into())
			},
			None => {
				match fs::remove_file(&self.path) {
					Ok(()) => {},
					Err(e) if e.kind() == ErrorKind::NotFound => {},
					Err(e) =>
						return Err(StoreError::Backend {
							message: format!("Failed to remove {}: {e}", self.path.display()),
						}),
				}

				None
			},
		};

		*self.last_seen.lock() = digest;

		self.listeners.notify();

		Ok(())
	}

	fn replace_file(&self, bytes: &[u8]) -> Result<(), StoreError> {
		{
			let mut file = File::create(&self.tmp_path).map_err(|e| StoreError::Backend {
				message: format!("Failed to create {}: {e}", self.tmp_path.display()),
			})?;

			file.write_all(bytes).map_err(|e| StoreError::Backend {
				message: format!("Failed to write {}: {e}", self.tmp_path.display()),
			})?;
			file.sync_all().map_err(|e| StoreError::Backend {
				message: format!("Failed to sync {}: {e}", self.tmp_path.display()),
			})?;
		}

		fs::rename(&self.tmp_path, &self.path).map_err(|e| StoreError::Backend {
			message: format!("Failed to replace {}: {e}", self.path.display()),
		})
	}

	fn poll_external_change(&self) {
		let current = match read_digest(&self.path) {
			Ok(current) => current,
			Err(e) => {
				obs::warn_event(FlowKind::Store, format_args!("Change watcher read failed: {e}"));

				return;
			},
		};
		let changed = {
			let mut last_seen = self.last_seen.lock();

			if *last_seen == current {
				false
			} else {
				*last_seen = current;

				true
			}
		};

		if changed {
			obs::debug_event(FlowKind::Store, "Observed a write from another instance.");

			self.listeners.notify();
		}
	}
}
impl Drop for FileInner {
	fn drop(&mut self) {
		if let Some(handle) = self.watcher.get_mut().take() {
			handle.abort();
		}
	}
}

struct HeldLock<'a> {
	file: File,
	_queue: AsyncMutexGuard<'a, ()>,
}
impl Drop for HeldLock<'_> {
	fn drop(&mut self) {
		let _ = self.file.unlock();
	}
}

struct FileGuard<'a, V> {
	inner: &'a FileInner,
	_held: HeldLock<'a>,
	_value: PhantomData<fn() -> V>,
}
impl<V> StoreGuard<V> for FileGuard<'_, V>
where
	V: Send + Serialize + DeserializeOwned,
{
	fn get(&self) -> Result<Option<V>, StoreError> {
		self.inner.read_value()
	}

	fn set(&mut self, value: Option<&V>) -> Result<(), StoreError> {
		self.inner.write_value(value)
	}
}

fn read_bytes(path: &Path) -> Result<Option<Vec<u8>>, StoreError> {
	match fs::read(path) {
		Ok(bytes) if bytes.is_empty() => Ok(None),
		Ok(bytes) => Ok(Some(bytes)),
		Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
		Err(e) =>
			Err(StoreError::Backend { message: format!("Failed to read {}: {e}", path.display()) }),
	}
}

fn read_digest(path: &Path) -> Result<Option<Digest32>, StoreError> {
	Ok(read_bytes(path)?.map(|bytes| Sha256::digest(&bytes).into()))
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[tokio::test]
	async fn persists_atomically_and_reads_back() {
		let dir = tempfile::tempdir().expect("Temporary directory should be created.");
		let store = FileStore::<Vec<u32>>::open(dir.path(), "client-auth")
			.expect("File store should open.");

		assert_eq!(store.get().expect("Empty store should read."), None);

		{
			let mut guard = store.lock(None).await.expect("Lock should be granted.");

			guard.set(Some(&vec![1, 2, 3])).expect("Write should succeed.");

			assert_eq!(guard.get().expect("Guard read should succeed."), Some(vec![1, 2, 3]));
		}

		assert!(store.path().exists());
		assert!(!store.inner.tmp_path.exists(), "Temporary file must be renamed away.");

		let reopened = FileStore::<Vec<u32>>::open(dir.path(), "client-auth")
			.expect("File store should reopen.");

		assert_eq!(reopened.get().expect("Reopened store should read."), Some(vec![1, 2, 3]));

		{
			let mut guard = reopened.lock(None).await.expect("Lock should be granted.");

			guard.remove().expect("Delete should succeed.");
			guard.remove().expect("Deleting twice should be a no-op.");
		}

		assert_eq!(store.get().expect("Deleted store should read."), None);
	}

	#[test]
	fn keys_map_to_distinct_files() {
		let dir = tempfile::tempdir().expect("Temporary directory should be created.");
		let first = FileStore::<u32>::open(dir.path(), "a-auth").expect("File store should open.");
		let second = FileStore::<u32>::open(dir.path(), "b-auth").expect("File store should open.");

		assert_ne!(first.path(), second.path());
		assert!(!first.path().to_string_lossy().contains("a-auth"));
	}

	#[tokio::test]
	async fn malformed_content_reports_serialization_error() {
		let dir = tempfile::tempdir().expect("Temporary directory should be created.");
		let store = FileStore::<u32>::open(dir.path(), "bad").expect("File store should open.");

		fs::write(store.path(), b"{not json").expect("Fixture should be written.");

		assert!(matches!(store.get(), Err(StoreError::Serialization { .. })));
	}
}
