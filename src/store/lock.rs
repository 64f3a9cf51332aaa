//! Lock controller tracking the pending lock waits of one engine instance.

// self
use crate::{_prelude::*, store::StoreError};

pub(crate) fn closed_error() -> StoreError {
	StoreError::LockClosed { reason: "the owning engine instance was torn down".into() }
}

/// Registry of the lock waits issued on behalf of one logical owner.
///
/// Closing the controller cancels every registered waiter and rejects all later registrations, so
/// demand from a torn-down owner never outlives it. Waits that already turned into ownership are
/// not affected.
#[derive(Debug, Default)]
pub struct LockController {
	state: Mutex<ControllerState>,
}
impl LockController {
	/// Creates an open controller without waiters.
	pub fn new() -> Self {
		Self::default()
	}

	/// Registers a new waiter and returns its cancellation handle.
	pub fn start_waiting(&self) -> Result<WaitTicket, StoreError> {
		let mut state = self.state.lock();

		if state.closed {
			return Err(closed_error());
		}

		let id = state.next_id;
		let token = CancellationToken::new();

		state.next_id += 1;
		state.waiters.insert(id, token.clone());

		Ok(WaitTicket { id, token })
	}

	/// Deregisters a waiter once its wait resolved.
	///
	/// Fails when the controller closed or the waiter was cancelled in the meantime.
	pub fn stop_waiting(&self, ticket: WaitTicket) -> Result<(), StoreError> {
		let mut state = self.state.lock();

		if state.closed || ticket.token.is_cancelled() {
			return Err(closed_error());
		}

		state.waiters.remove(&ticket.id);

		Ok(())
	}

	/// Cancels every registered waiter and rejects future registrations.
	pub fn close(&self) {
		let waiters = {
			let mut state = self.state.lock();

			state.closed = true;

			std::mem::take(&mut state.waiters)
		};

		for token in waiters.into_values() {
			token.cancel();
		}
	}

	/// Returns `true` once [`close`](Self::close) ran.
	pub fn is_closed(&self) -> bool {
		self.state.lock().closed
	}

	/// Number of currently registered waiters.
	pub fn waiting(&self) -> usize {
		self.state.lock().waiters.len()
	}
}

#[derive(Debug, Default)]
struct ControllerState {
	closed: bool,
	next_id: u64,
	waiters: HashMap<u64, CancellationToken>,
}

/// Cancellation handle of one registered lock wait.
#[derive(Debug)]
pub struct WaitTicket {
	id: u64,
	token: CancellationToken,
}
impl WaitTicket {
	/// Returns `true` when the owning controller cancelled this wait.
	pub fn is_cancelled(&self) -> bool {
		self.token.is_cancelled()
	}

	/// Resolves once the owning controller cancels this wait.
	pub async fn cancelled(&self) {
		self.token.cancelled().await
	}
}
