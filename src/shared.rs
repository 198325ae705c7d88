//! A session handle that serialises all mutations of one communicator while letting fetches run unlocked.
//!
//! ```
//! use row_window::{
//! 	communicator::{DataCommunicator, RowRequest},
//! 	provider::{Filter, ListDataProvider},
//! 	shared::SharedCommunicator,
//! 	sink::NullSink,
//! };
//! use std::sync::Arc;
//!
//! let communicator = DataCommunicator::<u32, Filter<u32>>::new(Arc::new(ListDataProvider::new((0..100).collect::<Vec<u32>>())), NullSink);
//! let shared = SharedCommunicator::new(communicator);
//!
//! let worker = {
//! 	let shared = shared.clone();
//! 	std::thread::spawn(move || shared.lock().set_filter(Some(Filter::new(|n: &u32| n % 2 == 0))))
//! };
//! shared.request_rows(RowRequest { first_row: 0, number_of_rows: 10, request_id: 1, cache_token: 0 }).unwrap();
//! worker.join().unwrap();
//! ```

use crate::{
	communicator::{RoundOutcome, RowRequest},
	config::CommunicatorConfig,
	error::SyncError,
};
use parking_lot::{Mutex, MutexGuard};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// What planning a round resulted in.
#[derive(Debug)]
pub enum Planned<P> {
	/// Run this plan, then commit its result.
	Fetch(P),
	/// The round finished without fetching.
	Done(RoundOutcome),
}

/// The three steps of a synchronisation round.
///
/// [`plan`](`Synchronize::plan`) and [`commit`](`Synchronize::commit`) need exclusive access to the communicator,
/// [`execute`](`Synchronize::execute`) doesn't.
pub trait Synchronize {
	type Plan;
	type Fetched;

	fn config(&self) -> &CommunicatorConfig;

	/// Plans a round answering `request`, or pushing pending changes for [`None`].
	///
	/// # Errors
	///
	/// Rejected requests. Nothing is changed in that case.
	fn plan(&mut self, request: Option<RowRequest>) -> Result<Planned<Self::Plan>, SyncError>;

	/// # Errors
	///
	/// Provider failures.
	fn execute(plan: Self::Plan) -> Result<Self::Fetched, SyncError>;

	/// Applies a fetched result, or discards it as [`RoundOutcome::Stale`] if the communicator changed since planning.
	///
	/// # Errors
	///
	/// Results that don't fit the communicator's state. Nothing is changed in that case.
	fn commit(&mut self, fetched: Self::Fetched) -> Result<RoundOutcome, SyncError>;
}

/// Cloneable handle to one communicator, usable from several threads.
#[derive(Debug)]
pub struct SharedCommunicator<C> {
	inner: Arc<Mutex<C>>,
}
impl<C> Clone for SharedCommunicator<C> {
	fn clone(&self) -> Self {
		Self { inner: Arc::clone(&self.inner) }
	}
}
impl<C: Synchronize> SharedCommunicator<C> {
	pub fn new(communicator: C) -> Self {
		Self {
			inner: Arc::new(Mutex::new(communicator)),
		}
	}

	/// Exclusive access for mutations like filter changes or expansion.
	///
	/// Don't hold on to the guard across a round on the same thread. That would deadlock.
	pub fn lock(&self) -> MutexGuard<'_, C> {
		self.inner.lock()
	}

	pub fn try_lock(&self) -> Option<MutexGuard<'_, C>> {
		self.inner.try_lock()
	}

	/// Answers a client's row request.
	///
	/// # Errors
	///
	/// See [`Synchronize`].
	#[instrument(skip(self))]
	pub fn request_rows(&self, request: RowRequest) -> Result<RoundOutcome, SyncError> {
		self.run(Some(request))
	}

	/// Pushes pending server-side changes.
	///
	/// # Errors
	///
	/// See [`Synchronize`].
	pub fn flush(&self) -> Result<RoundOutcome, SyncError> {
		self.run(None)
	}

	fn run(&self, request: Option<RowRequest>) -> Result<RoundOutcome, SyncError> {
		let mut attempts = 0;
		loop {
			let mut communicator = self.inner.lock();
			let plan = match communicator.plan(request)? {
				Planned::Fetch(plan) => plan,
				Planned::Done(outcome) => return Ok(outcome),
			};

			if attempts >= communicator.config().stale_retries {
				warn!(attempts, "Round keeps going stale. Fetching under the lock.");
				let fetched = C::execute(plan)?;
				return communicator.commit(fetched);
			}
			drop(communicator);

			let fetched = C::execute(plan)?;
			match self.inner.lock().commit(fetched)? {
				RoundOutcome::Stale => {
					attempts += 1;
					debug!(attempts, "Re-planning stale round.");
				}
				outcome => return Ok(outcome),
			}
		}
	}
}
