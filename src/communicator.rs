//! Synchronises a flat data provider with a client's row window.
//!
//! Every round is split in three steps so that the potentially slow fetch doesn't need access to the communicator:
//!
//! 1. [`plan`](`Synchronize::plan`) validates the request and snapshots everything the fetch needs,
//! 2. [`execute`](`Synchronize::execute`) runs the fetch against the provider,
//! 3. [`commit`](`Synchronize::commit`) reconciles the result with the active window and pushes the diff,
//!    unless a filter, sort or provider change happened in the meantime, in which case the result is discarded.
//!
//! [`DataCommunicator::request_rows`] runs all three at once.

use crate::{
	active::{ActiveDataHandler, ItemState},
	config::CommunicatorConfig,
	error::SyncError,
	key_mapper::{Key, KeyMapper},
	provider::{Comparator, DataProvider, Query, SortOrder},
	shared::{Planned, Synchronize},
	sink::{DataDiff, DataSink, RowData},
};
use core::{fmt::Debug, hash::Hash, ops::Range};
use std::sync::Arc;
use tracing::{debug, instrument, trace_span, warn};

/// A client's request for the rows `first_row..first_row + number_of_rows`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowRequest {
	pub first_row: usize,
	pub number_of_rows: usize,
	/// Increases with every request of the same client.
	pub request_id: u64,
	/// The [`DataDiff::version`] of the last diff the client applied.
	pub cache_token: u64,
}
impl RowRequest {
	#[must_use]
	pub fn range(&self) -> Range<usize> {
		self.first_row..self.first_row.saturating_add(self.number_of_rows)
	}
}

/// How a round ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundOutcome {
	/// A diff was pushed to the sink.
	Applied,
	/// The fetched rows were computed for an outdated filter, sort order, provider or tree shape and were discarded.
	Stale,
	/// A newer request was already answered.
	Superseded,
	/// There was nothing to push.
	Idle,
}

/// Handle for changing the filter of one particular data provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterSlot {
	pub(crate) provider_generation: u64,
}

/// Request bookkeeping shared by the flat and hierarchical communicators.
#[derive(Debug, Clone)]
pub(crate) struct RoundState {
	/// Filter/sort/provider version. Sent to clients as cache token.
	pub version: u64,
	/// Bumped by changes that invalidate planned fetches without invalidating the client's cache.
	pub generation: u64,
	pub reset_pending: bool,
	/// The last window pushed to the client.
	pub last_range: Range<usize>,
	pub last_request_id: Option<u64>,
	/// Size reported with the last pushed window.
	pub total_size: usize,
	pub provider_generation: u64,
}
impl RoundState {
	pub fn new(initial_range: Range<usize>) -> Self {
		Self {
			version: 0,
			generation: 0,
			reset_pending: true,
			last_range: initial_range,
			last_request_id: None,
			total_size: 0,
			provider_generation: 0,
		}
	}

	/// Outdates the client's cache and every planned fetch.
	pub fn invalidate(&mut self) {
		self.version += 1;
		self.reset_pending = true;
	}

	/// Resolves a request to the range to fetch and whether that round resets the client.
	///
	/// Returns [`None`] for requests that are older than the last answered one.
	pub fn resolve(&self, request: &RowRequest, config: &CommunicatorConfig) -> Result<Option<(Range<usize>, bool)>, SyncError> {
		if request.number_of_rows > config.max_rows {
			return Err(SyncError::TooManyRows {
				requested: request.number_of_rows,
				maximum: config.max_rows,
			});
		}
		if self.last_request_id.map_or(false, |last| request.request_id < last) {
			debug!(request.request_id, "Ignoring superseded request.");
			return Ok(None);
		}
		if self.reset_pending || request.cache_token != self.version {
			debug!(request.cache_token, self.version, "Request is based on outdated data. Forcing a reset.");
			Ok(Some((self.last_range.clone(), true)))
		} else {
			Ok(Some((request.range(), false)))
		}
	}

	pub fn is_current(&self, version: u64, generation: u64) -> bool {
		if self.version == version && self.generation == generation {
			true
		} else {
			warn!(version, generation, current_version = self.version, current_generation = self.generation, "Discarding stale round.");
			false
		}
	}

	pub fn is_superseded(&self, request_id: Option<u64>) -> bool {
		matches!((request_id, self.last_request_id), (Some(request_id), Some(last)) if request_id < last)
	}

	pub fn applied(&mut self, range: Range<usize>, total_size: usize, request_id: Option<u64>, reset: bool) {
		self.last_range = range;
		self.total_size = total_size;
		if request_id.is_some() {
			self.last_request_id = request_id;
		}
		if reset {
			self.reset_pending = false;
		}
	}
}

/// Everything a flat fetch needs, detached from the communicator.
pub struct FetchPlan<T, F> {
	version: u64,
	generation: u64,
	request_id: Option<u64>,
	range: Range<usize>,
	reset: bool,
	provider: Arc<dyn DataProvider<T, F>>,
	filter: Option<F>,
	sort_orders: Vec<SortOrder>,
	in_memory_sorting: Option<Comparator<T>>,
}
impl<T, F> FetchPlan<T, F> {
	#[must_use]
	pub fn range(&self) -> Range<usize> {
		self.range.clone()
	}

	#[must_use]
	pub fn is_reset(&self) -> bool {
		self.reset
	}

	/// Queries size and rows.
	///
	/// # Errors
	///
	/// [`SyncError::Fetch`] if the provider fails.
	pub fn execute(self) -> Result<Fetched<T>, SyncError> {
		let span = trace_span!("fetch", range = ?self.range, reset = self.reset);
		let _enter = span.enter();

		let total_size = self.provider.size(&Query::all(self.filter.as_ref(), None)).map_err(SyncError::Fetch)?;
		let items = if self.range.is_empty() {
			Vec::new()
		} else {
			self.provider
				.fetch(&Query {
					offset: self.range.start,
					limit: self.range.len(),
					sort_orders: &self.sort_orders,
					in_memory_sorting: self.in_memory_sorting.as_ref(),
					filter: self.filter.as_ref(),
					parent: None,
				})
				.map_err(SyncError::Fetch)?
		};
		if items.len() > self.range.len() {
			warn!(expected = self.range.len(), actual = items.len(), "Provider returned more rows than requested. Ignoring the excess.");
		}
		Ok(Fetched {
			version: self.version,
			generation: self.generation,
			request_id: self.request_id,
			range: self.range,
			reset: self.reset,
			total_size,
			items,
		})
	}
}

/// Result of a [`FetchPlan`], to be committed.
#[derive(Debug)]
pub struct Fetched<T> {
	version: u64,
	generation: u64,
	request_id: Option<u64>,
	range: Range<usize>,
	reset: bool,
	total_size: usize,
	items: Vec<T>,
}

/// Keeps one client's window of a flat [`DataProvider`] in sync.
pub struct DataCommunicator<T, F, I = T> {
	config: CommunicatorConfig,
	provider: Arc<dyn DataProvider<T, F>>,
	filter: Option<F>,
	sort_orders: Vec<SortOrder>,
	in_memory_sorting: Option<Comparator<T>>,
	active: ActiveDataHandler<T, I>,
	sink: Box<dyn DataSink<T>>,
	state: RoundState,
}
impl<T, F> DataCommunicator<T, F, T>
where
	T: 'static + Clone + Hash + Eq,
	F: 'static + Clone + Debug,
{
	/// A communicator with structural item identity and default configuration.
	pub fn new(provider: Arc<dyn DataProvider<T, F>>, sink: impl 'static + DataSink<T>) -> Self {
		Self::with_key_mapper(CommunicatorConfig::default(), provider, KeyMapper::new(), sink)
	}
}
impl<T, F, I> DataCommunicator<T, F, I>
where
	T: 'static + Clone,
	F: 'static + Clone + Debug,
	I: Clone + Hash + Eq,
{
	pub fn with_key_mapper(config: CommunicatorConfig, provider: Arc<dyn DataProvider<T, F>>, key_mapper: KeyMapper<T, I>, sink: impl 'static + DataSink<T>) -> Self {
		Self {
			state: RoundState::new(0..config.min_push_size),
			config,
			provider,
			filter: None,
			sort_orders: Vec::new(),
			in_memory_sorting: None,
			active: ActiveDataHandler::new(key_mapper),
			sink: Box::new(sink),
		}
	}

	#[must_use]
	pub fn config(&self) -> &CommunicatorConfig {
		&self.config
	}

	/// The current cache token.
	#[must_use]
	pub fn version(&self) -> u64 {
		self.state.version
	}

	#[must_use]
	pub fn is_reset_pending(&self) -> bool {
		self.state.reset_pending
	}

	#[must_use]
	pub fn last_range(&self) -> Range<usize> {
		self.state.last_range.clone()
	}

	#[must_use]
	pub fn filter(&self) -> Option<&F> {
		self.filter.as_ref()
	}

	#[must_use]
	pub fn key_mapper(&self) -> &KeyMapper<T, I> {
		self.active.key_mapper()
	}

	#[must_use]
	pub fn active_keys(&self) -> &[Key] {
		self.active.active_keys()
	}

	pub fn active_data(&self) -> impl '_ + Iterator<Item = (&Key, &T)> {
		self.active.active_data()
	}

	pub fn dropped_data(&self) -> impl '_ + Iterator<Item = (&Key, &T)> {
		self.active.dropped_data()
	}

	#[must_use]
	pub fn state_of(&self, key: &Key) -> ItemState {
		self.active.state_of(key)
	}

	/// Answers a client's row request with one diff.
	///
	/// # Errors
	///
	/// [`SyncError::TooManyRows`] for oversized requests and [`SyncError::Fetch`] for provider failures.
	/// Neither changes the active window.
	#[instrument(skip(self))]
	pub fn request_rows(&mut self, request: RowRequest) -> Result<RoundOutcome, SyncError> {
		match self.plan_request(request)? {
			Planned::Fetch(plan) => {
				let fetched = plan.execute()?;
				self.commit_fetched(fetched)
			}
			Planned::Done(outcome) => Ok(outcome),
		}
	}

	/// Pushes pending server-side changes: a full reset if one is pending, otherwise refreshed rows.
	///
	/// # Errors
	///
	/// [`SyncError::Fetch`] if the provider fails during a reset.
	#[instrument(skip(self))]
	pub fn flush(&mut self) -> Result<RoundOutcome, SyncError> {
		match self.plan_flush() {
			Planned::Fetch(plan) => {
				let fetched = plan.execute()?;
				self.commit_fetched(fetched)
			}
			Planned::Done(outcome) => Ok(outcome),
		}
	}

	fn plan_request(&mut self, request: RowRequest) -> Result<Planned<FetchPlan<T, F>>, SyncError> {
		Ok(match self.state.resolve(&request, &self.config)? {
			Some((range, reset)) => Planned::Fetch(self.fetch_plan(range, reset, Some(request.request_id))),
			None => Planned::Done(RoundOutcome::Superseded),
		})
	}

	fn plan_flush(&mut self) -> Planned<FetchPlan<T, F>> {
		if self.state.reset_pending {
			return Planned::Fetch(self.fetch_plan(self.state.last_range.clone(), true, None));
		}
		Planned::Done(self.push_refreshed())
	}

	fn fetch_plan(&self, range: Range<usize>, reset: bool, request_id: Option<u64>) -> FetchPlan<T, F> {
		let span = trace_span!("plan", ?range, reset, ?request_id);
		let _enter = span.enter();
		#[cfg(feature = "dangerous-logging")]
		tracing::trace!(filter = ?self.filter, "Planning fetch.");
		#[cfg(not(feature = "dangerous-logging"))]
		tracing::trace!(filtered = self.filter.is_some(), "Planning fetch.");

		FetchPlan {
			version: self.state.version,
			generation: self.state.generation,
			request_id,
			range,
			reset,
			provider: Arc::clone(&self.provider),
			filter: self.filter.clone(),
			sort_orders: self.sort_orders.clone(),
			in_memory_sorting: self.in_memory_sorting.clone(),
		}
	}

	fn commit_fetched(&mut self, fetched: Fetched<T>) -> Result<RoundOutcome, SyncError> {
		let Fetched {
			version,
			generation,
			request_id,
			range,
			reset,
			total_size,
			mut items,
		} = fetched;
		if !self.state.is_current(version, generation) {
			return Ok(RoundOutcome::Stale);
		}
		if self.state.is_superseded(request_id) {
			return Ok(RoundOutcome::Superseded);
		}

		items.truncate(range.len());
		let reconciliation = self.active.set_active(items, reset);
		self.state.applied(range.clone(), total_size, request_id, reset);

		let row = |(key, item)| RowData { key, item, hierarchy: None };
		self.sink.apply_diff(DataDiff {
			version,
			request_id,
			reset,
			total_size,
			first_row: range.start,
			rows: reconciliation.rows,
			generated_rows: reconciliation.generated.into_iter().map(row).collect(),
			refreshed_rows: reconciliation.refreshed.into_iter().map(row).collect(),
			dropped_keys: reconciliation.dropped,
		});
		Ok(RoundOutcome::Applied)
	}

	/// Pushes the first [`min_push_size`](`CommunicatorConfig::min_push_size`) rows as a reset.
	///
	/// # Errors
	///
	/// [`SyncError::Fetch`] if the provider fails.
	pub fn push_initial(&mut self) -> Result<RoundOutcome, SyncError> {
		self.state.last_range = 0..self.config.min_push_size;
		self.state.reset_pending = true;
		self.flush()
	}

	/// Pushes a refresh-only diff for the dirty items in the window, if there are any.
	pub fn push_refreshed(&mut self) -> RoundOutcome {
		let refreshed = self.active.take_refreshed();
		if refreshed.is_empty() {
			return RoundOutcome::Idle;
		}
		debug!(count = refreshed.len(), "Pushing refreshed rows.");
		self.sink.apply_diff(DataDiff {
			version: self.state.version,
			request_id: None,
			reset: false,
			total_size: self.state.total_size,
			first_row: self.state.last_range.start,
			rows: self.active.active_keys().to_vec(),
			generated_rows: Vec::new(),
			refreshed_rows: refreshed.into_iter().map(|(key, item)| RowData { key, item, hierarchy: None }).collect(),
			dropped_keys: Vec::new(),
		});
		RoundOutcome::Applied
	}

	/// Confirms that the client forgot these rows. Their keys are released.
	///
	/// Unknown keys (for example from before a provider change) are ignored.
	#[instrument(skip(self, keys))]
	pub fn confirm_drop(&mut self, keys: impl IntoIterator<Item = Key>) -> Vec<Key> {
		self.active.confirm_drop(keys)
	}

	/// Stores the new value of `item` and schedules it to be refreshed on the client.
	///
	/// Returns `false` if the item isn't in the client's window.
	pub fn refresh(&mut self, item: &T) -> bool {
		self.active.mark_dirty(item)
	}

	/// Resends the whole window during the next round. Requests based on earlier data are answered with a reset.
	pub fn reset(&mut self) {
		if !self.state.reset_pending {
			debug!("Reset scheduled.");
		}
		self.state.invalidate();
	}

	pub fn set_filter(&mut self, filter: Option<F>) {
		self.filter = filter;
		self.reset();
	}

	/// Changes the filter, unless the provider `slot` was created for was replaced since.
	///
	/// # Errors
	///
	/// [`SyncError::ProviderSwapped`] if the provider was replaced.
	pub fn set_filter_with(&mut self, slot: FilterSlot, filter: Option<F>) -> Result<(), SyncError> {
		if slot.provider_generation != self.state.provider_generation {
			return Err(SyncError::ProviderSwapped);
		}
		self.set_filter(filter);
		Ok(())
	}

	pub fn set_sort_orders(&mut self, sort_orders: Vec<SortOrder>) {
		self.sort_orders = sort_orders;
		self.reset();
	}

	pub fn set_in_memory_sorting(&mut self, comparator: Option<Comparator<T>>) {
		self.in_memory_sorting = comparator;
		self.reset();
	}

	/// Replaces the provider, retiring every key issued so far.
	pub fn set_data_provider(&mut self, provider: Arc<dyn DataProvider<T, F>>, initial_filter: Option<F>) -> FilterSlot {
		debug!("Replacing data provider.");
		self.active.reset();
		self.provider = provider;
		self.filter = initial_filter;
		self.state.provider_generation += 1;
		self.state.last_range = 0..self.config.min_push_size;
		self.state.invalidate();
		FilterSlot {
			provider_generation: self.state.provider_generation,
		}
	}

	/// The filter slot for the current provider.
	#[must_use]
	pub fn filter_slot(&self) -> FilterSlot {
		FilterSlot {
			provider_generation: self.state.provider_generation,
		}
	}
}
impl<T, F, I> Synchronize for DataCommunicator<T, F, I>
where
	T: 'static + Clone,
	F: 'static + Clone + Debug,
	I: Clone + Hash + Eq,
{
	type Plan = FetchPlan<T, F>;
	type Fetched = Fetched<T>;

	fn config(&self) -> &CommunicatorConfig {
		&self.config
	}

	fn plan(&mut self, request: Option<RowRequest>) -> Result<Planned<Self::Plan>, SyncError> {
		match request {
			Some(request) => self.plan_request(request),
			None => Ok(self.plan_flush()),
		}
	}

	fn execute(plan: Self::Plan) -> Result<Self::Fetched, SyncError> {
		plan.execute()
	}

	fn commit(&mut self, fetched: Self::Fetched) -> Result<RoundOutcome, SyncError> {
		self.commit_fetched(fetched)
	}
}
impl<T, F, I> Debug for DataCommunicator<T, F, I>
where
	F: Debug,
{
	fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
		f.debug_struct("DataCommunicator")
			.field("config", &self.config)
			.field("state", &self.state)
			.field("sort_orders", &self.sort_orders)
			.finish_non_exhaustive()
	}
}
