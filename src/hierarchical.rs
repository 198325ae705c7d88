//! Synchronises a tree-shaped data provider with a client's row window.
//!
//! The tree is flattened by a [`HierarchyMapper`] keyed by the rows' [`Key`]s. Rounds follow the same
//! plan/fetch/commit protocol as the flat [`DataCommunicator`](`crate::communicator::DataCommunicator`),
//! but a plan is a list of per-parent [`LevelQuery`]s whose results are put back into flat order on commit.
//!
//! Filter, sort and provider changes collapse the whole tree and reload the top-level row count.
//! A request based on an outdated cache token only resends the window of the current tree.

use crate::{
	active::{ActiveDataHandler, ItemState, Reconciliation},
	communicator::{FilterSlot, RoundOutcome, RoundState, RowRequest},
	config::CommunicatorConfig,
	error::{HierarchyError, SyncError},
	hierarchy::{HierarchyMapper, LevelQuery},
	key_mapper::{Key, KeyMapper},
	provider::{Comparator, Filter, HierarchicalDataProvider, Query, SortOrder},
	shared::{Planned, Synchronize},
	sink::{DataDiff, DataSink, RowData, RowHierarchy},
};
use core::{fmt::Debug, hash::Hash, ops::Range};
use hashbrown::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, trace, trace_span, warn};

enum Shape<T> {
	/// Reload the top level, at most `limit` rows of it.
	Reset { limit: usize },
	/// Fetch `range` of the current tree. With `reset`, the client rebuilds its window from it.
	Rows { range: Range<usize>, reset: bool, levels: Vec<(LevelQuery<Key>, Option<T>)> },
}

/// Everything a hierarchical fetch needs, detached from the communicator.
pub struct LevelFetchPlan<T, F> {
	version: u64,
	generation: u64,
	request_id: Option<u64>,
	shape: Shape<T>,
	provider: Arc<dyn HierarchicalDataProvider<T, F>>,
	filter: Option<F>,
	sort_orders: Vec<SortOrder>,
	in_memory_sorting: Option<Comparator<T>>,
}
impl<T, F> LevelFetchPlan<T, F> {
	#[must_use]
	pub fn is_reset(&self) -> bool {
		matches!(self.shape, Shape::Reset { .. } | Shape::Rows { reset: true, .. })
	}

	/// Runs the level queries (or the top-level reload).
	///
	/// # Errors
	///
	/// [`SyncError::Fetch`] if the provider fails and [`SyncError::IncompleteRows`] if it returns fewer children
	/// than it reported when the rows were expanded.
	pub fn execute(self) -> Result<LevelFetched<T>, SyncError> {
		let Self {
			version,
			generation,
			request_id,
			shape,
			provider,
			filter,
			sort_orders,
			in_memory_sorting,
		} = self;

		let rows = match shape {
			Shape::Reset { limit } => {
				let span = trace_span!("fetch_top_level", limit);
				let _enter = span.enter();

				let root_size = provider.child_count(&Query::all(filter.as_ref(), None)).map_err(SyncError::Fetch)?;
				let limit = limit.min(root_size);
				let items = if limit == 0 {
					Vec::new()
				} else {
					let mut items = provider
						.fetch_children(&Query {
							offset: 0,
							limit,
							sort_orders: &sort_orders,
							in_memory_sorting: in_memory_sorting.as_ref(),
							filter: filter.as_ref(),
							parent: None,
						})
						.map_err(SyncError::Fetch)?;
					items.truncate(limit);
					items
				};
				FetchedRows::Reset { root_size, items }
			}
			Shape::Rows { range, reset, levels } => {
				let span = trace_span!("fetch_levels", ?range, levels = levels.len());
				let _enter = span.enter();

				let expected: usize = levels.iter().map(|(level, _)| level.size).sum();
				let mut actual = 0;
				let mut fetched = Vec::with_capacity(levels.len());
				for (level, parent) in levels {
					let mut children = provider
						.fetch_children(&Query {
							offset: level.first_child,
							limit: level.size,
							sort_orders: &sort_orders,
							in_memory_sorting: in_memory_sorting.as_ref(),
							filter: filter.as_ref(),
							parent: parent.as_ref(),
						})
						.map_err(SyncError::Fetch)?;
					if children.len() > level.size {
						warn!(expected = level.size, actual = children.len(), "Provider returned more children than requested. Ignoring the excess.");
						children.truncate(level.size);
					}
					actual += children.len();
					fetched.push((level, children));
				}
				if actual != expected {
					return Err(SyncError::IncompleteRows {
						first_row: range.start,
						end_row: range.end,
						expected,
						actual,
					});
				}
				FetchedRows::Rows { range, reset, levels: fetched }
			}
		};

		Ok(LevelFetched {
			version,
			generation,
			request_id,
			rows,
		})
	}
}

enum FetchedRows<T> {
	Reset { root_size: usize, items: Vec<T> },
	Rows { range: Range<usize>, reset: bool, levels: Vec<(LevelQuery<Key>, Vec<T>)> },
}

/// Result of a [`LevelFetchPlan`], to be committed.
pub struct LevelFetched<T> {
	version: u64,
	generation: u64,
	request_id: Option<u64>,
	rows: FetchedRows<T>,
}

/// Keeps one client's window of a [`HierarchicalDataProvider`] in sync, including which rows are expanded.
pub struct HierarchicalDataCommunicator<T, F, I = T> {
	config: CommunicatorConfig,
	provider: Arc<dyn HierarchicalDataProvider<T, F>>,
	filter: Option<F>,
	sort_orders: Vec<SortOrder>,
	in_memory_sorting: Option<Comparator<T>>,
	active: ActiveDataHandler<T, I>,
	mapper: HierarchyMapper<Key>,
	pending_expand: HashSet<Key>,
	collapse_allowed: Option<Filter<T>>,
	sink: Box<dyn DataSink<T>>,
	state: RoundState,
}
impl<T, F> HierarchicalDataCommunicator<T, F, T>
where
	T: 'static + Clone + Hash + Eq,
	F: 'static + Clone + Debug,
{
	/// A communicator with structural item identity and default configuration.
	pub fn new(provider: Arc<dyn HierarchicalDataProvider<T, F>>, sink: impl 'static + DataSink<T>) -> Self {
		Self::with_key_mapper(CommunicatorConfig::default(), provider, KeyMapper::new(), sink)
	}
}
impl<T, F, I> HierarchicalDataCommunicator<T, F, I>
where
	T: 'static + Clone,
	F: 'static + Clone + Debug,
	I: Clone + Hash + Eq,
{
	pub fn with_key_mapper(config: CommunicatorConfig, provider: Arc<dyn HierarchicalDataProvider<T, F>>, key_mapper: KeyMapper<T, I>, sink: impl 'static + DataSink<T>) -> Self {
		Self {
			state: RoundState::new(0..config.initial_fetch_size),
			config,
			provider,
			filter: None,
			sort_orders: Vec::new(),
			in_memory_sorting: None,
			active: ActiveDataHandler::new(key_mapper),
			mapper: HierarchyMapper::new(),
			pending_expand: HashSet::new(),
			collapse_allowed: None,
			sink: Box::new(sink),
		}
	}

	#[must_use]
	pub fn config(&self) -> &CommunicatorConfig {
		&self.config
	}

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
	pub fn hierarchy(&self) -> &HierarchyMapper<Key> {
		&self.mapper
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

	#[must_use]
	pub fn state_of(&self, key: &Key) -> ItemState {
		self.active.state_of(key)
	}

	#[must_use]
	pub fn is_expanded(&self, item: &T) -> bool {
		self.active.key_mapper().key_of(item).map_or(false, |key| self.mapper.is_expanded(&key))
	}

	#[must_use]
	pub fn is_pending_expand(&self, key: &Key) -> bool {
		self.pending_expand.contains(key)
	}

	/// Answers a client's row request with one diff.
	///
	/// # Errors
	///
	/// [`SyncError::TooManyRows`] for oversized requests, [`SyncError::Fetch`] and [`SyncError::IncompleteRows`]
	/// for provider failures. None of them change the active window or the tree.
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

	/// Pushes pending server-side changes: a reset of the tree if one is pending, otherwise refreshed rows.
	///
	/// # Errors
	///
	/// As for [`request_rows`](`HierarchicalDataCommunicator::request_rows`).
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

	/// Collapses the tree and pushes the first [`initial_fetch_size`](`CommunicatorConfig::initial_fetch_size`)
	/// top-level rows.
	///
	/// # Errors
	///
	/// [`SyncError::Fetch`] if the provider fails.
	pub fn push_initial(&mut self) -> Result<RoundOutcome, SyncError> {
		self.state.reset_pending = true;
		self.flush()
	}

	fn plan_request(&mut self, request: RowRequest) -> Result<Planned<LevelFetchPlan<T, F>>, SyncError> {
		Ok(match self.state.resolve(&request, &self.config)? {
			None => Planned::Done(RoundOutcome::Superseded),
			// Only filter, sort and provider changes collapse the tree.
			Some(_) if self.state.reset_pending => Planned::Fetch(self.reset_plan(Some(request.request_id))),
			Some((range, reset)) => Planned::Fetch(self.rows_plan(range, reset, Some(request.request_id))),
		})
	}

	fn plan_flush(&mut self) -> Planned<LevelFetchPlan<T, F>> {
		if self.state.reset_pending {
			Planned::Fetch(self.reset_plan(None))
		} else {
			Planned::Done(self.push_refreshed())
		}
	}

	fn level_plan(&self, shape: Shape<T>, request_id: Option<u64>) -> LevelFetchPlan<T, F> {
		#[cfg(feature = "dangerous-logging")]
		trace!(filter = ?self.filter, "Planning fetch.");
		#[cfg(not(feature = "dangerous-logging"))]
		trace!(filtered = self.filter.is_some(), "Planning fetch.");

		LevelFetchPlan {
			version: self.state.version,
			generation: self.state.generation,
			request_id,
			shape,
			provider: Arc::clone(&self.provider),
			filter: self.filter.clone(),
			sort_orders: self.sort_orders.clone(),
			in_memory_sorting: self.in_memory_sorting.clone(),
		}
	}

	fn reset_plan(&self, request_id: Option<u64>) -> LevelFetchPlan<T, F> {
		self.level_plan(Shape::Reset { limit: self.config.initial_fetch_size }, request_id)
	}

	fn rows_plan(&mut self, range: Range<usize>, reset: bool, request_id: Option<u64>) -> LevelFetchPlan<T, F> {
		let span = trace_span!("plan_levels", ?range, reset);
		let _enter = span.enter();

		let mut levels = Vec::new();
		for level in self.mapper.split_range_to_level_queries(range.clone()) {
			let parent = match &level.parent_key {
				None => None,
				Some(key) => match self.active.key_mapper().get(key) {
					Some(item) => Some(item.clone()),
					None => {
						error!(%key, "An expanded row's item is no longer registered. Resetting.");
						self.state.invalidate();
						return self.reset_plan(request_id);
					}
				},
			};
			levels.push((level, parent));
		}

		let tree_size = self.mapper.tree_size();
		let range = range.start.min(tree_size)..range.end.min(tree_size);
		self.level_plan(Shape::Rows { range, reset, levels }, request_id)
	}

	fn commit_fetched(&mut self, fetched: LevelFetched<T>) -> Result<RoundOutcome, SyncError> {
		let LevelFetched {
			version,
			generation,
			request_id,
			rows,
		} = fetched;
		if !self.state.is_current(version, generation) {
			return Ok(RoundOutcome::Stale);
		}
		if self.state.is_superseded(request_id) {
			return Ok(RoundOutcome::Superseded);
		}

		match rows {
			FetchedRows::Reset { root_size, items } => {
				self.commit_reset(version, request_id, root_size, items);
				Ok(RoundOutcome::Applied)
			}
			FetchedRows::Rows { range, reset, levels } => {
				self.commit_rows(version, request_id, range, reset, levels)?;
				Ok(RoundOutcome::Applied)
			}
		}
	}

	fn commit_reset(&mut self, version: u64, request_id: Option<u64>, root_size: usize, items: Vec<T>) {
		let previously_expanded: Vec<Key> = self.mapper.expanded_keys().cloned().collect();
		self.mapper.reset(root_size);
		// Any generation of level queries planned against the old tree is now meaningless.
		self.state.generation += 1;

		let count = items.len();
		let reconciliation = self.active.set_active(items, true);
		for key in &previously_expanded {
			self.active.release_if_confirmed(key);
		}
		debug!(root_size, collapsed = previously_expanded.len(), "Reset tree.");

		self.state.applied(0..count, root_size, request_id, true);
		self.push(version, request_id, true, 0, reconciliation, |_| 0);
	}

	fn commit_rows(&mut self, version: u64, request_id: Option<u64>, range: Range<usize>, reset: bool, levels: Vec<(LevelQuery<Key>, Vec<T>)>) -> Result<(), SyncError> {
		let mut slots: Vec<Option<(T, usize)>> = range.clone().map(|_| None).collect();
		for (level, children) in levels {
			let depth = level.depth;
			self.mapper.reorder_level_query_results(&level, children, |flat_index, item| {
				if let Some(slot) = flat_index.checked_sub(range.start).and_then(|offset| slots.get_mut(offset)) {
					*slot = Some((item, depth));
				}
			});
		}

		let filled = slots.iter().filter(|slot| slot.is_some()).count();
		if filled != slots.len() {
			return Err(SyncError::IncompleteRows {
				first_row: range.start,
				end_row: range.end,
				expected: slots.len(),
				actual: filled,
			});
		}
		let (items, depths): (Vec<T>, Vec<usize>) = slots.into_iter().flatten().unzip();

		let reconciliation = self.active.set_active(items, reset);
		let depth_of: HashMap<Key, usize> = reconciliation.rows.iter().cloned().zip(depths).collect();
		self.state.applied(range.clone(), self.mapper.tree_size(), request_id, reset);
		self.push(version, request_id, reset, range.start, reconciliation, |key| depth_of.get(key).copied().unwrap_or_default());
		Ok(())
	}

	fn push(&mut self, version: u64, request_id: Option<u64>, reset: bool, first_row: usize, reconciliation: Reconciliation<T>, depth_of: impl Fn(&Key) -> usize) {
		let Reconciliation {
			rows,
			generated,
			refreshed,
			dropped,
		} = reconciliation;
		let generated_rows = generated
			.into_iter()
			.map(|(key, item)| {
				let depth = depth_of(&key);
				self.row_data(key, item, depth)
			})
			.collect();
		let refreshed_rows = refreshed
			.into_iter()
			.map(|(key, item)| {
				let depth = depth_of(&key);
				self.row_data(key, item, depth)
			})
			.collect();
		let diff = DataDiff {
			version,
			request_id,
			reset,
			total_size: self.mapper.tree_size(),
			first_row,
			rows,
			generated_rows,
			refreshed_rows,
			dropped_keys: dropped,
		};
		self.sink.apply_diff(diff);
		info!("Expanded rows (pinned/pending): {}/{}", self.mapper.expanded_count(), self.pending_expand.len());
	}

	fn row_data(&self, key: Key, item: T, depth: usize) -> RowData<T> {
		let hierarchy = RowHierarchy {
			depth,
			leaf: !self.provider.has_children(&item),
			collapsed: !self.mapper.is_expanded(&key),
			collapse_allowed: self.collapse_allowed.as_ref().map_or(true, |allowed| allowed.test(&item)),
			expand_pending: self.pending_expand.contains(&key),
		};
		RowData {
			key,
			item,
			hierarchy: Some(hierarchy),
		}
	}

	/// Pushes a refresh-only diff for the dirty items in the window, if there are any.
	pub fn push_refreshed(&mut self) -> RoundOutcome {
		let refreshed = self.active.take_refreshed();
		if refreshed.is_empty() {
			return RoundOutcome::Idle;
		}
		debug!(count = refreshed.len(), "Pushing refreshed rows.");

		let first_row = self.state.last_range.start;
		let depth_of: HashMap<Key, usize> = self
			.active
			.active_keys()
			.iter()
			.enumerate()
			.map(|(offset, key)| (key.clone(), self.mapper.depth_of(first_row + offset).unwrap_or_default()))
			.collect();
		let rows = self.active.active_keys().to_vec();
		self.push(
			self.state.version,
			None,
			false,
			first_row,
			Reconciliation {
				rows,
				generated: Vec::new(),
				refreshed,
				dropped: Vec::new(),
			},
			|key| depth_of.get(key).copied().unwrap_or_default(),
		);
		RoundOutcome::Applied
	}

	/// Re-fetches `window` after the tree changed shape. Rows that vanished from it are dropped.
	fn resync(&mut self, window: Range<usize>) -> Result<(), SyncError> {
		let window = window.start..window.end.min(window.start.saturating_add(self.config.max_rows));
		let plan = self.rows_plan(window, false, None);
		let fetched = plan.execute()?;
		self.commit_fetched(fetched).map(|_| ())
	}

	/// Rejects `row` if the client's window shows a different row there.
	fn check_row_key(&self, key: &Key, row: usize) -> Result<(), SyncError> {
		let window = &self.state.last_range;
		let shown = row.checked_sub(window.start).and_then(|offset| self.active.active_keys().get(offset));
		match shown {
			Some(shown) if shown != key => {
				debug!(%key, %shown, row, "Key isn't at the given row.");
				Err(HierarchyError::RowMismatch { index: row }.into())
			}
			_ => Ok(()),
		}
	}

	fn check_row(&self, row: usize) -> Result<(), SyncError> {
		let tree_size = self.mapper.tree_size();
		if row < tree_size {
			Ok(())
		} else {
			Err(HierarchyError::IndexOutOfBounds { index: row, tree_size }.into())
		}
	}

	/// Expands the row with `key` at flat index `row`, pushing the inserted rows that fall into the window.
	///
	/// Returns `false` if `key` is unknown, already expanded or has no children.
	///
	/// # Errors
	///
	/// [`SyncError::Hierarchy`] if `row` is outside the tree or the window shows another row there,
	/// [`SyncError::Fetch`] if the provider fails.
	/// If only refilling the window fails, the row stays expanded and the next request picks up the new rows.
	#[instrument(skip(self))]
	pub fn expand(&mut self, key: &Key, row: usize) -> Result<bool, SyncError> {
		self.check_row(row)?;
		let item = match self.active.key_mapper().get(key) {
			Some(item) => item.clone(),
			None => {
				debug!(%key, "Unknown key. Not expanding.");
				return Ok(false);
			}
		};
		if self.mapper.is_expanded(key) {
			return Ok(false);
		}
		self.check_row_key(key, row)?;

		let child_count = self.provider.child_count(&Query::all(self.filter.as_ref(), Some(&item))).map_err(SyncError::Fetch)?;
		if child_count == 0 {
			debug!(%key, "No children. Not expanding.");
			return Ok(false);
		}

		let inserted = self.mapper.expand(key.clone(), row, child_count)?;
		self.state.generation += 1;
		self.pending_expand.remove(key);
		self.sink.insert_rows(row + 1, inserted);
		self.active.mark_dirty(&item);

		let window = self.state.last_range.clone();
		let start = if window.start > row { window.start + inserted } else { window.start };
		let end = if window.end > row { window.end + inserted } else { window.end };
		self.resync(start..end)?;
		Ok(true)
	}

	/// Collapses the row with `key` at flat index `row` and everything below it.
	///
	/// Returns `false` if `key` is unknown or not expanded.
	///
	/// # Errors
	///
	/// [`SyncError::Hierarchy`] if `row` is outside the tree or `key`'s row isn't at `row`,
	/// [`SyncError::Fetch`] if refilling the window fails.
	#[instrument(skip(self))]
	pub fn collapse(&mut self, key: &Key, row: usize) -> Result<bool, SyncError> {
		self.check_row(row)?;
		let item = match self.active.key_mapper().get(key) {
			Some(item) => item.clone(),
			None => return Ok(false),
		};
		if !self.mapper.is_expanded(key) {
			return Ok(false);
		}

		let expanded_before: Vec<Key> = self.mapper.expanded_keys().cloned().collect();
		let removed = self.mapper.collapse(key, row)?;
		self.state.generation += 1;
		self.sink.remove_rows(row + 1, removed);
		for unpinned in expanded_before.iter().filter(|key| !self.mapper.is_expanded(key)) {
			if !self.pending_expand.contains(unpinned) {
				self.active.release_if_confirmed(unpinned);
			}
		}
		self.active.mark_dirty(&item);

		let first_removed = row + 1;
		let shift = |index: usize| {
			if index <= first_removed {
				index
			} else if index < first_removed + removed {
				first_removed
			} else {
				index - removed
			}
		};
		let window = self.state.last_range.clone();
		self.resync(shift(window.start)..shift(window.end))?;
		Ok(true)
	}

	/// Reserves a key for `item` that stays valid until the item is expanded or [`collapse_item`](`HierarchicalDataCommunicator::collapse_item`)d.
	///
	/// Returns [`None`] if the item is already expanded or has no children.
	pub fn set_pending_expand(&mut self, item: &T) -> Option<Key> {
		if let Some(key) = self.active.key_mapper().key_of(item) {
			if self.mapper.is_expanded(&key) {
				return None;
			}
		}
		if !self.provider.has_children(item) {
			return None;
		}
		let key = self.active.key(item);
		trace!(%key, "Pending expansion.");
		self.pending_expand.insert(key.clone());
		self.active.mark_dirty(item);
		Some(key)
	}

	/// Collapses `item` if it is expanded, or cancels its pending expansion.
	///
	/// Returns the item's key, or [`None`] if it was neither.
	///
	/// # Errors
	///
	/// As for [`collapse`](`HierarchicalDataCommunicator::collapse`).
	pub fn collapse_item(&mut self, item: &T) -> Result<Option<Key>, SyncError> {
		let key = match self.active.key_mapper().key_of(item) {
			Some(key) => key,
			None => return Ok(None),
		};
		if let Some(node) = self.mapper.node_for_key(Some(&key)) {
			let row = node.start_index() - 1;
			self.pending_expand.remove(&key);
			self.collapse(&key, row)?;
			return Ok(Some(key));
		}
		if self.pending_expand.remove(&key) {
			self.active.mark_dirty(item);
			self.active.release_if_confirmed(&key);
			return Ok(Some(key));
		}
		Ok(None)
	}

	/// Flat index of the row `row` is nested in, or [`None`] for top-level rows.
	///
	/// # Errors
	///
	/// [`HierarchyError::IndexOutOfBounds`] if `row` is outside the tree.
	pub fn parent_index(&self, row: usize) -> Result<Option<usize>, HierarchyError> {
		self.mapper.parent_index(row)
	}

	/// Sets which items the user may collapse. Every row in the window is refreshed.
	pub fn set_item_collapse_allowed(&mut self, allowed: Option<Filter<T>>) {
		self.collapse_allowed = allowed;
		let items: Vec<T> = self.active.active_data().map(|(_, item)| item.clone()).collect();
		for item in &items {
			self.active.mark_dirty(item);
		}
	}

	/// Confirms that the client forgot these rows.
	///
	/// Keys of expanded rows and rows pending expansion are kept until they are collapsed.
	#[instrument(skip(self, keys))]
	pub fn confirm_drop(&mut self, keys: impl IntoIterator<Item = Key>) -> Vec<Key> {
		let mapper = &self.mapper;
		let pending_expand = &self.pending_expand;
		self.active.confirm_drop_unless(keys, |key| mapper.is_expanded(key) || pending_expand.contains(key))
	}

	/// Stores the new value of `item` and schedules it to be refreshed on the client.
	pub fn refresh(&mut self, item: &T) -> bool {
		self.active.mark_dirty(item)
	}

	/// Collapses and reloads the tree during the next round.
	pub fn reset(&mut self) {
		self.state.invalidate();
	}

	pub fn set_filter(&mut self, filter: Option<F>) {
		self.filter = filter;
		self.reset();
	}

	/// # Errors
	///
	/// [`SyncError::ProviderSwapped`] if the provider was replaced since `slot` was handed out.
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

	/// Replaces the provider, collapsing the tree and retiring every key issued so far.
	pub fn set_data_provider(&mut self, provider: Arc<dyn HierarchicalDataProvider<T, F>>, initial_filter: Option<F>) -> FilterSlot {
		debug!("Replacing data provider.");
		self.active.reset();
		self.mapper.reset(0);
		self.pending_expand.clear();
		self.provider = provider;
		self.filter = initial_filter;
		self.state.provider_generation += 1;
		self.state.generation += 1;
		self.state.last_range = 0..self.config.initial_fetch_size;
		self.state.invalidate();
		self.filter_slot()
	}

	#[must_use]
	pub fn filter_slot(&self) -> FilterSlot {
		FilterSlot {
			provider_generation: self.state.provider_generation,
		}
	}
}
impl<T, F, I> Synchronize for HierarchicalDataCommunicator<T, F, I>
where
	T: 'static + Clone,
	F: 'static + Clone + Debug,
	I: Clone + Hash + Eq,
{
	type Plan = LevelFetchPlan<T, F>;
	type Fetched = LevelFetched<T>;

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
impl<T, F, I> Debug for HierarchicalDataCommunicator<T, F, I> {
	fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
		f.debug_struct("HierarchicalDataCommunicator")
			.field("config", &self.config)
			.field("state", &self.state)
			.field("mapper", &self.mapper)
			.field("pending_expand", &self.pending_expand)
			.finish_non_exhaustive()
	}
}
