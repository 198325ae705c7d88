//! Translation between a tree of expanded nodes and a single flat row index space.
//!
//! The mapper owns no backend data. It only knows, for each expanded row, which flat indices its visible
//! descendants occupy. Expanding or collapsing a row shifts every later range and resizes every ancestor.
//!
//! ```
//! use row_window::hierarchy::HierarchyMapper;
//!
//! let mut mapper = HierarchyMapper::new();
//! mapper.reset(3);
//! mapper.expand("1", 1, 3).unwrap();
//! assert_eq!(mapper.tree_size(), 6);
//! assert_eq!(mapper.node_for_key(Some(&"1")).unwrap().range(), 2..5);
//! ```

use crate::error::HierarchyError;
use core::{
	fmt::Debug,
	hash::Hash,
	ops::{Bound, Range},
};
use hashbrown::HashMap;
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{debug, instrument, trace};

/// The visible descendants of one expanded row, or of the synthetic root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeNode<K> {
	key: Option<K>,
	parent_key: Option<K>,
	start_index: usize,
	size: usize,
	child_count: usize,
}
impl<K> TreeNode<K> {
	/// The expanded row's key, or [`None`] for the root.
	pub fn key(&self) -> Option<&K> {
		self.key.as_ref()
	}

	/// The key of the node this node's row belongs to, or [`None`] for top-level rows (and the root).
	pub fn parent_key(&self) -> Option<&K> {
		self.parent_key.as_ref()
	}

	/// Flat index of the first descendant row.
	#[must_use]
	pub fn start_index(&self) -> usize {
		self.start_index
	}

	/// Inclusive flat index of the last descendant row.
	///
	/// Only the root can be empty, in which case this is `0`.
	#[must_use]
	pub fn end_index(&self) -> usize {
		(self.start_index + self.size).saturating_sub(1)
	}

	/// Number of visible descendant rows, including those of expanded descendants.
	#[must_use]
	pub fn size(&self) -> usize {
		self.size
	}

	/// Number of direct children recorded when this node was expanded.
	#[must_use]
	pub fn child_count(&self) -> usize {
		self.child_count
	}

	#[must_use]
	pub fn range(&self) -> Range<usize> {
		self.start_index..self.start_index + self.size
	}

	#[must_use]
	pub fn contains(&self, flat_index: usize) -> bool {
		self.range().contains(&flat_index)
	}
}

/// Rows that belong directly to one node and lie within a requested flat range.
///
/// `first_child..first_child + size` is the range to request from the data provider for `parent_key`'s children.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelQuery<K> {
	pub parent_key: Option<K>,
	pub first_child: usize,
	pub size: usize,
	/// Depth of the queried rows. Top-level rows are at depth `0`.
	pub depth: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("hierarchy invariant violated: {0}")]
pub struct InvariantViolation(pub String);

/// Expanded nodes, ordered by start index, plus the implicit root.
#[derive(Debug, Clone)]
pub struct HierarchyMapper<K> {
	root: TreeNode<K>,
	nodes: BTreeMap<usize, TreeNode<K>>,
	starts: HashMap<K, usize>,
}
impl<K> Default for HierarchyMapper<K>
where
	K: Clone + Hash + Eq + Debug,
{
	fn default() -> Self {
		Self::new()
	}
}
impl<K> HierarchyMapper<K>
where
	K: Clone + Hash + Eq + Debug,
{
	/// An empty tree.
	#[must_use]
	pub fn new() -> Self {
		Self {
			root: TreeNode {
				key: None,
				parent_key: None,
				start_index: 0,
				size: 0,
				child_count: 0,
			},
			nodes: BTreeMap::new(),
			starts: HashMap::new(),
		}
	}

	/// Collapses everything and sets the number of top-level rows.
	#[instrument(skip(self))]
	pub fn reset(&mut self, root_child_count: usize) {
		self.nodes.clear();
		self.starts.clear();
		self.root.size = root_child_count;
		self.root.child_count = root_child_count;
	}

	#[must_use]
	pub fn tree_size(&self) -> usize {
		self.root.size
	}

	#[must_use]
	pub fn root(&self) -> &TreeNode<K> {
		&self.root
	}

	/// The node of an expanded row, the root for [`None`], or [`None`] if `key` isn't expanded.
	pub fn node_for_key(&self, key: Option<&K>) -> Option<&TreeNode<K>> {
		match key {
			None => Some(&self.root),
			Some(key) => self.starts.get(key).and_then(|start| self.nodes.get(start)),
		}
	}

	#[must_use]
	pub fn is_expanded(&self, key: &K) -> bool {
		self.starts.contains_key(key)
	}

	#[must_use]
	pub fn is_collapsed(&self, key: &K) -> bool {
		!self.is_expanded(key)
	}

	/// Number of expanded nodes, excluding the root.
	#[must_use]
	pub fn expanded_count(&self) -> usize {
		self.nodes.len()
	}

	pub fn expanded_keys(&self) -> impl '_ + Iterator<Item = &K> {
		self.nodes.values().filter_map(TreeNode::key)
	}

	/// Expands the row with `key` at `flat_index` to show `child_count` children directly below it.
	///
	/// Returns the number of inserted rows.
	///
	/// # Errors
	///
	/// Fails without changes if `child_count` is `0`, if `flat_index` is not in the tree,
	/// or if `key` or the row at `flat_index` is already expanded.
	#[instrument(skip(self))]
	pub fn expand(&mut self, key: K, flat_index: usize, child_count: usize) -> Result<usize, HierarchyError> {
		if child_count == 0 {
			return Err(HierarchyError::EmptyExpansion { index: flat_index });
		}
		self.check_bounds(flat_index)?;
		let start_index = flat_index + 1;
		if self.starts.contains_key(&key) || self.nodes.contains_key(&start_index) {
			return Err(HierarchyError::AlreadyExpanded { index: flat_index });
		}

		let parent_key = self.innermost_containing(flat_index).and_then(|parent| parent.key.clone());

		// Everything starting after the expanded row moves down.
		let later = self.nodes.split_off(&start_index);
		for (start, mut node) in later {
			node.start_index = start + child_count;
			if let Some(key) = &node.key {
				self.starts.insert(key.clone(), node.start_index);
			}
			self.nodes.insert(node.start_index, node);
		}

		self.resize_ancestors(parent_key.as_ref(), |size| size + child_count);

		trace!(start_index, "Inserting node.");
		self.starts.insert(key.clone(), start_index);
		self.nodes.insert(
			start_index,
			TreeNode {
				key: Some(key),
				parent_key,
				start_index,
				size: child_count,
				child_count,
			},
		);
		debug!(tree_size = self.root.size, "Expanded.");
		Ok(child_count)
	}

	/// Collapses the expanded row with `key` at `flat_index`, removing its node and every descendant node.
	///
	/// Returns the number of removed rows, which is `0` if `key` wasn't expanded.
	///
	/// # Errors
	///
	/// Fails without changes if `flat_index` is not in the tree or isn't where `key`'s row is.
	#[instrument(skip(self))]
	pub fn collapse(&mut self, key: &K, flat_index: usize) -> Result<usize, HierarchyError> {
		self.check_bounds(flat_index)?;
		let start_index = match self.starts.get(key) {
			Some(&start_index) => start_index,
			None => {
				trace!("Not expanded. Nothing to collapse.");
				return Ok(0);
			}
		};
		if start_index != flat_index + 1 {
			return Err(HierarchyError::IndexMismatch { index: flat_index, start_index });
		}

		let (removed, parent_key) = match self.nodes.get(&start_index) {
			Some(node) => (node.size, node.parent_key.clone()),
			None => {
				return Err(HierarchyError::IndexMismatch { index: flat_index, start_index });
			}
		};
		let end = start_index + removed;

		let mut subtree = self.nodes.split_off(&start_index);
		let later = subtree.split_off(&end);
		for node in subtree.values() {
			if let Some(key) = &node.key {
				trace!(?key, "Dropping node.");
				self.starts.remove(key);
			}
		}
		for (start, mut node) in later {
			node.start_index = start - removed;
			if let Some(key) = &node.key {
				self.starts.insert(key.clone(), node.start_index);
			}
			self.nodes.insert(node.start_index, node);
		}

		self.resize_ancestors(parent_key.as_ref(), |size| size - removed);
		debug!(removed, tree_size = self.root.size, "Collapsed.");
		Ok(removed)
	}

	fn check_bounds(&self, flat_index: usize) -> Result<(), HierarchyError> {
		if flat_index < self.root.size {
			Ok(())
		} else {
			Err(HierarchyError::IndexOutOfBounds {
				index: flat_index,
				tree_size: self.root.size,
			})
		}
	}

	/// Walks from `key`'s node up to the root, resizing each.
	fn resize_ancestors(&mut self, key: Option<&K>, resize: impl Fn(usize) -> usize) {
		let mut key = key.cloned();
		while let Some(current) = key {
			let node = match self.starts.get(&current).and_then(|start| self.nodes.get_mut(start)) {
				Some(node) => node,
				None => break,
			};
			node.size = resize(node.size);
			key = node.parent_key.clone();
		}
		self.root.size = resize(self.root.size);
	}

	/// The deepest expanded node whose range contains `flat_index`, if any.
	fn innermost_containing(&self, flat_index: usize) -> Option<&TreeNode<K>> {
		// Containing ranges are nested, so the one starting last is the deepest.
		self.nodes.range(..=flat_index).rev().map(|(_, node)| node).find(|node| node.contains(flat_index))
	}

	fn node_depth(&self, node: &TreeNode<K>) -> usize {
		let mut depth = 0;
		let mut key = node.key.as_ref();
		while let Some(node) = key.and_then(|key| self.node_for_key(Some(key))) {
			depth += 1;
			key = node.parent_key.as_ref();
		}
		depth
	}

	/// Flat index of the row whose node contains `flat_index`, or [`None`] for top-level rows.
	///
	/// # Errors
	///
	/// Fails if `flat_index` is not in the tree.
	pub fn parent_index(&self, flat_index: usize) -> Result<Option<usize>, HierarchyError> {
		self.check_bounds(flat_index)?;
		Ok(self.innermost_containing(flat_index).map(|node| node.start_index - 1))
	}

	/// Depth of the row at `flat_index`. Top-level rows are at depth `0`.
	///
	/// # Errors
	///
	/// Fails if `flat_index` is not in the tree.
	pub fn depth_of(&self, flat_index: usize) -> Result<usize, HierarchyError> {
		self.check_bounds(flat_index)?;
		Ok(self.innermost_containing(flat_index).map_or(0, |node| self.node_depth(node)))
	}

	/// Flat ranges of the rows that belong directly to `node`, skipping the subtrees of its expanded children.
	fn owned_segments(&self, node: &TreeNode<K>) -> Vec<Range<usize>> {
		let range = node.range();
		let mut segments = Vec::new();
		let mut cursor = range.start;
		for child in self.nodes.range((Bound::Excluded(range.start), Bound::Excluded(range.end))).map(|(_, child)| child) {
			if child.start_index < cursor {
				// Nested below a child that was already skipped.
				continue;
			}
			// The child's own row (at `start_index - 1`) belongs to `node`.
			segments.push(cursor..child.start_index);
			cursor = child.start_index + child.size;
		}
		segments.push(cursor..range.end);
		segments.retain(|segment| !segment.is_empty());
		segments
	}

	/// Splits a flat row range into per-parent child ranges, in flat order of the parents' nodes.
	///
	/// The range is clipped to the tree. Fetching each query's children and placing them with
	/// [`reorder_level_query_results`](`HierarchyMapper::reorder_level_query_results`) yields exactly the rows in `range`.
	#[instrument(skip(self))]
	pub fn split_range_to_level_queries(&self, range: Range<usize>) -> Vec<LevelQuery<K>> {
		let range = range.start..range.end.min(self.root.size);
		if range.is_empty() {
			return Vec::new();
		}

		let intersecting = self
			.nodes
			.range(..range.end)
			.map(|(_, node)| node)
			.filter(|node| node.range().end > range.start);

		let mut queries = Vec::new();
		for node in Some(&self.root).into_iter().chain(intersecting) {
			let mut level = 0;
			let mut first_child = None;
			let mut size = 0;
			for segment in self.owned_segments(node) {
				let lo = segment.start.max(range.start);
				let hi = segment.end.min(range.end);
				if lo < hi {
					first_child.get_or_insert(level + (lo - segment.start));
					size += hi - lo;
				}
				level += segment.len();
			}

			if let Some(first_child) = first_child {
				queries.push(LevelQuery {
					parent_key: node.key.clone(),
					first_child,
					size,
					depth: self.node_depth(node),
				});
			}
		}
		trace!(count = queries.len(), "Split into level queries.");
		queries
	}

	/// Hands each of `results` to `place` along with its flat index.
	///
	/// Returns how many results were placed, which is less than `query.size` if `results` is short
	/// and never more. Returns `0` if the query's node no longer exists.
	pub fn reorder_level_query_results<V>(&self, query: &LevelQuery<K>, results: impl IntoIterator<Item = V>, mut place: impl FnMut(usize, V)) -> usize {
		let node = match self.node_for_key(query.parent_key.as_ref()) {
			Some(node) => node,
			None => return 0,
		};

		let mut positions = self
			.owned_segments(node)
			.into_iter()
			.flatten()
			.skip(query.first_child)
			.take(query.size);
		let mut placed = 0;
		for result in results {
			match positions.next() {
				Some(flat_index) => {
					place(flat_index, result);
					placed += 1;
				}
				None => break,
			}
		}
		placed
	}

	/// Checks every structural invariant. Meant for tests; this walks the whole structure.
	///
	/// # Errors
	///
	/// Describes the first violated invariant.
	pub fn validate(&self) -> Result<(), InvariantViolation> {
		macro_rules! ensure {
			($condition:expr, $($message:tt)+) => {
				if !$condition {
					return Err(InvariantViolation(format!($($message)+)));
				}
			};
		}

		ensure!(self.root.start_index == 0, "root starts at {}", self.root.start_index);
		ensure!(self.starts.len() == self.nodes.len(), "{} keys indexed for {} nodes", self.starts.len(), self.nodes.len());

		let mut total_children = self.root.child_count;
		let mut direct_sizes = HashMap::<Option<K>, usize>::new();
		let mut last_sibling_end = HashMap::<Option<K>, usize>::new();
		for (&start, node) in &self.nodes {
			ensure!(node.start_index == start, "node {:?} is stored at {} but starts at {}", node.key, start, node.start_index);
			ensure!(node.size >= node.child_count && node.child_count > 0, "node {:?} has size {} for {} children", node.key, node.size, node.child_count);
			let key = match &node.key {
				Some(key) => key,
				None => return Err(InvariantViolation("non-root node without key".to_owned())),
			};
			ensure!(self.starts.get(key) == Some(&start), "key {:?} indexed at {:?}, stored at {}", key, self.starts.get(key), start);

			let parent = match self.node_for_key(node.parent_key.as_ref()) {
				Some(parent) => parent,
				None => return Err(InvariantViolation(format!("parent {:?} of {:?} is not expanded", node.parent_key, key))),
			};
			// The row owning this node and all of its descendants lie inside the parent.
			ensure!(
				parent.contains(start - 1) && node.range().end <= parent.range().end,
				"node {:?} {:?} escapes parent {:?} {:?}",
				key,
				node.range(),
				parent.key,
				parent.range()
			);
			let innermost = self.innermost_containing(start - 1).and_then(TreeNode::key);
			ensure!(innermost == node.parent_key.as_ref(), "node {:?} is recorded below {:?} but nested below {:?}", key, node.parent_key, innermost);

			if let Some(&previous_end) = last_sibling_end.get(&node.parent_key) {
				ensure!(start > previous_end, "sibling ranges overlap at {} below {:?}", start, node.parent_key);
			}
			last_sibling_end.insert(node.parent_key.clone(), node.range().end);

			*direct_sizes.entry(node.parent_key.clone()).or_default() += node.size;
			total_children += node.child_count;
		}

		for node in Some(&self.root).into_iter().chain(self.nodes.values()) {
			let nested = direct_sizes.get(&node.key).copied().unwrap_or_default();
			ensure!(node.size == node.child_count + nested, "node {:?} has size {} but {} own and {} nested rows", node.key, node.size, node.child_count, nested);
		}
		ensure!(self.root.size == total_children, "tree size {} doesn't match {} recorded children", self.root.size, total_children);
		Ok(())
	}
}
