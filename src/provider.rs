//! Pull-based item sources the communicators fetch from.
//!
//! Filters and comparators are opaque to the communicators. They are only handed through to providers.

use crate::error::ProviderError;
use core::{
	cmp::Ordering,
	fmt::{self, Debug, Formatter},
	hash::Hash,
};
use hashbrown::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SortDirection {
	Ascending,
	Descending,
}

/// Back end sort instruction, passed through to providers as-is.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SortOrder {
	pub property: String,
	pub direction: SortDirection,
}
impl SortOrder {
	pub fn asc(property: impl Into<String>) -> Self {
		Self {
			property: property.into(),
			direction: SortDirection::Ascending,
		}
	}

	pub fn desc(property: impl Into<String>) -> Self {
		Self {
			property: property.into(),
			direction: SortDirection::Descending,
		}
	}
}

/// In-memory sort order.
pub struct Comparator<T>(Arc<dyn Fn(&T, &T) -> Ordering + Send + Sync>);
impl<T> Comparator<T> {
	pub fn new(compare: impl 'static + Fn(&T, &T) -> Ordering + Send + Sync) -> Self {
		Self(Arc::new(compare))
	}

	pub fn compare(&self, a: &T, b: &T) -> Ordering {
		(self.0)(a, b)
	}
}
impl<T> Clone for Comparator<T> {
	fn clone(&self) -> Self {
		Self(Arc::clone(&self.0))
	}
}
impl<T> Debug for Comparator<T> {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.debug_tuple("Comparator").finish_non_exhaustive()
	}
}

/// Predicate filter understood by the in-memory providers.
pub struct Filter<T>(Arc<dyn Fn(&T) -> bool + Send + Sync>);
impl<T> Filter<T> {
	pub fn new(test: impl 'static + Fn(&T) -> bool + Send + Sync) -> Self {
		Self(Arc::new(test))
	}

	pub fn test(&self, item: &T) -> bool {
		(self.0)(item)
	}
}
impl<T> Clone for Filter<T> {
	fn clone(&self) -> Self {
		Self(Arc::clone(&self.0))
	}
}
impl<T> Debug for Filter<T> {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.debug_tuple("Filter").finish_non_exhaustive()
	}
}

/// One request against a provider.
///
/// `offset` and `limit` are relative to the children of `parent` for hierarchical providers.
#[derive(Debug)]
pub struct Query<'a, T, F> {
	pub offset: usize,
	pub limit: usize,
	pub sort_orders: &'a [SortOrder],
	pub in_memory_sorting: Option<&'a Comparator<T>>,
	pub filter: Option<&'a F>,
	pub parent: Option<&'a T>,
}
impl<'a, T, F> Query<'a, T, F> {
	/// An unbounded query without sorting. Used for size queries.
	pub fn all(filter: Option<&'a F>, parent: Option<&'a T>) -> Self {
		Self {
			offset: 0,
			limit: usize::MAX,
			sort_orders: &[],
			in_memory_sorting: None,
			filter,
			parent,
		}
	}
}
impl<'a, T, F> Clone for Query<'a, T, F> {
	fn clone(&self) -> Self {
		*self
	}
}
impl<'a, T, F> Copy for Query<'a, T, F> {}

/// Flat item source.
pub trait DataProvider<T, F>: Send + Sync {
	/// # Errors
	///
	/// Any back end failure.
	fn size(&self, query: &Query<'_, T, F>) -> Result<usize, ProviderError>;

	/// Returns at most `query.limit` items starting at `query.offset`, filtered and sorted.
	///
	/// # Errors
	///
	/// Any back end failure.
	fn fetch(&self, query: &Query<'_, T, F>) -> Result<Vec<T>, ProviderError>;
}

/// Tree-shaped item source. Queries are scoped to `query.parent`, with [`None`] meaning top-level items.
pub trait HierarchicalDataProvider<T, F>: Send + Sync {
	/// # Errors
	///
	/// Any back end failure.
	fn child_count(&self, query: &Query<'_, T, F>) -> Result<usize, ProviderError>;

	/// # Errors
	///
	/// Any back end failure.
	fn fetch_children(&self, query: &Query<'_, T, F>) -> Result<Vec<T>, ProviderError>;

	fn has_children(&self, item: &T) -> bool;
}

fn filter_sort_page<'i, T: 'i + Clone>(items: impl Iterator<Item = &'i T>, query: &Query<'_, T, Filter<T>>) -> Vec<T> {
	let mut items: Vec<&T> = items.filter(|item| query.filter.map_or(true, |filter| filter.test(item))).collect();
	if let Some(comparator) = query.in_memory_sorting {
		items.sort_by(|a, b| comparator.compare(a, b));
	}
	items.into_iter().skip(query.offset).take(query.limit).cloned().collect()
}

/// In-memory flat provider over a fixed list.
#[derive(Debug, Clone)]
pub struct ListDataProvider<T> {
	items: Vec<T>,
}
impl<T> ListDataProvider<T> {
	pub fn new(items: Vec<T>) -> Self {
		Self { items }
	}

	pub fn items(&self) -> &[T] {
		&self.items
	}
}
impl<T: Clone + Send + Sync> DataProvider<T, Filter<T>> for ListDataProvider<T> {
	fn size(&self, query: &Query<'_, T, Filter<T>>) -> Result<usize, ProviderError> {
		Ok(match query.filter {
			Some(filter) => self.items.iter().filter(|item| filter.test(item)).count(),
			None => self.items.len(),
		})
	}

	fn fetch(&self, query: &Query<'_, T, Filter<T>>) -> Result<Vec<T>, ProviderError> {
		Ok(filter_sort_page(self.items.iter(), query))
	}
}

/// In-memory tree of items, each item appearing at most once.
#[derive(Debug, Clone)]
pub struct TreeData<T: Hash + Eq> {
	roots: Vec<T>,
	children: HashMap<T, Vec<T>>,
}
impl<T: Clone + Hash + Eq> Default for TreeData<T> {
	fn default() -> Self {
		Self::new()
	}
}
impl<T: Clone + Hash + Eq> TreeData<T> {
	pub fn new() -> Self {
		Self {
			roots: Vec::new(),
			children: HashMap::new(),
		}
	}

	/// Adds `items` below `parent` (or at the top level).
	#[must_use]
	pub fn with_items(mut self, parent: Option<&T>, items: impl IntoIterator<Item = T>) -> Self {
		self.add_items(parent, items);
		self
	}

	pub fn add_items(&mut self, parent: Option<&T>, items: impl IntoIterator<Item = T>) {
		match parent {
			Some(parent) => self.children.entry(parent.clone()).or_default().extend(items),
			None => self.roots.extend(items),
		}
	}

	pub fn children(&self, parent: Option<&T>) -> &[T] {
		match parent {
			Some(parent) => self.children.get(parent).map(Vec::as_slice).unwrap_or_default(),
			None => &self.roots,
		}
	}
}

/// In-memory hierarchical provider over [`TreeData`].
#[derive(Debug, Clone)]
pub struct TreeDataProvider<T: Hash + Eq> {
	data: TreeData<T>,
}
impl<T: Clone + Hash + Eq> TreeDataProvider<T> {
	pub fn new(data: TreeData<T>) -> Self {
		Self { data }
	}

	pub fn data(&self) -> &TreeData<T> {
		&self.data
	}
}
impl<T: Clone + Hash + Eq + Send + Sync> HierarchicalDataProvider<T, Filter<T>> for TreeDataProvider<T> {
	fn child_count(&self, query: &Query<'_, T, Filter<T>>) -> Result<usize, ProviderError> {
		let children = self.data.children(query.parent);
		Ok(match query.filter {
			Some(filter) => children.iter().filter(|item| filter.test(item)).count(),
			None => children.len(),
		})
	}

	fn fetch_children(&self, query: &Query<'_, T, Filter<T>>) -> Result<Vec<T>, ProviderError> {
		Ok(filter_sort_page(self.data.children(query.parent).iter(), query))
	}

	fn has_children(&self, item: &T) -> bool {
		!self.data.children(Some(item)).is_empty()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn list_provider_filters_before_paging() {
		let provider = ListDataProvider::new((0..10).collect::<Vec<u32>>());
		let even = Filter::new(|n: &u32| n % 2 == 0);
		let descending = Comparator::new(|a: &u32, b: &u32| b.cmp(a));
		let query = Query {
			offset: 1,
			limit: 2,
			sort_orders: &[],
			in_memory_sorting: Some(&descending),
			filter: Some(&even),
			parent: None,
		};
		assert_eq!(provider.size(&query).unwrap(), 5);
		assert_eq!(provider.fetch(&query).unwrap(), vec![6, 4]);
	}

	#[test]
	fn tree_provider_scopes_to_parent() {
		let provider = TreeDataProvider::new(TreeData::new().with_items(None, ["a", "b"]).with_items(Some(&"a"), ["a0", "a1", "a2"]));
		assert!(provider.has_children(&"a"));
		assert!(!provider.has_children(&"b"));
		let query = Query { offset: 1, limit: 5, ..Query::all(None, Some(&"a")) };
		assert_eq!(provider.child_count(&query).unwrap(), 3);
		assert_eq!(provider.fetch_children(&query).unwrap(), vec!["a1", "a2"]);
	}
}
