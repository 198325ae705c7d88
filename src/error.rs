//! Error types shared by the mapper and the communicators.

use thiserror::Error;

/// Failure reported by a [`DataProvider`](`crate::provider::DataProvider`) or [`HierarchicalDataProvider`](`crate::provider::HierarchicalDataProvider`).
pub type ProviderError = Box<dyn std::error::Error + Send + Sync>;

/// Precondition violations of [`HierarchyMapper`](`crate::hierarchy::HierarchyMapper`) operations.
///
/// Every operation that returns one of these has left the mapper untouched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HierarchyError {
	#[error("the row at flat index {index} is already expanded")]
	AlreadyExpanded { index: usize },
	#[error("flat index {index} is outside of the tree (size {tree_size})")]
	IndexOutOfBounds { index: usize, tree_size: usize },
	#[error("expanded node is not at flat index {index} (its children start at {start_index})")]
	IndexMismatch { index: usize, start_index: usize },
	#[error("the row at flat index {index} has a different key")]
	RowMismatch { index: usize },
	#[error("cannot expand the row at flat index {index} without children")]
	EmptyExpansion { index: usize },
}

/// Errors surfaced from a synchronisation round or a communicator mutation.
///
/// Staleness is never reported here. Stale rounds are discarded and re-run.
#[derive(Debug, Error)]
pub enum SyncError {
	#[error("requested {requested} rows, but at most {maximum} are allowed per request")]
	TooManyRows { requested: usize, maximum: usize },
	#[error("the data provider failed")]
	Fetch(#[source] ProviderError),
	#[error(transparent)]
	Hierarchy(#[from] HierarchyError),
	#[error("the filter slot belongs to a data provider that has since been replaced")]
	ProviderSwapped,
	#[error("expected {expected} rows for flat range {first_row}..{end_row}, but the provider returned {actual}")]
	IncompleteRows { first_row: usize, end_row: usize, expected: usize, actual: usize },
}
