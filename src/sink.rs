//! What the communicators push to the client side.

use crate::key_mapper::Key;

/// Tree metadata of a row pushed by a hierarchical communicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowHierarchy {
	pub depth: usize,
	pub leaf: bool,
	pub collapsed: bool,
	pub collapse_allowed: bool,
	/// The server asked for this row to be expanded once the client sees it.
	pub expand_pending: bool,
}

/// Full payload of one row.
#[derive(Debug, Clone, PartialEq)]
pub struct RowData<T> {
	pub key: Key,
	pub item: T,
	pub hierarchy: Option<RowHierarchy>,
}

/// Everything a client needs to bring its view in sync after one round.
#[derive(Debug, Clone, PartialEq)]
pub struct DataDiff<T> {
	/// Filter/sort version the rows were computed for. Clients send it back as cache token.
	pub version: u64,
	/// The request this diff answers, if any.
	pub request_id: Option<u64>,
	/// The client must discard all rows it has before applying this diff.
	pub reset: bool,
	pub total_size: usize,
	pub first_row: usize,
	/// Keys of the rows from `first_row` onwards, in order.
	pub rows: Vec<Key>,
	/// Payloads for rows the client hasn't seen (under these keys) before.
	pub generated_rows: Vec<RowData<T>>,
	/// Payloads for rows whose content changed since they were last sent.
	pub refreshed_rows: Vec<RowData<T>>,
	/// Keys the client should forget and then confirm.
	pub dropped_keys: Vec<Key>,
}
impl<T> DataDiff<T> {
	/// Whether applying this diff would change nothing on the client.
	#[must_use]
	pub fn is_empty(&self) -> bool {
		!self.reset && self.rows.is_empty() && self.generated_rows.is_empty() && self.refreshed_rows.is_empty() && self.dropped_keys.is_empty()
	}
}

/// Receiver of diffs, usually backed by a transport.
pub trait DataSink<T>: Send {
	fn apply_diff(&mut self, diff: DataDiff<T>);

	/// `count` rows were inserted before `first_row` by an expansion.
	fn insert_rows(&mut self, first_row: usize, count: usize) {
		let _ = (first_row, count);
	}

	/// `count` rows starting at `first_row` were removed by a collapse.
	fn remove_rows(&mut self, first_row: usize, count: usize) {
		let _ = (first_row, count);
	}
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;
impl<T> DataSink<T> for NullSink {
	fn apply_diff(&mut self, _: DataDiff<T>) {}
}
