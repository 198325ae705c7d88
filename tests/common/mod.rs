#![allow(dead_code)]

use parking_lot::Mutex;
use row_window::{
	sink::{DataDiff, DataSink},
	Key,
};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

pub fn init_tracing() {
	let _ = tracing_subscriber::fmt()
		.with_env_filter(EnvFilter::from_default_env())
		.with_test_writer()
		.try_init();
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event<T> {
	Diff(DataDiff<T>),
	Insert { first_row: usize, count: usize },
	Remove { first_row: usize, count: usize },
}

/// Remembers everything pushed to it. Clones share the same log.
pub struct RecordingSink<T>(Arc<Mutex<Vec<Event<T>>>>);
impl<T> Clone for RecordingSink<T> {
	fn clone(&self) -> Self {
		Self(Arc::clone(&self.0))
	}
}
impl<T: Clone> RecordingSink<T> {
	pub fn new() -> Self {
		Self(Arc::new(Mutex::new(Vec::new())))
	}

	pub fn events(&self) -> Vec<Event<T>> {
		self.0.lock().clone()
	}

	pub fn take(&self) -> Vec<Event<T>> {
		std::mem::take(&mut *self.0.lock())
	}

	pub fn diffs(&self) -> Vec<DataDiff<T>> {
		self.events()
			.into_iter()
			.filter_map(|event| match event {
				Event::Diff(diff) => Some(diff),
				_ => None,
			})
			.collect()
	}

	pub fn last_diff(&self) -> DataDiff<T> {
		self.diffs().pop().expect("no diff was pushed")
	}
}
impl<T: Send> DataSink<T> for RecordingSink<T> {
	fn apply_diff(&mut self, diff: DataDiff<T>) {
		self.0.lock().push(Event::Diff(diff));
	}

	fn insert_rows(&mut self, first_row: usize, count: usize) {
		self.0.lock().push(Event::Insert { first_row, count });
	}

	fn remove_rows(&mut self, first_row: usize, count: usize) {
		self.0.lock().push(Event::Remove { first_row, count });
	}
}

pub fn generated_items<T: Clone>(diff: &DataDiff<T>) -> Vec<T> {
	diff.generated_rows.iter().map(|row| row.item.clone()).collect()
}

pub fn keys(keys: &[&str]) -> Vec<Key> {
	keys.iter().map(|&key| Key::from(key)).collect()
}
