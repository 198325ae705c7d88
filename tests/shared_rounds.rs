use common::{generated_items, RecordingSink};
use parking_lot::Mutex;
use row_window::{
	communicator::{DataCommunicator, RoundOutcome, RowRequest},
	hierarchical::HierarchicalDataCommunicator,
	key_mapper::KeyMapper,
	provider::{DataProvider, Filter, ListDataProvider, Query, TreeData, TreeDataProvider},
	CommunicatorConfig, ProviderError, SharedCommunicator,
};
use std::{
	sync::{
		atomic::{AtomicU64, AtomicUsize, Ordering},
		Arc,
	},
	thread,
};

mod common;

type Hook = Box<dyn FnMut() + Send>;

/// Runs a hook in the middle of every fetch.
struct Hooked {
	inner: ListDataProvider<u32>,
	hook: Mutex<Option<Hook>>,
	fetches: AtomicUsize,
}
impl Hooked {
	fn new(count: u32) -> Self {
		Self {
			inner: ListDataProvider::new((0..count).collect()),
			hook: Mutex::new(None),
			fetches: AtomicUsize::new(0),
		}
	}
}
impl DataProvider<u32, Filter<u32>> for Hooked {
	fn size(&self, query: &Query<'_, u32, Filter<u32>>) -> Result<usize, ProviderError> {
		self.inner.size(query)
	}

	fn fetch(&self, query: &Query<'_, u32, Filter<u32>>) -> Result<Vec<u32>, ProviderError> {
		self.fetches.fetch_add(1, Ordering::SeqCst);
		if let Some(hook) = self.hook.lock().as_mut() {
			hook();
		}
		self.inner.fetch(query)
	}
}

#[test]
fn only_the_final_filter_is_ever_pushed() {
	common::init_tracing();
	let provider = Arc::new(Hooked::new(100));
	let sink = RecordingSink::new();
	let shared = SharedCommunicator::new(DataCommunicator::<u32, Filter<u32>>::new(provider.clone(), sink.clone()));

	{
		let shared = shared.clone();
		let mut fired = false;
		*provider.hook.lock() = Some(Box::new(move || {
			if !fired {
				fired = true;
				shared.lock().set_filter(Some(Filter::new(|n: &u32| n % 2 == 0)));
				shared.lock().set_filter(Some(Filter::new(|n: &u32| n % 3 == 0)));
			}
		}));
	}

	let outcome = shared
		.request_rows(RowRequest {
			first_row: 0,
			number_of_rows: 10,
			request_id: 1,
			cache_token: 0,
		})
		.unwrap();
	assert_eq!(outcome, RoundOutcome::Applied);
	assert_eq!(provider.fetches.load(Ordering::SeqCst), 2);

	let diffs = sink.diffs();
	assert_eq!(diffs.len(), 1);
	assert_eq!(diffs[0].version, 2);
	assert_eq!(diffs[0].total_size, 34);
	assert!(generated_items(&diffs[0]).iter().all(|n| n % 3 == 0));
}

#[test]
fn rounds_that_keep_going_stale_finish_under_the_lock() {
	let provider = Arc::new(Hooked::new(100));
	let sink = RecordingSink::new();
	let shared = SharedCommunicator::new(DataCommunicator::<u32, Filter<u32>>::with_key_mapper(
		CommunicatorConfig::default().with_stale_retries(2),
		provider.clone(),
		KeyMapper::new(),
		sink.clone(),
	));

	{
		let shared = shared.clone();
		*provider.hook.lock() = Some(Box::new(move || {
			if let Some(mut communicator) = shared.try_lock() {
				communicator.set_filter(None);
			}
		}));
	}

	assert_eq!(shared.flush().unwrap(), RoundOutcome::Applied);
	assert_eq!(provider.fetches.load(Ordering::SeqCst), 3);
	assert_eq!(sink.diffs().len(), 1);
	assert_eq!(sink.last_diff().version, shared.lock().version());
}

#[test]
fn concurrent_requests_never_push_outdated_versions() {
	let sink = RecordingSink::new();
	let provider = Arc::new(ListDataProvider::new((0..1000).collect::<Vec<u32>>()));
	let shared = SharedCommunicator::new(DataCommunicator::<u32, Filter<u32>>::new(provider, sink.clone()));
	let request_ids = Arc::new(AtomicU64::new(1));

	let readers: Vec<_> = (0..4)
		.map(|reader| {
			let shared = shared.clone();
			let request_ids = Arc::clone(&request_ids);
			thread::spawn(move || {
				for round in 0..25 {
					let cache_token = shared.lock().version();
					shared
						.request_rows(RowRequest {
							first_row: (reader * 100 + round * 7) % 900,
							number_of_rows: 50,
							request_id: request_ids.fetch_add(1, Ordering::SeqCst),
							cache_token,
						})
						.unwrap();
				}
			})
		})
		.collect();
	let writer = {
		let shared = shared.clone();
		thread::spawn(move || {
			for divisor in 1..=20_u32 {
				shared.lock().set_filter(Some(Filter::new(move |n: &u32| n % divisor == 0)));
				thread::yield_now();
			}
		})
	};
	for reader in readers {
		reader.join().unwrap();
	}
	writer.join().unwrap();
	shared.flush().unwrap();

	let diffs = sink.diffs();
	assert!(diffs.windows(2).all(|pair| pair[0].version <= pair[1].version));
	let last = diffs.last().unwrap();
	assert_eq!(last.version, shared.lock().version());
	assert_eq!(last.total_size, 50);
}

#[test]
fn hierarchical_rounds_share_the_same_protocol() {
	let sink = RecordingSink::new();
	let tree = TreeData::new().with_items(None, ["a", "b"]).with_items(Some(&"a"), ["a0", "a1"]);
	let shared = SharedCommunicator::new(HierarchicalDataCommunicator::<&'static str, Filter<&'static str>>::new(
		Arc::new(TreeDataProvider::new(tree)),
		sink.clone(),
	));
	assert_eq!(shared.flush().unwrap(), RoundOutcome::Applied);

	let a = shared.lock().key_mapper().key_of(&"a").unwrap();
	assert!(shared.lock().expand(&a, 0).unwrap());

	let cache_token = shared.lock().version();
	let outcome = shared
		.request_rows(RowRequest {
			first_row: 1,
			number_of_rows: 3,
			request_id: 1,
			cache_token,
		})
		.unwrap();
	assert_eq!(outcome, RoundOutcome::Applied);
	let diff = sink.last_diff();
	assert_eq!(diff.first_row, 1);
	assert_eq!(diff.total_size, 4);
	assert_eq!(shared.lock().active_data().map(|(_, item)| *item).collect::<Vec<_>>(), vec!["a0", "a1", "b"]);
}
