/// Tuning knobs shared by the flat and hierarchical communicators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommunicatorConfig {
	/// Requests for more rows than this are rejected.
	pub max_rows: usize,
	/// Rows pushed before the client has requested any.
	pub min_push_size: usize,
	/// Top-level rows pushed when a hierarchical communicator (re)initialises.
	pub initial_fetch_size: usize,
	/// How often a shared round is re-run after losing to a concurrent mutation before it fetches under the lock.
	pub stale_retries: usize,
}
impl Default for CommunicatorConfig {
	fn default() -> Self {
		Self {
			max_rows: 1000,
			min_push_size: 40,
			initial_fetch_size: 100,
			stale_retries: 8,
		}
	}
}
impl CommunicatorConfig {
	#[must_use]
	pub fn with_max_rows(self, max_rows: usize) -> Self {
		Self { max_rows, ..self }
	}

	#[must_use]
	pub fn with_min_push_size(self, min_push_size: usize) -> Self {
		Self { min_push_size, ..self }
	}

	#[must_use]
	pub fn with_initial_fetch_size(self, initial_fetch_size: usize) -> Self {
		Self { initial_fetch_size, ..self }
	}

	#[must_use]
	pub fn with_stale_retries(self, stale_retries: usize) -> Self {
		Self { stale_retries, ..self }
	}
}
