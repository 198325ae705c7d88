use crate::key_mapper::Key;
use hashbrown::HashSet;

/// Scratch key set that is reused between synchronisation rounds to avoid reallocating.
#[derive(Debug, Default)]
pub struct TempKeySet(HashSet<Key>);
impl TempKeySet {
	pub fn new() -> Self {
		Self(HashSet::new())
	}

	pub fn temp(&mut self) -> &mut HashSet<Key> {
		// Cleared before each borrow, not after.
		self.0.clear();
		&mut self.0
	}

	/// Retrieves the cache set's capacity without clearing it first.
	pub fn capacity(&self) -> usize {
		self.0.capacity()
	}
}
