//! Bidirectional registry between backend item identities and the opaque [`Key`]s the client sees.

use core::{
	borrow::Borrow,
	fmt::{self, Debug, Display, Formatter},
	hash::Hash,
};
use hashbrown::{hash_map::Entry, HashMap};
use num_traits::{CheckedAdd, One, Zero};
use std::sync::Arc;
use tracing::{trace, warn};

/// Opaque, session-scoped handle for an item as seen by the client.
///
/// Keys are not content-addressed: once released, the same item may be registered under a different key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Key(Arc<str>);
impl Key {
	#[must_use]
	pub fn as_str(&self) -> &str {
		&self.0
	}
}
impl Display for Key {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}
impl AsRef<str> for Key {
	fn as_ref(&self) -> &str {
		&self.0
	}
}
impl Borrow<str> for Key {
	fn borrow(&self) -> &str {
		&self.0
	}
}
impl From<String> for Key {
	fn from(key: String) -> Self {
		Self(key.into())
	}
}
impl From<&str> for Key {
	fn from(key: &str) -> Self {
		Self(key.into())
	}
}

/// Source of fresh [`Key`]s, injected per [`KeyMapper`].
pub trait KeySequence: Send {
	fn next_key(&mut self) -> Key;
}
impl<F: FnMut() -> Key + Send> KeySequence for F {
	fn next_key(&mut self) -> Key {
		self()
	}
}

/// Counts up from 1 and formats the count as key.
#[derive(Debug, Clone)]
pub struct Counter<C = u64>(C);
impl<C: Zero> Default for Counter<C> {
	fn default() -> Self {
		Self(C::zero())
	}
}
impl<C> KeySequence for Counter<C>
where
	C: CheckedAdd + One + Zero + Display + Send,
{
	fn next_key(&mut self) -> Key {
		self.0 = match self.0.checked_add(&C::one()) {
			Some(next) => next,
			None => {
				warn!("Key counter saturated. Restarting at 1.");
				C::one()
			}
		};
		Key::from(self.0.to_string())
	}
}

/// Extracts the identity that decides whether two item values are the same backend record.
pub struct Identity<T, I>(Arc<dyn Fn(&T) -> I + Send + Sync>);
impl<T, I> Identity<T, I> {
	pub fn new(extract: impl 'static + Fn(&T) -> I + Send + Sync) -> Self {
		Self(Arc::new(extract))
	}

	pub fn of(&self, item: &T) -> I {
		(self.0)(item)
	}
}
impl<T: 'static + Clone> Identity<T, T> {
	/// Items are their own identity, so value-equal items are the same record.
	#[must_use]
	pub fn structural() -> Self {
		Self::new(T::clone)
	}
}
impl<T, I> Clone for Identity<T, I> {
	fn clone(&self) -> Self {
		Self(Arc::clone(&self.0))
	}
}
impl<T, I> Debug for Identity<T, I> {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.debug_tuple("Identity").finish_non_exhaustive()
	}
}

struct Registered<T, I> {
	identity: I,
	item: T,
}

/// Each live [`Key`] maps to exactly one identity and vice versa.
pub struct KeyMapper<T, I = T> {
	identity: Identity<T, I>,
	sequence: Box<dyn KeySequence>,
	keys: HashMap<I, Key>,
	entries: HashMap<Key, Registered<T, I>>,
	disambiguation: u64,
}
impl<T: 'static + Clone + Hash + Eq> KeyMapper<T, T> {
	/// A mapper with structural identity and a [`Counter`] key sequence.
	#[must_use]
	pub fn new() -> Self {
		Self::with_identity(Identity::structural())
	}
}
impl<T: 'static + Clone + Hash + Eq> Default for KeyMapper<T, T> {
	fn default() -> Self {
		Self::new()
	}
}
impl<T, I> KeyMapper<T, I>
where
	T: Clone,
	I: Clone + Hash + Eq,
{
	#[must_use]
	pub fn with_identity(identity: Identity<T, I>) -> Self {
		Self::with_sequence(identity, Counter::<u64>::default())
	}

	#[must_use]
	pub fn with_sequence(identity: Identity<T, I>, sequence: impl 'static + KeySequence) -> Self {
		Self {
			identity,
			sequence: Box::new(sequence),
			keys: HashMap::new(),
			entries: HashMap::new(),
			disambiguation: 0,
		}
	}

	#[must_use]
	pub fn identity_of(&self, item: &T) -> I {
		self.identity.of(item)
	}

	#[must_use]
	pub fn identity_extractor(&self) -> &Identity<T, I> {
		&self.identity
	}

	/// Returns the key registered for `item`'s identity, registering a fresh one if there is none.
	pub fn key(&mut self, item: &T) -> Key {
		let identity = self.identity.of(item);
		if let Some(key) = self.keys.get(&identity) {
			return key.clone();
		}

		let key = self.fresh_key();
		trace!(%key, "Registered key.");
		self.keys.insert(identity.clone(), key.clone());
		self.entries.insert(key.clone(), Registered { identity, item: item.clone() });
		key
	}

	fn fresh_key(&mut self) -> Key {
		let mut key = self.sequence.next_key();
		while self.entries.contains_key(&key) {
			self.disambiguation += 1;
			let disambiguated = Key::from(format!("{}#{}", key, self.disambiguation));
			warn!(%key, %disambiguated, "Key sequence produced a live key. Disambiguating.");
			key = disambiguated;
		}
		key
	}

	/// Looks up the key of `item` without registering it.
	#[must_use]
	pub fn key_of(&self, item: &T) -> Option<Key> {
		self.keys.get(&self.identity.of(item)).cloned()
	}

	/// The latest known value of the item registered under `key`.
	#[must_use]
	pub fn get(&self, key: &Key) -> Option<&T> {
		self.entries.get(key).map(|registered| &registered.item)
	}

	#[must_use]
	pub fn identity(&self, key: &Key) -> Option<&I> {
		self.entries.get(key).map(|registered| &registered.identity)
	}

	#[must_use]
	pub fn has(&self, item: &T) -> bool {
		self.keys.contains_key(&self.identity.of(item))
	}

	#[must_use]
	pub fn contains_key(&self, key: &Key) -> bool {
		self.entries.contains_key(key)
	}

	/// Releases `item`'s identity. Its key becomes unresolvable.
	pub fn remove(&mut self, item: &T) -> Option<Key> {
		let key = self.keys.remove(&self.identity.of(item))?;
		self.entries.remove(&key);
		trace!(%key, "Released key.");
		Some(key)
	}

	/// Releases the identity registered under `key`, returning the item's last known value.
	pub fn remove_key(&mut self, key: &Key) -> Option<T> {
		let Registered { identity, item } = self.entries.remove(key)?;
		self.keys.remove(&identity);
		trace!(%key, "Released key.");
		Some(item)
	}

	/// Replaces the stored value of an already registered identity.
	///
	/// Returns `false` (and doesn't register anything) if `item` is unknown.
	pub fn refresh(&mut self, item: &T) -> bool {
		let identity = self.identity.of(item);
		match self.keys.get(&identity) {
			Some(key) => match self.entries.entry(key.clone()) {
				Entry::Occupied(mut occupied) => {
					occupied.get_mut().item = item.clone();
					true
				}
				Entry::Vacant(_) => false,
			},
			None => false,
		}
	}

	pub fn remove_all(&mut self) {
		trace!(count = self.entries.len(), "Releasing all keys.");
		self.keys.clear();
		self.entries.clear();
	}

	#[must_use]
	pub fn len(&self) -> usize {
		debug_assert_eq!(self.keys.len(), self.entries.len());
		self.entries.len()
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	pub fn keys(&self) -> impl '_ + Iterator<Item = &Key> {
		self.entries.keys()
	}
}
impl<T, I> Debug for KeyMapper<T, I> {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.debug_struct("KeyMapper").field("len", &self.entries.len()).finish_non_exhaustive()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn key_is_idempotent_while_registered() {
		let mut mapper = KeyMapper::<&'static str>::new();
		let a = mapper.key(&"a");
		assert_eq!(mapper.key(&"a"), a);
		assert_eq!(mapper.get(&a), Some(&"a"));
		assert_ne!(mapper.key(&"b"), a);
	}

	#[test]
	fn default_mapper_uses_structural_identity() {
		let mut mapper = KeyMapper::<String>::default();
		let key = mapper.key(&"row".to_owned());
		assert_eq!(mapper.key_of(&"row".to_owned()), Some(key.clone()));
		assert_eq!(mapper.identity(&key), Some(&"row".to_owned()));
		assert_eq!(key.as_str(), "1");
	}

	#[test]
	fn removed_identity_is_unresolvable() {
		let mut mapper = KeyMapper::<&'static str>::new();
		let a = mapper.key(&"a");
		assert_eq!(mapper.remove(&"a"), Some(a.clone()));
		assert!(!mapper.has(&"a"));
		assert_eq!(mapper.get(&a), None);
		assert_ne!(mapper.key(&"a"), a);
	}

	#[test]
	fn identity_extractor_separates_value_equal_records() {
		#[derive(Clone)]
		struct Row {
			id: u32,
			name: &'static str,
		}

		let mut mapper = KeyMapper::with_identity(Identity::new(|row: &Row| row.id));
		let first = mapper.key(&Row { id: 1, name: "same" });
		let second = mapper.key(&Row { id: 2, name: "same" });
		assert_ne!(first, second);

		assert!(mapper.refresh(&Row { id: 1, name: "renamed" }));
		assert_eq!(mapper.key(&Row { id: 1, name: "whatever" }), first);
		assert_eq!(mapper.get(&first).map(|row| row.name), Some("renamed"));
	}

	#[test]
	fn colliding_sequence_never_aliases_live_keys() {
		let mut mapper = KeyMapper::with_sequence(Identity::<u8, u8>::structural(), || Key::from("constant"));
		let keys = (0..5).map(|i| mapper.key(&i)).collect::<Vec<_>>();
		for (i, a) in keys.iter().enumerate() {
			for b in &keys[i + 1..] {
				assert_ne!(a, b);
			}
		}
		assert_eq!(mapper.len(), 5);
	}

	#[test]
	fn counter_restarts_on_saturation() {
		let mut counter = Counter(u8::MAX - 1);
		assert_eq!(counter.next_key().as_str(), "255");
		assert_eq!(counter.next_key().as_str(), "1");
	}
}
