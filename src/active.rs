//! Bookkeeping of which items are in the client's window, and which were dropped from it.
//!
//! Dropping is two-phase: an item that leaves the window becomes [`ItemState::Dropped`] and its key stays registered
//! until the client confirms it has forgotten the row. Only then is the key released.

use crate::{
	key_mapper::{Key, KeyMapper},
	temp_set::TempKeySet,
};
use core::hash::Hash;
use hashbrown::HashMap;
use tracing::{debug, info, level_filters::STATIC_MAX_LEVEL, trace, trace_span, warn, Level};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ItemState {
	/// In the current window.
	Active,
	/// Left the window, key retained until the client confirms.
	Dropped,
	/// Key released (or never issued).
	Released,
}

#[derive(Debug, Clone, Copy)]
struct Tracked {
	dropped: bool,
	dirty: bool,
	/// A confirmation arrived while the key was pinned.
	confirmed: bool,
}

/// Changes between two windows, in window order where applicable.
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciliation<T> {
	pub rows: Vec<Key>,
	pub generated: Vec<(Key, T)>,
	pub refreshed: Vec<(Key, T)>,
	pub dropped: Vec<Key>,
}

/// Owns the [`KeyMapper`] and the active/dropped working sets of one session.
#[derive(Debug)]
pub struct ActiveDataHandler<T, I = T> {
	keys: KeyMapper<T, I>,
	tracked: HashMap<Key, Tracked>,
	window: Vec<Key>,
	seen: TempKeySet,
}
impl<T, I> ActiveDataHandler<T, I>
where
	T: Clone,
	I: Clone + Hash + Eq,
{
	pub fn new(keys: KeyMapper<T, I>) -> Self {
		Self {
			keys,
			tracked: HashMap::new(),
			window: Vec::new(),
			seen: TempKeySet::new(),
		}
	}

	pub fn key_mapper(&self) -> &KeyMapper<T, I> {
		&self.keys
	}

	/// Registers `item` without adding it to the window. Used for rows the server refers to before the client does.
	pub fn key(&mut self, item: &T) -> Key {
		self.keys.key(item)
	}

	/// Replaces the window with `items`.
	///
	/// New items and items that were dropped but not yet released are `generated`.
	/// Items that stay in the window are only `refreshed` if they were marked dirty, or if `regenerate` is set
	/// (which then lists them as `generated`). Active items missing from `items` are `dropped`, once.
	pub fn set_active(&mut self, items: Vec<T>, regenerate: bool) -> Reconciliation<T> {
		let span = trace_span!("set_active", items = items.len(), regenerate);
		let _enter = span.enter();

		let mut reconciliation = Reconciliation {
			rows: Vec::with_capacity(items.len()),
			generated: Vec::new(),
			refreshed: Vec::new(),
			dropped: Vec::new(),
		};

		let seen = self.seen.temp();
		for item in items {
			let key = self.keys.key(&item);
			if !seen.insert(key.clone()) {
				warn!(%key, "Item appears more than once in the window. Sending it only once.");
				reconciliation.rows.push(key);
				continue;
			}

			match self.tracked.get_mut(&key) {
				Some(tracked) if !tracked.dropped => {
					self.keys.refresh(&item);
					if regenerate {
						tracked.dirty = false;
						reconciliation.generated.push((key.clone(), item));
					} else if tracked.dirty {
						trace!(%key, "Refreshing.");
						tracked.dirty = false;
						reconciliation.refreshed.push((key.clone(), item));
					}
				}
				Some(tracked) => {
					trace!(%key, "Reactivating dropped item.");
					*tracked = Tracked {
						dropped: false,
						dirty: false,
						confirmed: false,
					};
					self.keys.refresh(&item);
					reconciliation.generated.push((key.clone(), item));
				}
				None => {
					trace!(%key, "Activating.");
					self.tracked.insert(
						key.clone(),
						Tracked {
							dropped: false,
							dirty: false,
							confirmed: false,
						},
					);
					reconciliation.generated.push((key.clone(), item));
				}
			}
			reconciliation.rows.push(key);
		}

		for key in self.window.drain(..) {
			if seen.contains(&key) {
				continue;
			}
			if let Some(tracked) = self.tracked.get_mut(&key) {
				if !tracked.dropped {
					trace!(%key, "Dropping.");
					tracked.dropped = true;
					tracked.dirty = false;
					reconciliation.dropped.push(key);
				}
			}
		}
		self.window.extend(reconciliation.rows.iter().cloned());

		debug!(
			generated = reconciliation.generated.len(),
			refreshed = reconciliation.refreshed.len(),
			dropped = reconciliation.dropped.len(),
			"Reconciled window."
		);
		info!("Tracked keys (active/total): {}/{}", self.window.len(), self.tracked.len());
		if STATIC_MAX_LEVEL >= Level::WARN && self.seen.capacity() >= 4096 && self.seen.capacity() >= 8 * self.window.len() {
			warn!(
				"The window diff heap capacity is large ({}) compared to the window ({}).\n\
				This may point to a window that shrank after a very large request.",
				self.seen.capacity(),
				self.window.len()
			);
		}
		reconciliation
	}

	/// Marks an item in the window for refreshing and stores its new value.
	///
	/// Returns `false` if the item isn't in the window, in which case nothing happens.
	pub fn mark_dirty(&mut self, item: &T) -> bool {
		let key = match self.keys.key_of(item) {
			Some(key) => key,
			None => return false,
		};
		match self.tracked.get_mut(&key) {
			Some(tracked) if !tracked.dropped => {
				tracked.dirty = true;
				self.keys.refresh(item);
				true
			}
			_ => false,
		}
	}

	/// Takes all dirty items in the window, in window order.
	pub fn take_refreshed(&mut self) -> Vec<(Key, T)> {
		let mut refreshed = Vec::new();
		for key in &self.window {
			if let Some(tracked) = self.tracked.get_mut(key) {
				if tracked.dirty && !tracked.dropped {
					tracked.dirty = false;
					if let Some(item) = self.keys.get(key) {
						refreshed.push((key.clone(), item.clone()));
					}
				}
			}
		}
		refreshed
	}

	/// Releases the confirmed keys that are still dropped, unless `is_pinned` holds for them.
	///
	/// Keys that are unknown, active again or already released are ignored. Pinned keys stay dropped and remember the
	/// confirmation, see [`release_if_confirmed`](`ActiveDataHandler::release_if_confirmed`).
	pub fn confirm_drop_unless(&mut self, keys: impl IntoIterator<Item = Key>, is_pinned: impl Fn(&Key) -> bool) -> Vec<Key> {
		let mut released = Vec::new();
		for key in keys {
			match self.tracked.get_mut(&key) {
				Some(tracked) if tracked.dropped => {
					if is_pinned(&key) {
						trace!(%key, "Confirmed drop of pinned key. Retaining it.");
						tracked.confirmed = true;
					} else {
						self.tracked.remove(&key);
						self.keys.remove_key(&key);
						released.push(key);
					}
				}
				Some(_) => trace!(%key, "Ignoring drop confirmation for reactivated key."),
				None => warn!(%key, "Ignoring drop confirmation for unknown key."),
			}
		}
		if !released.is_empty() {
			debug!(released = released.len(), "Released keys.");
		}
		released
	}

	pub fn confirm_drop(&mut self, keys: impl IntoIterator<Item = Key>) -> Vec<Key> {
		self.confirm_drop_unless(keys, |_| false)
	}

	/// Releases `key` once it can't be referred to anymore: if it is dropped and its drop was confirmed while it was
	/// pinned, or if it was registered through [`key`](`ActiveDataHandler::key`) but never entered the window.
	pub fn release_if_confirmed(&mut self, key: &Key) -> bool {
		match self.tracked.get(key) {
			Some(tracked) if tracked.dropped && tracked.confirmed => {
				self.tracked.remove(key);
				self.keys.remove_key(key);
				trace!(%key, "Released previously pinned key.");
				true
			}
			Some(_) => false,
			None => self.keys.remove_key(key).is_some(),
		}
	}

	/// Retires every key. Confirmations for them are ignored from now on.
	pub fn reset(&mut self) {
		debug!(tracked = self.tracked.len(), "Retiring all keys.");
		self.tracked.clear();
		self.window.clear();
		self.keys.remove_all();
	}

	#[must_use]
	pub fn state_of(&self, key: &Key) -> ItemState {
		match self.tracked.get(key) {
			Some(tracked) if tracked.dropped => ItemState::Dropped,
			Some(_) => ItemState::Active,
			None => ItemState::Released,
		}
	}

	#[must_use]
	pub fn is_active(&self, item: &T) -> bool {
		self.keys.key_of(item).map_or(false, |key| self.state_of(&key) == ItemState::Active)
	}

	/// Keys of the window, in order.
	#[must_use]
	pub fn active_keys(&self) -> &[Key] {
		&self.window
	}

	/// Items of the window, in order.
	pub fn active_data(&self) -> impl '_ + Iterator<Item = (&Key, &T)> {
		self.window.iter().filter_map(move |key| self.keys.get(key).map(|item| (key, item)))
	}

	/// Items that left the window and whose keys aren't released yet, in no particular order.
	pub fn dropped_data(&self) -> impl '_ + Iterator<Item = (&Key, &T)> {
		self.tracked
			.iter()
			.filter(|(_, tracked)| tracked.dropped)
			.filter_map(move |(key, _)| self.keys.get(key).map(|item| (key, item)))
	}
}
