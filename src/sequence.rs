use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, RwLock};

use crossbeam_utils::CachePadded;

/// A monotonic 64-bit counter identifying a slot in the ring and carrying
/// happens-before edges between producers and consumers.
///
/// Starts at [`Sequence::INITIAL`] (`-1`, "no events yet"). Cache-line padded
/// so that independently owned counters (producer cursor, per-consumer
/// progress, gating entries) never share a line.
pub struct Sequence {
	value: CachePadded<AtomicI64>,
}

impl Sequence {
	/// Sentinel initial value: no sequence has been claimed or published yet.
	pub const INITIAL: i64 = -1;

	/// Creates a sequence with the given starting value.
	pub fn new(initial: i64) -> Self {
		Self {
			value: CachePadded::new(AtomicI64::new(initial)),
		}
	}

	/// Current value with `Acquire` ordering.
	#[inline]
	pub fn get(&self) -> i64 {
		self.value.load(Ordering::Acquire)
	}

	/// Current value with `Relaxed` ordering, for owner-private fast paths
	/// where no synchronization is carried by the read.
	#[inline]
	pub fn get_relaxed(&self) -> i64 {
		self.value.load(Ordering::Relaxed)
	}

	/// Stores a new value with `Release` ordering.
	///
	/// All writes performed by this thread before the store are visible to
	/// any thread whose subsequent [`get`](Self::get) observes the value.
	#[inline]
	pub fn set(&self, value: i64) {
		self.value.store(value, Ordering::Release);
	}

	/// Atomically replaces `expected` with `new`. Returns whether the swap
	/// happened. Sequentially consistent on both success and failure.
	#[inline]
	pub fn compare_and_set(&self, expected: i64, new: i64) -> bool {
		self.value
			.compare_exchange(expected, new, Ordering::SeqCst, Ordering::SeqCst)
			.is_ok()
	}

	/// Atomically adds one and returns the updated value.
	#[inline]
	pub fn increment_and_get(&self) -> i64 {
		self.add_and_get(1)
	}

	/// Atomically adds `delta` and returns the updated value.
	#[inline]
	pub fn add_and_get(&self, delta: i64) -> i64 {
		self.value.fetch_add(delta, Ordering::SeqCst) + delta
	}
}

impl Default for Sequence {
	fn default() -> Self {
		Self::new(Self::INITIAL)
	}
}

impl std::fmt::Debug for Sequence {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_tuple("Sequence").field(&self.get()).finish()
	}
}

/// Minimum over a set of sequences, seeded with `minimum`.
///
/// Returns `minimum` itself when the slice is empty.
#[inline]
pub(crate) fn minimum_sequence(sequences: &[Arc<Sequence>], minimum: i64) -> i64 {
	sequences
		.iter()
		.fold(minimum, |min, sequence| std::cmp::min(min, sequence.get()))
}

/// A concurrent bag of sequences with a minimum query.
///
/// Readers take a copy-on-write snapshot of the membership and scan it
/// without holding any lock, so a slow consumer being added or removed never
/// stalls a producer mid-gating-check. Removal matches by pointer identity:
/// the same `Arc` that was added must be passed to remove it.
pub struct SequenceGroup {
	sequences: RwLock<Arc<[Arc<Sequence>]>>,
}

impl SequenceGroup {
	/// Creates an empty group.
	pub fn new() -> Self {
		Self {
			sequences: RwLock::new(Arc::from(Vec::new())),
		}
	}

	/// Adds a sequence to the group.
	pub fn add(&self, sequence: Arc<Sequence>) {
		let mut guard = self.sequences.write().unwrap();
		let mut next: Vec<Arc<Sequence>> = guard.to_vec();
		next.push(sequence);
		*guard = Arc::from(next);
	}

	/// Removes the first entry that is the same allocation as `sequence`.
	/// Returns whether an entry was removed.
	pub fn remove(&self, sequence: &Arc<Sequence>) -> bool {
		let mut guard = self.sequences.write().unwrap();
		let position = guard.iter().position(|s| Arc::ptr_eq(s, sequence));
		match position {
			Some(index) => {
				let mut next: Vec<Arc<Sequence>> = guard.to_vec();
				next.remove(index);
				*guard = Arc::from(next);
				true
			}
			None => false,
		}
	}

	/// Number of sequences currently in the group.
	pub fn size(&self) -> usize {
		self.sequences.read().unwrap().len()
	}

	/// Minimum of the contained sequences, or `i64::MAX` when empty.
	pub fn get(&self) -> i64 {
		self.minimum(i64::MAX)
	}

	/// Minimum of the contained sequences, seeded with `minimum`.
	pub(crate) fn minimum(&self, minimum: i64) -> i64 {
		let snapshot = self.snapshot();
		minimum_sequence(&snapshot, minimum)
	}

	/// Broadcasts `value` to every contained sequence.
	pub fn set(&self, value: i64) {
		let snapshot = self.snapshot();
		for sequence in snapshot.iter() {
			sequence.set(value);
		}
	}

	/// Snapshot of the current membership. The returned slice is immutable;
	/// later adds and removes swap in a new allocation.
	pub(crate) fn snapshot(&self) -> Arc<[Arc<Sequence>]> {
		Arc::clone(&self.sequences.read().unwrap())
	}
}

impl Default for SequenceGroup {
	fn default() -> Self {
		Self::new()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn sequence_operations() {
		let sequence = Sequence::default();
		assert_eq!(sequence.get(), -1);

		sequence.set(100);
		assert_eq!(sequence.get(), 100);
		assert_eq!(sequence.get_relaxed(), 100);

		assert!(sequence.compare_and_set(100, 101));
		assert!(!sequence.compare_and_set(100, 102));
		assert_eq!(sequence.get(), 101);

		assert_eq!(sequence.increment_and_get(), 102);
		assert_eq!(sequence.add_and_get(8), 110);
	}

	#[test]
	fn minimum_of_empty_slice_is_seed() {
		assert_eq!(minimum_sequence(&[], 42), 42);
		assert_eq!(minimum_sequence(&[], i64::MAX), i64::MAX);
	}

	#[test]
	fn group_minimum_tracks_membership() {
		let group = SequenceGroup::new();
		assert_eq!(group.get(), i64::MAX);

		let seven = Arc::new(Sequence::new(7));
		group.add(Arc::clone(&seven));
		assert_eq!(group.get(), 7);

		let three = Arc::new(Sequence::new(3));
		group.add(Arc::clone(&three));
		assert_eq!(group.get(), 3);

		assert!(group.remove(&three));
		assert_eq!(group.get(), 7);
		assert_eq!(group.size(), 1);

		// Second removal without a re-add finds nothing.
		assert!(!group.remove(&three));
	}

	#[test]
	fn group_removal_is_by_identity_not_value() {
		let group = SequenceGroup::new();
		let member = Arc::new(Sequence::new(5));
		group.add(Arc::clone(&member));

		let same_value = Arc::new(Sequence::new(5));
		assert!(!group.remove(&same_value));
		assert!(group.remove(&member));
	}

	#[test]
	fn group_set_broadcasts() {
		let group = SequenceGroup::new();
		let a = Arc::new(Sequence::default());
		let b = Arc::new(Sequence::default());
		group.add(Arc::clone(&a));
		group.add(Arc::clone(&b));

		group.set(17);
		assert_eq!(a.get(), 17);
		assert_eq!(b.get(), 17);
		assert_eq!(group.get(), 17);
	}

	#[test]
	fn snapshot_is_isolated_from_later_mutation() {
		let group = SequenceGroup::new();
		group.add(Arc::new(Sequence::new(1)));
		let snapshot = group.snapshot();

		group.add(Arc::new(Sequence::new(2)));
		assert_eq!(snapshot.len(), 1);
		assert_eq!(group.size(), 2);
	}
}
