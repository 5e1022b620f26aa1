//! Claiming, gating and publication of sequence ranges.
//!
//! A sequencer is the producer-side coordination point: it hands out slot
//! ranges, refuses to lap the slowest gating (consumer) sequence and makes
//! published slots visible to consumers. The single-producer variant keeps
//! its claim state in plain cells because only one thread ever claims; the
//! multi-producer variant claims through a CAS on the cursor and tracks
//! per-slot availability so out-of-order publication by racing producers
//! becomes visible as a contiguous run.

use std::cell::Cell;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_utils::CachePadded;

use crate::barrier::SequenceBarrier;
use crate::errors::InsufficientCapacity;
use crate::sequence::{Sequence, SequenceGroup};
use crate::wait_strategy::WaitStrategy;

/// Claim-side backpressure pause while a gating sequence blocks progress.
const GATING_PARK: Duration = Duration::from_nanos(1);

pub(crate) fn assert_power_of_two(size: usize) {
	if size == 0 || size & (size - 1) != 0 {
		panic!("buffer size must be a positive power of 2");
	}
}

fn assert_batch_size(n: i64, buffer_size: i64) {
	if n < 1 || n > buffer_size {
		panic!("batch size must be between 1 and the buffer size");
	}
}

/// Producer-side coordinator for a ring of `buffer_size` slots.
///
/// All sequences are `i64`; the claimed range for `next(n)` is
/// `[result - n + 1, result]`. Implementations must guarantee that no claim
/// advances past `min(gating sequences) + buffer_size` and that
/// [`publish`](Self::publish) makes the slot writes of the claiming thread
/// visible to any consumer that subsequently observes the sequence as
/// available.
pub trait Sequencer: Send + Sync {
	/// Number of slots in the ring.
	fn buffer_size(&self) -> i64;

	/// Current cursor value (highest claimed sequence for the
	/// multi-producer variant, highest published for single-producer).
	fn cursor(&self) -> i64;

	/// The cursor as a shareable sequence, for barriers.
	fn cursor_sequence(&self) -> Arc<Sequence>;

	/// The wait strategy consumers of this sequencer block on.
	#[doc(hidden)]
	fn wait_strategy(&self) -> &Arc<dyn WaitStrategy>;

	/// Whether `required` further slots can be claimed without waiting.
	fn has_available_capacity(&self, required: i64) -> bool;

	/// Number of slots free right now.
	fn remaining_capacity(&self) -> i64;

	/// Claims the next `n` slots, parking until the gating sequences allow
	/// it. Returns the highest claimed sequence.
	///
	/// # Panics
	///
	/// Panics when `n` is zero, negative or larger than the ring.
	fn next(&self, n: i64) -> i64;

	/// Claims the next `n` slots without waiting.
	///
	/// # Panics
	///
	/// Panics when `n` is zero, negative or larger than the ring.
	fn try_next(&self, n: i64) -> Result<i64, InsufficientCapacity>;

	/// Publishes every sequence in `[low, high]`, making the range visible
	/// to consumers and waking blocked waiters.
	fn publish(&self, low: i64, high: i64);

	/// Whether `sequence` has been published.
	fn is_available(&self, sequence: i64) -> bool;

	/// Racy cursor reset for initialization and recovery. Never call while
	/// other producers are claiming.
	fn claim(&self, sequence: i64);

	/// Registers consumer sequences the producers must not lap.
	fn add_gating_sequences(&self, gating: &[Arc<Sequence>]);

	/// Unregisters a gating sequence; returns whether it was present.
	/// A removed sequence no longer restricts producers on the next check.
	fn remove_gating_sequence(&self, sequence: &Arc<Sequence>) -> bool;

	/// Minimum of the gating sequences and the cursor.
	fn get_minimum_sequence(&self) -> i64;

	/// Highest sequence in `[next_sequence, available_sequence]` such that
	/// the whole prefix is published, or `next_sequence - 1` when there is
	/// a gap at the front. Consumers use this to turn "the cursor moved"
	/// into "this contiguous run is readable".
	fn get_highest_published_sequence(&self, next_sequence: i64, available_sequence: i64) -> i64;

	/// Creates a consumer barrier gated on this sequencer's cursor and on
	/// `dependents` (sequences of upstream consumers; empty means gate on
	/// the cursor alone).
	fn new_barrier(self: Arc<Self>, dependents: Vec<Arc<Sequence>>) -> SequenceBarrier
	where
		Self: Sized + 'static,
	{
		SequenceBarrier::new(self, dependents)
	}
}

/// Sequencer for exactly one producing thread.
///
/// Claim state (`next_value`, `cached_gating`) is kept in plain cells: with
/// a single claimer there is nothing to synchronize until publication, which
/// goes through the atomic cursor.
pub struct SingleProducerSequencer {
	buffer_size: i64,
	cursor: Arc<Sequence>,
	gating: SequenceGroup,
	wait_strategy: Arc<dyn WaitStrategy>,
	next_value: Cell<i64>,
	cached_gating: Cell<i64>,
}

// SAFETY: the cells are claim-side state and the claim API contract is that
// a single thread calls `next`/`try_next`/`claim`; everything else on the
// type is atomics. Sharing the sequencer with consumers (who only read the
// cursor and publish gating sequences) is sound.
unsafe impl Sync for SingleProducerSequencer {}

impl SingleProducerSequencer {
	/// Creates a sequencer for a ring of `buffer_size` slots.
	///
	/// # Panics
	///
	/// Panics when `buffer_size` is not a positive power of two.
	pub fn new(buffer_size: usize, wait_strategy: Arc<dyn WaitStrategy>) -> Self {
		assert_power_of_two(buffer_size);
		Self {
			buffer_size: buffer_size as i64,
			cursor: Arc::new(Sequence::default()),
			gating: SequenceGroup::new(),
			wait_strategy,
			next_value: Cell::new(Sequence::INITIAL),
			cached_gating: Cell::new(Sequence::INITIAL),
		}
	}

	fn has_capacity(&self, required: i64) -> bool {
		let next_value = self.next_value.get();
		let wrap_point = next_value + required - self.buffer_size;
		let cached_gating = self.cached_gating.get();

		if wrap_point > cached_gating || cached_gating > next_value {
			let min_sequence = self.gating.minimum(next_value);
			self.cached_gating.set(min_sequence);
			if wrap_point > min_sequence {
				return false;
			}
		}
		true
	}
}

impl Sequencer for SingleProducerSequencer {
	fn buffer_size(&self) -> i64 {
		self.buffer_size
	}

	fn cursor(&self) -> i64 {
		self.cursor.get()
	}

	fn cursor_sequence(&self) -> Arc<Sequence> {
		Arc::clone(&self.cursor)
	}

	fn wait_strategy(&self) -> &Arc<dyn WaitStrategy> {
		&self.wait_strategy
	}

	fn has_available_capacity(&self, required: i64) -> bool {
		self.has_capacity(required)
	}

	fn remaining_capacity(&self) -> i64 {
		let next_value = self.next_value.get();
		let consumed = self.gating.minimum(next_value);
		self.buffer_size - (next_value - consumed)
	}

	fn next(&self, n: i64) -> i64 {
		assert_batch_size(n, self.buffer_size);

		let next_value = self.next_value.get();
		let next_sequence = next_value + n;
		let wrap_point = next_sequence - self.buffer_size;
		let cached_gating = self.cached_gating.get();

		// The second clause catches a `claim` that moved us backwards past
		// the cached value.
		if wrap_point > cached_gating || cached_gating > next_value {
			let mut min_sequence = self.gating.minimum(next_value);
			while wrap_point > min_sequence {
				thread::park_timeout(GATING_PARK);
				min_sequence = self.gating.minimum(next_value);
			}
			self.cached_gating.set(min_sequence);
		}

		self.next_value.set(next_sequence);
		next_sequence
	}

	fn try_next(&self, n: i64) -> Result<i64, InsufficientCapacity> {
		assert_batch_size(n, self.buffer_size);

		if !self.has_capacity(n) {
			return Err(InsufficientCapacity);
		}
		let next_sequence = self.next_value.get() + n;
		self.next_value.set(next_sequence);
		Ok(next_sequence)
	}

	fn publish(&self, _low: i64, high: i64) {
		self.cursor.set(high);
		self.wait_strategy.signal_all_when_blocking();
	}

	fn is_available(&self, sequence: i64) -> bool {
		sequence <= self.cursor.get()
	}

	fn claim(&self, sequence: i64) {
		self.next_value.set(sequence);
	}

	fn add_gating_sequences(&self, gating: &[Arc<Sequence>]) {
		for sequence in gating {
			self.gating.add(Arc::clone(sequence));
		}
	}

	fn remove_gating_sequence(&self, sequence: &Arc<Sequence>) -> bool {
		self.gating.remove(sequence)
	}

	fn get_minimum_sequence(&self) -> i64 {
		self.gating.minimum(self.cursor.get())
	}

	fn get_highest_published_sequence(&self, _next_sequence: i64, available_sequence: i64) -> i64 {
		// With one producer the cursor never runs ahead of publication.
		available_sequence
	}
}

/// Sequencer for concurrently claiming producers.
///
/// The cursor tracks the highest *claimed* sequence; publication is
/// per-slot. Each slot carries an availability flag holding the "round"
/// (`sequence >> log2(buffer_size)`) it was last published in, so a consumer
/// can tell a freshly published slot from the previous lap's leftover.
pub struct MultiProducerSequencer {
	buffer_size: i64,
	cursor: Arc<Sequence>,
	gating: SequenceGroup,
	wait_strategy: Arc<dyn WaitStrategy>,
	gating_cache: Sequence,
	available: Box<[CachePadded<AtomicI32>]>,
	index_mask: i64,
	index_shift: u32,
}

impl MultiProducerSequencer {
	/// Creates a sequencer for a ring of `buffer_size` slots.
	///
	/// # Panics
	///
	/// Panics when `buffer_size` is not a positive power of two.
	pub fn new(buffer_size: usize, wait_strategy: Arc<dyn WaitStrategy>) -> Self {
		assert_power_of_two(buffer_size);
		let available = (0..buffer_size)
			.map(|_| CachePadded::new(AtomicI32::new(-1)))
			.collect();
		Self {
			buffer_size: buffer_size as i64,
			cursor: Arc::new(Sequence::default()),
			gating: SequenceGroup::new(),
			wait_strategy,
			gating_cache: Sequence::default(),
			available,
			index_mask: (buffer_size - 1) as i64,
			index_shift: buffer_size.ilog2(),
		}
	}

	#[inline]
	fn availability_flag(&self, sequence: i64) -> i32 {
		(sequence >> self.index_shift) as i32
	}

	#[inline]
	fn availability(&self, sequence: i64) -> &AtomicI32 {
		&self.available[(sequence & self.index_mask) as usize]
	}

	#[inline]
	fn set_available(&self, sequence: i64) {
		self.availability(sequence)
			.store(self.availability_flag(sequence), Ordering::Release);
	}

	fn has_capacity(&self, required: i64, cursor_value: i64) -> bool {
		let wrap_point = cursor_value + required - self.buffer_size;
		let cached_gating = self.gating_cache.get_relaxed();

		if wrap_point > cached_gating || cached_gating > cursor_value {
			let min_sequence = self.gating.minimum(cursor_value);
			self.gating_cache.set(min_sequence);
			if wrap_point > min_sequence {
				return false;
			}
		}
		true
	}
}

impl Sequencer for MultiProducerSequencer {
	fn buffer_size(&self) -> i64 {
		self.buffer_size
	}

	fn cursor(&self) -> i64 {
		self.cursor.get()
	}

	fn cursor_sequence(&self) -> Arc<Sequence> {
		Arc::clone(&self.cursor)
	}

	fn wait_strategy(&self) -> &Arc<dyn WaitStrategy> {
		&self.wait_strategy
	}

	fn has_available_capacity(&self, required: i64) -> bool {
		self.has_capacity(required, self.cursor.get())
	}

	fn remaining_capacity(&self) -> i64 {
		let produced = self.cursor.get();
		let consumed = self.gating.minimum(produced);
		self.buffer_size - (produced - consumed)
	}

	fn next(&self, n: i64) -> i64 {
		assert_batch_size(n, self.buffer_size);

		loop {
			let current = self.cursor.get();
			let next_sequence = current + n;
			let wrap_point = next_sequence - self.buffer_size;
			let cached_gating = self.gating_cache.get_relaxed();

			if wrap_point > cached_gating || cached_gating > current {
				let min_sequence = self.gating.minimum(current);
				self.gating_cache.set(min_sequence);
				if wrap_point > min_sequence {
					thread::park_timeout(GATING_PARK);
					continue;
				}
			}

			if self.cursor.compare_and_set(current, next_sequence) {
				return next_sequence;
			}
		}
	}

	fn try_next(&self, n: i64) -> Result<i64, InsufficientCapacity> {
		assert_batch_size(n, self.buffer_size);

		loop {
			let current = self.cursor.get();
			let next_sequence = current + n;

			if !self.has_capacity(n, current) {
				return Err(InsufficientCapacity);
			}
			if self.cursor.compare_and_set(current, next_sequence) {
				return Ok(next_sequence);
			}
		}
	}

	fn publish(&self, low: i64, high: i64) {
		for sequence in low..=high {
			self.set_available(sequence);
		}
		self.wait_strategy.signal_all_when_blocking();
	}

	fn is_available(&self, sequence: i64) -> bool {
		self.availability(sequence).load(Ordering::Acquire) == self.availability_flag(sequence)
	}

	fn claim(&self, sequence: i64) {
		self.cursor.set(sequence);
	}

	fn add_gating_sequences(&self, gating: &[Arc<Sequence>]) {
		for sequence in gating {
			self.gating.add(Arc::clone(sequence));
		}
	}

	fn remove_gating_sequence(&self, sequence: &Arc<Sequence>) -> bool {
		self.gating.remove(sequence)
	}

	fn get_minimum_sequence(&self) -> i64 {
		self.gating.minimum(self.cursor.get())
	}

	fn get_highest_published_sequence(&self, next_sequence: i64, available_sequence: i64) -> i64 {
		for sequence in next_sequence..=available_sequence {
			if !self.is_available(sequence) {
				return sequence - 1;
			}
		}
		available_sequence
	}
}
