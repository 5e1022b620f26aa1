use std::cell::UnsafeCell;
use std::sync::Arc;

use crate::barrier::SequenceBarrier;
use crate::errors::InsufficientCapacity;
use crate::event_translator::EventTranslator;
use crate::sequence::Sequence;
use crate::sequencer::{
	assert_power_of_two, MultiProducerSequencer, Sequencer, SingleProducerSequencer,
};
use crate::wait_strategy::WaitStrategy;

/// Pre-allocated slot storage plus the publication façade over a sequencer.
///
/// Every slot is created up front by the event factory; publication reuses
/// slots in place, so a steady-state ring allocates nothing. A slot is
/// mutated only by the producer holding its claim and read by consumers only
/// after publication, at least a full lap apart.
pub struct RingBuffer<E> {
	slots: Box<[UnsafeCell<E>]>,
	index_mask: i64,
	sequencer: Arc<dyn Sequencer>,
}

// SAFETY: slot access follows the claim/publish protocol: a slot is written
// through `UnsafeCell` only by the unique claimer of its sequence and read
// by consumers only after the Release publication that the claim protocol
// orders before any Acquire read of availability. `E: Send` for moving
// writes across producer threads, `E: Sync` for concurrent consumer reads.
unsafe impl<E: Send + Sync> Sync for RingBuffer<E> {}
unsafe impl<E: Send> Send for RingBuffer<E> {}

impl<E> RingBuffer<E> {
	/// Creates a ring for a single producing thread.
	///
	/// # Panics
	///
	/// Panics when `size` is not a positive power of two.
	pub fn with_single_producer<F, W>(event_factory: F, size: usize, wait_strategy: W) -> Self
	where
		F: FnMut() -> E,
		W: WaitStrategy + 'static,
	{
		let sequencer = SingleProducerSequencer::new(size, Arc::new(wait_strategy));
		Self::new(event_factory, size, Arc::new(sequencer))
	}

	/// Creates a ring that may be published to from many threads.
	///
	/// # Panics
	///
	/// Panics when `size` is not a positive power of two.
	pub fn with_multi_producer<F, W>(event_factory: F, size: usize, wait_strategy: W) -> Self
	where
		F: FnMut() -> E,
		W: WaitStrategy + 'static,
	{
		let sequencer = MultiProducerSequencer::new(size, Arc::new(wait_strategy));
		Self::new(event_factory, size, Arc::new(sequencer))
	}

	/// Creates a ring over an explicit sequencer.
	///
	/// # Panics
	///
	/// Panics when `size` is not a positive power of two or disagrees with
	/// the sequencer's buffer size.
	pub fn new<F>(mut event_factory: F, size: usize, sequencer: Arc<dyn Sequencer>) -> Self
	where
		F: FnMut() -> E,
	{
		assert_power_of_two(size);
		if sequencer.buffer_size() != size as i64 {
			panic!("sequencer buffer size does not match the ring size");
		}
		let slots: Box<[UnsafeCell<E>]> = (0..size)
			.map(|_| UnsafeCell::new(event_factory()))
			.collect();
		Self {
			slots,
			index_mask: (size - 1) as i64,
			sequencer,
		}
	}

	#[inline]
	fn slot(&self, sequence: i64) -> *mut E {
		self.slots[(sequence & self.index_mask) as usize].get()
	}

	/// Reads the slot holding `sequence`.
	///
	/// The caller must only pass sequences that are published (for
	/// consumers downstream of a barrier) or that it currently holds the
	/// claim on; reading a slot while another producer fills it is a data
	/// race the ring cannot detect.
	#[inline]
	pub fn get(&self, sequence: i64) -> &E {
		// SAFETY: per the contract above the slot is not concurrently
		// mutated while this shared borrow is live.
		unsafe { &*self.slot(sequence) }
	}

	/// Mutable access to the slot holding `sequence` for filling before
	/// publication.
	///
	/// # Safety
	///
	/// The caller must hold the claim on `sequence` (returned by
	/// [`next`](Self::next) or [`try_next`](Self::try_next) and not yet
	/// published) and must not create a second reference to the slot.
	#[inline]
	pub unsafe fn get_mut(&self, sequence: i64) -> &mut E {
		&mut *self.slot(sequence)
	}

	/// Sets the cursor to `sequence` and returns the slot for it, for
	/// initialization before any consumer is running.
	///
	/// # Safety
	///
	/// As for [`get_mut`](Self::get_mut); additionally no other producer
	/// may be claiming concurrently.
	pub unsafe fn claim_and_get_preallocated(&self, sequence: i64) -> &mut E {
		self.sequencer.claim(sequence);
		&mut *self.slot(sequence)
	}

	/// Claims the next `n` slots, parking while the ring is full. Returns
	/// the highest claimed sequence.
	pub fn next(&self, n: i64) -> i64 {
		self.sequencer.next(n)
	}

	/// Claims the next `n` slots without waiting.
	pub fn try_next(&self, n: i64) -> Result<i64, InsufficientCapacity> {
		self.sequencer.try_next(n)
	}

	/// Publishes a single claimed sequence.
	pub fn publish(&self, sequence: i64) {
		self.sequencer.publish(sequence, sequence);
	}

	/// Publishes every claimed sequence in `[low, high]`.
	pub fn publish_range(&self, low: i64, high: i64) {
		self.sequencer.publish(low, high);
	}

	/// Whether `sequence` has been published.
	pub fn is_published(&self, sequence: i64) -> bool {
		self.sequencer.is_available(sequence)
	}

	/// Registers consumer sequences producers must not lap.
	pub fn add_gating_sequences(&self, gating: &[Arc<Sequence>]) {
		self.sequencer.add_gating_sequences(gating);
	}

	/// Unregisters a gating sequence; returns whether it was present.
	pub fn remove_gating_sequence(&self, sequence: &Arc<Sequence>) -> bool {
		self.sequencer.remove_gating_sequence(sequence)
	}

	/// Minimum of the gating sequences and the cursor.
	pub fn get_minimum_sequence(&self) -> i64 {
		self.sequencer.get_minimum_sequence()
	}

	/// Creates a consumer barrier over this ring, additionally gated on
	/// `dependents` (sequences of consumers that must run first).
	pub fn new_barrier(&self, dependents: Vec<Arc<Sequence>>) -> SequenceBarrier {
		SequenceBarrier::new(Arc::clone(&self.sequencer), dependents)
	}

	/// Highest published sequence (producer cursor).
	pub fn cursor(&self) -> i64 {
		self.sequencer.cursor()
	}

	/// Number of slots.
	pub fn buffer_size(&self) -> i64 {
		self.sequencer.buffer_size()
	}

	/// Whether `required` further slots can be claimed without waiting.
	pub fn has_available_capacity(&self, required: i64) -> bool {
		self.sequencer.has_available_capacity(required)
	}

	/// Number of free slots right now.
	pub fn remaining_capacity(&self) -> i64 {
		self.sequencer.remaining_capacity()
	}

	/// Moves the cursor to `sequence` and publishes it. Initialization and
	/// recovery only; racy against concurrent producers.
	pub fn reset_to(&self, sequence: i64) {
		self.sequencer.claim(sequence);
		self.sequencer.publish(sequence, sequence);
	}

	/// Claims one slot, fills it through `translator` and publishes it.
	/// Parks while the ring is full. Returns the published sequence.
	///
	/// The claimed sequence is published even when the translator panics,
	/// so the pipeline never stalls on a claimed-but-unpublished slot; the
	/// panic then resumes. Consumers may observe the slot's previous
	/// contents in that case.
	pub fn publish_event<T>(&self, translator: &T) -> i64
	where
		T: EventTranslator<E>,
	{
		let sequence = self.sequencer.next(1);
		self.translate_and_publish(translator, sequence)
	}

	/// Non-blocking [`publish_event`](Self::publish_event).
	pub fn try_publish_event<T>(&self, translator: &T) -> Result<i64, InsufficientCapacity>
	where
		T: EventTranslator<E>,
	{
		let sequence = self.sequencer.try_next(1)?;
		Ok(self.translate_and_publish(translator, sequence))
	}

	/// Claims `translators.len()` slots, fills them in order and publishes
	/// the whole range. Returns the highest published sequence.
	///
	/// # Panics
	///
	/// Panics when the batch is empty or larger than the ring.
	pub fn publish_events<T>(&self, translators: &[T]) -> i64
	where
		T: EventTranslator<E>,
	{
		let high = self.sequencer.next(translators.len() as i64);
		self.translate_and_publish_batch(translators, high)
	}

	/// Non-blocking [`publish_events`](Self::publish_events).
	pub fn try_publish_events<T>(&self, translators: &[T]) -> Result<i64, InsufficientCapacity>
	where
		T: EventTranslator<E>,
	{
		let high = self.sequencer.try_next(translators.len() as i64)?;
		Ok(self.translate_and_publish_batch(translators, high))
	}

	fn translate_and_publish<T>(&self, translator: &T, sequence: i64) -> i64
	where
		T: EventTranslator<E>,
	{
		let _publish = PublishGuard {
			sequencer: self.sequencer.as_ref(),
			low: sequence,
			high: sequence,
		};
		// SAFETY: `sequence` was claimed above and is not yet published,
		// so this producer has exclusive access to the slot.
		let event = unsafe { &mut *self.slot(sequence) };
		translator.translate_to(event, sequence);
		sequence
	}

	fn translate_and_publish_batch<T>(&self, translators: &[T], high: i64) -> i64
	where
		T: EventTranslator<E>,
	{
		let low = high - translators.len() as i64 + 1;
		let _publish = PublishGuard {
			sequencer: self.sequencer.as_ref(),
			low,
			high,
		};
		for (offset, translator) in translators.iter().enumerate() {
			let sequence = low + offset as i64;
			// SAFETY: `[low, high]` was claimed above and is not yet
			// published, so this producer has exclusive access.
			let event = unsafe { &mut *self.slot(sequence) };
			translator.translate_to(event, sequence);
		}
		high
	}
}

/// Publishes the claimed range when dropped, on success and unwind alike.
/// A claimed sequence must never be left unpublished or every consumer
/// behind it stalls forever.
struct PublishGuard<'a> {
	sequencer: &'a dyn Sequencer,
	low: i64,
	high: i64,
}

impl Drop for PublishGuard<'_> {
	fn drop(&mut self) {
		self.sequencer.publish(self.low, self.high);
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::wait_strategy::BusySpinWaitStrategy;

	#[derive(Debug)]
	struct Event {
		value: i64,
	}

	fn ring(size: usize) -> RingBuffer<Event> {
		RingBuffer::with_single_producer(|| Event { value: -1 }, size, BusySpinWaitStrategy)
	}

	#[test]
	#[should_panic(expected = "power of 2")]
	fn size_must_be_a_power_of_two() {
		ring(6);
	}

	#[test]
	fn slots_are_pre_allocated_by_the_factory() {
		let mut next = 0;
		let ring = RingBuffer::with_single_producer(
			|| {
				next += 1;
				Event { value: next }
			},
			4,
			BusySpinWaitStrategy,
		);
		assert_eq!(ring.buffer_size(), 4);
		// Slot addressing wraps at the index mask.
		assert_eq!(ring.get(0).value, 1);
		assert_eq!(ring.get(4).value, 1);
		assert_eq!(ring.get(7).value, 4);
	}

	#[test]
	fn publish_event_translates_into_the_claimed_slot() {
		let ring = ring(8);
		let consumer = Arc::new(Sequence::new(i64::MAX));
		ring.add_gating_sequences(&[consumer]);

		let sequence = ring.publish_event(&|event: &mut Event, sequence: i64| {
			event.value = sequence * 10;
		});
		assert_eq!(sequence, 0);
		assert!(ring.is_published(0));
		assert_eq!(ring.get(0).value, 0);

		let sequence = ring.publish_event(&|event: &mut Event, sequence: i64| {
			event.value = sequence * 10;
		});
		assert_eq!(sequence, 1);
		assert_eq!(ring.get(1).value, 10);
	}

	#[test]
	fn publish_events_fills_a_contiguous_batch() {
		let ring = ring(8);
		let translators: Vec<_> = (0..3i64)
			.map(|i| {
				move |event: &mut Event, _sequence: i64| {
					event.value = 100 + i;
				}
			})
			.collect();

		let high = ring.publish_events(&translators);
		assert_eq!(high, 2);
		assert_eq!(ring.cursor(), 2);
		assert_eq!(ring.get(0).value, 100);
		assert_eq!(ring.get(1).value, 101);
		assert_eq!(ring.get(2).value, 102);
	}

	#[test]
	#[should_panic(expected = "batch size")]
	fn empty_batch_is_rejected() {
		let translators: Vec<fn(&mut Event, i64)> = Vec::new();
		ring(8).publish_events(&translators);
	}

	#[test]
	fn try_publish_reports_a_full_ring() {
		let ring = ring(2);
		let stuck = Arc::new(Sequence::default());
		ring.add_gating_sequences(&[stuck]);

		let fill = |event: &mut Event, sequence: i64| {
			event.value = sequence;
		};
		assert_eq!(ring.try_publish_event(&fill), Ok(0));
		assert_eq!(ring.try_publish_event(&fill), Ok(1));
		assert_eq!(ring.try_publish_event(&fill), Err(InsufficientCapacity));
		assert_eq!(ring.remaining_capacity(), 0);
	}

	#[test]
	fn translator_panic_still_publishes_the_claimed_sequence() {
		let ring = ring(8);

		let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
			ring.publish_event(&|_event: &mut Event, _sequence: i64| {
				panic!("translation failed");
			});
		}));
		assert!(result.is_err());

		// The claim must not be left dangling: sequence 0 is published
		// (with whatever the slot held) and the next claim is sequence 1.
		assert!(ring.is_published(0));
		assert_eq!(ring.next(1), 1);
	}

	#[test]
	fn reset_to_moves_the_cursor() {
		let ring = ring(8);
		ring.reset_to(41);
		assert_eq!(ring.cursor(), 41);
		assert!(ring.is_published(41));
		assert_eq!(ring.next(1), 42);
	}
}
