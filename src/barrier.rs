use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::errors::Alert;
use crate::sequence::{minimum_sequence, Sequence};
use crate::sequencer::Sequencer;
use crate::wait_strategy::WaitStrategy;

/// Consumer-side gate over producer progress and dependency consumers.
///
/// A barrier waits on the sequencer's cursor plus the sequences of any
/// upstream consumers this consumer depends on, and owns the alert flag
/// that lets [`halt`](crate::ProcessorHandle::halt) interrupt a parked
/// processor.
pub struct SequenceBarrier {
	sequencer: Arc<dyn Sequencer>,
	wait_strategy: Arc<dyn WaitStrategy>,
	cursor: Arc<Sequence>,
	dependents: Box<[Arc<Sequence>]>,
	alerted: AtomicBool,
}

impl SequenceBarrier {
	/// Creates a barrier over `sequencer`, additionally gated on
	/// `dependents`. An empty dependent set gates on the cursor alone.
	pub fn new(sequencer: Arc<dyn Sequencer>, dependents: Vec<Arc<Sequence>>) -> Self {
		let wait_strategy = Arc::clone(sequencer.wait_strategy());
		let cursor = sequencer.cursor_sequence();
		let dependents = if dependents.is_empty() {
			vec![Arc::clone(&cursor)]
		} else {
			dependents
		};
		Self {
			sequencer,
			wait_strategy,
			cursor,
			dependents: dependents.into_boxed_slice(),
			alerted: AtomicBool::new(false),
		}
	}

	/// Waits until `sequence` is reachable and returns the highest
	/// contiguous published sequence, which may be greater than requested
	/// (the rest of the batch) or smaller (no progress yet; retry).
	pub fn wait_for(&self, sequence: i64) -> Result<i64, Alert> {
		self.check_alert()?;

		let available =
			self.wait_strategy
				.wait_for(sequence, &self.cursor, &self.dependents, &self.alerted)?;

		// A wait strategy may return early; alerts raised while it
		// unwound must still win.
		self.check_alert()?;

		if available < sequence {
			return Ok(available);
		}
		Ok(self
			.sequencer
			.get_highest_published_sequence(sequence, available))
	}

	/// Minimum of the dependent sequences this barrier gates on.
	pub fn get_cursor(&self) -> i64 {
		minimum_sequence(&self.dependents, i64::MAX)
	}

	/// Signals the waiting processor to stop and wakes it.
	pub fn alert(&self) {
		self.alerted.store(true, Ordering::Release);
		self.wait_strategy.signal_all_when_blocking();
	}

	/// Clears the alert so the barrier can be waited on again.
	pub fn clear_alert(&self) {
		self.alerted.store(false, Ordering::Release);
	}

	/// Whether the barrier is currently alerted.
	pub fn is_alerted(&self) -> bool {
		self.alerted.load(Ordering::Acquire)
	}

	/// Returns [`Alert`] when the barrier is alerted.
	pub fn check_alert(&self) -> Result<(), Alert> {
		if self.is_alerted() {
			Err(Alert)
		} else {
			Ok(())
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::sequencer::{MultiProducerSequencer, SingleProducerSequencer};
	use crate::wait_strategy::BusySpinWaitStrategy;

	fn single_producer_barrier(size: usize) -> (Arc<SingleProducerSequencer>, SequenceBarrier) {
		let sequencer = Arc::new(SingleProducerSequencer::new(
			size,
			Arc::new(BusySpinWaitStrategy),
		));
		let barrier = Arc::clone(&sequencer).new_barrier(vec![]);
		(sequencer, barrier)
	}

	#[test]
	fn wait_for_returns_published_run() {
		let (sequencer, barrier) = single_producer_barrier(8);

		sequencer.next(3);
		sequencer.publish(0, 2);

		assert_eq!(barrier.wait_for(0), Ok(2));
		assert_eq!(barrier.get_cursor(), 2);
	}

	#[test]
	fn alert_interrupts_and_clears() {
		let (_sequencer, barrier) = single_producer_barrier(8);

		assert!(!barrier.is_alerted());
		barrier.alert();
		assert!(barrier.is_alerted());
		assert_eq!(barrier.wait_for(0), Err(Alert));
		assert_eq!(barrier.check_alert(), Err(Alert));

		barrier.clear_alert();
		assert!(!barrier.is_alerted());
		assert_eq!(barrier.check_alert(), Ok(()));
	}

	#[test]
	fn multi_producer_barrier_stops_at_publication_gaps() {
		let sequencer = Arc::new(MultiProducerSequencer::new(
			8,
			Arc::new(BusySpinWaitStrategy),
		));
		let barrier = Arc::clone(&sequencer).new_barrier(vec![]);

		// Claim 0..=2 but publish only 0 and 2: the cursor says 2 yet the
		// readable run ends at 0.
		sequencer.next(3);
		sequencer.publish(0, 0);
		sequencer.publish(2, 2);
		assert_eq!(barrier.wait_for(0), Ok(0));

		sequencer.publish(1, 1);
		assert_eq!(barrier.wait_for(0), Ok(2));
	}

	#[test]
	fn dependent_sequences_gate_the_barrier() {
		let sequencer = Arc::new(SingleProducerSequencer::new(
			8,
			Arc::new(BusySpinWaitStrategy),
		));
		let upstream = Arc::new(Sequence::default());
		let barrier = Arc::clone(&sequencer).new_barrier(vec![Arc::clone(&upstream)]);

		sequencer.next(2);
		sequencer.publish(0, 1);

		// Published, but the upstream consumer has not processed anything.
		assert_eq!(barrier.get_cursor(), -1);
		upstream.set(1);
		assert_eq!(barrier.wait_for(0), Ok(1));
	}
}
