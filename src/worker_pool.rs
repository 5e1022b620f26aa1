use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

use tracing::debug;

use crate::barrier::SequenceBarrier;
use crate::batch_processor::ProcessorHandle;
use crate::event_handler::{ExceptionHandler, LoggingExceptionHandler, WorkHandler};
use crate::executor::Executor;
use crate::ring_buffer::RingBuffer;
use crate::sequence::Sequence;

const IDLE: u8 = 0;
const HALTED: u8 = 1;
const RUNNING: u8 = 2;

/// Competitive consumer: races its siblings for the next sequence off a
/// shared work sequence, so each published event is processed by exactly one
/// worker in the pool.
///
/// Built and owned by a [`WorkerPool`]; not usually constructed directly.
pub struct WorkProcessor<E, W> {
	ring_buffer: Arc<RingBuffer<E>>,
	barrier: Arc<SequenceBarrier>,
	handler: W,
	exception_handler: Box<dyn ExceptionHandler<E>>,
	work_sequence: Arc<Sequence>,
	sequence: Arc<Sequence>,
	running: Arc<AtomicU8>,
}

impl<E, W> WorkProcessor<E, W>
where
	W: WorkHandler<E>,
{
	/// Creates a processor competing on `work_sequence` through `barrier`.
	pub fn new(
		ring_buffer: Arc<RingBuffer<E>>,
		barrier: SequenceBarrier,
		handler: W,
		work_sequence: Arc<Sequence>,
	) -> Self {
		Self {
			ring_buffer,
			barrier: Arc::new(barrier),
			handler,
			exception_handler: Box::new(LoggingExceptionHandler),
			work_sequence,
			sequence: Arc::new(Sequence::default()),
			running: Arc::new(AtomicU8::new(IDLE)),
		}
	}

	/// Replaces the exception handler.
	pub fn set_exception_handler(&mut self, exception_handler: Box<dyn ExceptionHandler<E>>) {
		self.exception_handler = exception_handler;
	}

	/// This worker's progress sequence; gates producers while the pool
	/// runs.
	pub fn sequence(&self) -> Arc<Sequence> {
		Arc::clone(&self.sequence)
	}

	/// Remote control usable after the processor moved onto its thread.
	pub fn handle(&self) -> ProcessorHandle {
		ProcessorHandle::new(
			Arc::clone(&self.running),
			Arc::clone(&self.barrier),
			Arc::clone(&self.sequence),
		)
	}

	/// Runs the claim/process loop until halted. Occupies the calling
	/// thread.
	///
	/// # Panics
	///
	/// Panics when the processor is already running.
	pub fn run(&mut self) {
		if self
			.running
			.compare_exchange(IDLE, RUNNING, Ordering::SeqCst, Ordering::SeqCst)
			.is_err()
		{
			panic!("work processor is already running");
		}
		self.barrier.clear_alert();
		// A halt racing with start-up may have fired its alert before the
		// clear above; the store to `running` is ordered before it, so this
		// re-check closes the window.
		if self.running.load(Ordering::SeqCst) != RUNNING {
			self.running.store(IDLE, Ordering::SeqCst);
			return;
		}

		let mut processed = true;
		let mut cached_available = i64::MIN;
		let mut next_sequence = self.sequence.get();

		loop {
			if processed {
				processed = false;
				// Race the siblings for the next sequence. Publishing our
				// own progress as `claim - 1` keeps producers gated on
				// slots this worker has not finished with.
				loop {
					next_sequence = self.work_sequence.get() + 1;
					self.sequence.set(next_sequence - 1);
					if self
						.work_sequence
						.compare_and_set(next_sequence - 1, next_sequence)
					{
						break;
					}
				}
			}

			if cached_available >= next_sequence {
				let event = self.ring_buffer.get(next_sequence);
				if let Err(error) = self.handler.on_event(event, next_sequence) {
					self.exception_handler
						.handle_event_exception(error, next_sequence, event);
				}
				processed = true;
			} else {
				match self.barrier.wait_for(next_sequence) {
					Ok(available) => cached_available = available,
					Err(_alert) => {
						if self.running.load(Ordering::SeqCst) != RUNNING {
							break;
						}
						self.barrier.clear_alert();
					}
				}
			}
		}

		self.running.store(IDLE, Ordering::SeqCst);
	}
}

/// A pool of [`WorkProcessor`]s sharing one work sequence: the published
/// sequences are partitioned across the workers, each processed exactly
/// once.
///
/// ```
/// use ringbus::{BusySpinWaitStrategy, RingBuffer, ThreadPerTaskExecutor, WorkerPool};
/// use std::sync::Arc;
///
/// let ring = Arc::new(RingBuffer::with_multi_producer(|| 0u64, 16, BusySpinWaitStrategy));
/// let workers: Vec<_> = (0..2)
///     .map(|_| |event: &u64, _sequence: i64| { let _ = event; })
///     .collect();
/// let mut pool = WorkerPool::new(Arc::clone(&ring), workers);
///
/// let executor = ThreadPerTaskExecutor::new();
/// pool.start(&executor);
/// for _ in 0..8 {
///     ring.publish_event(&|event: &mut u64, sequence: i64| *event = sequence as u64);
/// }
/// pool.drain_and_halt();
/// executor.join();
/// ```
pub struct WorkerPool<E, W> {
	ring_buffer: Arc<RingBuffer<E>>,
	work_sequence: Arc<Sequence>,
	processors: Vec<WorkProcessor<E, W>>,
	handles: Vec<ProcessorHandle>,
	started: AtomicBool,
}

impl<E, W> WorkerPool<E, W>
where
	E: Send + Sync + 'static,
	W: WorkHandler<E> + 'static,
{
	/// Creates one worker per handler, all competing on a fresh work
	/// sequence. Each worker gets its own barrier over the ring.
	pub fn new(ring_buffer: Arc<RingBuffer<E>>, handlers: Vec<W>) -> Self {
		let work_sequence = Arc::new(Sequence::default());
		let mut processors = Vec::with_capacity(handlers.len());
		for handler in handlers {
			processors.push(WorkProcessor::new(
				Arc::clone(&ring_buffer),
				ring_buffer.new_barrier(vec![]),
				handler,
				Arc::clone(&work_sequence),
			));
		}
		let handles = processors.iter().map(|p| p.handle()).collect();
		Self {
			ring_buffer,
			work_sequence,
			processors,
			handles,
			started: AtomicBool::new(false),
		}
	}

	/// Every sequence owned by the pool: one per worker plus the shared
	/// work sequence. The producer gating set while the pool runs.
	pub fn worker_sequences(&self) -> Vec<Arc<Sequence>> {
		let mut sequences: Vec<Arc<Sequence>> =
			self.handles.iter().map(|h| h.sequence()).collect();
		sequences.push(Arc::clone(&self.work_sequence));
		sequences
	}

	/// Launches every worker on `executor`. Single-use.
	///
	/// Worker sequences are aligned with the current cursor and registered
	/// as gating sequences before any worker starts, so no event published
	/// from here on can be lost or overrun the pool.
	///
	/// # Panics
	///
	/// Panics when the pool was already started.
	pub fn start(&mut self, executor: &impl Executor) {
		if self.started.swap(true, Ordering::SeqCst) {
			panic!("worker pool has already been started and cannot be restarted");
		}

		let cursor = self.ring_buffer.cursor();
		self.work_sequence.set(cursor);
		for processor in &self.processors {
			processor.sequence().set(cursor);
		}
		self.ring_buffer.add_gating_sequences(&self.worker_sequences());

		debug!(workers = self.processors.len(), cursor, "starting worker pool");
		for mut processor in self.processors.drain(..) {
			executor.execute(Box::new(move || processor.run()));
		}
	}

	/// Waits until every published sequence has been consumed, then halts
	/// the workers.
	pub fn drain_and_halt(&self) {
		let worker_sequences = self.worker_sequences();
		while self.ring_buffer.cursor()
			> crate::sequence::minimum_sequence(&worker_sequences, i64::MAX)
		{
			std::thread::yield_now();
		}
		self.halt();
	}

	/// Halts the workers immediately, dropping any unconsumed events, and
	/// clears the started flag.
	pub fn halt(&self) {
		for handle in &self.handles {
			handle.halt();
		}
		self.started.store(false, Ordering::SeqCst);
	}

	/// Whether the pool has been started and not yet halted.
	pub fn is_running(&self) -> bool {
		self.started.load(Ordering::SeqCst)
	}

	/// The shared work sequence workers claim from.
	pub fn work_sequence(&self) -> Arc<Sequence> {
		Arc::clone(&self.work_sequence)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::event_handler::HandlerError;
	use crate::executor::ThreadPerTaskExecutor;
	use crate::wait_strategy::BlockingWaitStrategy;
	use std::collections::HashSet;
	use std::sync::mpsc::{self, Sender};

	struct PartitionRecorder {
		worker: usize,
		sender: Sender<(usize, i64, u64)>,
	}

	impl WorkHandler<u64> for PartitionRecorder {
		fn on_event(&mut self, event: &u64, sequence: i64) -> Result<(), HandlerError> {
			self.sender.send((self.worker, sequence, *event)).unwrap();
			Ok(())
		}
	}

	#[test]
	fn workers_partition_the_published_sequences() {
		let ring = Arc::new(RingBuffer::with_multi_producer(
			|| 0u64,
			16,
			BlockingWaitStrategy::new(),
		));
		let (sender, receiver) = mpsc::channel();
		let handlers: Vec<PartitionRecorder> = (0..3)
			.map(|worker| PartitionRecorder {
				worker,
				sender: sender.clone(),
			})
			.collect();
		drop(sender);

		let mut pool = WorkerPool::new(Arc::clone(&ring), handlers);
		assert_eq!(pool.work_sequence().get(), -1);

		let executor = ThreadPerTaskExecutor::new();
		pool.start(&executor);
		assert!(pool.is_running());

		for _ in 0..100 {
			ring.publish_event(&|event: &mut u64, sequence: i64| {
				*event = sequence as u64 * 2;
			});
		}

		pool.drain_and_halt();
		executor.join();
		assert!(!pool.is_running());

		let mut seen = HashSet::new();
		for (_worker, sequence, event) in receiver.try_iter() {
			assert_eq!(event, sequence as u64 * 2);
			// Exactly one worker per sequence.
			assert!(seen.insert(sequence), "sequence {sequence} delivered twice");
		}
		let expected: HashSet<i64> = (0..100).collect();
		assert_eq!(seen, expected);
	}

	#[test]
	fn pool_gates_producers_until_workers_catch_up() {
		let ring = Arc::new(RingBuffer::with_multi_producer(
			|| 0u64,
			4,
			BlockingWaitStrategy::new(),
		));
		let (sender, receiver) = mpsc::channel();
		let handlers = vec![PartitionRecorder { worker: 0, sender }];

		let mut pool = WorkerPool::new(Arc::clone(&ring), handlers);
		let executor = ThreadPerTaskExecutor::new();
		pool.start(&executor);

		// Publishing more events than the ring holds only works because
		// the workers drain it; an ungated producer would overrun.
		for _ in 0..32 {
			ring.publish_event(&|event: &mut u64, sequence: i64| {
				*event = sequence as u64;
			});
		}

		pool.drain_and_halt();
		executor.join();

		let delivered: Vec<i64> = receiver.try_iter().map(|(_, sequence, _)| sequence).collect();
		assert_eq!(delivered.len(), 32);
	}

	#[test]
	#[should_panic(expected = "already been started")]
	fn pool_cannot_be_started_twice() {
		let ring = Arc::new(RingBuffer::with_multi_producer(
			|| 0u64,
			4,
			BlockingWaitStrategy::new(),
		));
		let handlers: Vec<fn(&u64, i64)> = vec![|_event, _sequence| {}];
		let mut pool = WorkerPool::new(ring, handlers);

		let executor = ThreadPerTaskExecutor::new();
		pool.start(&executor);
		// The parked worker is abandoned when the test process exits.
		pool.start(&executor);
	}
}
