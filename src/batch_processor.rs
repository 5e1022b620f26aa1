use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use crate::barrier::SequenceBarrier;
use crate::event_handler::{EventHandler, ExceptionHandler, LoggingExceptionHandler};
use crate::ring_buffer::RingBuffer;
use crate::sequence::Sequence;

const IDLE: u8 = 0;
const HALTED: u8 = 1;
const RUNNING: u8 = 2;

/// Exclusive consumer: processes every published sequence in order, in
/// batches bounded by what one barrier wait returned.
///
/// The processor is moved onto its thread and driven by [`run`](Self::run);
/// control from the outside goes through a [`ProcessorHandle`] taken
/// before the move:
///
/// ```
/// use ringbus::{BatchEventProcessor, BusySpinWaitStrategy, RingBuffer};
/// use std::sync::Arc;
/// use std::thread;
///
/// let ring = Arc::new(RingBuffer::with_single_producer(|| 0i64, 8, BusySpinWaitStrategy));
/// let barrier = ring.new_barrier(vec![]);
/// let mut processor = BatchEventProcessor::new(
///     Arc::clone(&ring),
///     barrier,
///     |event: &i64, _sequence: i64, _end_of_batch: bool| {
///         let _ = event;
///     },
/// );
/// ring.add_gating_sequences(&[processor.sequence()]);
///
/// let handle = processor.handle();
/// let consumer = thread::spawn(move || processor.run());
///
/// ring.publish_event(&|event: &mut i64, sequence: i64| *event = sequence);
///
/// while handle.sequence().get() < 0 {
///     thread::yield_now();
/// }
/// handle.halt();
/// consumer.join().unwrap();
/// ```
pub struct BatchEventProcessor<E, H> {
	ring_buffer: Arc<RingBuffer<E>>,
	barrier: Arc<SequenceBarrier>,
	handler: H,
	exception_handler: Box<dyn ExceptionHandler<E>>,
	sequence: Arc<Sequence>,
	running: Arc<AtomicU8>,
}

/// Cloneable remote control for a processor that has been moved onto its
/// thread.
#[derive(Clone)]
pub struct ProcessorHandle {
	running: Arc<AtomicU8>,
	barrier: Arc<SequenceBarrier>,
	sequence: Arc<Sequence>,
}

impl ProcessorHandle {
	pub(crate) fn new(
		running: Arc<AtomicU8>,
		barrier: Arc<SequenceBarrier>,
		sequence: Arc<Sequence>,
	) -> Self {
		Self {
			running,
			barrier,
			sequence,
		}
	}

	/// Asks the processor to stop. The current batch finishes; the next
	/// barrier wait observes the alert and the run loop exits.
	pub fn halt(&self) {
		self.running.store(HALTED, Ordering::SeqCst);
		self.barrier.alert();
	}

	/// Whether the processor is currently inside [`BatchEventProcessor::run`].
	pub fn is_running(&self) -> bool {
		self.running.load(Ordering::SeqCst) == RUNNING
	}

	/// The processor's progress sequence.
	pub fn sequence(&self) -> Arc<Sequence> {
		Arc::clone(&self.sequence)
	}
}

impl<E, H> BatchEventProcessor<E, H>
where
	H: EventHandler<E>,
{
	/// Creates a processor reading `ring_buffer` through `barrier`, with
	/// the logging default exception handler.
	pub fn new(ring_buffer: Arc<RingBuffer<E>>, barrier: SequenceBarrier, handler: H) -> Self {
		Self {
			ring_buffer,
			barrier: Arc::new(barrier),
			handler,
			exception_handler: Box::new(LoggingExceptionHandler),
			sequence: Arc::new(Sequence::default()),
			running: Arc::new(AtomicU8::new(IDLE)),
		}
	}

	/// Replaces the exception handler.
	pub fn set_exception_handler(&mut self, exception_handler: Box<dyn ExceptionHandler<E>>) {
		self.exception_handler = exception_handler;
	}

	/// The processor's progress sequence, to be registered as a gating
	/// sequence on the ring and as a dependent sequence of downstream
	/// barriers.
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

	/// Asks the processor to stop; equivalent to
	/// [`ProcessorHandle::halt`].
	pub fn halt(&self) {
		self.running.store(HALTED, Ordering::SeqCst);
		self.barrier.alert();
	}

	/// Runs the processing loop until halted. Occupies the calling thread.
	///
	/// # Panics
	///
	/// Panics when the processor is already running on another thread.
	pub fn run(&mut self) {
		match self
			.running
			.compare_exchange(IDLE, RUNNING, Ordering::SeqCst, Ordering::SeqCst)
		{
			Ok(_) => {}
			Err(RUNNING) => panic!("batch event processor is already running"),
			// Halted before it ever ran: report lifecycle and bail out.
			Err(_) => {
				self.notify_start();
				self.notify_shutdown();
				self.running.store(IDLE, Ordering::SeqCst);
				return;
			}
		}

		self.barrier.clear_alert();
		// A halt racing with start-up may have fired its alert before the
		// clear above; the store to `running` is ordered before it, so this
		// re-check closes the window.
		if self.running.load(Ordering::SeqCst) != RUNNING {
			self.notify_start();
			self.notify_shutdown();
			self.running.store(IDLE, Ordering::SeqCst);
			return;
		}
		if self.notify_start() {
			self.process_events();
			self.notify_shutdown();
		}
		self.running.store(IDLE, Ordering::SeqCst);
	}

	fn process_events(&mut self) {
		let mut next_sequence = self.sequence.get() + 1;
		loop {
			match self.barrier.wait_for(next_sequence) {
				Ok(available) => {
					while next_sequence <= available {
						let end_of_batch = next_sequence == available;
						let event = self.ring_buffer.get(next_sequence);
						if let Err(error) = self.handler.on_event(event, next_sequence, end_of_batch)
						{
							self.exception_handler
								.handle_event_exception(error, next_sequence, event);
						}
						next_sequence += 1;
					}
					// Publish progress once per batch, not per event.
					self.sequence.set(available);
				}
				Err(_alert) => {
					if self.running.load(Ordering::SeqCst) != RUNNING {
						break;
					}
					self.barrier.clear_alert();
				}
			}
		}
	}

	fn notify_start(&mut self) -> bool {
		match self.handler.on_start() {
			Ok(()) => true,
			Err(error) => {
				self.exception_handler.handle_on_start_exception(error);
				false
			}
		}
	}

	fn notify_shutdown(&mut self) {
		if let Err(error) = self.handler.on_shutdown() {
			self.exception_handler.handle_on_shutdown_exception(error);
		}
	}
}
