//! Bounded, pre-allocated ring-buffer event exchange for low latency
//! inter-thread communication.
//!
//! A fixed ring of pre-allocated slots is the only synchronization point
//! between producing and consuming threads. Producers claim slot ranges
//! from a [`Sequencer`] (single- or multi-producer), fill the slots in
//! place and publish them; consumers observe publication through a
//! [`SequenceBarrier`] and process events without any further allocation
//! or locking on the hot path. Backpressure falls out of the same
//! machinery: producers can never lap the slowest registered consumer.
//!
//! # Consuming
//!
//! Two consumption modes are provided:
//!
//! - [`BatchEventProcessor`] — exclusive consumption: one consumer sees
//!   every event, in sequence order, with batch boundaries.
//! - [`WorkerPool`] — competitive consumption: a pool of workers shares
//!   the stream and every event is processed by exactly one of them.
//!
//! Consumers run on dedicated OS threads; the only place a consumer thread
//! parks is inside its [`WaitStrategy`], which is also what a producer
//! nudges after publishing.
//!
//! # Example
//!
//! ```
//! use ringbus::{BatchEventProcessor, BlockingWaitStrategy, RingBuffer};
//! use std::sync::Arc;
//! use std::thread;
//! use std::time::Duration;
//!
//! // The data entity exchanged through the ring.
//! struct Trade {
//!     price: f64,
//! }
//!
//! // Slots are allocated once, up front, by a factory closure.
//! let ring = Arc::new(RingBuffer::with_single_producer(
//!     || Trade { price: 0.0 },
//!     64,
//!     BlockingWaitStrategy::new(),
//! ));
//!
//! // An event handler is any closure taking (&event, sequence, end_of_batch).
//! let mut processor = BatchEventProcessor::new(
//!     Arc::clone(&ring),
//!     ring.new_barrier(vec![]),
//!     |trade: &Trade, _sequence: i64, _end_of_batch: bool| {
//!         assert!(trade.price > 0.0);
//!     },
//! );
//!
//! // The processor's sequence gates the producer so the ring cannot wrap
//! // over unprocessed trades.
//! ring.add_gating_sequences(&[processor.sequence()]);
//!
//! let handle = processor.handle();
//! let consumer = thread::spawn(move || processor.run());
//!
//! for i in 1..=10 {
//!     ring.publish_event(&|trade: &mut Trade, _sequence: i64| {
//!         trade.price = i as f64;
//!     });
//! }
//!
//! // Wait for the consumer to catch up, then stop it.
//! while handle.sequence().get() < 9 {
//!     thread::sleep(Duration::from_millis(1));
//! }
//! handle.halt();
//! consumer.join().unwrap();
//! ```

#![deny(rustdoc::broken_intra_doc_links)]
#![warn(missing_docs)]

mod barrier;
mod batch_processor;
mod cyclic_barrier;
mod errors;
mod event_handler;
mod event_translator;
mod executor;
mod ring_buffer;
mod sequence;
mod sequencer;
mod wait_strategy;
mod worker_pool;

pub use crate::barrier::SequenceBarrier;
pub use crate::batch_processor::{BatchEventProcessor, ProcessorHandle};
pub use crate::cyclic_barrier::CyclicBarrier;
pub use crate::errors::{Alert, BarrierError, InsufficientCapacity};
pub use crate::event_handler::{
	EventHandler, ExceptionHandler, HandlerError, LoggingExceptionHandler, WorkHandler,
};
pub use crate::event_translator::EventTranslator;
pub use crate::executor::{Executor, ThreadPerTaskExecutor};
pub use crate::ring_buffer::RingBuffer;
pub use crate::sequence::{Sequence, SequenceGroup};
pub use crate::sequencer::{MultiProducerSequencer, Sequencer, SingleProducerSequencer};
pub use crate::wait_strategy::{
	BlockingWaitStrategy, BusySpinWaitStrategy, SleepingWaitStrategy, WaitStrategy,
	YieldingWaitStrategy,
};
pub use crate::worker_pool::{WorkProcessor, WorkerPool};
