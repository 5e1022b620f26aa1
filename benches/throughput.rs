use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::thread;

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use ringbus::{BatchEventProcessor, BusySpinWaitStrategy, RingBuffer, ThreadPerTaskExecutor, WorkerPool};

struct Event {
	data: i64,
}

pub fn spsc_benchmark(c: &mut Criterion) {
	let ring = Arc::new(RingBuffer::with_single_producer(
		|| Event { data: 0 },
		64,
		BusySpinWaitStrategy,
	));
	// Use an AtomicI64 to "extract" the value from the processing thread.
	let sink = Arc::new(AtomicI64::new(0));
	let sink2 = Arc::clone(&sink);
	let mut processor = BatchEventProcessor::new(
		Arc::clone(&ring),
		ring.new_barrier(vec![]),
		move |event: &Event, _sequence: i64, _end_of_batch: bool| {
			sink.store(event.data, Ordering::Release);
		},
	);
	ring.add_gating_sequences(&[processor.sequence()]);
	let handle = processor.handle();
	let consumer = thread::spawn(move || processor.run());

	let mut data = 0;
	c.bench_function("spsc", |b| {
		b.iter(|| {
			data += 1;
			ring.publish_event(&|event: &mut Event, _sequence: i64| {
				event.data = black_box(data);
			});
			// Wait for the event to be processed before the next iteration.
			let expected = black_box(data);
			while sink2.load(Ordering::Acquire) != expected {}
		})
	});

	handle.halt();
	consumer.join().unwrap();
}

pub fn worker_pool_benchmark(c: &mut Criterion) {
	let ring = Arc::new(RingBuffer::with_multi_producer(
		|| Event { data: 0 },
		64,
		BusySpinWaitStrategy,
	));
	let sink = Arc::new(AtomicI64::new(0));
	let handlers: Vec<_> = (0..2)
		.map(|_| {
			let sink = Arc::clone(&sink);
			move |event: &Event, _sequence: i64| {
				sink.fetch_add(black_box(event.data), Ordering::AcqRel);
			}
		})
		.collect();
	let mut pool = WorkerPool::new(Arc::clone(&ring), handlers);
	let executor = ThreadPerTaskExecutor::new();
	pool.start(&executor);

	let sink2 = Arc::clone(&sink);
	let mut published = 0i64;
	c.bench_function("worker_pool", |b| {
		b.iter(|| {
			published += 1;
			ring.publish_event(&|event: &mut Event, _sequence: i64| {
				event.data = black_box(1);
			});
			while sink2.load(Ordering::Acquire) < published {}
		})
	});

	pool.drain_and_halt();
	executor.join();
}

criterion_group!(benches, spsc_benchmark, worker_pool_benchmark);
criterion_main!(benches);
