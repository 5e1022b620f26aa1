//! Strategies for waiting until a target sequence has been published.
//!
//! The lowest latency possible is [`BusySpinWaitStrategy`]; the other
//! strategies trade latency for less wasted CPU time and power. The blocking
//! variant is the only one that parks on a condition and therefore the only
//! one producers must wake via
//! [`signal_all_when_blocking`](WaitStrategy::signal_all_when_blocking).

use std::hint;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::Duration;

use crate::errors::Alert;
use crate::sequence::{minimum_sequence, Sequence};

/// How a consumer waits for a sequence to become available.
///
/// `wait_for` blocks until the minimum of `dependents` reaches `sequence`,
/// returning that minimum. `cursor` is the producer cursor the blocking
/// variant parks on; for a consumer with no upstream consumers the dependent
/// set is the cursor itself. Every polling iteration re-checks `alerted` and
/// returns [`Alert`] promptly when it is set.
pub trait WaitStrategy: Send + Sync {
	/// Waits for `sequence` to be reachable, returning the highest dependent
	/// minimum observed (`>= sequence`), or [`Alert`] if alerted.
	fn wait_for(
		&self,
		sequence: i64,
		cursor: &Sequence,
		dependents: &[Arc<Sequence>],
		alerted: &AtomicBool,
	) -> Result<i64, Alert>;

	/// Wakes any consumer parked in a blocking wait. Called by producers
	/// after publication and by barriers on alert. No-op for strategies
	/// that never park.
	fn signal_all_when_blocking(&self) {}
}

#[inline]
fn check_alert(alerted: &AtomicBool) -> Result<(), Alert> {
	if alerted.load(Ordering::Acquire) {
		Err(Alert)
	} else {
		Ok(())
	}
}

/// Parks on a mutex/condvar until the producer cursor reaches the target,
/// then spins on the dependent sequences.
///
/// The best choice when CPU time matters more than latency, e.g. when
/// consumers share cores with other work.
pub struct BlockingWaitStrategy {
	guard: Mutex<()>,
	condvar: Condvar,
}

impl BlockingWaitStrategy {
	/// Creates the strategy.
	pub fn new() -> Self {
		Self {
			guard: Mutex::new(()),
			condvar: Condvar::new(),
		}
	}
}

impl Default for BlockingWaitStrategy {
	fn default() -> Self {
		Self::new()
	}
}

impl WaitStrategy for BlockingWaitStrategy {
	fn wait_for(
		&self,
		sequence: i64,
		cursor: &Sequence,
		dependents: &[Arc<Sequence>],
		alerted: &AtomicBool,
	) -> Result<i64, Alert> {
		if cursor.get() < sequence {
			let mut guard = self.guard.lock().unwrap();
			while cursor.get() < sequence {
				check_alert(alerted)?;
				guard = self.condvar.wait(guard).unwrap();
			}
		}

		let mut available = minimum_sequence(dependents, i64::MAX);
		while available < sequence {
			check_alert(alerted)?;
			hint::spin_loop();
			available = minimum_sequence(dependents, i64::MAX);
		}
		Ok(available)
	}

	fn signal_all_when_blocking(&self) {
		// Taking the lock pairs with the waiter's check-then-wait so the
		// notification cannot fall between its cursor check and the park.
		let _guard = self.guard.lock().unwrap();
		self.condvar.notify_all();
	}
}

/// Spins for a short budget, then yields the thread between polls.
pub struct YieldingWaitStrategy {
	spin_tries: u32,
}

impl YieldingWaitStrategy {
	/// Creates the strategy with `spin_tries` polls before yielding begins.
	pub const fn new(spin_tries: u32) -> Self {
		Self { spin_tries }
	}
}

impl Default for YieldingWaitStrategy {
	fn default() -> Self {
		Self::new(100)
	}
}

impl WaitStrategy for YieldingWaitStrategy {
	fn wait_for(
		&self,
		sequence: i64,
		_cursor: &Sequence,
		dependents: &[Arc<Sequence>],
		alerted: &AtomicBool,
	) -> Result<i64, Alert> {
		let mut counter = self.spin_tries;
		loop {
			let available = minimum_sequence(dependents, i64::MAX);
			if available >= sequence {
				return Ok(available);
			}
			check_alert(alerted)?;
			if counter > 0 {
				counter -= 1;
				hint::spin_loop();
			} else {
				thread::yield_now();
			}
		}
	}
}

/// Tight load loop on the dependent sequences. Lowest latency, one core
/// burned per waiting consumer.
pub struct BusySpinWaitStrategy;

impl WaitStrategy for BusySpinWaitStrategy {
	#[inline]
	fn wait_for(
		&self,
		sequence: i64,
		_cursor: &Sequence,
		dependents: &[Arc<Sequence>],
		alerted: &AtomicBool,
	) -> Result<i64, Alert> {
		loop {
			let available = minimum_sequence(dependents, i64::MAX);
			if available >= sequence {
				return Ok(available);
			}
			check_alert(alerted)?;
		}
	}
}

/// Spins, then yields, then sleeps a small fixed duration between polls.
///
/// Latency degrades to the sleep granularity once the back-off bottoms out,
/// in exchange for a near-idle waiting consumer.
pub struct SleepingWaitStrategy {
	spin_tries: u32,
	yield_tries: u32,
	sleep: Duration,
}

impl SleepingWaitStrategy {
	/// Creates the strategy with explicit spin and yield budgets and the
	/// park duration used after both are exhausted.
	pub const fn new(spin_tries: u32, yield_tries: u32, sleep: Duration) -> Self {
		Self {
			spin_tries,
			yield_tries,
			sleep,
		}
	}
}

impl Default for SleepingWaitStrategy {
	fn default() -> Self {
		Self::new(100, 100, Duration::from_micros(100))
	}
}

impl WaitStrategy for SleepingWaitStrategy {
	fn wait_for(
		&self,
		sequence: i64,
		_cursor: &Sequence,
		dependents: &[Arc<Sequence>],
		alerted: &AtomicBool,
	) -> Result<i64, Alert> {
		let mut counter = self.spin_tries + self.yield_tries;
		loop {
			let available = minimum_sequence(dependents, i64::MAX);
			if available >= sequence {
				return Ok(available);
			}
			check_alert(alerted)?;
			if counter > self.yield_tries {
				counter -= 1;
				hint::spin_loop();
			} else if counter > 0 {
				counter -= 1;
				thread::yield_now();
			} else {
				thread::park_timeout(self.sleep);
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::mpsc;

	fn dependents(value: i64) -> Vec<Arc<Sequence>> {
		vec![Arc::new(Sequence::new(value))]
	}

	#[test]
	fn strategies_return_available_when_already_published() {
		let cursor = Sequence::new(5);
		let deps = dependents(5);
		let alerted = AtomicBool::new(false);

		let strategies: Vec<Box<dyn WaitStrategy>> = vec![
			Box::new(BlockingWaitStrategy::new()),
			Box::new(YieldingWaitStrategy::default()),
			Box::new(BusySpinWaitStrategy),
			Box::new(SleepingWaitStrategy::default()),
		];
		for strategy in &strategies {
			assert_eq!(strategy.wait_for(3, &cursor, &deps, &alerted), Ok(5));
		}
	}

	#[test]
	fn strategies_surface_alert_instead_of_spinning_forever() {
		let cursor = Sequence::default();
		let deps = dependents(-1);
		let alerted = AtomicBool::new(true);

		let strategies: Vec<Box<dyn WaitStrategy>> = vec![
			Box::new(BlockingWaitStrategy::new()),
			Box::new(YieldingWaitStrategy::default()),
			Box::new(BusySpinWaitStrategy),
			Box::new(SleepingWaitStrategy::default()),
		];
		for strategy in &strategies {
			assert_eq!(strategy.wait_for(0, &cursor, &deps, &alerted), Err(Alert));
		}
	}

	#[test]
	fn blocking_strategy_wakes_on_signal() {
		let strategy = Arc::new(BlockingWaitStrategy::new());
		let cursor = Arc::new(Sequence::default());
		let dependent = Arc::new(Sequence::default());
		let alerted = Arc::new(AtomicBool::new(false));
		let (sender, receiver) = mpsc::channel();

		let waiter = {
			let strategy = Arc::clone(&strategy);
			let cursor = Arc::clone(&cursor);
			let dependent = Arc::clone(&dependent);
			let alerted = Arc::clone(&alerted);
			thread::spawn(move || {
				let deps = vec![dependent];
				let result = strategy.wait_for(0, &cursor, &deps, &alerted);
				sender.send(result).unwrap();
			})
		};

		// Not published yet: the waiter stays parked.
		assert!(receiver
			.recv_timeout(Duration::from_millis(50))
			.is_err());

		cursor.set(0);
		dependent.set(0);
		strategy.signal_all_when_blocking();

		let result = receiver
			.recv_timeout(Duration::from_secs(5))
			.expect("waiter should wake after signal");
		assert_eq!(result, Ok(0));
		waiter.join().unwrap();
	}

	#[test]
	fn blocking_strategy_wakes_on_alert() {
		let strategy = Arc::new(BlockingWaitStrategy::new());
		let cursor = Arc::new(Sequence::default());
		let alerted = Arc::new(AtomicBool::new(false));
		let (sender, receiver) = mpsc::channel();

		let waiter = {
			let strategy = Arc::clone(&strategy);
			let cursor = Arc::clone(&cursor);
			let alerted = Arc::clone(&alerted);
			thread::spawn(move || {
				let deps = vec![Arc::new(Sequence::default())];
				sender.send(strategy.wait_for(0, &cursor, &deps, &alerted)).unwrap();
			})
		};

		alerted.store(true, Ordering::Release);
		strategy.signal_all_when_blocking();

		let result = receiver
			.recv_timeout(Duration::from_secs(5))
			.expect("waiter should observe the alert");
		assert_eq!(result, Err(Alert));
		waiter.join().unwrap();
	}
}
