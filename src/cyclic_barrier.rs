//! N-party rendezvous used to line up processor threads at start-up.

use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::errors::BarrierError;

/// One rendezvous epoch. Replaced whenever the barrier trips or is reset;
/// waiters that arrived in a broken generation fail even though a fresh
/// generation is already accepting arrivals.
struct Generation {
    broken: AtomicBool,
}

impl Generation {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            broken: AtomicBool::new(false),
        })
    }

    fn is_broken(&self) -> bool {
        // Only mutated under the barrier lock; the atomic is for the
        // lock-free `is_broken` query.
        self.broken.load(Ordering::Relaxed)
    }
}

struct BarrierState {
    count: usize,
    generation: Arc<Generation>,
}

/// A reusable rendezvous for a fixed number of parties.
///
/// Each party calls [`wait`](Self::wait) (or
/// [`wait_timeout`](Self::wait_timeout)) and blocks until all parties have
/// arrived. The last arrival trips the barrier: it runs the optional trip
/// action, starts a new generation and wakes everyone. A timeout, a
/// [`reset`](Self::reset) or a panicking trip action breaks the current
/// generation and every party waiting on it fails with
/// [`BarrierError::Broken`].
pub struct CyclicBarrier {
    parties: usize,
    lock: Mutex<BarrierState>,
    trip: Condvar,
    action: Option<Box<dyn Fn() + Send + Sync>>,
}

impl CyclicBarrier {
    /// Creates a barrier for `parties` participants.
    ///
    /// # Panics
    ///
    /// Panics when `parties` is zero.
    pub fn new(parties: usize) -> Self {
        Self::build(parties, None)
    }

    /// Creates a barrier whose tripping arrival runs `action` before the
    /// other parties are released. The action must not call back into the
    /// barrier.
    pub fn with_action<F>(parties: usize, action: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self::build(parties, Some(Box::new(action)))
    }

    fn build(parties: usize, action: Option<Box<dyn Fn() + Send + Sync>>) -> Self {
        if parties == 0 {
            panic!("a barrier needs at least one party");
        }
        Self {
            parties,
            lock: Mutex::new(BarrierState {
                count: parties,
                generation: Generation::new(),
            }),
            trip: Condvar::new(),
            action,
        }
    }

    /// Number of parties required to trip the barrier.
    pub fn parties(&self) -> usize {
        self.parties
    }

    /// Number of parties currently blocked in [`wait`](Self::wait).
    pub fn number_waiting(&self) -> usize {
        let state = self.lock.lock().unwrap();
        self.parties - state.count
    }

    /// Whether the current generation is broken.
    pub fn is_broken(&self) -> bool {
        self.lock.lock().unwrap().generation.is_broken()
    }

    /// Waits until all parties have arrived.
    ///
    /// Returns the arrival index: `parties - 1` for the first arrival down
    /// to `0` for the arrival that trips the barrier.
    pub fn wait(&self) -> Result<usize, BarrierError> {
        self.do_wait(None)
    }

    /// Like [`wait`](Self::wait), but gives up after `timeout`. The caller
    /// that times out gets [`BarrierError::Timeout`]; the generation is
    /// broken so every other party gets [`BarrierError::Broken`].
    pub fn wait_timeout(&self, timeout: Duration) -> Result<usize, BarrierError> {
        self.do_wait(Some(timeout))
    }

    /// Breaks the current generation (waking all waiters with
    /// [`BarrierError::Broken`]) and starts a fresh one.
    pub fn reset(&self) {
        let mut state = self.lock.lock().unwrap();
        self.break_generation(&mut state);
        self.next_generation(&mut state);
    }

    fn do_wait(&self, timeout: Option<Duration>) -> Result<usize, BarrierError> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.lock.lock().unwrap();
        let generation = Arc::clone(&state.generation);

        if generation.is_broken() {
            return Err(BarrierError::Broken);
        }

        state.count -= 1;
        let index = state.count;
        if index == 0 {
            return self.trip_barrier(state);
        }

        loop {
            state = match deadline {
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    let (state, _) = self.trip.wait_timeout(state, remaining).unwrap();
                    state
                }
                None => self.trip.wait(state).unwrap(),
            };

            if generation.is_broken() {
                return Err(BarrierError::Broken);
            }
            if !Arc::ptr_eq(&generation, &state.generation) {
                return Ok(index);
            }
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    self.break_generation(&mut state);
                    return Err(BarrierError::Timeout);
                }
            }
        }
    }

    fn trip_barrier(
        &self,
        mut state: std::sync::MutexGuard<'_, BarrierState>,
    ) -> Result<usize, BarrierError> {
        if let Some(action) = &self.action {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| action())) {
                self.break_generation(&mut state);
                drop(state);
                resume_unwind(panic);
            }
        }
        self.next_generation(&mut state);
        Ok(0)
    }

    fn break_generation(&self, state: &mut BarrierState) {
        state.generation.broken.store(true, Ordering::Relaxed);
        state.count = self.parties;
        self.trip.notify_all();
    }

    fn next_generation(&self, state: &mut BarrierState) {
        state.generation = Generation::new();
        state.count = self.parties;
        self.trip.notify_all();
    }
}
