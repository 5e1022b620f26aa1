use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::thread::{self, JoinHandle};

use core_affinity::CoreId;

/// Starts processor tasks on behalf of a [`WorkerPool`](crate::WorkerPool)
/// or any other processor owner.
///
/// The core never spawns threads itself; it hands each long-running
/// processor loop to an executor and leaves scheduling policy (dedicated
/// threads, pinning, naming) to the caller.
pub trait Executor {
    /// Runs `task` to completion, typically on its own thread.
    fn execute(&self, task: Box<dyn FnOnce() + Send>);
}

/// Spawns one named OS thread per task, optionally pinned to CPU cores.
///
/// Threads are named `worker-0`, `worker-1`, ... (or with a custom prefix)
/// and their join handles are collected so tests and shutdown paths can
/// [`join`](Self::join) for quiescence.
pub struct ThreadPerTaskExecutor {
    name_prefix: String,
    cores: Option<Vec<usize>>,
    next_id: AtomicUsize,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl ThreadPerTaskExecutor {
    /// Creates an executor with the default `worker` thread-name prefix.
    pub fn new() -> Self {
        Self::with_prefix("worker")
    }

    /// Creates an executor whose threads are named `{prefix}-{n}`.
    pub fn with_prefix(prefix: &str) -> Self {
        Self {
            name_prefix: prefix.to_owned(),
            cores: None,
            next_id: AtomicUsize::new(0),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Pins spawned threads round-robin to `cores`.
    ///
    /// # Panics
    ///
    /// Panics when one of the cores does not exist on this machine.
    pub fn pinned_to(mut self, cores: Vec<usize>) -> Self {
        let available: Vec<usize> = core_affinity::get_core_ids()
            .unwrap_or_default()
            .iter()
            .map(|core| core.id)
            .collect();
        for id in &cores {
            if !available.contains(id) {
                panic!("no CPU core with id {id} is available");
            }
        }
        self.cores = Some(cores);
        self
    }

    /// Waits for every task handed out so far to finish.
    pub fn join(&self) {
        let handles: Vec<JoinHandle<()>> = {
            let mut guard = self.handles.lock().unwrap();
            guard.drain(..).collect()
        };
        for handle in handles {
            handle.join().expect("executor task should not panic");
        }
    }
}

impl Default for ThreadPerTaskExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl Executor for ThreadPerTaskExecutor {
    fn execute(&self, task: Box<dyn FnOnce() + Send>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let name = format!("{}-{}", self.name_prefix, id);
        let affinity = self
            .cores
            .as_ref()
            .map(|cores| CoreId { id: cores[id % cores.len()] });

        let builder = thread::Builder::new().name(name.clone());
        let handle = builder
            .spawn(move || {
                if let Some(core) = affinity {
                    if !core_affinity::set_for_current(core) {
                        eprintln!("could not pin thread '{name}' to {core:?}");
                    }
                }
                task();
            })
            .expect("should spawn processor thread");
        self.handles.lock().unwrap().push(handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;

    #[test]
    fn executes_tasks_on_named_threads_and_joins() {
        let executor = ThreadPerTaskExecutor::with_prefix("proc");
        let ran = Arc::new(AtomicBool::new(false));
        let observed_name = Arc::new(Mutex::new(String::new()));

        {
            let ran = Arc::clone(&ran);
            let observed_name = Arc::clone(&observed_name);
            executor.execute(Box::new(move || {
                ran.store(true, Ordering::SeqCst);
                *observed_name.lock().unwrap() =
                    thread::current().name().unwrap_or_default().to_owned();
            }));
        }

        executor.join();
        assert!(ran.load(Ordering::SeqCst));
        assert_eq!(&*observed_name.lock().unwrap(), "proc-0");
    }

    #[test]
    #[should_panic(expected = "no CPU core")]
    fn pinning_to_a_missing_core_is_rejected() {
        ThreadPerTaskExecutor::new().pinned_to(vec![usize::MAX]);
    }
}
