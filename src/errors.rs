use thiserror::Error;

/// Error indicating that the requested number of slots could not be claimed
/// without overrunning a gating sequence.
///
/// Returned by the non-blocking claim path. Client code can back off, shed
/// load or retry as appropriate; the blocking claim path parks instead of
/// returning this.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("insufficient free capacity in the ring buffer")]
pub struct InsufficientCapacity;

/// Control-flow signal telling a processor to stop waiting and re-check its
/// run state.
///
/// Raised by [`SequenceBarrier::wait_for`](crate::SequenceBarrier::wait_for)
/// after [`alert`](crate::SequenceBarrier::alert) was called. It never
/// carries data and never reaches event handlers.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("sequence barrier alerted")]
pub struct Alert;

/// Failure modes of [`CyclicBarrier::wait`](crate::CyclicBarrier::wait).
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BarrierError {
    /// The generation this caller arrived in was broken by a timeout,
    /// a reset or a panicking trip action.
    #[error("barrier generation is broken")]
    Broken,
    /// This caller's own timeout elapsed before the barrier tripped.
    /// The generation is broken for all other parties.
    #[error("timed out waiting for the barrier to trip")]
    Timeout,
}
