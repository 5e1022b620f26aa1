use std::error::Error;

use tracing::error;

/// Failure reported by an event, work or lifecycle callback.
///
/// Handler failures never stop the flow of sequences: the processor routes
/// them to its [`ExceptionHandler`] and advances past the offending event.
pub type HandlerError = Box<dyn Error + Send + Sync>;

/// Callback of a [`BatchEventProcessor`](crate::BatchEventProcessor):
/// exclusive, in-order consumption with batch boundaries.
///
/// `end_of_batch` is true for the last event of the contiguous run returned
/// by one barrier wait; handlers can use it to defer flushing work to batch
/// boundaries. Any infallible `FnMut(&E, i64, bool)` closure is an event
/// handler.
pub trait EventHandler<E>: Send {
    /// Processes the published event at `sequence`.
    fn on_event(&mut self, event: &E, sequence: i64, end_of_batch: bool)
        -> Result<(), HandlerError>;

    /// Called once on the processing thread before the first event.
    fn on_start(&mut self) -> Result<(), HandlerError> {
        Ok(())
    }

    /// Called once on the processing thread after the last event.
    fn on_shutdown(&mut self) -> Result<(), HandlerError> {
        Ok(())
    }
}

impl<E, F> EventHandler<E> for F
where
    F: FnMut(&E, i64, bool) + Send,
{
    fn on_event(
        &mut self,
        event: &E,
        sequence: i64,
        end_of_batch: bool,
    ) -> Result<(), HandlerError> {
        self(event, sequence, end_of_batch);
        Ok(())
    }
}

/// Callback of a [`WorkProcessor`](crate::WorkProcessor): competitive
/// consumption, one worker per sequence, no batch boundaries.
///
/// Any infallible `FnMut(&E, i64)` closure is a work handler.
pub trait WorkHandler<E>: Send {
    /// Processes the published event at `sequence`. No sibling worker sees
    /// the same sequence.
    fn on_event(&mut self, event: &E, sequence: i64) -> Result<(), HandlerError>;
}

impl<E, F> WorkHandler<E> for F
where
    F: FnMut(&E, i64) + Send,
{
    fn on_event(&mut self, event: &E, sequence: i64) -> Result<(), HandlerError> {
        self(event, sequence);
        Ok(())
    }
}

/// Receives handler failures from a processor.
///
/// Event-time failures are advisory: the sequence advances regardless, so a
/// poisoned event cannot stall the consumers behind it. Lifecycle failures
/// are reported just before the processor stops or refuses to start.
pub trait ExceptionHandler<E>: Send {
    /// A handler failed while processing the published event at `sequence`.
    fn handle_event_exception(&mut self, error: HandlerError, sequence: i64, event: &E);

    /// A handler failed in `on_start`; the processor will not process
    /// events.
    fn handle_on_start_exception(&mut self, error: HandlerError);

    /// A handler failed in `on_shutdown`.
    fn handle_on_shutdown_exception(&mut self, error: HandlerError);
}

/// Default [`ExceptionHandler`]: logs every failure, swallows event-time
/// failures and lets lifecycle failures halt the processor.
pub struct LoggingExceptionHandler;

impl<E> ExceptionHandler<E> for LoggingExceptionHandler {
    fn handle_event_exception(&mut self, error: HandlerError, sequence: i64, _event: &E) {
        error!(sequence, %error, "event handler failed; sequence advances anyway");
    }

    fn handle_on_start_exception(&mut self, error: HandlerError) {
        error!(%error, "on_start failed; processor will halt");
    }

    fn handle_on_shutdown_exception(&mut self, error: HandlerError) {
        error!(%error, "on_shutdown failed");
    }
}
