//! Node trait for threaded decoder chains
//!
//! Each node runs in its own thread under the [`Scheduler`](super::Scheduler).
//! One `work()` call is one decode step; the scheduler keeps calling it until
//! it fails, which for a healthy chain means `WorkError::EndOfStream`.

use super::errors::WorkResult;

pub trait ProcessNode: Send {
    /// Get a debug name for this node
    fn name(&self) -> &str;

    /// Check if this node should stop processing
    fn should_stop(&self) -> bool {
        false
    }

    /// Do one unit of work.
    /// Returns Ok(n) where n is the number of items processed.
    fn work(&mut self) -> WorkResult<usize>;

    /// Called once after the last `work()`, whatever the outcome.
    /// Nodes close their output queues here.
    fn finish(&mut self) {}
}
