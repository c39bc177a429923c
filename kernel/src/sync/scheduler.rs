//! Scheduler capability
//!
//! The VFS does not own threads. It reaches the scheduler through these two
//! traits, which the kernel implements over its task structures and the tests
//! implement over host threads.

use alloc::sync::Arc;

/// How a waiting thread reacts to signals
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockedType {
    /// Pending signals end the wait with `Interrupted`
    Interruptible,
    /// Only a wake or a timeout ends the wait
    Uninterruptible,
}

/// A schedulable thread as seen by the VFS
pub trait Thread: Send + Sync {
    /// Suspend the calling thread until `unblock` is called or `timeout_us`
    /// microseconds pass.
    ///
    /// An `unblock` that arrived since the previous `block` returned makes this
    /// call return immediately. Spurious returns are allowed.
    fn block(&self, timeout_us: Option<u64>);

    /// Make the thread runnable again
    fn unblock(&self);

    /// Whether a signal is waiting to be delivered
    fn has_pending_signal(&self) -> bool;
}

pub trait Scheduler: Send + Sync {
    /// The thread executing the caller
    fn current_thread(&self) -> Arc<dyn Thread>;

    /// Monotonic time since boot in microseconds
    fn uptime_us(&self) -> u64;
}
