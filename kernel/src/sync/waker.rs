//! Waker - blocked-waiter list for "wait until data is available"
//!
//! A `Waker` holds the `Blocker` records of threads waiting for one condition
//! on one object (a pipe end, a PTY, a socket). Waiters register before they
//! test their condition, so a wake issued between the test and the block is
//! never lost.

use alloc::collections::VecDeque;
use alloc::sync::Arc;
use core::sync::atomic::{AtomicU8, Ordering};
use spin::Mutex;

use super::scheduler::{BlockedType, Scheduler, Thread};
use crate::fs::{FileSystemError, FileSystemErrorKind, Result};

const WAITING: u8 = 0;
const WOKEN: u8 = 1;
const INTERRUPTED: u8 = 2;

/// One registration of a thread on a `Waker`
///
/// The state moves out of `WAITING` exactly once, so a blocker is woken or
/// interrupted, never both.
pub struct Blocker {
    thread: Arc<dyn Thread>,
    state: AtomicU8,
}

impl Blocker {
    pub fn new(thread: Arc<dyn Thread>) -> Self {
        Self {
            thread,
            state: AtomicU8::new(WAITING),
        }
    }

    fn transition(&self, to: u8) -> bool {
        let changed = self
            .state
            .compare_exchange(WAITING, to, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if changed {
            self.thread.unblock();
        }
        changed
    }

    fn wake(&self) -> bool {
        self.transition(WOKEN)
    }

    /// Stop the thread from blocking with `Interrupted`
    pub fn interrupt(&self) -> bool {
        self.transition(INTERRUPTED)
    }

    pub fn is_woken(&self) -> bool {
        self.state.load(Ordering::Acquire) == WOKEN
    }

    pub fn is_interrupted(&self) -> bool {
        self.state.load(Ordering::Acquire) == INTERRUPTED
    }
}

/// A wait list of blocked threads
///
/// # Examples
///
/// ```rust,ignore
/// static RX_WAKER: Waker = Waker::new_interruptible("uart_rx");
///
/// // Reader: block until the ring has a byte, a signal arrives or 10ms pass
/// let byte = RX_WAKER.wait_until(scheduler, Some(10_000), || Ok(ring.pop()))?;
///
/// // Interrupt handler
/// ring.push(byte);
/// RX_WAKER.wake_all();
/// ```
pub struct Waker {
    /// Registered blockers, oldest first
    wait_queue: Mutex<VecDeque<Arc<Blocker>>>,
    /// Whether signals end a wait
    block_type: BlockedType,
    /// Human-readable name for debugging purposes
    name: &'static str,
}

impl Waker {
    /// Create a waker whose waits end early on pending signals
    pub const fn new_interruptible(name: &'static str) -> Self {
        Self {
            wait_queue: Mutex::new(VecDeque::new()),
            block_type: BlockedType::Interruptible,
            name,
        }
    }

    /// Create a waker whose waits only end on a wake or a timeout
    pub const fn new_uninterruptible(name: &'static str) -> Self {
        Self {
            wait_queue: Mutex::new(VecDeque::new()),
            block_type: BlockedType::Uninterruptible,
            name,
        }
    }

    fn enqueue(&self, blocker: &Arc<Blocker>) {
        self.wait_queue.lock().push_back(Arc::clone(blocker));
    }

    fn remove(&self, blocker: &Arc<Blocker>) {
        self.wait_queue.lock().retain(|queued| !Arc::ptr_eq(queued, blocker));
    }

    /// Block the current thread until `attempt` yields a value
    ///
    /// `attempt` runs after the thread is registered and again after every
    /// wake. It returns `Ok(None)` while the condition does not hold yet.
    ///
    /// # Errors
    ///
    /// * `Interrupted` - a signal is pending or the blocker was interrupted
    ///   (interruptible wakers only)
    /// * `TimedOut` - `timeout_us` microseconds elapsed
    /// * any error returned by `attempt`
    pub fn wait_until<T, F>(
        &self,
        scheduler: &dyn Scheduler,
        timeout_us: Option<u64>,
        mut attempt: F,
    ) -> Result<T>
    where
        F: FnMut() -> Result<Option<T>>,
    {
        let deadline = timeout_us.map(|timeout| scheduler.uptime_us().saturating_add(timeout));
        let interruptible = self.block_type == BlockedType::Interruptible;

        loop {
            let thread = scheduler.current_thread();
            let blocker = Arc::new(Blocker::new(Arc::clone(&thread)));
            self.enqueue(&blocker);

            match attempt() {
                Ok(Some(value)) => {
                    self.remove(&blocker);
                    return Ok(value);
                }
                Err(error) => {
                    self.remove(&blocker);
                    return Err(error);
                }
                Ok(None) => {}
            }

            if interruptible && thread.has_pending_signal() {
                self.remove(&blocker);
                return Err(FileSystemError::new(
                    FileSystemErrorKind::Interrupted,
                    "Wait interrupted by signal",
                ));
            }

            let remaining = match deadline {
                Some(deadline) => {
                    let now = scheduler.uptime_us();
                    if now >= deadline {
                        self.remove(&blocker);
                        return Err(FileSystemError::new(
                            FileSystemErrorKind::TimedOut,
                            "Wait timed out",
                        ));
                    }
                    Some(deadline - now)
                }
                None => None,
            };

            thread.block(remaining);
            self.remove(&blocker);

            if interruptible && blocker.is_interrupted() {
                return Err(FileSystemError::new(
                    FileSystemErrorKind::Interrupted,
                    "Wait interrupted",
                ));
            }
        }
    }

    /// Wake the oldest waiting thread
    ///
    /// Returns `false` if no thread was waiting.
    pub fn wake_one(&self) -> bool {
        loop {
            let blocker = self.wait_queue.lock().pop_front();
            match blocker {
                Some(blocker) if blocker.wake() => return true,
                Some(_) => continue,
                None => return false,
            }
        }
    }

    /// Wake every waiting thread and return how many were woken
    pub fn wake_all(&self) -> usize {
        let blockers: VecDeque<Arc<Blocker>> = self.wait_queue.lock().drain(..).collect();
        blockers.iter().filter(|blocker| blocker.wake()).count()
    }

    /// Interrupt every waiting thread and return how many were interrupted
    pub fn interrupt_all(&self) -> usize {
        let blockers: VecDeque<Arc<Blocker>> = self.wait_queue.lock().drain(..).collect();
        blockers.iter().filter(|blocker| blocker.interrupt()).count()
    }

    pub fn block_type(&self) -> BlockedType {
        self.block_type
    }

    /// Number of threads currently registered
    pub fn waiting_count(&self) -> usize {
        self.wait_queue.lock().len()
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}
