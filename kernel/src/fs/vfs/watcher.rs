//! Readiness watchers
//!
//! An `FsWatcher` lets one thread wait for any of several nodes to become
//! ready. It counts signals like a semaphore starting at zero: every node
//! that becomes ready signals it, and `wait` consumes one signal.

use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;
use core::fmt;
use core::ops::BitOr;
use spin::Mutex;

use super::core::NodeRef;
use crate::fs::Result;
use crate::sync::scheduler::Scheduler;
use crate::sync::waker::Waker;

/// Conditions a watcher asks a node about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PollEvents(u32);

impl PollEvents {
    /// A read would make progress
    pub const READABLE: Self = Self(0x01);
    /// A write would make progress
    pub const WRITABLE: Self = Self(0x02);
    /// The peer went away; always reported
    pub const HANGUP: Self = Self(0x10);

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }
}

impl BitOr for PollEvents {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

pub struct FsWatcher {
    signals: Mutex<usize>,
    waiters: Waker,
    scheduler: Arc<dyn Scheduler>,
    watching: Mutex<Vec<NodeRef>>,
}

impl FsWatcher {
    pub fn new(scheduler: Arc<dyn Scheduler>) -> Arc<Self> {
        Arc::new(Self {
            signals: Mutex::new(0),
            waiters: Waker::new_interruptible("fs_watcher"),
            scheduler,
            watching: Mutex::new(Vec::new()),
        })
    }

    /// Start watching `node` for `events`
    ///
    /// The watcher keeps `node` alive until it is dropped.
    pub fn watch_node(self: &Arc<Self>, node: NodeRef, events: PollEvents) {
        node.watch(self, events);
        self.watching.lock().push(node);
    }

    /// Record that a watched node became ready
    pub fn signal(&self) {
        *self.signals.lock() += 1;
        self.waiters.wake_all();
    }

    /// Block until a watched node signals, consuming the signal
    ///
    /// # Errors
    ///
    /// * `Interrupted` - a signal arrived while blocked
    /// * `TimedOut` - `timeout_us` microseconds passed with no signal
    pub fn wait(&self, timeout_us: Option<u64>) -> Result<()> {
        self.waiters
            .wait_until(self.scheduler.as_ref(), timeout_us, || {
                let mut signals = self.signals.lock();
                if *signals == 0 {
                    return Ok(None);
                }
                *signals -= 1;
                Ok(Some(()))
            })
    }

    /// Signals not yet consumed by `wait`
    pub fn pending(&self) -> usize {
        *self.signals.lock()
    }

    pub fn watched_count(&self) -> usize {
        self.watching.lock().len()
    }
}

impl fmt::Debug for FsWatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FsWatcher")
            .field("pending", &self.pending())
            .field("watched", &self.watched_count())
            .finish()
    }
}

impl Drop for FsWatcher {
    fn drop(&mut self) {
        let nodes = core::mem::take(self.watching.get_mut());
        for node in nodes {
            node.unwatch(self);
        }
    }
}

/// Watchers registered on one node
///
/// Nodes whose readiness changes embed one and call `notify` when it does.
#[derive(Default)]
pub struct WatcherList {
    entries: Mutex<Vec<(Weak<FsWatcher>, PollEvents)>>,
}

impl WatcherList {
    pub const fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
        }
    }

    pub fn add(&self, watcher: &Arc<FsWatcher>, events: PollEvents) {
        self.entries.lock().push((Arc::downgrade(watcher), events));
    }

    pub fn remove(&self, watcher: &FsWatcher) {
        let target: *const FsWatcher = watcher;
        self.entries
            .lock()
            .retain(|(entry, _)| !core::ptr::eq(entry.as_ptr(), target));
    }

    /// Signal every watcher interested in `events`; `HANGUP` reaches all of them
    pub fn notify(&self, events: PollEvents) {
        let ready: Vec<Arc<FsWatcher>> = {
            let mut entries = self.entries.lock();
            entries.retain(|(entry, _)| entry.strong_count() > 0);
            entries
                .iter()
                .filter(|(_, wanted)| {
                    events.contains(PollEvents::HANGUP) || wanted.intersects(events)
                })
                .filter_map(|(entry, _)| entry.upgrade())
                .collect()
        };
        for watcher in ready {
            watcher.signal();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
