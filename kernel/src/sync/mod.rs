//! Synchronization primitives module
//!
//! The scheduler capability the VFS blocks through, and the Waker wait lists
//! built on top of it.

pub mod scheduler;
pub mod waker;

pub use scheduler::{BlockedType, Scheduler, Thread};
pub use waker::{Blocker, Waker};
