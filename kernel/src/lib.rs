//! # VFS Core
//!
//! The virtual filesystem layer of a `no_std` monolithic kernel.
//!
//! ## Components
//!
//! - [`fs::vfs::core`]: the polymorphic node interface every file, directory, symlink,
//!   device, socket and pipe implements
//! - [`fs::vfs::path_walk`]: iterative path resolution through volumes and symlinks
//! - [`fs::vfs::volume_manager`] and [`fs::vfs::driver_manager`]: the mount registry
//! - [`fs::vfs::manager`]: the filesystem context that ties the root, the registries
//!   and the scheduler capability together
//! - [`sync::waker`]: blocked-waiter lists with interrupt and timeout support
//! - [`ipc::pipe`]: anonymous pipes built on the node interface
//!
//! ## Development Notes
//!
//! The crate links `std` only for tests, which run on the host with the standard
//! harness. Scheduling is reached through the [`sync::scheduler::Scheduler`]
//! capability, so the host tests plug in a thread-backed implementation.

#![no_std]

extern crate alloc;

#[cfg(test)]
extern crate std;

pub mod device;
pub mod fs;
pub mod ipc;
pub mod sync;

#[cfg(test)]
pub mod test_support;
