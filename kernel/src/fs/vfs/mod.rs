//! Virtual Filesystem
//!
//! The node layer and everything that operates on it:
//! - core: the FsNode interface, NodeInfo bookkeeping and DirectoryEntry records
//! - path_walk: iterative path resolution and lexical path helpers
//! - root: the `/` directory, a live view over the mounted volumes
//! - volume_manager / driver_manager: the mount and driver registries
//! - manager: the filesystem context holding all of the above
//! - rename: same-volume and cross-volume rename
//! - handle: open handles and open flags
//! - watcher: waiting on the readiness of several nodes at once

pub mod core;
pub mod driver_manager;
pub mod drivers;
pub mod handle;
pub mod manager;
pub mod path_walk;
pub mod rename;
pub mod root;
pub mod volume_manager;
pub mod watcher;

#[cfg(test)]
mod tests;

pub use self::core::{DirectoryEntry, DirentType, FsNode, NodeInfo, NodeMeta, NodeRef, RawDirent};
pub use self::driver_manager::{DriverManager, FsDriver};
pub use self::handle::{Handle, OpenFlags};
pub use self::manager::VfsManager;
pub use self::path_walk::{PathWalkContext, base_name, canonicalize_path};
pub use self::volume_manager::{FsVolume, VolumeManager, VolumeRef};
pub use self::watcher::{FsWatcher, PollEvents, WatcherList};
