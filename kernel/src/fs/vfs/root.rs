//! The global root directory
//!
//! `/` has no backing store. Its children are the roots of the mounted volumes,
//! listed in mount order straight from the volume registry.

use alloc::sync::{Arc, Weak};
use core::any::Any;

use super::core::{DirectoryEntry, FsNode, NodeInfo, NodeRef};
use super::volume_manager::VolumeManager;
use crate::fs::{FileSystemError, FileSystemErrorKind, FileType, ROOT_VOLUME_ID, Result};

pub const ROOT_INODE: u64 = 0;

const READ_ONLY: FileSystemError =
    FileSystemError::new(FileSystemErrorKind::ReadOnly, "Root directory is read-only");

pub struct RootNode {
    info: NodeInfo,
    volumes: Arc<VolumeManager>,
}

impl RootNode {
    /// Create the root and register it as the mount parent of `volumes`
    pub fn new(volumes: Arc<VolumeManager>) -> Arc<Self> {
        let root = Arc::new_cyclic(|this: &Weak<RootNode>| {
            let this: Weak<dyn FsNode> = this.clone();
            RootNode {
                info: NodeInfo::new(this, ROOT_INODE, ROOT_VOLUME_ID, FileType::Directory, 0o755),
                volumes,
            }
        });
        root.info.link_acquired();

        let weak: Weak<RootNode> = Arc::downgrade(&root);
        root.volumes.set_root(weak);
        root
    }

    pub fn volumes(&self) -> &Arc<VolumeManager> {
        &self.volumes
    }
}

impl FsNode for RootNode {
    fn info(&self) -> &NodeInfo {
        &self.info
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn read_dir(&self, index: usize) -> Result<Option<DirectoryEntry>> {
        match index {
            0 => DirectoryEntry::new(".", self.info.this()?).map(Some),
            1 => DirectoryEntry::new("..", self.info.this()?).map(Some),
            _ => self
                .volumes
                .get(index - 2)
                .map(|volume| DirectoryEntry::new(volume.name(), volume.root()))
                .transpose(),
        }
    }

    fn find_dir(&self, name: &str) -> Result<NodeRef> {
        match name {
            "." | ".." => self.info.this(),
            _ => self
                .volumes
                .find(name)
                .map(|volume| volume.root())
                .ok_or(FileSystemError::new(
                    FileSystemErrorKind::NotFound,
                    "No such volume",
                )),
        }
    }

    fn create(&self, _name: &str, _mode: u32) -> Result<DirectoryEntry> {
        Err(READ_ONLY)
    }

    fn create_directory(&self, _name: &str, _mode: u32) -> Result<DirectoryEntry> {
        Err(READ_ONLY)
    }

    fn create_symlink(&self, _name: &str, _target: &str) -> Result<DirectoryEntry> {
        Err(READ_ONLY)
    }

    fn link(&self, _target: &NodeRef, _name: &str) -> Result<DirectoryEntry> {
        Err(READ_ONLY)
    }

    fn unlink(&self, _name: &str, _allow_directories: bool) -> Result<()> {
        Err(READ_ONLY)
    }
}
