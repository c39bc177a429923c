//! DevFS - Device filesystem implementation
//!
//! A flat, read-only directory of device nodes. Drivers publish their nodes
//! with `DevFs::register_device`; the VFS cannot create or remove entries.

use alloc::string::{String, ToString};
use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;
use core::any::Any;
use log::info;
use spin::RwLock;

use crate::fs::vfs::core::{DirectoryEntry, FsNode, NodeInfo, NodeRef, validate_name};
use crate::fs::vfs::volume_manager::FsVolume;
use crate::fs::{FileSystemError, FileSystemErrorKind, FileType, Result, VolumeId};

const READ_ONLY: FileSystemError =
    FileSystemError::new(FileSystemErrorKind::ReadOnly, "DevFS is read-only");

/// Root directory of a DevFS volume
pub struct DevDirectory {
    info: NodeInfo,
    parent: RwLock<Option<Weak<dyn FsNode>>>,
    devices: RwLock<Vec<DirectoryEntry>>,
}

impl DevDirectory {
    fn parent_node(&self) -> Result<NodeRef> {
        let parent = self.parent.read().as_ref().and_then(Weak::upgrade);
        match parent {
            Some(parent) => Ok(parent),
            None => self.info.this(),
        }
    }
}

impl FsNode for DevDirectory {
    fn info(&self) -> &NodeInfo {
        &self.info
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn read_dir(&self, index: usize) -> Result<Option<DirectoryEntry>> {
        match index {
            0 => DirectoryEntry::new(".", self.info.this()?).map(Some),
            1 => DirectoryEntry::new("..", self.parent_node()?).map(Some),
            _ => Ok(self.devices.read().get(index - 2).cloned()),
        }
    }

    fn find_dir(&self, name: &str) -> Result<NodeRef> {
        match name {
            "." => self.info.this(),
            ".." => self.parent_node(),
            _ => self
                .devices
                .read()
                .iter()
                .find(|entry| entry.name() == name)
                .map(|entry| entry.node().clone())
                .ok_or(FileSystemError::new(
                    FileSystemErrorKind::NotFound,
                    "No such device",
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

pub struct DevFs {
    id: VolumeId,
    name: String,
    root: Arc<DevDirectory>,
}

impl DevFs {
    pub fn new(id: VolumeId, name: &str) -> Arc<Self> {
        let root = Arc::new_cyclic(|this: &Weak<DevDirectory>| {
            let this: Weak<dyn FsNode> = this.clone();
            DevDirectory {
                info: NodeInfo::new(this, 1, id, FileType::Directory, 0o755),
                parent: RwLock::new(None),
                devices: RwLock::new(Vec::new()),
            }
        });
        root.info.link_acquired();

        Arc::new(Self {
            id,
            name: name.to_string(),
            root,
        })
    }

    /// Publish a character or block device under `name`
    pub fn register_device(&self, name: &str, device: NodeRef) -> Result<()> {
        validate_name(name)?;
        if !device.is_block_device() && !device.is_char_device() {
            return Err(FileSystemError::new(
                FileSystemErrorKind::InvalidArgument,
                "Not a device",
            ));
        }

        let mut devices = self.root.devices.write();
        if devices.iter().any(|entry| entry.name() == name) {
            return Err(FileSystemError::new(
                FileSystemErrorKind::AlreadyExists,
                "Device name in use",
            ));
        }
        let entry = DirectoryEntry::new(name, device)?;
        entry.node().info().link_acquired();
        devices.push(entry);
        info!("[devfs] Registered device '{}'", name);
        Ok(())
    }

    pub fn unregister_device(&self, name: &str) -> Result<NodeRef> {
        let mut devices = self.root.devices.write();
        let index = devices
            .iter()
            .position(|entry| entry.name() == name)
            .ok_or(FileSystemError::new(
                FileSystemErrorKind::NotFound,
                "No such device",
            ))?;
        let entry = devices.remove(index);
        entry.node().info().link_released();
        Ok(entry.into_node())
    }
}

impl FsVolume for DevFs {
    fn id(&self) -> VolumeId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn driver_name(&self) -> &'static str {
        "devfs"
    }

    fn root(&self) -> NodeRef {
        self.root.clone()
    }

    fn attach(&self, parent: Weak<dyn FsNode>) {
        *self.root.parent.write() = Some(parent);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
