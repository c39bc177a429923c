//! Volume registry
//!
//! Mounted volumes in mount order. The root directory lists this registry
//! directly, so mounting or unmounting is visible in `/` at once.

use alloc::format;
use alloc::string::{String, ToString};
use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;
use core::any::Any;
use core::fmt;
use core::sync::atomic::{AtomicU32, Ordering};
use log::info;
use spin::{Once, RwLock};

use super::core::{FsNode, NodeRef, validate_name};
use crate::fs::{FileSystemError, FileSystemErrorKind, Result, VolumeId};

pub type VolumeRef = Arc<dyn FsVolume>;

/// A mounted instance of a filesystem driver
pub trait FsVolume: Send + Sync {
    fn id(&self) -> VolumeId;

    /// Name of the volume's entry in `/`
    fn name(&self) -> &str;

    fn driver_name(&self) -> &'static str;

    /// Root directory of the volume
    fn root(&self) -> NodeRef;

    /// Point the volume root's `..` at `parent`
    fn attach(&self, parent: Weak<dyn FsNode>);

    /// Flush cached state to the backing device
    fn sync(&self) {}

    fn as_any(&self) -> &dyn Any;
}

impl fmt::Debug for dyn FsVolume {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FsVolume")
            .field("id", &self.id())
            .field("name", &self.name())
            .field("driver", &self.driver_name())
            .finish()
    }
}

pub struct VolumeManager {
    volumes: RwLock<Vec<VolumeRef>>,
    next_volume_id: AtomicU32,
    next_volume_name: AtomicU32,
    root: Once<Weak<dyn FsNode>>,
}

impl VolumeManager {
    pub fn new() -> Self {
        Self {
            volumes: RwLock::new(Vec::new()),
            next_volume_id: AtomicU32::new(1),
            next_volume_name: AtomicU32::new(0),
            root: Once::new(),
        }
    }

    /// Set the directory volume roots hang from; only the first call counts
    pub fn set_root(&self, root: Weak<dyn FsNode>) {
        self.root.call_once(|| root);
    }

    /// Reserve the next volume number
    pub fn allocate_id(&self) -> VolumeId {
        self.next_volume_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Next automatic volume name (`volume0`, `volume1`, ...)
    pub fn generate_name(&self) -> String {
        format!("volume{}", self.next_volume_name.fetch_add(1, Ordering::Relaxed))
    }

    /// Add a volume and attach its root below `/`
    ///
    /// # Errors
    ///
    /// * `AlreadyExists` - a volume with the same name or id is mounted
    /// * name errors from `validate_name`
    pub fn register(&self, volume: VolumeRef) -> Result<()> {
        validate_name(volume.name())?;

        let mut volumes = self.volumes.write();
        if volumes
            .iter()
            .any(|mounted| mounted.name() == volume.name() || mounted.id() == volume.id())
        {
            return Err(FileSystemError::new(
                FileSystemErrorKind::AlreadyExists,
                "Volume already mounted",
            ));
        }

        if let Some(root) = self.root.get() {
            volume.attach(root.clone());
        }
        info!(
            "[volume] Mounted '{}' ({}) as volume {}",
            volume.name(),
            volume.driver_name(),
            volume.id()
        );
        volumes.push(volume);
        Ok(())
    }

    pub fn unregister(&self, name: &str) -> Result<VolumeRef> {
        let mut volumes = self.volumes.write();
        let index = volumes
            .iter()
            .position(|volume| volume.name() == name)
            .ok_or(FileSystemError::new(
                FileSystemErrorKind::NotFound,
                "Volume not found",
            ))?;
        let volume = volumes.remove(index);
        info!("[volume] Unmounted '{}'", name);
        Ok(volume)
    }

    pub fn find(&self, name: &str) -> Option<VolumeRef> {
        self.volumes
            .read()
            .iter()
            .find(|volume| volume.name() == name)
            .cloned()
    }

    pub fn find_by_id(&self, id: VolumeId) -> Option<VolumeRef> {
        self.volumes
            .read()
            .iter()
            .find(|volume| volume.id() == id)
            .cloned()
    }

    /// Volume at `index` in mount order
    pub fn get(&self, index: usize) -> Option<VolumeRef> {
        self.volumes.read().get(index).cloned()
    }

    pub fn len(&self) -> usize {
        self.volumes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.volumes.read().is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.volumes
            .read()
            .iter()
            .map(|volume| volume.name().to_string())
            .collect()
    }
}

impl Default for VolumeManager {
    fn default() -> Self {
        Self::new()
    }
}
