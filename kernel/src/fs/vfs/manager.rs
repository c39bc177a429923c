//! VFS Manager - the filesystem context
//!
//! One `VfsManager` is created at kernel initialisation and owns the root
//! directory, the volume and driver registries and the scheduler capability
//! blocking nodes use. Path-level operations resolve through it; relative paths
//! start at the manager's current working directory.

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use log::{debug, warn};
use spin::{Mutex, RwLock};

use super::core::{DirectoryEntry, NodeRef};
use super::driver_manager::{DriverManager, FsDriver};
use super::drivers::devfs::DevFs;
use super::drivers::tarfs::TarFsDriver;
use super::drivers::tmpfs::{TmpFs, TmpFsDriver};
use super::handle::{Handle, OpenFlags};
use super::path_walk::PathWalkContext;
use super::root::RootNode;
use super::volume_manager::{VolumeManager, VolumeRef};
use super::watcher::{FsWatcher, PollEvents};
use crate::fs::params::TmpFsParams;
use crate::fs::{FileMetadata, FileSystemError, FileSystemErrorKind, PATH_MAX, Result};
use crate::ipc::pipe::{PIPE_BUFFER_SIZE, create_pipe};
use crate::sync::scheduler::Scheduler;

/// Mode given to files created by `open` with `CREATE`
pub const DEFAULT_FILE_MODE: u32 = 0o644;

pub struct VfsManager {
    pub(super) root: Arc<RootNode>,
    pub(super) walker: PathWalkContext,
    pub(super) volumes: Arc<VolumeManager>,
    pub(super) drivers: DriverManager,
    pub(super) scheduler: Arc<dyn Scheduler>,
    /// Current working directory for relative paths
    pub(super) cwd: RwLock<Option<NodeRef>>,
    /// Serializes renames against each other
    pub(super) rename_lock: Mutex<()>,
}

impl VfsManager {
    /// Create a context with an empty root and the bundled drivers registered
    pub fn new(scheduler: Arc<dyn Scheduler>) -> Self {
        let volumes = Arc::new(VolumeManager::new());
        let root = RootNode::new(Arc::clone(&volumes));
        let root_node: NodeRef = root.clone();

        let drivers = DriverManager::new();
        let bundled: [Arc<dyn FsDriver>; 2] = [Arc::new(TmpFsDriver), Arc::new(TarFsDriver)];
        for driver in bundled {
            if let Err(err) = drivers.register(driver) {
                warn!("[vfs] Failed to register bundled driver: {}", err);
            }
        }

        Self {
            root,
            walker: PathWalkContext::new(root_node),
            volumes,
            drivers,
            scheduler,
            cwd: RwLock::new(None),
            rename_lock: Mutex::new(()),
        }
    }

    pub fn root(&self) -> NodeRef {
        self.root.clone()
    }

    pub fn scheduler(&self) -> &Arc<dyn Scheduler> {
        &self.scheduler
    }

    pub fn volumes(&self) -> &Arc<VolumeManager> {
        &self.volumes
    }

    pub fn drivers(&self) -> &DriverManager {
        &self.drivers
    }

    pub fn path_walker(&self) -> &PathWalkContext {
        &self.walker
    }

    /// Change the working directory used for relative paths
    pub fn set_cwd(&self, path: &str) -> Result<()> {
        let node = self.resolve(path)?;
        if !node.is_directory() {
            return Err(FileSystemError::new(
                FileSystemErrorKind::NotADirectory,
                "Not a directory",
            ));
        }
        *self.cwd.write() = Some(node);
        Ok(())
    }

    pub fn cwd(&self) -> Option<NodeRef> {
        self.cwd.read().clone()
    }

    /// Node `path` names, following every symlink
    pub fn resolve(&self, path: &str) -> Result<NodeRef> {
        self.resolve_at(path, None, true)
    }

    /// Resolve `path` relative to `working_dir`, or to the current working
    /// directory when none is given
    pub fn resolve_at(
        &self,
        path: &str,
        working_dir: Option<&NodeRef>,
        follow_symlinks: bool,
    ) -> Result<NodeRef> {
        match working_dir {
            Some(working_dir) => self.walker.resolve(path, Some(working_dir), follow_symlinks),
            None => {
                let cwd = self.cwd();
                self.walker.resolve(path, cwd.as_ref(), follow_symlinks)
            }
        }
    }

    pub fn resolve_parent(&self, path: &str) -> Result<(NodeRef, String)> {
        self.resolve_parent_at(path, None)
    }

    pub fn resolve_parent_at(
        &self,
        path: &str,
        working_dir: Option<&NodeRef>,
    ) -> Result<(NodeRef, String)> {
        match working_dir {
            Some(working_dir) => self.walker.resolve_parent(path, Some(working_dir)),
            None => {
                let cwd = self.cwd();
                self.walker.resolve_parent(path, cwd.as_ref())
            }
        }
    }

    /// Metadata of the node at `path`; `follow_symlinks = false` gives lstat
    pub fn metadata(&self, path: &str, follow_symlinks: bool) -> Result<FileMetadata> {
        Ok(self.resolve_at(path, None, follow_symlinks)?.metadata())
    }

    /// Open `path`, creating a regular file when `CREATE` is set
    ///
    /// # Errors
    ///
    /// * `AlreadyExists` - `CREATE | EXCLUSIVE` and the path exists
    /// * `TooManySymlinks` - `NOFOLLOW` and the path is a symlink
    /// * resolution, creation and open errors
    pub fn open(&self, path: &str, flags: OpenFlags) -> Result<Handle> {
        let follow = !flags.contains(OpenFlags::NOFOLLOW);
        match self.resolve_at(path, None, follow) {
            Ok(node) => {
                if flags.contains(OpenFlags::CREATE | OpenFlags::EXCLUSIVE) {
                    return Err(FileSystemError::new(
                        FileSystemErrorKind::AlreadyExists,
                        "File exists",
                    ));
                }
                if node.is_symlink() {
                    return Err(FileSystemError::new(
                        FileSystemErrorKind::TooManySymlinks,
                        "Refusing to open a symbolic link",
                    ));
                }
                Handle::open(node, flags)
            }
            Err(err) if err.kind == FileSystemErrorKind::NotFound && flags.contains(OpenFlags::CREATE) => {
                let (parent, name) = self.resolve_parent(path)?;
                let entry = parent.create(&name, DEFAULT_FILE_MODE)?;
                debug!("[vfs] Created '{}' on open", path);
                Handle::open(entry.into_node(), flags)
            }
            Err(err) => Err(err),
        }
    }

    pub fn create_file(&self, path: &str, mode: u32) -> Result<NodeRef> {
        let (parent, name) = self.resolve_parent(path)?;
        Ok(parent.create(&name, mode)?.into_node())
    }

    pub fn create_directory(&self, path: &str, mode: u32) -> Result<NodeRef> {
        let (parent, name) = self.resolve_parent(path)?;
        Ok(parent.create_directory(&name, mode)?.into_node())
    }

    pub fn create_symlink(&self, path: &str, target: &str) -> Result<NodeRef> {
        if target.len() > PATH_MAX {
            return Err(FileSystemError::new(
                FileSystemErrorKind::NameTooLong,
                "Symlink target too long",
            ));
        }
        let (parent, name) = self.resolve_parent(path)?;
        Ok(parent.create_symlink(&name, target)?.into_node())
    }

    /// Add a hard link `new_path` to the node at `old_path`
    pub fn link(&self, old_path: &str, new_path: &str) -> Result<()> {
        let node = self.resolve_at(old_path, None, false)?;
        let (parent, name) = self.resolve_parent(new_path)?;
        parent.link(&node, &name)?;
        Ok(())
    }

    /// Remove the entry at `path`; directories need `allow_directories`
    pub fn unlink(&self, path: &str, allow_directories: bool) -> Result<()> {
        let (parent, name) = self.resolve_parent(path)?;
        parent.unlink(&name, allow_directories)
    }

    pub fn remove_directory(&self, path: &str) -> Result<()> {
        let node = self.resolve_at(path, None, false)?;
        if !node.is_directory() {
            return Err(FileSystemError::new(
                FileSystemErrorKind::NotADirectory,
                "Not a directory",
            ));
        }
        self.unlink(path, true)
    }

    pub fn read_link(&self, path: &str) -> Result<String> {
        let node = self.resolve_at(path, None, false)?;
        let mut buffer = alloc::vec![0u8; PATH_MAX];
        let length = node.read_link(&mut buffer)?;
        buffer.truncate(length);
        String::from_utf8(buffer).map_err(|_| {
            FileSystemError::new(FileSystemErrorKind::InvalidArgument, "Symlink target is not UTF-8")
        })
    }

    /// Every entry of the directory at `path`, `.` and `..` included
    pub fn read_dir(&self, path: &str) -> Result<Vec<DirectoryEntry>> {
        let node = self.resolve(path)?;
        let mut entries = Vec::new();
        while let Some(entry) = node.read_dir(entries.len())? {
            entries.push(entry);
        }
        Ok(entries)
    }

    pub fn truncate(&self, path: &str, length: i64) -> Result<()> {
        self.resolve(path)?.truncate(length)
    }

    /// Create an anonymous pipe, returning handles on its (read, write) ends
    pub fn create_pipe(&self) -> Result<(Handle, Handle)> {
        let (read_end, write_end) = create_pipe(self.scheduler.clone(), PIPE_BUFFER_SIZE);
        let reader = Handle::open(read_end, OpenFlags::READ)?;
        let writer = Handle::open(write_end, OpenFlags::WRITE)?;
        Ok((reader, writer))
    }

    /// Watcher for the nodes at `paths`, each watched for `events`
    pub fn watch(&self, paths: &[&str], events: PollEvents) -> Result<Arc<FsWatcher>> {
        let watcher = FsWatcher::new(self.scheduler.clone());
        for path in paths {
            watcher.watch_node(self.resolve(path)?, events);
        }
        Ok(watcher)
    }

    /// Mount the device at `device_path`, picking the driver by probing
    ///
    /// The volume is named `name`, or `volumeN` when `None`.
    ///
    /// # Errors
    ///
    /// * `InvalidArgument` - the node is not a block or character device
    /// * `NotSupported` - no registered driver recognises the device
    pub fn mount(&self, device_path: &str, name: Option<&str>, options: &str) -> Result<VolumeRef> {
        let device = self.resolve(device_path)?;
        if !device.is_block_device() && !device.is_char_device() {
            warn!("[volume] Mount: '{}' is not a device", device_path);
            return Err(FileSystemError::new(
                FileSystemErrorKind::InvalidArgument,
                "Not a device",
            ));
        }
        self.mount_device(&device, name, options)
    }

    /// Mount an already resolved device node
    pub fn mount_device(&self, device: &NodeRef, name: Option<&str>, options: &str) -> Result<VolumeRef> {
        let driver = self.drivers.identify(device).ok_or_else(|| {
            warn!("[volume] Mount: no filesystem for device");
            FileSystemError::new(FileSystemErrorKind::NotSupported, "No filesystem for device")
        })?;
        self.mount_volume(driver, Some(device), name, options)
    }

    /// Mount with an explicitly named driver
    pub fn mount_with(
        &self,
        driver_name: &str,
        device: Option<&NodeRef>,
        name: Option<&str>,
        options: &str,
    ) -> Result<VolumeRef> {
        let driver = self.drivers.get(driver_name).ok_or(FileSystemError::new(
            FileSystemErrorKind::NotFound,
            "Unknown filesystem driver",
        ))?;
        self.mount_volume(driver, device, name, options)
    }

    pub fn mount_tmpfs(&self, name: Option<&str>, params: &TmpFsParams) -> Result<VolumeRef> {
        let name = self.volume_name(name);
        let volume: VolumeRef = TmpFs::new(self.volumes.allocate_id(), &name, params);
        self.volumes.register(volume.clone())?;
        Ok(volume)
    }

    /// Mount an empty device directory; drivers publish nodes into it
    pub fn mount_devfs(&self, name: Option<&str>) -> Result<Arc<DevFs>> {
        let name = self.volume_name(name);
        let devfs = DevFs::new(self.volumes.allocate_id(), &name);
        self.volumes.register(devfs.clone())?;
        Ok(devfs)
    }

    fn mount_volume(
        &self,
        driver: Arc<dyn FsDriver>,
        device: Option<&NodeRef>,
        name: Option<&str>,
        options: &str,
    ) -> Result<VolumeRef> {
        let name = self.volume_name(name);
        let volume = driver.mount(device, self.volumes.allocate_id(), &name, options)?;
        self.volumes.register(volume.clone())?;
        Ok(volume)
    }

    fn volume_name(&self, name: Option<&str>) -> String {
        match name {
            Some(name) => String::from(name),
            None => self.volumes.generate_name(),
        }
    }

    /// Detach the volume called `name` from `/`
    ///
    /// Nodes already held by handles or resolvers stay valid; they just stop
    /// being reachable from the root.
    pub fn unmount(&self, name: &str) -> Result<()> {
        let volume = self.volumes.unregister(name)?;
        match self.drivers.get(volume.driver_name()) {
            Some(driver) => driver.unmount(&volume),
            None => {
                volume.sync();
                Ok(())
            }
        }
    }
}
