//! TmpFS - Memory-based filesystem implementation
//!
//! Regular files, directories and symbolic links held entirely in memory.
//! File buffers are accounted in `TMPFS_CHUNK_SIZE` steps against an optional
//! memory limit. Every live node is tracked in the store's inode table; a node
//! leaves the table and returns its memory when its last reference goes away.

use alloc::string::{String, ToString};
use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;
use core::any::Any;
use core::sync::atomic::{AtomicBool, Ordering};
use hashbrown::HashMap;
use log::{debug, warn};
use spin::{Mutex, RwLock};

use crate::fs::params::{FileSystemParams, TmpFsParams};
use crate::fs::vfs::core::{DirectoryEntry, FsNode, NodeInfo, NodeRef, validate_name};
use crate::fs::vfs::driver_manager::FsDriver;
use crate::fs::vfs::volume_manager::{FsVolume, VolumeRef};
use crate::fs::{FileSystemError, FileSystemErrorKind, FileType, Inode, Result, VolumeId};

/// Granularity of file buffer accounting
pub const TMPFS_CHUNK_SIZE: usize = 1024;

/// Largest file a TmpFS buffer can hold
pub const TMPFS_MAX_FILE_SIZE: usize = isize::MAX as usize;

const ROOT_INODE: Inode = 1;

const FILE_TOO_LARGE: FileSystemError =
    FileSystemError::new(FileSystemErrorKind::NoSpace, "File too large");

fn round_to_chunk(size: usize) -> usize {
    size.div_ceil(TMPFS_CHUNK_SIZE) * TMPFS_CHUNK_SIZE
}

/// Per-volume allocator state shared by every node of a TmpFS
struct TmpStore {
    volume_id: VolumeId,
    /// Memory limit (0 = unlimited)
    memory_limit: usize,
    current_memory: Mutex<usize>,
    next_inode: Mutex<Inode>,
    nodes: Mutex<HashMap<Inode, Weak<TmpNode>>>,
}

impl TmpStore {
    fn generate_inode(&self) -> Inode {
        let mut next = self.next_inode.lock();
        let inode = *next;
        *next += 1;
        inode
    }

    /// Move a buffer's reservation from `old` to `new` bytes
    fn reserve(&self, old: usize, new: usize) -> Result<()> {
        let mut current = self.current_memory.lock();
        if new > old {
            let grown = current.checked_add(new - old).ok_or(FILE_TOO_LARGE)?;
            if self.memory_limit != 0 && grown > self.memory_limit {
                return Err(FileSystemError::new(
                    FileSystemErrorKind::NoSpace,
                    "TmpFS memory limit exceeded",
                ));
            }
            *current = grown;
        } else {
            *current = current.saturating_sub(old - new);
        }
        Ok(())
    }

    fn release(&self, bytes: usize) {
        let mut current = self.current_memory.lock();
        *current = current.saturating_sub(bytes);
    }
}

struct FileData {
    bytes: Vec<u8>,
    /// Bytes charged to the store for this buffer
    reserved: usize,
}

enum TmpContent {
    File(RwLock<FileData>),
    Directory(RwLock<Vec<DirectoryEntry>>),
    Symlink(String),
}

/// A TmpFS node
pub struct TmpNode {
    info: NodeInfo,
    store: Arc<TmpStore>,
    /// Target of `..`; for the volume root it is the mount parent
    parent: RwLock<Option<Weak<dyn FsNode>>>,
    /// Set on a directory, under its child lock, once it is removed from its parent
    removed: AtomicBool,
    content: TmpContent,
}

impl TmpNode {
    fn new(
        this: &Weak<TmpNode>,
        store: &Arc<TmpStore>,
        inode: Inode,
        mode: u32,
        parent: Option<Weak<dyn FsNode>>,
        content: TmpContent,
    ) -> Self {
        let kind = match &content {
            TmpContent::File(_) => FileType::RegularFile,
            TmpContent::Directory(_) => FileType::Directory,
            TmpContent::Symlink(_) => FileType::SymbolicLink,
        };
        let this: Weak<dyn FsNode> = this.clone();
        let node = Self {
            info: NodeInfo::new(this, inode, store.volume_id, kind, mode & 0o7777),
            store: Arc::clone(store),
            parent: RwLock::new(parent),
            removed: AtomicBool::new(false),
            content,
        };
        if let TmpContent::Symlink(target) = &node.content {
            node.info.meta().size = target.len() as u64;
        }
        node
    }

    fn children(&self) -> Result<&RwLock<Vec<DirectoryEntry>>> {
        match &self.content {
            TmpContent::Directory(children) => Ok(children),
            _ => Err(FileSystemError::new(
                FileSystemErrorKind::NotADirectory,
                "Not a directory",
            )),
        }
    }

    fn file_data(&self) -> Result<&RwLock<FileData>> {
        match &self.content {
            TmpContent::File(data) => Ok(data),
            TmpContent::Directory(_) => Err(FileSystemError::new(
                FileSystemErrorKind::IsADirectory,
                "Is a directory",
            )),
            TmpContent::Symlink(_) => Err(FileSystemError::new(
                FileSystemErrorKind::NotSupported,
                "Symbolic links have no data",
            )),
        }
    }

    fn parent_node(&self) -> Result<NodeRef> {
        let parent = self.parent.read().as_ref().and_then(Weak::upgrade);
        match parent {
            Some(parent) => Ok(parent),
            None => self.info.this(),
        }
    }

    /// Resize a file buffer, zero-filling growth
    fn resize(&self, data: &mut FileData, length: usize) -> Result<()> {
        if length > TMPFS_MAX_FILE_SIZE {
            return Err(FILE_TOO_LARGE);
        }
        let reserved = round_to_chunk(length);
        self.store.reserve(data.reserved, reserved)?;
        if let Some(growth) = length.checked_sub(data.bytes.len()) {
            if data.bytes.try_reserve_exact(growth).is_err() {
                self.store.release(reserved.saturating_sub(data.reserved));
                return Err(FileSystemError::new(
                    FileSystemErrorKind::NoSpace,
                    "Out of memory for file buffer",
                ));
            }
        }
        data.reserved = reserved;
        data.bytes.resize(length, 0);
        if data.bytes.capacity() > reserved {
            data.bytes.shrink_to(reserved);
        }
        self.info.meta().size = length as u64;
        Ok(())
    }

    /// Fails once this directory has been unlinked; call with the child lock held
    fn check_not_removed(&self) -> Result<()> {
        if self.removed.load(Ordering::Acquire) {
            return Err(FileSystemError::new(
                FileSystemErrorKind::NotFound,
                "Directory has been removed",
            ));
        }
        Ok(())
    }

    fn write_locked(&self, data: &mut FileData, start: usize, buffer: &[u8]) -> Result<usize> {
        if buffer.is_empty() {
            return Ok(0);
        }
        let end = start.checked_add(buffer.len()).ok_or(FILE_TOO_LARGE)?;
        if end > data.bytes.len() {
            self.resize(data, end)?;
        }
        data.bytes[start..end].copy_from_slice(buffer);
        Ok(buffer.len())
    }

    /// Allocate a child node and add it to this directory under `name`
    fn insert_child(&self, name: &str, mode: u32, content: TmpContent) -> Result<DirectoryEntry> {
        validate_name(name)?;
        let children = self.children()?;
        let mut children = children.write();
        self.check_not_removed()?;
        if children.iter().any(|entry| entry.name() == name) {
            return Err(FileSystemError::new(
                FileSystemErrorKind::AlreadyExists,
                "File exists",
            ));
        }

        let node = TmpFs::allocate_node(&self.store, mode, Some(self.info.weak()), content);
        let entry = DirectoryEntry::new(name, node.clone())?;
        node.info.link_acquired();
        children.push(entry.clone());
        Ok(entry)
    }
}

impl FsNode for TmpNode {
    fn info(&self) -> &NodeInfo {
        &self.info
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn read(&self, offset: u64, buffer: &mut [u8]) -> Result<usize> {
        let data = self.file_data()?.read();
        let length = data.bytes.len() as u64;
        if offset >= length {
            return Ok(0);
        }
        let start = offset as usize;
        let count = buffer.len().min(data.bytes.len() - start);
        buffer[..count].copy_from_slice(&data.bytes[start..start + count]);
        Ok(count)
    }

    fn write(&self, offset: u64, buffer: &[u8]) -> Result<usize> {
        let data = self.file_data()?;
        if buffer.is_empty() {
            return Ok(0);
        }
        let mut data = data.write();
        let start = usize::try_from(offset).map_err(|_| FILE_TOO_LARGE)?;
        self.write_locked(&mut data, start, buffer)
    }

    fn append(&self, buffer: &[u8]) -> Result<(u64, usize)> {
        let mut data = self.file_data()?.write();
        let start = data.bytes.len();
        let written = self.write_locked(&mut data, start, buffer)?;
        Ok((start as u64, written))
    }

    fn truncate(&self, length: i64) -> Result<()> {
        if length < 0 {
            return Err(FileSystemError::new(
                FileSystemErrorKind::InvalidArgument,
                "Negative length",
            ));
        }
        let length = usize::try_from(length).map_err(|_| {
            FileSystemError::new(FileSystemErrorKind::NoSpace, "Length beyond addressable range")
        })?;
        let mut data = self.file_data()?.write();
        self.resize(&mut data, length)
    }

    fn read_dir(&self, index: usize) -> Result<Option<DirectoryEntry>> {
        let children = self.children()?;
        match index {
            0 => DirectoryEntry::new(".", self.info.this()?).map(Some),
            1 => DirectoryEntry::new("..", self.parent_node()?).map(Some),
            _ => Ok(children.read().get(index - 2).cloned()),
        }
    }

    fn find_dir(&self, name: &str) -> Result<NodeRef> {
        let children = self.children()?;
        match name {
            "." => self.info.this(),
            ".." => self.parent_node(),
            _ => children
                .read()
                .iter()
                .find(|entry| entry.name() == name)
                .map(|entry| entry.node().clone())
                .ok_or(FileSystemError::new(
                    FileSystemErrorKind::NotFound,
                    "No such file or directory",
                )),
        }
    }

    fn create(&self, name: &str, mode: u32) -> Result<DirectoryEntry> {
        self.insert_child(
            name,
            mode,
            TmpContent::File(RwLock::new(FileData {
                bytes: Vec::new(),
                reserved: 0,
            })),
        )
    }

    fn create_directory(&self, name: &str, mode: u32) -> Result<DirectoryEntry> {
        self.insert_child(name, mode, TmpContent::Directory(RwLock::new(Vec::new())))
    }

    fn create_symlink(&self, name: &str, target: &str) -> Result<DirectoryEntry> {
        if target.is_empty() {
            return Err(FileSystemError::new(
                FileSystemErrorKind::NotFound,
                "Empty symlink target",
            ));
        }
        self.insert_child(name, 0o777, TmpContent::Symlink(target.to_string()))
    }

    fn read_link(&self, buffer: &mut [u8]) -> Result<usize> {
        match &self.content {
            TmpContent::Symlink(target) => {
                let count = buffer.len().min(target.len());
                buffer[..count].copy_from_slice(&target.as_bytes()[..count]);
                Ok(count)
            }
            _ => Err(FileSystemError::new(
                FileSystemErrorKind::NotASymlink,
                "Not a symbolic link",
            )),
        }
    }

    fn link(&self, target: &NodeRef, name: &str) -> Result<DirectoryEntry> {
        let children = self.children()?;
        if target.info().volume_id() != self.info.volume_id() {
            return Err(FileSystemError::new(
                FileSystemErrorKind::CrossDevice,
                "Cannot link across volumes",
            ));
        }
        validate_name(name)?;

        let mut children = children.write();
        self.check_not_removed()?;
        if children.iter().any(|entry| entry.name() == name) {
            return Err(FileSystemError::new(
                FileSystemErrorKind::AlreadyExists,
                "File exists",
            ));
        }
        if target.is_directory() {
            warn!("[tmpfs] Link: File to hard link is a directory!");
            return Err(FileSystemError::new(
                FileSystemErrorKind::IsADirectory,
                "Cannot hard link a directory",
            ));
        }

        let entry = DirectoryEntry::new(name, target.clone())?;
        target.info().link_acquired();
        children.push(entry.clone());
        Ok(entry)
    }

    fn unlink(&self, name: &str, allow_directories: bool) -> Result<()> {
        let children = self.children()?;
        let removed = {
            let mut children = children.write();
            let index = children
                .iter()
                .position(|entry| entry.name() == name)
                .ok_or(FileSystemError::new(
                    FileSystemErrorKind::NotFound,
                    "No such file or directory",
                ))?;

            let node = children[index].node();
            if node.is_directory() {
                if !allow_directories {
                    return Err(FileSystemError::new(
                        FileSystemErrorKind::IsADirectory,
                        "Is a directory",
                    ));
                }
                let directory = node.as_any().downcast_ref::<TmpNode>().ok_or(
                    FileSystemError::new(FileSystemErrorKind::NotSupported, "Foreign directory"),
                )?;
                let grandchildren = directory.children()?.read();
                if !grandchildren.is_empty() {
                    return Err(FileSystemError::new(
                        FileSystemErrorKind::DirectoryNotEmpty,
                        "Directory not empty",
                    ));
                }
                directory.removed.store(true, Ordering::Release);
            }

            let entry = children.remove(index);
            entry.node().info().link_released();
            entry
        };

        if removed.node().info().is_orphaned() {
            debug!("[tmpfs] Last link to '{}' removed", name);
        }
        Ok(())
    }
}

impl Drop for TmpNode {
    fn drop(&mut self) {
        let inode = self.info.inode();
        self.store.nodes.lock().remove(&inode);
        if let TmpContent::File(data) = &self.content {
            self.store.release(data.read().reserved);
        }
        debug!("[tmpfs] Deleting node {} of volume {}", inode, self.store.volume_id);
    }
}

/// TmpFS - a mounted memory-backed volume
pub struct TmpFs {
    name: String,
    store: Arc<TmpStore>,
    root: Arc<TmpNode>,
    params: TmpFsParams,
}

impl TmpFs {
    pub fn new(id: VolumeId, name: &str, params: &TmpFsParams) -> Arc<Self> {
        let store = Arc::new(TmpStore {
            volume_id: id,
            memory_limit: params.memory_limit,
            current_memory: Mutex::new(0),
            next_inode: Mutex::new(ROOT_INODE),
            nodes: Mutex::new(HashMap::new()),
        });
        let root = Self::allocate_node(
            &store,
            params.default_mode,
            None,
            TmpContent::Directory(RwLock::new(Vec::new())),
        );
        // The mount point entry in `/` names the root.
        root.info.link_acquired();

        Arc::new(Self {
            name: name.to_string(),
            store,
            root,
            params: params.clone(),
        })
    }

    fn allocate_node(
        store: &Arc<TmpStore>,
        mode: u32,
        parent: Option<Weak<dyn FsNode>>,
        content: TmpContent,
    ) -> Arc<TmpNode> {
        let inode = store.generate_inode();
        let node = Arc::new_cyclic(|this| TmpNode::new(this, store, inode, mode, parent, content));
        store.nodes.lock().insert(inode, Arc::downgrade(&node));
        node
    }

    /// Bytes currently charged against the memory limit
    pub fn memory_usage(&self) -> usize {
        *self.store.current_memory.lock()
    }

    pub fn memory_limit(&self) -> usize {
        self.store.memory_limit
    }

    /// Number of nodes still alive, root included
    pub fn node_count(&self) -> usize {
        self.store.nodes.lock().len()
    }

    /// Live node with the given inode number
    pub fn node(&self, inode: Inode) -> Option<NodeRef> {
        let node = self.store.nodes.lock().get(&inode).and_then(Weak::upgrade)?;
        Some(node as NodeRef)
    }

    pub fn params(&self) -> &TmpFsParams {
        &self.params
    }
}

impl FsVolume for TmpFs {
    fn id(&self) -> VolumeId {
        self.store.volume_id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn driver_name(&self) -> &'static str {
        "tmpfs"
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

/// Driver creating TmpFS volumes from an option string such as `"size=64M"`
pub struct TmpFsDriver;

impl FsDriver for TmpFsDriver {
    fn name(&self) -> &'static str {
        "tmpfs"
    }

    fn identify(&self, _device: &NodeRef) -> bool {
        false
    }

    fn mount(
        &self,
        _device: Option<&NodeRef>,
        id: VolumeId,
        name: &str,
        options: &str,
    ) -> Result<VolumeRef> {
        let params = TmpFsParams::from_option_string(options).map_err(|message| {
            warn!("[tmpfs] {}", message);
            FileSystemError::new(FileSystemErrorKind::InvalidArgument, "Invalid tmpfs options")
        })?;
        Ok(TmpFs::new(id, name, &params))
    }
}
