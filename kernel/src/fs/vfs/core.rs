//! Core VFS types and traits
//!
//! This module defines the fundamental types of the node layer:
//! - FsNode: the interface every file, directory, symlink, device, socket and pipe implements
//! - NodeInfo: identity, mutable attributes and the waiter list each node embeds
//! - DirectoryEntry: the `(name, node, type)` record that makes a node reachable
//! - RawDirent: the fixed-size directory entry handed across the syscall boundary

use alloc::string::{String, ToString};
use alloc::sync::{Arc, Weak};
use core::any::Any;
use core::fmt;
use spin::{Mutex, MutexGuard};

use super::handle::OpenFlags;
use super::watcher::{FsWatcher, PollEvents};
use crate::fs::{
    FileMetadata, FileSystemError, FileSystemErrorKind, FileType, Inode, NAME_MAX, Result,
    VolumeId,
};
use crate::sync::waker::Waker;

/// Shared reference to a node
pub type NodeRef = Arc<dyn FsNode>;

/// Mutable attributes of a node
///
/// `nlink` counts the directory entries naming the node and `handle_count` the
/// open handles on it. Both only change while the owning `NodeInfo::meta` lock
/// is held.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NodeMeta {
    pub size: u64,
    pub pmask: u32,
    pub uid: u32,
    pub gid: u32,
    pub nlink: u32,
    pub handle_count: u32,
}

/// State shared by every node implementation
///
/// Drivers build a node with `Arc::new_cyclic` and hand the weak self reference
/// to `NodeInfo::new`, which lets default trait methods return the node itself
/// (for `.` lookups and for `DirectoryEntry` construction).
pub struct NodeInfo {
    inode: Inode,
    volume_id: VolumeId,
    kind: FileType,
    meta: Mutex<NodeMeta>,
    waiters: Waker,
    this: Weak<dyn FsNode>,
}

impl NodeInfo {
    pub fn new(
        this: Weak<dyn FsNode>,
        inode: Inode,
        volume_id: VolumeId,
        kind: FileType,
        pmask: u32,
    ) -> Self {
        Self {
            inode,
            volume_id,
            kind,
            meta: Mutex::new(NodeMeta {
                pmask,
                ..NodeMeta::default()
            }),
            waiters: Waker::new_interruptible("fs_node"),
            this,
        }
    }

    pub fn inode(&self) -> Inode {
        self.inode
    }

    pub fn volume_id(&self) -> VolumeId {
        self.volume_id
    }

    pub fn kind(&self) -> FileType {
        self.kind
    }

    /// Lock the node's mutable attributes
    pub fn meta(&self) -> MutexGuard<'_, NodeMeta> {
        self.meta.lock()
    }

    pub fn size(&self) -> u64 {
        self.meta.lock().size
    }

    pub fn nlink(&self) -> u32 {
        self.meta.lock().nlink
    }

    pub fn handle_count(&self) -> u32 {
        self.meta.lock().handle_count
    }

    /// Threads blocked on this node
    pub fn waiters(&self) -> &Waker {
        &self.waiters
    }

    /// Strong reference to the node owning this info
    pub fn this(&self) -> Result<NodeRef> {
        self.this.upgrade().ok_or(FileSystemError::new(
            FileSystemErrorKind::NotFound,
            "Node is being destroyed",
        ))
    }

    pub fn weak(&self) -> Weak<dyn FsNode> {
        self.this.clone()
    }

    /// Record a new directory entry naming this node; returns the new `nlink`
    pub fn link_acquired(&self) -> u32 {
        let mut meta = self.meta.lock();
        meta.nlink += 1;
        meta.nlink
    }

    /// Record the removal of a directory entry; returns the new `nlink`
    pub fn link_released(&self) -> u32 {
        let mut meta = self.meta.lock();
        meta.nlink = meta.nlink.saturating_sub(1);
        meta.nlink
    }

    pub fn handle_opened(&self) -> u32 {
        let mut meta = self.meta.lock();
        meta.handle_count += 1;
        meta.handle_count
    }

    pub fn handle_closed(&self) -> u32 {
        let mut meta = self.meta.lock();
        meta.handle_count = meta.handle_count.saturating_sub(1);
        meta.handle_count
    }

    /// Whether the node is neither linked nor open
    pub fn is_orphaned(&self) -> bool {
        let meta = self.meta.lock();
        meta.nlink == 0 && meta.handle_count == 0
    }

    pub fn metadata(&self) -> FileMetadata {
        let meta = *self.meta.lock();
        FileMetadata {
            inode: self.inode,
            volume_id: self.volume_id,
            file_type: self.kind,
            size: meta.size,
            pmask: meta.pmask,
            uid: meta.uid,
            gid: meta.gid,
            nlink: meta.nlink,
            handle_count: meta.handle_count,
        }
    }
}

impl fmt::Debug for NodeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeInfo")
            .field("inode", &self.inode)
            .field("volume_id", &self.volume_id)
            .field("kind", &self.kind)
            .field("meta", &*self.meta.lock())
            .finish()
    }
}

/// Error for byte I/O on a node type that has none
fn io_unsupported(kind: FileType) -> FileSystemError {
    match kind {
        FileType::Directory => {
            FileSystemError::new(FileSystemErrorKind::IsADirectory, "Is a directory")
        }
        _ => FileSystemError::new(FileSystemErrorKind::NotSupported, "Operation not supported"),
    }
}

const NOT_A_DIRECTORY: FileSystemError =
    FileSystemError::new(FileSystemErrorKind::NotADirectory, "Not a directory");

/// FsNode trait represents every addressable filesystem object
///
/// Defaults give the behaviour of a node that supports nothing: byte I/O fails
/// with `IsADirectory` on directories and `NotSupported` elsewhere, namespace
/// operations fail with `NotADirectory`, `read_link` fails with `NotASymlink`.
/// Implementations override what their type supports.
///
/// Directory implementations take their own child lock before touching a
/// child's `NodeInfo::meta`, never the other way around.
pub trait FsNode: Send + Sync {
    /// Identity and bookkeeping of this node
    fn info(&self) -> &NodeInfo;

    /// Helper for downcasting
    fn as_any(&self) -> &dyn Any;

    /// Read up to `buffer.len()` bytes starting at `offset`
    ///
    /// Returns a short count near the end of the node and 0 at or past it.
    fn read(&self, _offset: u64, _buffer: &mut [u8]) -> Result<usize> {
        Err(io_unsupported(self.info().kind()))
    }

    /// Write `buffer` at `offset`, growing the node as needed
    fn write(&self, _offset: u64, _buffer: &[u8]) -> Result<usize> {
        Err(io_unsupported(self.info().kind()))
    }

    /// Write `buffer` at the current end of the node
    ///
    /// Returns the offset the data landed at and the byte count. Overrides
    /// pick the offset and write under one lock.
    fn append(&self, buffer: &[u8]) -> Result<(u64, usize)> {
        let offset = self.info().size();
        let written = self.write(offset, buffer)?;
        Ok((offset, written))
    }

    /// Entry at `index`: 0 is `.`, 1 is `..`, then the children in insertion order
    ///
    /// Returns `Ok(None)` past the last child.
    fn read_dir(&self, _index: usize) -> Result<Option<DirectoryEntry>> {
        Err(NOT_A_DIRECTORY)
    }

    /// Look up the child called `name`, including `.` and `..`
    fn find_dir(&self, _name: &str) -> Result<NodeRef> {
        Err(NOT_A_DIRECTORY)
    }

    /// Create an empty regular file called `name`
    fn create(&self, _name: &str, _mode: u32) -> Result<DirectoryEntry> {
        Err(NOT_A_DIRECTORY)
    }

    /// Create an empty directory called `name`
    fn create_directory(&self, _name: &str, _mode: u32) -> Result<DirectoryEntry> {
        Err(NOT_A_DIRECTORY)
    }

    /// Create a symbolic link called `name` pointing at `target`
    fn create_symlink(&self, _name: &str, _target: &str) -> Result<DirectoryEntry> {
        Err(NOT_A_DIRECTORY)
    }

    /// Add a hard link called `name` to `target`
    ///
    /// Refuses directories (`IsADirectory`) and nodes of another volume
    /// (`CrossDevice`).
    fn link(&self, _target: &NodeRef, _name: &str) -> Result<DirectoryEntry> {
        Err(NOT_A_DIRECTORY)
    }

    /// Remove the entry called `name`
    ///
    /// Directories are only removed when `allow_directories` is set.
    fn unlink(&self, _name: &str, _allow_directories: bool) -> Result<()> {
        Err(NOT_A_DIRECTORY)
    }

    /// Copy the symlink target into `buffer`, returning its length
    fn read_link(&self, _buffer: &mut [u8]) -> Result<usize> {
        Err(FileSystemError::new(
            FileSystemErrorKind::NotASymlink,
            "Not a symbolic link",
        ))
    }

    fn truncate(&self, length: i64) -> Result<()> {
        if length < 0 {
            return Err(FileSystemError::new(
                FileSystemErrorKind::InvalidArgument,
                "Negative length",
            ));
        }
        Err(io_unsupported(self.info().kind()))
    }

    /// Called when a handle is opened on this node
    fn open(&self, _flags: OpenFlags) -> Result<()> {
        self.info().handle_opened();
        Ok(())
    }

    /// Called when a handle on this node is closed
    fn close(&self) {
        self.info().handle_closed();
    }

    fn ioctl(&self, _cmd: u64, _arg: u64) -> Result<u64> {
        Err(FileSystemError::new(
            FileSystemErrorKind::NotSupported,
            "ioctl not supported",
        ))
    }

    /// Flush cached state to the backing store
    fn sync(&self) {}

    /// Whether a read would make progress without blocking
    fn can_read(&self) -> bool {
        true
    }

    /// Whether a write would make progress without blocking
    fn can_write(&self) -> bool {
        true
    }

    /// Ask `watcher` to be signalled when this node is ready for `events`
    ///
    /// A node that never blocks is always ready and signals at once.
    fn watch(&self, watcher: &Arc<FsWatcher>, _events: PollEvents) {
        watcher.signal();
    }

    fn unwatch(&self, _watcher: &FsWatcher) {}

    /// Wake every thread blocked on this node
    fn unblock_all(&self) {
        self.info().waiters().wake_all();
    }

    fn chmod(&self, pmask: u32) -> Result<()> {
        self.info().meta().pmask = pmask & 0o7777;
        Ok(())
    }

    fn chown(&self, uid: u32, gid: u32) -> Result<()> {
        let mut meta = self.info().meta();
        meta.uid = uid;
        meta.gid = gid;
        Ok(())
    }

    fn metadata(&self) -> FileMetadata {
        self.info().metadata()
    }

    fn is_file(&self) -> bool {
        self.info().kind() == FileType::RegularFile
    }

    fn is_directory(&self) -> bool {
        self.info().kind() == FileType::Directory
    }

    fn is_symlink(&self) -> bool {
        self.info().kind() == FileType::SymbolicLink
    }

    fn is_char_device(&self) -> bool {
        self.info().kind() == FileType::CharDevice
    }

    fn is_block_device(&self) -> bool {
        self.info().kind() == FileType::BlockDevice
    }

    fn is_socket(&self) -> bool {
        self.info().kind() == FileType::Socket
    }

    fn is_pipe(&self) -> bool {
        self.info().kind() == FileType::Pipe
    }
}

impl fmt::Debug for dyn FsNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self.info(), f)
    }
}

/// Check a name for a new directory entry
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.contains('/') {
        return Err(FileSystemError::new(
            FileSystemErrorKind::InvalidArgument,
            "Invalid file name",
        ));
    }
    if name.len() > NAME_MAX {
        return Err(FileSystemError::new(
            FileSystemErrorKind::NameTooLong,
            "File name too long",
        ));
    }
    if name == "." || name == ".." {
        return Err(FileSystemError::new(
            FileSystemErrorKind::AlreadyExists,
            "File exists",
        ));
    }
    Ok(())
}

/// A named reference to a node
///
/// Holding a `DirectoryEntry` keeps its node alive. The inode and type are
/// cached from the node when the entry is built.
#[derive(Clone)]
pub struct DirectoryEntry {
    name: String,
    node: NodeRef,
    inode: Inode,
    file_type: FileType,
}

impl DirectoryEntry {
    pub fn new(name: &str, node: NodeRef) -> Result<Self> {
        if name.len() > NAME_MAX {
            return Err(FileSystemError::new(
                FileSystemErrorKind::NameTooLong,
                "File name too long",
            ));
        }
        let info = node.info();
        Ok(Self {
            name: name.to_string(),
            inode: info.inode(),
            file_type: info.kind(),
            node,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn node(&self) -> &NodeRef {
        &self.node
    }

    pub fn into_node(self) -> NodeRef {
        self.node
    }

    pub fn inode(&self) -> Inode {
        self.inode
    }

    pub fn file_type(&self) -> FileType {
        self.file_type
    }

    pub fn dirent_type(&self) -> DirentType {
        DirentType::from(self.file_type)
    }

    pub fn to_raw(&self) -> RawDirent {
        let mut name = [0u8; NAME_MAX];
        let bytes = self.name.as_bytes();
        name[..bytes.len()].copy_from_slice(bytes);
        RawDirent {
            inode: self.inode,
            kind: self.dirent_type() as u8,
            name_len: bytes.len() as u8,
            name,
        }
    }
}

impl fmt::Debug for DirectoryEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirectoryEntry")
            .field("name", &self.name)
            .field("inode", &self.inode)
            .field("file_type", &self.file_type)
            .finish()
    }
}

/// Directory entry type values of the syscall ABI
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirentType {
    Unknown = 0,
    Fifo = 1,
    CharDevice = 2,
    Directory = 4,
    BlockDevice = 6,
    Regular = 8,
    Symlink = 10,
    Socket = 12,
}

impl From<FileType> for DirentType {
    fn from(file_type: FileType) -> Self {
        match file_type {
            FileType::RegularFile => DirentType::Regular,
            FileType::Directory => DirentType::Directory,
            FileType::CharDevice => DirentType::CharDevice,
            FileType::BlockDevice => DirentType::BlockDevice,
            FileType::SymbolicLink => DirentType::Symlink,
            FileType::Socket => DirentType::Socket,
            FileType::Pipe => DirentType::Fifo,
        }
    }
}

/// Fixed-size directory entry copied to user space
#[repr(C)]
#[derive(Clone, Copy)]
pub struct RawDirent {
    pub inode: Inode,
    pub kind: u8,
    pub name_len: u8,
    pub name: [u8; NAME_MAX],
}

impl RawDirent {
    pub fn name(&self) -> &[u8] {
        &self.name[..self.name_len as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::String;

    struct BareNode {
        info: NodeInfo,
    }

    impl FsNode for BareNode {
        fn info(&self) -> &NodeInfo {
            &self.info
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    fn bare(kind: FileType) -> NodeRef {
        Arc::new_cyclic(|this: &Weak<BareNode>| {
            let this: Weak<dyn FsNode> = this.clone();
            BareNode {
                info: NodeInfo::new(this, 42, 3, kind, 0o644),
            }
        })
    }

    #[test]
    fn test_default_operations_follow_node_type() {
        let dir = bare(FileType::Directory);
        let mut buf = [0u8; 4];
        assert_eq!(dir.read(0, &mut buf).unwrap_err().kind, FileSystemErrorKind::IsADirectory);
        assert_eq!(dir.write(0, &buf).unwrap_err().kind, FileSystemErrorKind::IsADirectory);
        assert_eq!(dir.truncate(0).unwrap_err().kind, FileSystemErrorKind::IsADirectory);

        let device = bare(FileType::CharDevice);
        assert_eq!(device.read(0, &mut buf).unwrap_err().kind, FileSystemErrorKind::NotSupported);
        assert_eq!(device.find_dir("x").unwrap_err().kind, FileSystemErrorKind::NotADirectory);
        assert_eq!(device.read_link(&mut buf).unwrap_err().kind, FileSystemErrorKind::NotASymlink);
        assert_eq!(device.truncate(-1).unwrap_err().kind, FileSystemErrorKind::InvalidArgument);
        assert_eq!(device.ioctl(1, 0).unwrap_err().kind, FileSystemErrorKind::NotSupported);
    }

    #[test]
    fn test_predicates_derive_from_type() {
        let socket = bare(FileType::Socket);
        assert!(socket.is_socket());
        assert!(!socket.is_file());
        assert!(!socket.is_directory());

        let pipe = bare(FileType::Pipe);
        assert!(pipe.is_pipe());
        assert!(!pipe.is_char_device());
        assert!(bare(FileType::BlockDevice).is_block_device());
        assert!(bare(FileType::SymbolicLink).is_symlink());
    }

    #[test]
    fn test_counters_and_metadata() {
        let node = bare(FileType::RegularFile);
        let info = node.info();
        assert!(info.is_orphaned());

        assert_eq!(info.link_acquired(), 1);
        node.open(OpenFlags::READ).unwrap();
        assert_eq!(info.handle_count(), 1);
        assert!(!info.is_orphaned());

        node.chmod(0o100600).unwrap();
        node.chown(1000, 100).unwrap();
        let metadata = node.metadata();
        assert_eq!(metadata.inode, 42);
        assert_eq!(metadata.volume_id, 3);
        assert_eq!(metadata.pmask, 0o600);
        assert_eq!((metadata.uid, metadata.gid), (1000, 100));
        assert_eq!((metadata.nlink, metadata.handle_count), (1, 1));

        node.close();
        assert_eq!(info.link_released(), 0);
        assert_eq!(info.link_released(), 0);
        assert!(info.is_orphaned());
    }

    #[test]
    fn test_self_reference_upgrades_while_alive() {
        let node = bare(FileType::RegularFile);
        let this = node.info().this().unwrap();
        assert!(Arc::ptr_eq(&node, &this));

        let weak = node.info().weak();
        drop(this);
        drop(node);
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn test_validate_name() {
        assert!(validate_name("file.txt").is_ok());
        assert_eq!(validate_name("").unwrap_err().kind, FileSystemErrorKind::InvalidArgument);
        assert_eq!(validate_name("a/b").unwrap_err().kind, FileSystemErrorKind::InvalidArgument);
        assert_eq!(validate_name(".").unwrap_err().kind, FileSystemErrorKind::AlreadyExists);
        assert_eq!(validate_name("..").unwrap_err().kind, FileSystemErrorKind::AlreadyExists);

        let long: String = core::iter::repeat('a').take(NAME_MAX + 1).collect();
        assert_eq!(validate_name(&long).unwrap_err().kind, FileSystemErrorKind::NameTooLong);
        assert!(validate_name(&long[..NAME_MAX]).is_ok());
    }

    #[test]
    fn test_dirent_type_values() {
        assert_eq!(DirentType::from(FileType::Pipe) as u8, 1);
        assert_eq!(DirentType::from(FileType::CharDevice) as u8, 2);
        assert_eq!(DirentType::from(FileType::Directory) as u8, 4);
        assert_eq!(DirentType::from(FileType::BlockDevice) as u8, 6);
        assert_eq!(DirentType::from(FileType::RegularFile) as u8, 8);
        assert_eq!(DirentType::from(FileType::SymbolicLink) as u8, 10);
        assert_eq!(DirentType::from(FileType::Socket) as u8, 12);
    }

    #[test]
    fn test_raw_dirent_encoding() {
        let entry = DirectoryEntry::new("hello", bare(FileType::Directory)).unwrap();
        let raw = entry.to_raw();
        assert_eq!(raw.inode, 42);
        assert_eq!(raw.kind, DirentType::Directory as u8);
        assert_eq!(raw.name(), b"hello");
        assert!(raw.name[5..].iter().all(|byte| *byte == 0));
    }

    #[test]
    fn test_entry_keeps_node_alive() {
        let node = bare(FileType::RegularFile);
        let weak = Arc::downgrade(&node);
        let entry = DirectoryEntry::new("kept", node).unwrap();
        assert!(weak.upgrade().is_some());
        drop(entry);
        assert!(weak.upgrade().is_none());
    }
}
