//! Filesystem layer
//!
//! Shared vocabulary of the VFS: error taxonomy, node classification, metadata
//! snapshots and the limits every driver honours. The node interface and the
//! resolver live in [`vfs`]; typed mount options live in [`params`].

use core::fmt;

pub mod params;
pub mod vfs;

/// Longest single path component, in bytes
pub const NAME_MAX: usize = 255;

/// Longest path accepted by the resolver, in bytes
pub const PATH_MAX: usize = 4096;

/// Symlinks followed during one resolution before giving up
pub const MAXIMUM_SYMLINK_AMOUNT: usize = 10;

/// Driver-assigned node number, unique within a volume
pub type Inode = u64;

/// Registry-assigned volume number. 0 belongs to the root.
pub type VolumeId = u32;

pub const ROOT_VOLUME_ID: VolumeId = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileSystemErrorKind {
    NotFound,
    AlreadyExists,
    NotADirectory,
    IsADirectory,
    NotASymlink,
    CrossDevice,
    TooManySymlinks,
    InvalidArgument,
    PermissionDenied,
    NotSupported,
    NotImplemented,
    Interrupted,
    TimedOut,
    IoError,
    Fault,
    NameTooLong,
    NoSpace,
    ReadOnly,
    BrokenPipe,
    DirectoryNotEmpty,
    Busy,
}

impl FileSystemErrorKind {
    /// POSIX errno for this kind. The syscall layer negates it.
    pub const fn errno(self) -> i32 {
        match self {
            FileSystemErrorKind::PermissionDenied => 1,
            FileSystemErrorKind::NotFound => 2,
            FileSystemErrorKind::Interrupted => 4,
            FileSystemErrorKind::IoError => 5,
            FileSystemErrorKind::Fault => 14,
            FileSystemErrorKind::Busy => 16,
            FileSystemErrorKind::AlreadyExists => 17,
            FileSystemErrorKind::CrossDevice => 18,
            FileSystemErrorKind::NotADirectory => 20,
            FileSystemErrorKind::IsADirectory => 21,
            FileSystemErrorKind::InvalidArgument | FileSystemErrorKind::NotASymlink => 22,
            FileSystemErrorKind::NoSpace => 28,
            FileSystemErrorKind::ReadOnly => 30,
            FileSystemErrorKind::BrokenPipe => 32,
            FileSystemErrorKind::NameTooLong => 36,
            FileSystemErrorKind::NotImplemented => 38,
            FileSystemErrorKind::DirectoryNotEmpty => 39,
            FileSystemErrorKind::TooManySymlinks => 40,
            FileSystemErrorKind::NotSupported => 95,
            FileSystemErrorKind::TimedOut => 110,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
pub struct FileSystemError {
    pub kind: FileSystemErrorKind,
    pub message: &'static str,
}

impl FileSystemError {
    pub const fn new(kind: FileSystemErrorKind, message: &'static str) -> Self {
        Self { kind, message }
    }
}

impl fmt::Debug for FileSystemError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FileSystemError {{ kind: {:?}, message: {} }}", self.kind, self.message)
    }
}

impl fmt::Display for FileSystemError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

/// Result type for file system operations
pub type Result<T> = core::result::Result<T, FileSystemError>;

/// Node classification, fixed when the node is created
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    RegularFile,
    Directory,
    CharDevice,
    BlockDevice,
    SymbolicLink,
    Socket,
    Pipe,
}

impl FileType {
    /// Streams have no meaningful offset; handles on them never advance.
    pub const fn is_stream(self) -> bool {
        matches!(self, FileType::CharDevice | FileType::Socket | FileType::Pipe)
    }
}

/// Point-in-time copy of a node's identity and mutable attributes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMetadata {
    pub inode: Inode,
    pub volume_id: VolumeId,
    pub file_type: FileType,
    pub size: u64,
    pub pmask: u32,
    pub uid: u32,
    pub gid: u32,
    pub nlink: u32,
    pub handle_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekFrom {
    Start(u64),
    Current(i64),
    End(i64),
}
