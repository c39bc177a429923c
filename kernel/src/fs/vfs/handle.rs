//! Open handles
//!
//! A `Handle` is an open reference to a node with a position and access mode.
//! The node's `open` hook runs when the handle is created and its `close` hook
//! when the handle is dropped, so `handle_count` tracks live handles exactly.

use core::fmt;
use core::ops::BitOr;
use spin::Mutex;

use super::core::{DirectoryEntry, NodeRef};
use crate::fs::{FileSystemError, FileSystemErrorKind, Result, SeekFrom};

/// Flags accepted by `open`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OpenFlags(u32);

impl OpenFlags {
    pub const READ: Self = Self(0x01);
    pub const WRITE: Self = Self(0x02);
    pub const READ_WRITE: Self = Self(0x03);
    /// Position every write at the current end of the node
    pub const APPEND: Self = Self(0x04);
    /// Create a regular file if the path does not exist
    pub const CREATE: Self = Self(0x08);
    /// With `CREATE`, fail if the path exists
    pub const EXCLUSIVE: Self = Self(0x10);
    /// Discard the contents of a regular file opened for writing
    pub const TRUNCATE: Self = Self(0x20);
    /// Do not follow a symlink in the last component
    pub const NOFOLLOW: Self = Self(0x40);

    const ALL: u32 = 0x7f;

    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Build flags from raw bits, dropping unknown ones
    pub const fn from_bits_truncate(bits: u32) -> Self {
        Self(bits & Self::ALL)
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn readable(self) -> bool {
        self.contains(Self::READ)
    }

    pub const fn writable(self) -> bool {
        self.contains(Self::WRITE)
    }
}

impl BitOr for OpenFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

pub struct Handle {
    node: NodeRef,
    flags: OpenFlags,
    position: Mutex<u64>,
}

impl Handle {
    /// Open `node` with `flags`
    ///
    /// # Errors
    ///
    /// * `IsADirectory` - write access was requested on a directory
    /// * any error from the node's `open` hook or from truncation
    pub fn open(node: NodeRef, flags: OpenFlags) -> Result<Self> {
        if flags.writable() && node.is_directory() {
            return Err(FileSystemError::new(
                FileSystemErrorKind::IsADirectory,
                "Cannot open a directory for writing",
            ));
        }

        node.open(flags)?;
        let handle = Self {
            node,
            flags,
            position: Mutex::new(0),
        };

        if flags.contains(OpenFlags::TRUNCATE) && flags.writable() && handle.node.is_file() {
            handle.node.truncate(0)?;
        }

        Ok(handle)
    }

    pub fn node(&self) -> &NodeRef {
        &self.node
    }

    pub fn flags(&self) -> OpenFlags {
        self.flags
    }

    pub fn position(&self) -> u64 {
        *self.position.lock()
    }

    fn is_stream(&self) -> bool {
        self.node.info().kind().is_stream()
    }

    pub fn read(&self, buffer: &mut [u8]) -> Result<usize> {
        if !self.flags.readable() {
            return Err(FileSystemError::new(
                FileSystemErrorKind::PermissionDenied,
                "Handle not open for reading",
            ));
        }
        if self.is_stream() {
            return self.node.read(0, buffer);
        }

        let mut position = self.position.lock();
        let read = self.node.read(*position, buffer)?;
        *position += read as u64;
        Ok(read)
    }

    pub fn write(&self, buffer: &[u8]) -> Result<usize> {
        if !self.flags.writable() {
            return Err(FileSystemError::new(
                FileSystemErrorKind::PermissionDenied,
                "Handle not open for writing",
            ));
        }
        if self.is_stream() {
            return self.node.write(0, buffer);
        }

        let mut position = self.position.lock();
        if self.flags.contains(OpenFlags::APPEND) {
            let (offset, written) = self.node.append(buffer)?;
            *position = offset + written as u64;
            return Ok(written);
        }
        let written = self.node.write(*position, buffer)?;
        *position += written as u64;
        Ok(written)
    }

    /// Move the position and return the new one
    pub fn seek(&self, from: SeekFrom) -> Result<u64> {
        if self.is_stream() {
            return Err(FileSystemError::new(
                FileSystemErrorKind::InvalidArgument,
                "Illegal seek on a stream",
            ));
        }

        let mut position = self.position.lock();
        let target = match from {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::Current(delta) => position.checked_add_signed(delta),
            SeekFrom::End(delta) => self.node.info().size().checked_add_signed(delta),
        };
        let target = target.ok_or(FileSystemError::new(
            FileSystemErrorKind::InvalidArgument,
            "Seek before start of file",
        ))?;
        *position = target;
        Ok(target)
    }

    /// Next directory entry, or `None` once the listing is exhausted
    pub fn read_dir(&self) -> Result<Option<DirectoryEntry>> {
        let mut position = self.position.lock();
        let entry = self.node.read_dir(*position as usize)?;
        if entry.is_some() {
            *position += 1;
        }
        Ok(entry)
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("node", &self.node)
            .field("flags", &self.flags)
            .field("position", &self.position())
            .finish()
    }
}

impl Drop for Handle {
    fn drop(&mut self) {
        self.node.close();
    }
}
