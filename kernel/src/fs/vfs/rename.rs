//! Rename
//!
//! Within a volume a rename links the node under its new name and then
//! unlinks the old name. Across volumes the file is recreated on the
//! destination, its bytes copied, and the source unlinked. Renames are
//! serialized on the context's rename lock, and a failure after the new
//! name was created removes it again.

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec;
use log::{debug, warn};

use super::core::NodeRef;
use super::manager::VfsManager;
use crate::fs::{FileSystemError, FileSystemErrorKind, Result};

/// Bytes moved per read/write pair when copying across volumes
pub const RENAME_COPY_CHUNK: usize = 4096;

struct RenameTarget {
    parent: NodeRef,
    name: String,
}

impl VfsManager {
    /// Rename `old_path` to `new_path`, both relative to the working directory
    pub fn rename(&self, old_path: &str, new_path: &str) -> Result<()> {
        self.rename_at(None, old_path, None, new_path)
    }

    /// Rename with separate starting directories for the two paths
    ///
    /// # Errors
    ///
    /// * `NotImplemented` - the source is a directory or a symbolic link
    /// * `IsADirectory` - the destination exists and is a directory
    /// * `CrossDevice` - the source is not a regular file and the
    ///   destination is on another volume
    /// * resolution, link, unlink, create and I/O errors
    pub fn rename_at(
        &self,
        old_dir: Option<&NodeRef>,
        old_path: &str,
        new_dir: Option<&NodeRef>,
        new_path: &str,
    ) -> Result<()> {
        let _guard = self.rename_lock.lock();

        let node = self.resolve_at(old_path, old_dir, false)?;
        let (old_parent, old_name) = self.resolve_parent_at(old_path, old_dir)?;
        let (new_parent, new_name) = self.resolve_parent_at(new_path, new_dir)?;

        if node.is_directory() {
            return Err(FileSystemError::new(
                FileSystemErrorKind::NotImplemented,
                "Directory rename not implemented",
            ));
        }
        if node.is_symlink() {
            return Err(FileSystemError::new(
                FileSystemErrorKind::NotImplemented,
                "Symbolic link rename not implemented",
            ));
        }

        let replaced = match new_parent.find_dir(&new_name) {
            Ok(existing) => {
                if existing.is_directory() {
                    return Err(FileSystemError::new(
                        FileSystemErrorKind::IsADirectory,
                        "Destination is a directory",
                    ));
                }
                if Arc::ptr_eq(&existing, &node) {
                    return Ok(());
                }
                true
            }
            Err(err) if err.kind == FileSystemErrorKind::NotFound => false,
            Err(err) => return Err(err),
        };

        let source = RenameTarget {
            parent: old_parent,
            name: old_name,
        };
        let destination = RenameTarget {
            parent: new_parent,
            name: new_name,
        };

        if node.info().volume_id() == destination.parent.info().volume_id() {
            rename_within_volume(&node, &source, &destination, replaced)
        } else {
            rename_across_volumes(&node, &source, &destination, replaced)
        }
    }
}

fn rename_within_volume(
    node: &NodeRef,
    source: &RenameTarget,
    destination: &RenameTarget,
    replaced: bool,
) -> Result<()> {
    if replaced {
        destination.parent.unlink(&destination.name, false)?;
    }
    destination.parent.link(node, &destination.name)?;

    if let Err(err) = source.parent.unlink(&source.name, false) {
        undo_create(destination);
        return Err(err);
    }
    debug!("[vfs] Renamed '{}' to '{}'", source.name, destination.name);
    Ok(())
}

fn rename_across_volumes(
    node: &NodeRef,
    source: &RenameTarget,
    destination: &RenameTarget,
    replaced: bool,
) -> Result<()> {
    if !node.is_file() {
        return Err(FileSystemError::new(
            FileSystemErrorKind::CrossDevice,
            "Only regular files can move across volumes",
        ));
    }

    let metadata = node.metadata();
    if replaced {
        destination.parent.unlink(&destination.name, false)?;
    }
    let copy = destination.parent.create(&destination.name, metadata.pmask)?.into_node();

    let copied = copy_contents(node, &copy)
        .and_then(|_| copy.chown(metadata.uid, metadata.gid))
        .and_then(|_| source.parent.unlink(&source.name, false));
    if let Err(err) = copied {
        undo_create(destination);
        return Err(err);
    }
    debug!(
        "[vfs] Moved '{}' to '{}' across volumes ({} bytes)",
        source.name, destination.name, metadata.size
    );
    Ok(())
}

fn copy_contents(source: &NodeRef, target: &NodeRef) -> Result<()> {
    let mut buffer = vec![0u8; RENAME_COPY_CHUNK];
    let mut offset = 0u64;
    loop {
        let read = source.read(offset, &mut buffer)?;
        if read == 0 {
            return Ok(());
        }

        let mut written = 0;
        while written < read {
            let count = target.write(offset + written as u64, &buffer[written..read])?;
            if count == 0 {
                return Err(FileSystemError::new(
                    FileSystemErrorKind::IoError,
                    "Short write while copying",
                ));
            }
            written += count;
        }
        offset += read as u64;
    }
}

fn undo_create(destination: &RenameTarget) {
    if let Err(err) = destination.parent.unlink(&destination.name, false) {
        warn!(
            "[vfs] Rename: could not remove '{}' after failure: {}",
            destination.name, err
        );
    }
}
