//! TarFS - read-only USTAR archive filesystem
//!
//! The archive is read from a device node at mount time. Headers are parsed
//! once into an in-memory tree; file contents stay on the device and are read
//! through it on demand.

use alloc::format;
use alloc::string::{String, ToString};
use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;
use core::any::Any;
use log::{debug, info, warn};
use spin::{Mutex, RwLock};

use crate::fs::params::{FileSystemParams, TarFsParams};
use crate::fs::vfs::core::{DirectoryEntry, FsNode, NodeInfo, NodeRef};
use crate::fs::vfs::driver_manager::FsDriver;
use crate::fs::vfs::handle::OpenFlags;
use crate::fs::vfs::volume_manager::{FsVolume, VolumeRef};
use crate::fs::{FileSystemError, FileSystemErrorKind, FileType, Inode, Result, VolumeId};

pub const TAR_BLOCK_SIZE: usize = 512;

const ROOT_INODE: Inode = 1;
const MAGIC_OFFSET: usize = 257;
const USTAR_MAGIC: &[u8] = b"ustar";

const READ_ONLY: FileSystemError =
    FileSystemError::new(FileSystemErrorKind::ReadOnly, "TarFS is read-only");

fn corrupt(message: &'static str) -> FileSystemError {
    FileSystemError::new(FileSystemErrorKind::IoError, message)
}

/// One 512-byte header block
struct TarHeader {
    block: [u8; TAR_BLOCK_SIZE],
}

impl TarHeader {
    fn is_zero(&self) -> bool {
        self.block.iter().all(|&byte| byte == 0)
    }

    fn field(&self, start: usize, length: usize) -> &[u8] {
        let field = &self.block[start..start + length];
        let end = field.iter().position(|&byte| byte == 0).unwrap_or(length);
        &field[..end]
    }

    fn text(&self, start: usize, length: usize) -> Result<&str> {
        core::str::from_utf8(self.field(start, length))
            .map_err(|_| corrupt("Non UTF-8 name in tar header"))
    }

    fn octal(&self, start: usize, length: usize) -> Result<u64> {
        let digits = core::str::from_utf8(self.field(start, length))
            .map_err(|_| corrupt("Invalid octal field"))?
            .trim_matches(|c: char| c == ' ' || c == '\0');
        if digits.is_empty() {
            return Ok(0);
        }
        u64::from_str_radix(digits, 8).map_err(|_| corrupt("Invalid octal field"))
    }

    fn is_ustar(&self) -> bool {
        self.block[MAGIC_OFFSET..].starts_with(USTAR_MAGIC)
    }

    /// Full member path, prefix included
    fn path(&self) -> Result<String> {
        let name = self.text(0, 100)?;
        if self.is_ustar() {
            let prefix = self.text(345, 155)?;
            if !prefix.is_empty() {
                return Ok(format!("{}/{}", prefix, name));
            }
        }
        Ok(name.to_string())
    }

    fn mode(&self) -> Result<u32> {
        Ok((self.octal(100, 8)? & 0o7777) as u32)
    }

    fn uid(&self) -> Result<u32> {
        Ok(self.octal(108, 8)? as u32)
    }

    fn gid(&self) -> Result<u32> {
        Ok(self.octal(116, 8)? as u32)
    }

    fn size(&self) -> Result<u64> {
        self.octal(124, 12)
    }

    fn type_flag(&self) -> u8 {
        self.block[156]
    }

    fn link_name(&self) -> Result<&str> {
        self.text(157, 100)
    }

    /// Sum of all header bytes with the checksum field read as spaces
    fn computed_checksum(&self) -> u64 {
        self.block
            .iter()
            .enumerate()
            .map(|(index, &byte)| {
                if (148..156).contains(&index) {
                    b' ' as u64
                } else {
                    byte as u64
                }
            })
            .sum()
    }

    fn verify_checksum(&self) -> Result<()> {
        if self.octal(148, 8)? != self.computed_checksum() {
            return Err(corrupt("Tar header checksum mismatch"));
        }
        Ok(())
    }
}

enum TarContent {
    /// Contents live on the device at `offset`
    File { device: NodeRef, offset: u64 },
    Directory(RwLock<Vec<DirectoryEntry>>),
    Symlink(String),
}

pub struct TarNode {
    info: NodeInfo,
    parent: RwLock<Option<Weak<dyn FsNode>>>,
    content: TarContent,
}

impl TarNode {
    fn new(
        inode: Inode,
        volume_id: VolumeId,
        kind: FileType,
        pmask: u32,
        content: TarContent,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this: &Weak<TarNode>| {
            let this: Weak<dyn FsNode> = this.clone();
            TarNode {
                info: NodeInfo::new(this, inode, volume_id, kind, pmask),
                parent: RwLock::new(None),
                content,
            }
        })
    }

    fn entries(&self) -> Result<&RwLock<Vec<DirectoryEntry>>> {
        match &self.content {
            TarContent::Directory(entries) => Ok(entries),
            _ => Err(FileSystemError::new(
                FileSystemErrorKind::NotADirectory,
                "Not a directory",
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

    fn child(&self, name: &str) -> Option<NodeRef> {
        let entries = self.entries().ok()?;
        entries
            .read()
            .iter()
            .find(|entry| entry.name() == name)
            .map(|entry| entry.node().clone())
    }

    /// Insert `node` as `name`, replacing a same-named member of an earlier header
    fn insert(&self, name: &str, node: Arc<TarNode>) -> Result<()> {
        *node.parent.write() = Some(self.info.weak());
        let mut entries = self.entries()?.write();
        let entry = DirectoryEntry::new(name, node)?;
        entry.node().info().link_acquired();
        match entries.iter().position(|existing| existing.name() == name) {
            Some(index) => {
                let replaced = core::mem::replace(&mut entries[index], entry);
                replaced.node().info().link_released();
            }
            None => entries.push(entry),
        }
        Ok(())
    }
}

impl FsNode for TarNode {
    fn info(&self) -> &NodeInfo {
        &self.info
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn read(&self, offset: u64, buffer: &mut [u8]) -> Result<usize> {
        let TarContent::File { device, offset: start } = &self.content else {
            return match self.content {
                TarContent::Directory(_) => Err(FileSystemError::new(
                    FileSystemErrorKind::IsADirectory,
                    "Is a directory",
                )),
                _ => Err(FileSystemError::new(
                    FileSystemErrorKind::NotSupported,
                    "Operation not supported",
                )),
            };
        };

        let size = self.info.size();
        if offset >= size {
            return Ok(0);
        }
        let count = buffer.len().min((size - offset) as usize);
        device.read(start + offset, &mut buffer[..count])
    }

    fn write(&self, _offset: u64, _buffer: &[u8]) -> Result<usize> {
        Err(READ_ONLY)
    }

    fn read_dir(&self, index: usize) -> Result<Option<DirectoryEntry>> {
        let entries = self.entries()?;
        match index {
            0 => DirectoryEntry::new(".", self.info.this()?).map(Some),
            1 => DirectoryEntry::new("..", self.parent_node()?).map(Some),
            _ => Ok(entries.read().get(index - 2).cloned()),
        }
    }

    fn find_dir(&self, name: &str) -> Result<NodeRef> {
        self.entries()?;
        match name {
            "." => self.info.this(),
            ".." => self.parent_node(),
            _ => self.child(name).ok_or(FileSystemError::new(
                FileSystemErrorKind::NotFound,
                "No such file or directory",
            )),
        }
    }

    fn create(&self, _name: &str, _mode: u32) -> Result<DirectoryEntry> {
        self.entries()?;
        Err(READ_ONLY)
    }

    fn create_directory(&self, _name: &str, _mode: u32) -> Result<DirectoryEntry> {
        self.entries()?;
        Err(READ_ONLY)
    }

    fn create_symlink(&self, _name: &str, _target: &str) -> Result<DirectoryEntry> {
        self.entries()?;
        Err(READ_ONLY)
    }

    fn link(&self, _target: &NodeRef, _name: &str) -> Result<DirectoryEntry> {
        self.entries()?;
        Err(READ_ONLY)
    }

    fn unlink(&self, _name: &str, _allow_directories: bool) -> Result<()> {
        self.entries()?;
        Err(READ_ONLY)
    }

    fn read_link(&self, buffer: &mut [u8]) -> Result<usize> {
        match &self.content {
            TarContent::Symlink(target) => {
                let count = target.len().min(buffer.len());
                buffer[..count].copy_from_slice(&target.as_bytes()[..count]);
                Ok(count)
            }
            _ => Err(FileSystemError::new(
                FileSystemErrorKind::NotASymlink,
                "Not a symbolic link",
            )),
        }
    }

    fn truncate(&self, _length: i64) -> Result<()> {
        Err(READ_ONLY)
    }

    fn open(&self, flags: OpenFlags) -> Result<()> {
        if flags.writable() {
            return Err(READ_ONLY);
        }
        self.info.handle_opened();
        Ok(())
    }

    fn chmod(&self, _pmask: u32) -> Result<()> {
        Err(READ_ONLY)
    }

    fn chown(&self, _uid: u32, _gid: u32) -> Result<()> {
        Err(READ_ONLY)
    }
}

pub struct TarFs {
    id: VolumeId,
    name: String,
    device: NodeRef,
    root: Arc<TarNode>,
    node_count: usize,
}

impl TarFs {
    /// Parse the archive on `device` into a volume
    ///
    /// # Errors
    ///
    /// * `IoError` - a truncated, corrupt or checksum-mismatched header
    pub fn new(id: VolumeId, name: &str, device: NodeRef, params: &TarFsParams) -> Result<Arc<Self>> {
        let root = TarNode::new(
            ROOT_INODE,
            id,
            FileType::Directory,
            0o555,
            TarContent::Directory(RwLock::new(Vec::new())),
        );
        root.info.link_acquired();

        let builder = TreeBuilder {
            volume_id: id,
            root: root.clone(),
            next_inode: Mutex::new(ROOT_INODE + 1),
        };
        builder.load(&device, params)?;
        let node_count = (*builder.next_inode.lock() - ROOT_INODE) as usize;
        info!("[tarfs] Volume '{}' loaded with {} nodes", name, node_count);

        Ok(Arc::new(Self {
            id,
            name: name.to_string(),
            device,
            root,
            node_count,
        }))
    }

    pub fn device(&self) -> &NodeRef {
        &self.device
    }

    /// Nodes in the tree, the root included
    pub fn node_count(&self) -> usize {
        self.node_count
    }
}

impl FsVolume for TarFs {
    fn id(&self) -> VolumeId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn driver_name(&self) -> &'static str {
        "tarfs"
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

struct TreeBuilder {
    volume_id: VolumeId,
    root: Arc<TarNode>,
    next_inode: Mutex<Inode>,
}

impl TreeBuilder {
    fn generate_inode(&self) -> Inode {
        let mut next = self.next_inode.lock();
        let inode = *next;
        *next += 1;
        inode
    }

    fn load(&self, device: &NodeRef, params: &TarFsParams) -> Result<()> {
        let mut offset = 0u64;
        loop {
            let mut header = TarHeader {
                block: [0; TAR_BLOCK_SIZE],
            };
            let read = device.read(offset, &mut header.block)?;
            if read == 0 {
                return Ok(());
            }
            if read < TAR_BLOCK_SIZE {
                return Err(corrupt("Truncated tar header"));
            }
            if header.is_zero() {
                return Ok(());
            }
            if params.verify_checksums {
                header.verify_checksum()?;
            }

            let size = header.size()?;
            let data_offset = offset + TAR_BLOCK_SIZE as u64;
            self.add_member(device, &header, data_offset, size)?;
            offset = data_offset + size.div_ceil(TAR_BLOCK_SIZE as u64) * TAR_BLOCK_SIZE as u64;
        }
    }

    fn add_member(&self, device: &NodeRef, header: &TarHeader, data_offset: u64, size: u64) -> Result<()> {
        let path = header.path()?;
        let components: Vec<&str> = path
            .split('/')
            .filter(|component| !component.is_empty() && *component != ".")
            .collect();
        let Some((name, parents)) = components.split_last() else {
            return Ok(());
        };
        if parents.contains(&"..") || *name == ".." {
            warn!("[tarfs] Skipping member '{}' outside the archive root", path);
            return Ok(());
        }

        let parent = self.directory_for(parents)?;
        let parent = as_tar_directory(&parent)?;
        let mode = header.mode()?;
        let (kind, content) = match header.type_flag() {
            b'0' | b'\0' | b'7' => (
                FileType::RegularFile,
                TarContent::File {
                    device: device.clone(),
                    offset: data_offset,
                },
            ),
            b'5' => {
                if let Some(existing) = parent.child(name) {
                    if existing.is_directory() {
                        existing.info().meta().pmask = mode;
                        return Ok(());
                    }
                }
                (FileType::Directory, TarContent::Directory(RwLock::new(Vec::new())))
            }
            b'2' => (FileType::SymbolicLink, TarContent::Symlink(header.link_name()?.to_string())),
            flag => {
                debug!("[tarfs] Skipping '{}' with type flag {:#x}", path, flag);
                return Ok(());
            }
        };

        let node = TarNode::new(self.generate_inode(), self.volume_id, kind, mode, content);
        {
            let mut meta = node.info.meta();
            meta.uid = header.uid()?;
            meta.gid = header.gid()?;
            meta.size = match &node.content {
                TarContent::File { .. } => size,
                TarContent::Symlink(target) => target.len() as u64,
                TarContent::Directory(_) => 0,
            };
        }
        parent.insert(name, node)
    }

    /// Directory at `components` below the root, created when missing
    fn directory_for(&self, components: &[&str]) -> Result<NodeRef> {
        let mut current: NodeRef = self.root.clone();
        for component in components {
            let directory = as_tar_directory(&current)?;
            let next: NodeRef = match directory.child(component) {
                Some(node) => node,
                None => {
                    let created = TarNode::new(
                        self.generate_inode(),
                        self.volume_id,
                        FileType::Directory,
                        0o755,
                        TarContent::Directory(RwLock::new(Vec::new())),
                    );
                    directory.insert(component, created.clone())?;
                    created
                }
            };
            current = next;
        }
        Ok(current)
    }
}

fn as_tar_directory(node: &NodeRef) -> Result<&TarNode> {
    match node.as_any().downcast_ref::<TarNode>() {
        Some(directory) if directory.is_directory() => Ok(directory),
        _ => Err(corrupt("Tar member below a non-directory")),
    }
}

pub struct TarFsDriver;

impl FsDriver for TarFsDriver {
    fn name(&self) -> &'static str {
        "tarfs"
    }

    fn identify(&self, device: &NodeRef) -> bool {
        let mut magic = [0u8; 5];
        matches!(device.read(MAGIC_OFFSET as u64, &mut magic), Ok(5) if magic == USTAR_MAGIC)
    }

    fn mount(
        &self,
        device: Option<&NodeRef>,
        id: VolumeId,
        name: &str,
        options: &str,
    ) -> Result<VolumeRef> {
        let device = device.ok_or(FileSystemError::new(
            FileSystemErrorKind::InvalidArgument,
            "TarFS needs a device",
        ))?;
        let params = TarFsParams::from_option_string(options).map_err(|message| {
            warn!("[tarfs] {}", message);
            FileSystemError::new(FileSystemErrorKind::InvalidArgument, "Invalid tarfs options")
        })?;
        Ok(TarFs::new(id, name, device.clone(), &params)?)
    }
}

#[cfg(test)]
mod tests;
