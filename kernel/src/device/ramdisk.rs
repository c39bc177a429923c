use alloc::sync::{Arc, Weak};
use alloc::vec;
use alloc::vec::Vec;
use core::any::Any;
use spin::Mutex;

use super::{DEVICE_VOLUME_ID, allocate_device_inode};
use crate::fs::vfs::core::{FsNode, NodeInfo};
use crate::fs::{FileSystemError, FileSystemErrorKind, FileType, Result};

/// ioctl: total size in bytes
pub const RAMDISK_GET_SIZE: u64 = 0x1;
/// ioctl: sector size in bytes
pub const RAMDISK_GET_SECTOR_SIZE: u64 = 0x2;

fn check_sector_size(sector_size: usize) -> Result<()> {
    if sector_size == 0 {
        return Err(FileSystemError::new(
            FileSystemErrorKind::InvalidArgument,
            "Sector size must be non-zero",
        ));
    }
    Ok(())
}

/// Memory-backed block device
pub struct RamDisk {
    info: NodeInfo,
    disk_name: &'static str,
    sector_size: usize,
    data: Mutex<Vec<Vec<u8>>>,
}

impl RamDisk {
    /// # Errors
    ///
    /// * `InvalidArgument` - `sector_size` is 0
    pub fn new(disk_name: &'static str, sector_size: usize, sector_count: usize) -> Result<Arc<Self>> {
        check_sector_size(sector_size)?;
        let mut data = Vec::with_capacity(sector_count);
        for _ in 0..sector_count {
            data.push(vec![0; sector_size]);
        }
        Ok(Self::with_sectors(disk_name, sector_size, data))
    }

    /// Disk holding `image`, zero-padded to whole sectors
    pub fn from_image(disk_name: &'static str, sector_size: usize, image: &[u8]) -> Result<Arc<Self>> {
        check_sector_size(sector_size)?;
        let data = image
            .chunks(sector_size)
            .map(|chunk| {
                let mut sector = vec![0; sector_size];
                sector[..chunk.len()].copy_from_slice(chunk);
                sector
            })
            .collect();
        Ok(Self::with_sectors(disk_name, sector_size, data))
    }

    fn with_sectors(disk_name: &'static str, sector_size: usize, data: Vec<Vec<u8>>) -> Arc<Self> {
        let disk_size = (sector_size * data.len()) as u64;
        let disk = Arc::new_cyclic(|this: &Weak<RamDisk>| {
            let this: Weak<dyn FsNode> = this.clone();
            RamDisk {
                info: NodeInfo::new(
                    this,
                    allocate_device_inode(),
                    DEVICE_VOLUME_ID,
                    FileType::BlockDevice,
                    0o660,
                ),
                disk_name,
                sector_size,
                data: Mutex::new(data),
            }
        });
        disk.info.meta().size = disk_size;
        disk
    }

    pub fn disk_name(&self) -> &'static str {
        self.disk_name
    }

    pub fn sector_size(&self) -> usize {
        self.sector_size
    }

    pub fn disk_size(&self) -> usize {
        self.sector_size * self.data.lock().len()
    }
}

impl FsNode for RamDisk {
    fn info(&self) -> &NodeInfo {
        &self.info
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn read(&self, offset: u64, buffer: &mut [u8]) -> Result<usize> {
        let data = self.data.lock();
        let disk_size = (self.sector_size * data.len()) as u64;
        if offset >= disk_size {
            return Ok(0);
        }

        let count = buffer.len().min((disk_size - offset) as usize);
        let mut done = 0;
        while done < count {
            let position = offset as usize + done;
            let sector = &data[position / self.sector_size];
            let within = position % self.sector_size;
            let step = (self.sector_size - within).min(count - done);
            buffer[done..done + step].copy_from_slice(&sector[within..within + step]);
            done += step;
        }
        Ok(count)
    }

    fn write(&self, offset: u64, buffer: &[u8]) -> Result<usize> {
        let mut data = self.data.lock();
        let disk_size = (self.sector_size * data.len()) as u64;
        if offset >= disk_size && !buffer.is_empty() {
            return Err(FileSystemError::new(
                FileSystemErrorKind::NoSpace,
                "Write past end of device",
            ));
        }

        let count = buffer.len().min(disk_size.saturating_sub(offset) as usize);
        let mut done = 0;
        while done < count {
            let position = offset as usize + done;
            let sector_size = self.sector_size;
            let sector = &mut data[position / sector_size];
            let within = position % sector_size;
            let step = (sector_size - within).min(count - done);
            sector[within..within + step].copy_from_slice(&buffer[done..done + step]);
            done += step;
        }
        Ok(count)
    }

    fn ioctl(&self, cmd: u64, _arg: u64) -> Result<u64> {
        match cmd {
            RAMDISK_GET_SIZE => Ok(self.disk_size() as u64),
            RAMDISK_GET_SECTOR_SIZE => Ok(self.sector_size as u64),
            _ => Err(FileSystemError::new(
                FileSystemErrorKind::NotSupported,
                "Unknown ramdisk ioctl",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ramdisk_is_block_device() {
        let disk = RamDisk::new("ram0", 512, 4).unwrap();
        assert!(disk.is_block_device());
        assert_eq!(disk.metadata().size, 2048);
        assert_eq!(disk.ioctl(RAMDISK_GET_SIZE, 0).unwrap(), 2048);
        assert_eq!(disk.ioctl(RAMDISK_GET_SECTOR_SIZE, 0).unwrap(), 512);
        assert_eq!(disk.ioctl(0x99, 0).unwrap_err().kind, FileSystemErrorKind::NotSupported);
        assert_eq!(disk.info().volume_id(), DEVICE_VOLUME_ID);
    }

    #[test]
    fn test_ramdisk_io_spans_sectors() {
        let disk = RamDisk::new("ram1", 4, 4).unwrap();
        assert_eq!(disk.write(2, b"abcdefg").unwrap(), 7);

        let mut buffer = [0u8; 9];
        assert_eq!(disk.read(1, &mut buffer).unwrap(), 9);
        assert_eq!(&buffer, b"\0abcdefg\0");
    }

    #[test]
    fn test_ramdisk_bounds() {
        let disk = RamDisk::new("ram2", 4, 2).unwrap();
        assert_eq!(disk.write(6, b"xyz").unwrap(), 2);
        assert_eq!(disk.write(8, b"x").unwrap_err().kind, FileSystemErrorKind::NoSpace);

        let mut buffer = [0u8; 8];
        assert_eq!(disk.read(6, &mut buffer).unwrap(), 2);
        assert_eq!(disk.read(8, &mut buffer).unwrap(), 0);
    }

    #[test]
    fn test_ramdisk_from_image_pads_last_sector() {
        let disk = RamDisk::from_image("img", 4, b"hello").unwrap();
        assert_eq!(disk.disk_size(), 8);

        let mut buffer = [0xffu8; 8];
        disk.read(0, &mut buffer).unwrap();
        assert_eq!(&buffer, b"hello\0\0\0");
    }

    #[test]
    fn test_ramdisk_rejects_zero_sector_size() {
        let invalid = Some(FileSystemErrorKind::InvalidArgument);
        assert_eq!(RamDisk::new("ram3", 0, 4).err().map(|err| err.kind), invalid);
        assert_eq!(RamDisk::from_image("img0", 0, b"data").err().map(|err| err.kind), invalid);
    }
}
