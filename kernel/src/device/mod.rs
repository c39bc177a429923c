//! Device nodes
//!
//! Devices are nodes that live outside any volume. They carry
//! `DEVICE_VOLUME_ID` and take inode numbers from a global counter, and are
//! made reachable by registering them in a devfs volume.

use core::sync::atomic::{AtomicU64, Ordering};

use crate::fs::{Inode, VolumeId};

pub mod ramdisk;

/// Volume number carried by nodes that belong to no volume
pub const DEVICE_VOLUME_ID: VolumeId = VolumeId::MAX;

static NEXT_DEVICE_INODE: AtomicU64 = AtomicU64::new(1);

/// Next inode number for a device node
pub fn allocate_device_inode() -> Inode {
    NEXT_DEVICE_INODE.fetch_add(1, Ordering::Relaxed)
}
