//! Filesystem driver registry
//!
//! Drivers are registered by name and probed in registration order when a
//! device is mounted without naming a driver.

use alloc::sync::Arc;
use alloc::vec::Vec;
use log::{debug, info};
use spin::RwLock;

use super::core::NodeRef;
use super::volume_manager::VolumeRef;
use crate::fs::{FileSystemError, FileSystemErrorKind, Result, VolumeId};

/// A pluggable backing store
pub trait FsDriver: Send + Sync {
    /// Unique driver name, e.g. `"tmpfs"`
    fn name(&self) -> &'static str;

    /// Whether this driver understands the contents of `device`
    fn identify(&self, device: &NodeRef) -> bool;

    /// Build a volume
    ///
    /// `id` is the volume number every node of the new volume carries. Drivers
    /// that need no device accept `None`.
    fn mount(
        &self,
        device: Option<&NodeRef>,
        id: VolumeId,
        name: &str,
        options: &str,
    ) -> Result<VolumeRef>;

    /// Tear a volume down after it left the registry
    fn unmount(&self, volume: &VolumeRef) -> Result<()> {
        volume.sync();
        Ok(())
    }
}

pub struct DriverManager {
    drivers: RwLock<Vec<Arc<dyn FsDriver>>>,
}

impl DriverManager {
    pub fn new() -> Self {
        Self {
            drivers: RwLock::new(Vec::new()),
        }
    }

    pub fn register(&self, driver: Arc<dyn FsDriver>) -> Result<()> {
        let mut drivers = self.drivers.write();
        if drivers.iter().any(|existing| existing.name() == driver.name()) {
            return Err(FileSystemError::new(
                FileSystemErrorKind::AlreadyExists,
                "Driver already registered",
            ));
        }
        info!("[vfs] Registered filesystem driver '{}'", driver.name());
        drivers.push(driver);
        Ok(())
    }

    pub fn unregister(&self, name: &str) -> Result<Arc<dyn FsDriver>> {
        let mut drivers = self.drivers.write();
        let index = drivers
            .iter()
            .position(|driver| driver.name() == name)
            .ok_or(FileSystemError::new(
                FileSystemErrorKind::NotFound,
                "Driver not registered",
            ))?;
        Ok(drivers.remove(index))
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn FsDriver>> {
        self.drivers
            .read()
            .iter()
            .find(|driver| driver.name() == name)
            .cloned()
    }

    /// First registered driver that recognises `device`
    pub fn identify(&self, device: &NodeRef) -> Option<Arc<dyn FsDriver>> {
        let found = self
            .drivers
            .read()
            .iter()
            .find(|driver| driver.identify(device))
            .cloned();
        if let Some(driver) = &found {
            debug!("[vfs] Device identified as '{}'", driver.name());
        }
        found
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.drivers.read().iter().map(|driver| driver.name()).collect()
    }
}

impl Default for DriverManager {
    fn default() -> Self {
        Self::new()
    }
}
