//! Filesystem Parameter System
//!
//! Typed mount configuration for the bundled drivers. Each parameter type can be
//! built from the comma-separated option string handed to `mount`, and converted
//! to and from a string map for drivers that only understand key/value pairs.
//!
//! # Usage
//!
//! ```rust,ignore
//! use vfs_core::fs::params::{FileSystemParams, TmpFsParams};
//!
//! // 1MiB tmpfs whose new nodes default to 0700
//! let params = TmpFsParams::from_option_string("size=1M,mode=0700")?;
//! let volume = vfs.mount_tmpfs(Some("scratch"), &params)?;
//! ```

use alloc::collections::BTreeMap;
use alloc::format;
use alloc::string::{String, ToString};
use core::any::Any;

/// Core trait for filesystem parameter types
///
/// `as_any()` lets a driver recover its concrete parameter type from a
/// `&dyn FileSystemParams`.
pub trait FileSystemParams {
    /// Serialize the parameters into key/value pairs
    fn to_string_map(&self) -> BTreeMap<String, String>;

    /// Parse parameters from key/value pairs
    ///
    /// Missing keys fall back to the type's default. Malformed values are
    /// reported with a description.
    fn from_string_map(map: &BTreeMap<String, String>) -> Result<Self, String>
    where
        Self: Sized;

    /// Parse a mount option string such as `"size=64M,mode=0755"`
    ///
    /// Flags without a value (`"nochecksum"`) are stored with an empty value.
    fn from_option_string(options: &str) -> Result<Self, String>
    where
        Self: Sized,
    {
        Self::from_string_map(&parse_option_string(options))
    }

    /// Enable dynamic downcasting for runtime type identification
    fn as_any(&self) -> &dyn Any;
}

/// Split `"a=1,b,c=3"` into a key/value map
pub fn parse_option_string(options: &str) -> BTreeMap<String, String> {
    let mut map = BTreeMap::new();
    for option in options.split(',') {
        let option = option.trim();
        if option.is_empty() {
            continue;
        }
        match option.split_once('=') {
            Some((key, value)) => map.insert(key.trim().to_string(), value.trim().to_string()),
            None => map.insert(option.to_string(), String::new()),
        };
    }
    map
}

/// Parse a byte size with an optional `K`, `M` or `G` suffix
pub fn parse_size(size_str: &str) -> Option<usize> {
    let size_str = size_str.trim();
    if size_str.is_empty() {
        return None;
    }

    let (number_part, multiplier) = match size_str.as_bytes()[size_str.len() - 1] {
        b'K' | b'k' => (&size_str[..size_str.len() - 1], 1024),
        b'M' | b'm' => (&size_str[..size_str.len() - 1], 1024 * 1024),
        b'G' | b'g' => (&size_str[..size_str.len() - 1], 1024 * 1024 * 1024),
        _ => (size_str, 1),
    };

    number_part.parse::<usize>().ok()?.checked_mul(multiplier)
}

/// TmpFS configuration parameters
///
/// A memory limit of 0 means unlimited. The limit covers file contents only,
/// rounded up to the allocation chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TmpFsParams {
    /// Maximum bytes of file data (0 = unlimited)
    pub memory_limit: usize,
    /// Permission mask given to the volume root
    pub default_mode: u32,
}

impl Default for TmpFsParams {
    fn default() -> Self {
        Self {
            memory_limit: 0,
            default_mode: 0o755,
        }
    }
}

impl TmpFsParams {
    /// Create TmpFS parameters with the specified memory limit
    pub fn with_memory_limit(memory_limit: usize) -> Self {
        Self {
            memory_limit,
            ..Self::default()
        }
    }
}

impl FileSystemParams for TmpFsParams {
    fn to_string_map(&self) -> BTreeMap<String, String> {
        let mut map = BTreeMap::new();
        map.insert("size".to_string(), self.memory_limit.to_string());
        map.insert("mode".to_string(), format!("{:o}", self.default_mode));
        map
    }

    fn from_string_map(map: &BTreeMap<String, String>) -> Result<Self, String> {
        let mut params = Self::default();

        if let Some(size_str) = map.get("size") {
            params.memory_limit =
                parse_size(size_str).ok_or_else(|| format!("Invalid size value: {}", size_str))?;
        }
        if let Some(mode_str) = map.get("mode") {
            params.default_mode = u32::from_str_radix(mode_str, 8)
                .ok()
                .filter(|mode| *mode <= 0o7777)
                .ok_or_else(|| format!("Invalid mode value: {}", mode_str))?;
        }

        Ok(params)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Parameters for the read-only tar filesystem
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TarFsParams {
    /// Reject archives whose header checksums do not match
    pub verify_checksums: bool,
}

impl Default for TarFsParams {
    fn default() -> Self {
        Self {
            verify_checksums: true,
        }
    }
}

impl FileSystemParams for TarFsParams {
    fn to_string_map(&self) -> BTreeMap<String, String> {
        let mut map = BTreeMap::new();
        if !self.verify_checksums {
            map.insert("nochecksum".to_string(), String::new());
        }
        map
    }

    fn from_string_map(map: &BTreeMap<String, String>) -> Result<Self, String> {
        Ok(Self {
            verify_checksums: !map.contains_key("nochecksum"),
        })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
