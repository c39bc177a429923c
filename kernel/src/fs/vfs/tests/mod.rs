//! Path-level tests of the filesystem context

use alloc::vec;
use alloc::vec::Vec;

use super::manager::VfsManager;
use super::handle::OpenFlags;

mod rename_tests;

/// Create (or replace the contents of) `path` with `data`
fn write_file(vfs: &VfsManager, path: &str, data: &[u8]) {
    let handle = vfs
        .open(path, OpenFlags::WRITE | OpenFlags::CREATE | OpenFlags::TRUNCATE)
        .unwrap();
    assert_eq!(handle.write(data).unwrap(), data.len());
}

fn read_file(vfs: &VfsManager, path: &str) -> Vec<u8> {
    let handle = vfs.open(path, OpenFlags::READ).unwrap();
    let mut contents = Vec::new();
    let mut buffer = vec![0u8; 512];
    loop {
        let count = handle.read(&mut buffer).unwrap();
        if count == 0 {
            return contents;
        }
        contents.extend_from_slice(&buffer[..count]);
    }
}
