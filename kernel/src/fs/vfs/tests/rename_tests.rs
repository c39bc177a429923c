use alloc::sync::Arc;
use alloc::vec::Vec;

use super::{read_file, write_file};
use crate::fs::params::TmpFsParams;
use crate::fs::vfs::handle::OpenFlags;
use crate::fs::vfs::rename::RENAME_COPY_CHUNK;
use crate::fs::vfs::{FsNode, FsVolume};
use crate::fs::FileSystemErrorKind;
use crate::test_support::vfs_with_tmpfs;

/// Moving a file between volumes recreates it and destroys the original
#[test]
fn test_rename_across_volumes() {
    let vfs = vfs_with_tmpfs(&["a", "b"]);
    write_file(&vfs, "/a/f", b"hi");
    let original = vfs.resolve("/a/f").unwrap();
    original.chmod(0o600).unwrap();
    original.chown(7, 8).unwrap();

    vfs.rename("/a/f", "/b/f").unwrap();

    assert_eq!(vfs.resolve("/a/f").unwrap_err().kind, FileSystemErrorKind::NotFound);
    assert_eq!(read_file(&vfs, "/b/f"), b"hi");
    assert_eq!(original.info().nlink(), 0);

    let moved = vfs.metadata("/b/f", true).unwrap();
    assert_eq!(moved.volume_id, vfs.volumes().find("b").unwrap().id());
    assert_eq!(moved.pmask, 0o600);
    assert_eq!((moved.uid, moved.gid), (7, 8));
    assert_eq!(moved.nlink, 1);
}

#[test]
fn test_rename_across_volumes_copies_every_chunk() {
    let vfs = vfs_with_tmpfs(&["a", "b"]);
    let data: Vec<u8> = (0..RENAME_COPY_CHUNK * 2 + 123).map(|i| (i % 251) as u8).collect();
    write_file(&vfs, "/a/big", &data);

    vfs.rename("/a/big", "/b/big").unwrap();
    assert_eq!(read_file(&vfs, "/b/big"), data);
}

/// A handle opened before a cross-volume move still reads the old node
#[test]
fn test_open_handle_survives_cross_volume_rename() {
    let vfs = vfs_with_tmpfs(&["a", "b"]);
    write_file(&vfs, "/a/f", b"old");
    let handle = vfs.open("/a/f", OpenFlags::READ).unwrap();

    vfs.rename("/a/f", "/b/f").unwrap();

    let mut buffer = [0u8; 8];
    assert_eq!(handle.read(&mut buffer).unwrap(), 3);
    assert_eq!(&buffer[..3], b"old");
    assert_eq!(handle.node().info().nlink(), 0);
    assert_eq!(handle.node().info().handle_count(), 1);
}

#[test]
fn test_rename_within_volume_keeps_node() {
    let vfs = vfs_with_tmpfs(&["a"]);
    vfs.create_directory("/a/d", 0o755).unwrap();
    write_file(&vfs, "/a/x", b"x");
    let node = vfs.resolve("/a/x").unwrap();

    vfs.rename("/a/x", "/a/d/y").unwrap();

    assert_eq!(vfs.resolve("/a/x").unwrap_err().kind, FileSystemErrorKind::NotFound);
    let renamed = vfs.resolve("/a/d/y").unwrap();
    assert!(Arc::ptr_eq(&renamed, &node));
    assert_eq!(node.info().nlink(), 1);
}

#[test]
fn test_rename_replaces_existing_file() {
    let vfs = vfs_with_tmpfs(&["a", "b"]);
    write_file(&vfs, "/a/x", b"new");
    write_file(&vfs, "/a/y", b"old");
    let replaced = vfs.resolve("/a/y").unwrap();

    vfs.rename("/a/x", "/a/y").unwrap();
    assert_eq!(read_file(&vfs, "/a/y"), b"new");
    assert_eq!(replaced.info().nlink(), 0);

    write_file(&vfs, "/b/y", b"other");
    vfs.rename("/a/y", "/b/y").unwrap();
    assert_eq!(read_file(&vfs, "/b/y"), b"new");
}

#[test]
fn test_rename_onto_itself_is_noop() {
    let vfs = vfs_with_tmpfs(&["a"]);
    write_file(&vfs, "/a/f", b"same");
    vfs.link("/a/f", "/a/g").unwrap();

    vfs.rename("/a/f", "/a/f").unwrap();
    vfs.rename("/a/f", "/a/g").unwrap();
    assert_eq!(read_file(&vfs, "/a/f"), b"same");
    assert_eq!(vfs.metadata("/a/g", true).unwrap().nlink, 2);
}

#[test]
fn test_rename_rejections() {
    let vfs = vfs_with_tmpfs(&["a", "b"]);
    vfs.create_directory("/a/d", 0o755).unwrap();
    vfs.create_symlink("/a/l", "d").unwrap();
    write_file(&vfs, "/a/f", b"");

    assert_eq!(vfs.rename("/a/d", "/a/e").unwrap_err().kind, FileSystemErrorKind::NotImplemented);
    assert_eq!(vfs.rename("/a/l", "/a/m").unwrap_err().kind, FileSystemErrorKind::NotImplemented);
    assert_eq!(vfs.rename("/a/f", "/a/d").unwrap_err().kind, FileSystemErrorKind::IsADirectory);
    assert_eq!(vfs.rename("/a/none", "/a/g").unwrap_err().kind, FileSystemErrorKind::NotFound);
    assert_eq!(vfs.rename("/a/f", "/a/none/g").unwrap_err().kind, FileSystemErrorKind::NotFound);

    assert!(vfs.resolve_at("/a/l", None, false).unwrap().is_symlink());
    assert!(vfs.resolve("/a/f").is_ok());
}

/// A copy that runs out of space leaves the source untouched
#[test]
fn test_failed_cross_volume_copy_rolls_back() {
    let vfs = vfs_with_tmpfs(&["a"]);
    vfs.mount_tmpfs(Some("small"), &TmpFsParams::with_memory_limit(1024)).unwrap();
    write_file(&vfs, "/a/f", &[7u8; 3000]);

    assert_eq!(vfs.rename("/a/f", "/small/f").unwrap_err().kind, FileSystemErrorKind::NoSpace);
    assert_eq!(vfs.resolve("/small/f").unwrap_err().kind, FileSystemErrorKind::NotFound);
    assert_eq!(read_file(&vfs, "/a/f").len(), 3000);
}

#[test]
fn test_rename_at_uses_given_directories() {
    let vfs = vfs_with_tmpfs(&["a", "b"]);
    write_file(&vfs, "/a/f", b"rel");
    let a = vfs.resolve("/a").unwrap();
    let b = vfs.resolve("/b").unwrap();

    vfs.rename_at(Some(&a), "f", Some(&b), "g").unwrap();
    assert_eq!(read_file(&vfs, "/b/g"), b"rel");
}
