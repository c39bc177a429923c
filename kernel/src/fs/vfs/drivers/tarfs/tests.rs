#[cfg(test)]
mod tests {
    use crate::device::ramdisk::RamDisk;
    use crate::fs::params::TarFsParams;
    use crate::fs::vfs::core::NodeRef;
    use crate::fs::vfs::driver_manager::FsDriver;
    use crate::fs::vfs::drivers::tarfs::{TarFs, TarFsDriver};
    use crate::fs::vfs::handle::{Handle, OpenFlags};
    use crate::fs::vfs::volume_manager::FsVolume;
    use crate::fs::{FileSystemErrorKind, FileType};
    use crate::test_support::TarBuilder;
    use alloc::string::String;
    use alloc::vec;
    use alloc::vec::Vec;

    fn sample_image() -> Vec<u8> {
        TarBuilder::new()
            .directory("etc/")
            .file("etc/hostname", b"scratch\n")
            .file("usr/share/doc/readme", &vec![b'r'; 700])
            .symlink("etc/name", "hostname")
            .finish()
    }

    fn mount(image: &[u8]) -> alloc::sync::Arc<TarFs> {
        let disk: NodeRef = RamDisk::from_image("tar0", 512, image).unwrap();
        TarFs::new(2, "tar", disk, &TarFsParams::default()).unwrap()
    }

    fn read_all(node: &NodeRef) -> Vec<u8> {
        let mut out = vec![0u8; node.metadata().size as usize + 16];
        let count = node.read(0, &mut out).unwrap();
        out.truncate(count);
        out
    }

    #[test]
    fn test_members_become_nodes() {
        let fs = mount(&sample_image());
        let root = fs.root();

        let etc = root.find_dir("etc").unwrap();
        assert!(etc.is_directory());
        assert_eq!(etc.metadata().volume_id, 2);

        let hostname = etc.find_dir("hostname").unwrap();
        assert!(hostname.is_file());
        assert_eq!(hostname.metadata().size, 8);
        assert_eq!(hostname.metadata().uid, 0o1750);
        assert_eq!(read_all(&hostname), b"scratch\n");

        let mut buffer = [0u8; 64];
        let length = etc.find_dir("name").unwrap().read_link(&mut buffer).unwrap();
        assert_eq!(&buffer[..length], b"hostname");
    }

    /// Members below directories without their own header get implicit parents
    #[test]
    fn test_implicit_directories() {
        let fs = mount(&sample_image());
        let doc = fs
            .root()
            .find_dir("usr")
            .and_then(|usr| usr.find_dir("share"))
            .and_then(|share| share.find_dir("doc"))
            .unwrap();
        assert!(doc.is_directory());

        let readme = doc.find_dir("readme").unwrap();
        assert_eq!(read_all(&readme), vec![b'r'; 700]);

        let mut tail = [0u8; 10];
        assert_eq!(readme.read(695, &mut tail).unwrap(), 5);
        assert_eq!(readme.read(700, &mut tail).unwrap(), 0);
        assert_eq!(fs.node_count(), 8);
    }

    #[test]
    fn test_read_dir_lists_archive_order() {
        let fs = mount(&sample_image());
        let etc = fs.root().find_dir("etc").unwrap();
        let names: Vec<String> = (0..)
            .map_while(|index| etc.read_dir(index).unwrap())
            .map(|entry| String::from(entry.name()))
            .collect();
        assert_eq!(names, vec![".", "..", "hostname", "name"]);

        let dotdot = etc.read_dir(1).unwrap().unwrap();
        assert!(alloc::sync::Arc::ptr_eq(dotdot.node(), &fs.root()));
        assert_eq!(etc.find_dir("name").unwrap().metadata().file_type, FileType::SymbolicLink);
    }

    #[test]
    fn test_volume_is_read_only() {
        let fs = mount(&sample_image());
        let root = fs.root();
        let hostname = root.find_dir("etc").and_then(|etc| etc.find_dir("hostname")).unwrap();

        assert_eq!(root.create("new", 0o644).unwrap_err().kind, FileSystemErrorKind::ReadOnly);
        assert_eq!(root.create_directory("d", 0o755).unwrap_err().kind, FileSystemErrorKind::ReadOnly);
        assert_eq!(root.unlink("etc", true).unwrap_err().kind, FileSystemErrorKind::ReadOnly);
        assert_eq!(root.link(&hostname, "h").unwrap_err().kind, FileSystemErrorKind::ReadOnly);
        assert_eq!(hostname.write(0, b"x").unwrap_err().kind, FileSystemErrorKind::ReadOnly);
        assert_eq!(hostname.truncate(0).unwrap_err().kind, FileSystemErrorKind::ReadOnly);
        assert_eq!(hostname.chmod(0o600).unwrap_err().kind, FileSystemErrorKind::ReadOnly);

        assert_eq!(
            Handle::open(hostname.clone(), OpenFlags::WRITE).err().unwrap().kind,
            FileSystemErrorKind::ReadOnly
        );
        let handle = Handle::open(hostname.clone(), OpenFlags::READ).unwrap();
        assert_eq!(hostname.info().handle_count(), 1);
        drop(handle);
        assert_eq!(hostname.info().handle_count(), 0);
    }

    #[test]
    fn test_corrupt_checksum_is_io_error() {
        let mut image = sample_image();
        image[0] = b'x';
        let disk: NodeRef = RamDisk::from_image("bad0", 512, &image).unwrap();
        let err = TarFs::new(3, "bad", disk.clone(), &TarFsParams::default()).err().unwrap();
        assert_eq!(err.kind, FileSystemErrorKind::IoError);

        let lenient = TarFsParams {
            verify_checksums: false,
        };
        let fs = TarFs::new(3, "bad", disk, &lenient).unwrap();
        assert!(fs.root().find_dir("xtc").is_ok());
    }

    #[test]
    fn test_driver_identifies_ustar() {
        let driver = TarFsDriver;
        let tar: NodeRef = RamDisk::from_image("tar1", 512, &sample_image()).unwrap();
        let blank: NodeRef = RamDisk::new("blank", 512, 4).unwrap();
        assert!(driver.identify(&tar));
        assert!(!driver.identify(&blank));

        assert_eq!(
            driver.mount(None, 4, "t", "").err().unwrap().kind,
            FileSystemErrorKind::InvalidArgument
        );
        let volume = driver.mount(Some(&tar), 4, "t", "nochecksum").unwrap();
        assert_eq!(volume.driver_name(), "tarfs");
        assert_eq!(volume.name(), "t");
    }
}
