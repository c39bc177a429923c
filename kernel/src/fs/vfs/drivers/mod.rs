pub mod devfs;
pub mod tarfs;
pub mod tmpfs;
