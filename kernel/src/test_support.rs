//! Host-thread implementation of the scheduler capability, plus fixtures
//! shared by the test modules.

use alloc::format;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, Ordering};
use hashbrown::HashMap;
use spin::Mutex;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use crate::fs::params::TmpFsParams;
use crate::fs::vfs::drivers::tarfs::TAR_BLOCK_SIZE;
use crate::fs::vfs::manager::VfsManager;
use crate::sync::scheduler::{Scheduler, Thread};

/// A host thread driven through park/unpark
pub struct StdThread {
    handle: thread::Thread,
    signal: AtomicBool,
}

impl StdThread {
    /// Mark a signal pending and kick the thread out of `block`
    pub fn raise_signal(&self) {
        self.signal.store(true, Ordering::Release);
        self.handle.unpark();
    }

    pub fn clear_signal(&self) {
        self.signal.store(false, Ordering::Release);
    }
}

impl Thread for StdThread {
    fn block(&self, timeout_us: Option<u64>) {
        match timeout_us {
            Some(timeout) => thread::park_timeout(Duration::from_micros(timeout)),
            None => thread::park(),
        }
    }

    fn unblock(&self) {
        self.handle.unpark();
    }

    fn has_pending_signal(&self) -> bool {
        self.signal.load(Ordering::Acquire)
    }
}

pub struct StdScheduler {
    start: Instant,
    threads: Mutex<HashMap<ThreadId, Arc<StdThread>>>,
}

impl StdScheduler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            start: Instant::now(),
            threads: Mutex::new(HashMap::new()),
        })
    }

    pub fn current_std_thread(&self) -> Arc<StdThread> {
        let current = thread::current();
        let mut threads = self.threads.lock();
        Arc::clone(threads.entry(current.id()).or_insert_with(|| {
            Arc::new(StdThread {
                handle: current.clone(),
                signal: AtomicBool::new(false),
            })
        }))
    }
}

impl Scheduler for StdScheduler {
    fn current_thread(&self) -> Arc<dyn Thread> {
        self.current_std_thread()
    }

    fn uptime_us(&self) -> u64 {
        self.start.elapsed().as_micros() as u64
    }
}

/// Filesystem context on a host scheduler with no volumes mounted
pub fn new_vfs() -> (VfsManager, Arc<StdScheduler>) {
    let scheduler = StdScheduler::new();
    let vfs = VfsManager::new(scheduler.clone());
    (vfs, scheduler)
}

/// Filesystem context with one unlimited tmpfs per entry of `names`
pub fn vfs_with_tmpfs(names: &[&str]) -> VfsManager {
    let (vfs, _) = new_vfs();
    for name in names {
        vfs.mount_tmpfs(Some(name), &TmpFsParams::default()).unwrap();
    }
    vfs
}

/// Writes USTAR archives in memory
pub struct TarBuilder {
    image: Vec<u8>,
}

impl TarBuilder {
    pub fn new() -> Self {
        Self { image: Vec::new() }
    }

    fn header(&self, name: &str, type_flag: u8, size: usize, link: &str) -> [u8; TAR_BLOCK_SIZE] {
        let mut block = [0u8; TAR_BLOCK_SIZE];
        block[..name.len()].copy_from_slice(name.as_bytes());
        block[100..108].copy_from_slice(b"0000644\0");
        block[108..116].copy_from_slice(b"0001750\0");
        block[116..124].copy_from_slice(b"0001750\0");
        block[124..136].copy_from_slice(format!("{:011o}\0", size).as_bytes());
        block[136..148].copy_from_slice(b"00000000000\0");
        block[156] = type_flag;
        block[157..157 + link.len()].copy_from_slice(link.as_bytes());
        block[257..263].copy_from_slice(b"ustar\0");
        block[263..265].copy_from_slice(b"00");

        block[148..156].fill(b' ');
        let checksum: u32 = block.iter().map(|&byte| byte as u32).sum();
        block[148..156].copy_from_slice(format!("{:06o}\0 ", checksum).as_bytes());
        block
    }

    pub fn file(mut self, name: &str, data: &[u8]) -> Self {
        let header = self.header(name, b'0', data.len(), "");
        self.image.extend_from_slice(&header);
        self.image.extend_from_slice(data);
        let padding = data.len().div_ceil(TAR_BLOCK_SIZE) * TAR_BLOCK_SIZE - data.len();
        self.image.extend(core::iter::repeat(0).take(padding));
        self
    }

    pub fn directory(mut self, name: &str) -> Self {
        let header = self.header(name, b'5', 0, "");
        self.image.extend_from_slice(&header);
        self
    }

    pub fn symlink(mut self, name: &str, target: &str) -> Self {
        let header = self.header(name, b'2', 0, target);
        self.image.extend_from_slice(&header);
        self
    }

    pub fn finish(mut self) -> Vec<u8> {
        self.image.extend_from_slice(&[0u8; TAR_BLOCK_SIZE * 2]);
        self.image
    }
}
