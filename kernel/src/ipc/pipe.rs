//! Pipe implementation for inter-process communication
//!
//! An anonymous pipe is a pair of `Pipe` nodes sharing one bounded buffer:
//! bytes written to the write end come out of the read end in order. Each end
//! blocks on its own node's waiter list and wakes the other end when it makes
//! progress or goes away.

use alloc::collections::VecDeque;
use alloc::sync::{Arc, Weak};
use core::any::Any;
use core::sync::atomic::{AtomicU64, Ordering};
use log::debug;
use spin::{Mutex, Once};

use crate::fs::vfs::core::{FsNode, NodeInfo};
use crate::fs::vfs::watcher::{FsWatcher, PollEvents, WatcherList};
use crate::fs::{FileSystemError, FileSystemErrorKind, FileType, Inode, Result, VolumeId};
use crate::sync::scheduler::Scheduler;

/// Default capacity of a pipe buffer in bytes
pub const PIPE_BUFFER_SIZE: usize = 1024;

/// Volume number reported by pipe nodes, which belong to no mounted volume
pub const PIPE_VOLUME_ID: VolumeId = VolumeId::MAX - 1;

static NEXT_PIPE_INODE: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipeRole {
    Read,
    Write,
}

/// Internal shared state of a pipe
struct PipeState {
    buffer: VecDeque<u8>,
    max_size: usize,
    reader_closed: bool,
    writer_closed: bool,
}

struct PipeShared {
    state: Mutex<PipeState>,
    scheduler: Arc<dyn Scheduler>,
    read_end: Once<Weak<PipeEnd>>,
    write_end: Once<Weak<PipeEnd>>,
}

impl PipeShared {
    /// Wake everything blocked on or watching the `role` end
    fn wake(&self, role: PipeRole, events: PollEvents) {
        let end = match role {
            PipeRole::Read => self.read_end.get(),
            PipeRole::Write => self.write_end.get(),
        };
        if let Some(end) = end.and_then(Weak::upgrade) {
            end.info.waiters().wake_all();
            end.watchers.notify(events);
        }
    }
}

const WRONG_END_READ: FileSystemError =
    FileSystemError::new(FileSystemErrorKind::InvalidArgument, "Read on the write end of a pipe");
const WRONG_END_WRITE: FileSystemError =
    FileSystemError::new(FileSystemErrorKind::InvalidArgument, "Write on the read end of a pipe");

/// One end of an anonymous pipe
pub struct PipeEnd {
    info: NodeInfo,
    role: PipeRole,
    shared: Arc<PipeShared>,
    watchers: WatcherList,
}

/// Create a pipe holding up to `capacity` bytes, returning (read end, write end)
pub fn create_pipe(scheduler: Arc<dyn Scheduler>, capacity: usize) -> (Arc<PipeEnd>, Arc<PipeEnd>) {
    let shared = Arc::new(PipeShared {
        state: Mutex::new(PipeState {
            buffer: VecDeque::with_capacity(capacity),
            max_size: capacity.max(1),
            reader_closed: false,
            writer_closed: false,
        }),
        scheduler,
        read_end: Once::new(),
        write_end: Once::new(),
    });

    let read_end = PipeEnd::new(PipeRole::Read, shared.clone());
    let write_end = PipeEnd::new(PipeRole::Write, shared.clone());
    shared.read_end.call_once(|| Arc::downgrade(&read_end));
    shared.write_end.call_once(|| Arc::downgrade(&write_end));
    debug!(
        "[pipe] Created pipe {}/{} ({} bytes)",
        read_end.info.inode(),
        write_end.info.inode(),
        capacity
    );
    (read_end, write_end)
}

impl PipeEnd {
    fn new(role: PipeRole, shared: Arc<PipeShared>) -> Arc<Self> {
        let inode: Inode = NEXT_PIPE_INODE.fetch_add(1, Ordering::Relaxed);
        Arc::new_cyclic(|this: &Weak<PipeEnd>| {
            let this: Weak<dyn FsNode> = this.clone();
            PipeEnd {
                info: NodeInfo::new(this, inode, PIPE_VOLUME_ID, FileType::Pipe, 0o600),
                role,
                shared,
                watchers: WatcherList::new(),
            }
        })
    }

    pub fn role(&self) -> PipeRole {
        self.role
    }

    fn peer_role(&self) -> PipeRole {
        match self.role {
            PipeRole::Read => PipeRole::Write,
            PipeRole::Write => PipeRole::Read,
        }
    }

    /// Read into `buffer`, giving up after `timeout_us` microseconds
    ///
    /// Blocks while the pipe is empty and the write end is open. Returns 0 at
    /// end of file.
    ///
    /// # Errors
    ///
    /// * `InvalidArgument` - this is the write end
    /// * `Interrupted` - a signal arrived while blocked
    /// * `TimedOut` - the timeout expired with no data
    pub fn read_timeout(&self, buffer: &mut [u8], timeout_us: Option<u64>) -> Result<usize> {
        if self.role != PipeRole::Read {
            return Err(WRONG_END_READ);
        }
        if buffer.is_empty() {
            return Ok(0);
        }

        let shared = &self.shared;
        let read = self
            .info
            .waiters()
            .wait_until(shared.scheduler.as_ref(), timeout_us, || {
                let mut state = shared.state.lock();
                if state.buffer.is_empty() {
                    return Ok(state.writer_closed.then_some(0));
                }
                let count = buffer.len().min(state.buffer.len());
                for (slot, byte) in buffer.iter_mut().zip(state.buffer.drain(..count)) {
                    *slot = byte;
                }
                Ok(Some(count))
            })?;

        if read > 0 {
            shared.wake(PipeRole::Write, PollEvents::WRITABLE);
        }
        Ok(read)
    }

    /// Write all of `buffer`, blocking while the pipe is full
    ///
    /// `timeout_us` bounds the whole call, however many times it blocks. A
    /// wait that fails after some bytes went in returns the short count.
    ///
    /// # Errors
    ///
    /// * `InvalidArgument` - this is the read end
    /// * `BrokenPipe` - the read end is closed
    /// * `Interrupted`, `TimedOut` - as for `read_timeout`
    pub fn write_timeout(&self, buffer: &[u8], timeout_us: Option<u64>) -> Result<usize> {
        if self.role != PipeRole::Write {
            return Err(WRONG_END_WRITE);
        }

        let shared = &self.shared;
        let scheduler = shared.scheduler.as_ref();
        let deadline = timeout_us.map(|timeout| scheduler.uptime_us().saturating_add(timeout));
        let mut written = 0;
        while written < buffer.len() {
            let pending = &buffer[written..];
            let remaining = deadline.map(|deadline| deadline.saturating_sub(scheduler.uptime_us()));
            let result = self
                .info
                .waiters()
                .wait_until(scheduler, remaining, || {
                    let mut state = shared.state.lock();
                    if state.reader_closed {
                        return Err(FileSystemError::new(
                            FileSystemErrorKind::BrokenPipe,
                            "Read end of pipe is closed",
                        ));
                    }
                    let space = state.max_size - state.buffer.len();
                    if space == 0 {
                        return Ok(None);
                    }
                    let count = space.min(pending.len());
                    state.buffer.extend(&pending[..count]);
                    Ok(Some(count))
                });

            match result {
                Ok(count) => {
                    written += count;
                    shared.wake(PipeRole::Read, PollEvents::READABLE);
                }
                Err(_) if written > 0 => break,
                Err(err) => return Err(err),
            }
        }
        Ok(written)
    }

    pub fn has_readers(&self) -> bool {
        !self.shared.state.lock().reader_closed
    }

    pub fn has_writers(&self) -> bool {
        !self.shared.state.lock().writer_closed
    }

    pub fn buffer_size(&self) -> usize {
        self.shared.state.lock().max_size
    }

    /// Bytes currently buffered
    pub fn available_bytes(&self) -> usize {
        self.shared.state.lock().buffer.len()
    }

    /// Mark this end closed and wake the peer
    fn shut(&self) {
        {
            let mut state = self.shared.state.lock();
            let closed = match self.role {
                PipeRole::Read => &mut state.reader_closed,
                PipeRole::Write => &mut state.writer_closed,
            };
            if *closed {
                return;
            }
            *closed = true;
            if self.role == PipeRole::Read {
                state.buffer.clear();
            }
        }
        debug!("[pipe] {:?} end {} closed", self.role, self.info.inode());
        let peer_events = match self.peer_role() {
            PipeRole::Read => PollEvents::READABLE,
            PipeRole::Write => PollEvents::WRITABLE,
        };
        self.shared.wake(self.peer_role(), peer_events | PollEvents::HANGUP);
    }

    /// Conditions that currently hold on this end
    pub fn ready_events(&self) -> PollEvents {
        let state = self.shared.state.lock();
        let (event, ready, hangup) = match self.role {
            PipeRole::Read => (
                PollEvents::READABLE,
                !state.buffer.is_empty() || state.writer_closed,
                state.writer_closed,
            ),
            PipeRole::Write => (
                PollEvents::WRITABLE,
                state.buffer.len() < state.max_size || state.reader_closed,
                state.reader_closed,
            ),
        };
        let mut events = PollEvents::default();
        if ready {
            events = events | event;
        }
        if hangup {
            events = events | PollEvents::HANGUP;
        }
        events
    }
}

impl FsNode for PipeEnd {
    fn info(&self) -> &NodeInfo {
        &self.info
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn read(&self, _offset: u64, buffer: &mut [u8]) -> Result<usize> {
        self.read_timeout(buffer, None)
    }

    fn write(&self, _offset: u64, buffer: &[u8]) -> Result<usize> {
        self.write_timeout(buffer, None)
    }

    fn close(&self) {
        if self.info.handle_closed() == 0 {
            self.shut();
        }
    }

    fn can_read(&self) -> bool {
        self.ready_events().contains(PollEvents::READABLE)
    }

    fn can_write(&self) -> bool {
        self.ready_events().contains(PollEvents::WRITABLE)
    }

    fn watch(&self, watcher: &Arc<FsWatcher>, events: PollEvents) {
        self.watchers.add(watcher, events);
        let ready = self.ready_events();
        if ready.contains(PollEvents::HANGUP) || ready.intersects(events) {
            watcher.signal();
        }
    }

    fn unwatch(&self, watcher: &FsWatcher) {
        self.watchers.remove(watcher);
    }
}

impl Drop for PipeEnd {
    fn drop(&mut self) {
        self.shut();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::vfs::core::NodeRef;
    use crate::fs::vfs::handle::{Handle, OpenFlags};
    use crate::test_support::StdScheduler;
    use std::sync::mpsc;
    use std::thread;
    use std::time::{Duration, Instant};
    use std::vec::Vec;

    fn pipe_handles(capacity: usize) -> (Handle, Handle) {
        let (read_end, write_end) = create_pipe(StdScheduler::new(), capacity);
        (
            Handle::open(read_end, OpenFlags::READ).unwrap(),
            Handle::open(write_end, OpenFlags::WRITE).unwrap(),
        )
    }

    fn pipe_end(handle: &Handle) -> &PipeEnd {
        handle.node().as_any().downcast_ref::<PipeEnd>().unwrap()
    }

    #[test]
    fn test_bytes_come_out_in_order() {
        let (reader, writer) = pipe_handles(PIPE_BUFFER_SIZE);
        assert_eq!(writer.write(b"hello ").unwrap(), 6);
        assert_eq!(writer.write(b"pipe").unwrap(), 4);
        assert_eq!(pipe_end(&reader).available_bytes(), 10);

        let mut buffer = [0u8; 7];
        assert_eq!(reader.read(&mut buffer).unwrap(), 7);
        assert_eq!(&buffer, b"hello p");
        assert_eq!(reader.read(&mut buffer).unwrap(), 3);
        assert_eq!(&buffer[..3], b"ipe");
        assert_eq!(reader.position(), 0);
        assert!(reader.node().is_pipe());
    }

    /// A reader parked on an empty pipe wakes when the writer delivers
    #[test]
    fn test_blocked_read_wakes_on_write() {
        let (reader, writer) = pipe_handles(PIPE_BUFFER_SIZE);
        let blocked = thread::spawn(move || {
            let mut buffer = [0u8; 16];
            let count = reader.read(&mut buffer).unwrap();
            buffer[..count].to_vec()
        });

        thread::sleep(Duration::from_millis(50));
        writer.write(b"12345").unwrap();
        assert_eq!(blocked.join().unwrap(), b"12345");
    }

    #[test]
    fn test_closed_writer_gives_eof() {
        let (reader, writer) = pipe_handles(PIPE_BUFFER_SIZE);
        writer.write(b"tail").unwrap();
        drop(writer);

        let mut buffer = [0u8; 8];
        assert_eq!(reader.read(&mut buffer).unwrap(), 4);
        assert_eq!(reader.read(&mut buffer).unwrap(), 0);
        assert!(reader.node().can_read());
        assert!(!pipe_end(&reader).has_writers());
    }

    #[test]
    fn test_closing_writer_wakes_blocked_reader() {
        let (reader, writer) = pipe_handles(PIPE_BUFFER_SIZE);
        let blocked = thread::spawn(move || {
            let mut buffer = [0u8; 4];
            reader.read(&mut buffer).unwrap()
        });

        thread::sleep(Duration::from_millis(50));
        drop(writer);
        assert_eq!(blocked.join().unwrap(), 0);
    }

    #[test]
    fn test_write_after_reader_closed_is_broken_pipe() {
        let (reader, writer) = pipe_handles(PIPE_BUFFER_SIZE);
        drop(reader);
        assert_eq!(writer.write(b"x").unwrap_err().kind, FileSystemErrorKind::BrokenPipe);
        assert!(writer.node().can_write());
    }

    #[test]
    fn test_wrong_end_is_invalid_argument() {
        let (read_end, write_end) = create_pipe(StdScheduler::new(), 8);
        let mut buffer = [0u8; 4];
        assert_eq!(
            write_end.read(0, &mut buffer).unwrap_err().kind,
            FileSystemErrorKind::InvalidArgument
        );
        assert_eq!(read_end.write(0, b"x").unwrap_err().kind, FileSystemErrorKind::InvalidArgument);
        assert!(!read_end.can_write());
        assert!(!write_end.can_read());
        assert_eq!(read_end.role(), PipeRole::Read);
    }

    #[test]
    fn test_full_pipe_blocks_writer_until_drained() {
        let (reader, writer) = pipe_handles(4);
        assert_eq!(pipe_end(&writer).buffer_size(), 4);

        let sender = thread::spawn(move || writer.write(b"0123456789").unwrap());

        let mut received = Vec::new();
        let mut buffer = [0u8; 3];
        while received.len() < 10 {
            let count = reader.read(&mut buffer).unwrap();
            received.extend_from_slice(&buffer[..count]);
        }
        assert_eq!(sender.join().unwrap(), 10);
        assert_eq!(received, b"0123456789");
    }

    #[test]
    fn test_read_timeout_on_empty_pipe() {
        let (read_end, _write_end) = create_pipe(StdScheduler::new(), 8);
        let mut buffer = [0u8; 4];
        let err = read_end.read_timeout(&mut buffer, Some(10_000)).unwrap_err();
        assert_eq!(err.kind, FileSystemErrorKind::TimedOut);
        assert_eq!(read_end.info().waiters().waiting_count(), 0);
    }

    #[test]
    fn test_signal_interrupts_blocked_reader() {
        let scheduler = StdScheduler::new();
        let (read_end, write_end) = create_pipe(scheduler.clone(), 8);
        let (tx, rx) = mpsc::channel();

        let reader_scheduler = scheduler.clone();
        let blocked = thread::spawn(move || {
            tx.send(reader_scheduler.current_std_thread()).unwrap();
            let mut buffer = [0u8; 4];
            read_end.read(0, &mut buffer)
        });

        let reader_thread = rx.recv().unwrap();
        thread::sleep(Duration::from_millis(20));
        reader_thread.raise_signal();
        assert_eq!(blocked.join().unwrap().unwrap_err().kind, FileSystemErrorKind::Interrupted);
        drop(write_end);
    }

    #[test]
    fn test_handle_count_drives_close() {
        let (read_end, write_end) = create_pipe(StdScheduler::new(), 8);
        let read_node: NodeRef = read_end.clone();
        let first = Handle::open(read_node.clone(), OpenFlags::READ).unwrap();
        let second = Handle::open(read_node, OpenFlags::READ).unwrap();

        drop(first);
        assert!(write_end.has_readers());
        drop(second);
        assert!(!write_end.has_readers());
        drop(read_end);
    }

    /// Several blocking rounds of one write share a single timeout
    #[test]
    fn test_write_timeout_bounds_whole_call() {
        let (read_end, write_end) = create_pipe(StdScheduler::new(), 4);
        let sender = thread::spawn(move || {
            let started = Instant::now();
            let written = write_end.write_timeout(b"0123456789", Some(300_000));
            (written, started.elapsed())
        });

        thread::sleep(Duration::from_millis(150));
        let mut buffer = [0u8; 3];
        assert_eq!(read_end.read_timeout(&mut buffer, None).unwrap(), 3);
        assert_eq!(&buffer, b"012");

        let (written, elapsed) = sender.join().unwrap();
        assert_eq!(written.unwrap(), 7);
        assert!(elapsed >= Duration::from_millis(300));
        assert!(elapsed < Duration::from_millis(420), "write blocked for {:?}", elapsed);
    }

    /// One watcher over two pipes wakes for whichever becomes ready
    #[test]
    fn test_watcher_over_two_pipes() {
        let scheduler = StdScheduler::new();
        let (first_read, first_write) = create_pipe(scheduler.clone(), 8);
        let (second_read, second_write) = create_pipe(scheduler.clone(), 8);
        let watcher = FsWatcher::new(scheduler.clone());
        watcher.watch_node(first_read.clone(), PollEvents::READABLE);
        watcher.watch_node(second_read.clone(), PollEvents::READABLE);
        assert_eq!(watcher.pending(), 0);
        assert_eq!(watcher.wait(Some(10_000)).unwrap_err().kind, FileSystemErrorKind::TimedOut);

        let sender = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            second_write.write(0, b"x").unwrap();
            second_write
        });
        watcher.wait(None).unwrap();
        assert!(second_read.can_read());
        assert!(!first_read.can_read());
        let _second_write = sender.join().unwrap();

        drop(first_write);
        watcher.wait(Some(100_000)).unwrap();
        assert!(first_read.ready_events().contains(PollEvents::HANGUP));
        assert_eq!(watcher.pending(), 0);

        assert_eq!(first_read.watchers.len(), 1);
        drop(watcher);
        assert!(first_read.watchers.is_empty());
        assert!(second_read.watchers.is_empty());
    }

    #[test]
    fn test_watch_signals_when_already_ready() {
        let scheduler = StdScheduler::new();
        let (read_end, write_end) = create_pipe(scheduler.clone(), 2);
        let watcher = FsWatcher::new(scheduler);

        watcher.watch_node(write_end.clone(), PollEvents::WRITABLE);
        assert_eq!(watcher.pending(), 1);
        watcher.wait(Some(0)).unwrap();

        write_end.write(0, b"ab").unwrap();
        assert!(!write_end.can_write());
        read_end.read_timeout(&mut [0u8; 1], None).unwrap();
        assert_eq!(watcher.pending(), 1);
        assert_eq!(write_end.ready_events(), PollEvents::WRITABLE);
    }
}
