//! Inter-Process Communication (IPC) module
//!
//! Stream IPC objects exposed as filesystem nodes. Only anonymous pipes live
//! here for now.

pub mod pipe;

pub use pipe::{PIPE_BUFFER_SIZE, PipeEnd, PipeRole, create_pipe};
