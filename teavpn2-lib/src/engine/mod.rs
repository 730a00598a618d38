#![forbid(unsafe_code)]

//! Transport-independent I/O machinery.
//!
//! The session flows drive a narrow contract (receive a frame, send a
//! frame, wake on shutdown); the stream and datagram shapes live behind
//! it. Worker handoff, outbound buffering and the teardown interlock
//! are shared by every engine shape.

pub mod interlock;
pub mod link;
pub mod queue;
pub mod workers;

pub use interlock::{join_or_leak, OnlineTasks, TeardownReport};
pub use queue::{SendQueue, DEFAULT_QUEUE_CAP};
pub use workers::WorkerPool;

use crate::config::EventLoop;
use crate::error::{Error, Result};

/// Gate on the configured event-loop shape. The epoll shape runs on the
/// tokio reactor; a ring-backed reactor has no implementation yet and
/// is rejected at initialization.
pub fn select_event_loop(ev: EventLoop) -> Result<()> {
    match ev {
        EventLoop::Epoll => Ok(()),
        EventLoop::IoUring => Err(Error::EventLoopUnsupported("io-uring")),
    }
}
