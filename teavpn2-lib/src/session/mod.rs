#![forbid(unsafe_code)]

pub mod table;

pub use table::{FdEntry, SessionTable};

use std::fmt;
use std::net::{Ipv4Addr, SocketAddr};
use std::os::fd::RawFd;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};
use std::sync::{Mutex, MutexGuard};

use bytes::Bytes;

use crate::engine::SendQueue;
use crate::proto::IfInfo;

/// Per-peer state. Slots are preallocated and reused across
/// connections; `reset` returns one to its pristine shape.
///
/// Flags and counters are atomic so the TUN pump can consult them
/// without taking the identity lock. `is_auth` implies `is_conn`
/// implies `is_used`.
pub struct Session {
    slot: u16,
    is_used: AtomicBool,
    is_conn: AtomicBool,
    is_auth: AtomicBool,
    err_c: AtomicU8,
    recv_c: AtomicU32,
    send_c: AtomicU32,
    outbound: SendQueue,
    ident: Mutex<Identity>,
}

#[derive(Default)]
struct Identity {
    fd: Option<RawFd>,
    username: Option<String>,
    virt_ip: Option<Ipv4Addr>,
    peer: Option<SocketAddr>,
}

impl Session {
    pub(crate) fn new(slot: u16, queue_cap: usize) -> Self {
        Self {
            slot,
            is_used: AtomicBool::new(false),
            is_conn: AtomicBool::new(false),
            is_auth: AtomicBool::new(false),
            err_c: AtomicU8::new(0),
            recv_c: AtomicU32::new(0),
            send_c: AtomicU32::new(0),
            outbound: SendQueue::new(queue_cap),
            ident: Mutex::new(Identity::default()),
        }
    }

    fn ident(&self) -> MutexGuard<'_, Identity> {
        self.ident.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn slot(&self) -> u16 {
        self.slot
    }

    pub fn is_used(&self) -> bool {
        self.is_used.load(Ordering::Acquire)
    }

    pub fn is_connected(&self) -> bool {
        self.is_conn.load(Ordering::Acquire)
    }

    pub fn is_authenticated(&self) -> bool {
        self.is_auth.load(Ordering::Acquire)
    }

    pub(crate) fn mark_used(&self) {
        self.is_used.store(true, Ordering::Release);
    }

    pub fn mark_connected(&self) {
        self.is_conn.store(true, Ordering::Release);
    }

    /// Flip to authenticated and remember the assigned tunnel address.
    pub fn mark_authenticated(&self, info: IfInfo) {
        self.ident().virt_ip = Some(info.ipv4);
        self.is_auth.store(true, Ordering::Release);
    }

    pub fn bind_fd(&self, fd: RawFd) {
        self.ident().fd = Some(fd);
    }

    pub fn fd(&self) -> Option<RawFd> {
        self.ident().fd
    }

    pub fn set_username(&self, name: &str) {
        self.ident().username = Some(name.to_owned());
    }

    pub fn username(&self) -> Option<String> {
        self.ident().username.clone()
    }

    pub fn virt_ip(&self) -> Option<Ipv4Addr> {
        self.ident().virt_ip
    }

    pub(crate) fn set_peer(&self, addr: SocketAddr) {
        self.ident().peer = Some(addr);
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.ident().peer
    }

    /// Bump the consecutive-error counter and return the new value.
    pub fn record_error(&self) -> u8 {
        self.err_c
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| {
                Some(c.saturating_add(1))
            })
            .unwrap_or(u8::MAX)
            .saturating_add(1)
    }

    pub fn reset_error(&self) {
        self.err_c.store(0, Ordering::Release);
    }

    pub fn is_expired(&self, threshold: u8) -> bool {
        self.err_c.load(Ordering::Acquire) >= threshold
    }

    pub fn bump_recv(&self) {
        self.recv_c.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bump_send(&self) {
        self.send_c.fetch_add(1, Ordering::Relaxed);
    }

    pub fn recv_count(&self) -> u32 {
        self.recv_c.load(Ordering::Relaxed)
    }

    pub fn send_count(&self) -> u32 {
        self.send_c.load(Ordering::Relaxed)
    }

    /// Queue one tunneled frame toward this peer. Returns true when an
    /// older frame had to be evicted to make room.
    pub fn push_frame(&self, frame: Bytes) -> bool {
        self.outbound.push(frame)
    }

    /// Wait for the next queued outbound frame.
    pub async fn next_frame(&self) -> Bytes {
        self.outbound.pop().await
    }

    /// Return the slot to its initial state for reuse.
    pub(crate) fn reset(&self) {
        self.is_auth.store(false, Ordering::Release);
        self.is_conn.store(false, Ordering::Release);
        self.is_used.store(false, Ordering::Release);
        self.err_c.store(0, Ordering::Release);
        self.recv_c.store(0, Ordering::Relaxed);
        self.send_c.store(0, Ordering::Relaxed);
        self.outbound.clear();
        *self.ident() = Identity::default();
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("slot", &self.slot)
            .field("used", &self.is_used())
            .field("conn", &self.is_connected())
            .field("auth", &self.is_authenticated())
            .finish_non_exhaustive()
    }
}
