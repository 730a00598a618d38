#![forbid(unsafe_code)]

//! Fixed-capacity session index: a dense slot array, an O(1) free-slot
//! stack, a 256x256 map over the last two octets of the assigned
//! virtual IPv4, a descriptor map for event dispatch, and a peer
//! address map for the datagram transport.

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::os::fd::RawFd;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::Error;
use crate::session::Session;

/// Descriptor map size, enough for any fd the process can hold.
const FD_MAP_SIZE: usize = 0x10000;

/// Sentinel: map entry not in use.
const FD_NOP: u16 = u16::MAX;
/// Sentinel: the wake-up channel.
const FD_WAKE: u16 = u16::MAX - 1;
/// Sentinel: the listening socket.
const FD_LISTEN: u16 = u16::MAX - 2;

/// Highest usable slot count, leaving room for the sentinels.
pub const MAX_CONN_LIMIT: u16 = u16::MAX - 3;

/// What a descriptor resolves to.
#[derive(Debug, Clone)]
pub enum FdEntry {
    Session(Arc<Session>),
    Listener,
    WakePipe,
    Unknown,
}

struct Indexes {
    /// LIFO of unused slot indices. Empty means the server is full.
    free: Vec<u16>,
    /// Slot by the last two octets of the assigned virtual IPv4.
    ipm: Box<[[Option<u16>; 256]]>,
    /// Slot (or sentinel) by socket descriptor.
    fd_map: Vec<u16>,
    /// Slot by transport peer address, datagram transport only.
    peers: HashMap<SocketAddr, u16>,
}

pub struct SessionTable {
    slots: Box<[Arc<Session>]>,
    idx: Mutex<Indexes>,
}

fn cell(addr: Ipv4Addr) -> (usize, usize) {
    let [_, _, c, d] = addr.octets();
    (usize::from(c), usize::from(d))
}

impl SessionTable {
    /// Allocate `max_conn` slots, all initially free. Slots come out of
    /// the stack lowest-index first.
    pub fn new(max_conn: u16, queue_cap: usize) -> Self {
        debug_assert!(max_conn <= MAX_CONN_LIMIT);
        let slots: Box<[Arc<Session>]> = (0..max_conn)
            .map(|i| Arc::new(Session::new(i, queue_cap)))
            .collect();
        Self {
            slots,
            idx: Mutex::new(Indexes {
                free: (0..max_conn).rev().collect(),
                ipm: vec![[None; 256]; 256].into_boxed_slice(),
                fd_map: vec![FD_NOP; FD_MAP_SIZE],
                peers: HashMap::new(),
            }),
        }
    }

    fn idx(&self) -> MutexGuard<'_, Indexes> {
        self.idx.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn capacity(&self) -> u16 {
        self.slots.len() as u16
    }

    pub fn free_len(&self) -> usize {
        self.idx().free.len()
    }

    /// Unused slot indices, sorted. Diagnostic view.
    pub fn free_slots(&self) -> Vec<u16> {
        let mut free = self.idx().free.clone();
        free.sort_unstable();
        free
    }

    pub fn in_use(&self) -> usize {
        self.slots.len() - self.free_len()
    }

    /// Pop a free slot. `None` means every slot is taken.
    pub fn acquire(&self) -> Option<Arc<Session>> {
        let slot = self.idx().free.pop()?;
        let session = self.slots[usize::from(slot)].clone();
        session.mark_used();
        Some(session)
    }

    /// Clear a slot and push it back on the free stack. Any IP, fd and
    /// peer bindings are removed first.
    pub fn release(&self, slot: u16) -> Result<(), Error> {
        let session = self
            .slots
            .get(usize::from(slot))
            .ok_or(Error::SlotNotInUse(slot))?;
        let mut idx = self.idx();
        if !session.is_used() {
            return Err(Error::SlotNotInUse(slot));
        }
        if let Some(ip) = session.virt_ip() {
            let (c, d) = cell(ip);
            if idx.ipm[c][d] == Some(slot) {
                idx.ipm[c][d] = None;
            }
        }
        if let Some(fd) = session.fd() {
            if let Some(entry) = usize::try_from(fd).ok().and_then(|fd| idx.fd_map.get_mut(fd)) {
                *entry = FD_NOP;
            }
        }
        if let Some(peer) = session.peer() {
            idx.peers.remove(&peer);
        }
        session.reset();
        idx.free.push(slot);
        Ok(())
    }

    /// Record the virtual address of an authenticating session. A cell
    /// already held by another session is a configuration error and is
    /// fatal to the offending session only.
    pub fn bind_ip(&self, slot: u16, addr: Ipv4Addr) -> Result<(), Error> {
        let (c, d) = cell(addr);
        let mut idx = self.idx();
        if idx.ipm[c][d].is_some() {
            return Err(Error::AddrInUse(addr));
        }
        idx.ipm[c][d] = Some(slot);
        Ok(())
    }

    pub fn unbind_ip(&self, addr: Ipv4Addr) {
        let (c, d) = cell(addr);
        self.idx().ipm[c][d] = None;
    }

    /// Resolve a virtual destination address to its authenticated
    /// session.
    pub fn by_ip(&self, addr: Ipv4Addr) -> Option<Arc<Session>> {
        let (c, d) = cell(addr);
        let slot = self.idx().ipm[c][d]?;
        let session = self.slots[usize::from(slot)].clone();
        (session.is_authenticated() && session.virt_ip() == Some(addr)).then_some(session)
    }

    pub fn bind_fd(&self, slot: u16, fd: RawFd) {
        if let Ok(fd) = usize::try_from(fd) {
            if let Some(entry) = self.idx().fd_map.get_mut(fd) {
                *entry = slot;
            }
        }
    }

    pub fn mark_listener(&self, fd: RawFd) {
        if let Ok(fd) = usize::try_from(fd) {
            if let Some(entry) = self.idx().fd_map.get_mut(fd) {
                *entry = FD_LISTEN;
            }
        }
    }

    pub fn mark_wake_pipe(&self, fd: RawFd) {
        if let Ok(fd) = usize::try_from(fd) {
            if let Some(entry) = self.idx().fd_map.get_mut(fd) {
                *entry = FD_WAKE;
            }
        }
    }

    /// Resolve a ready descriptor in O(1).
    pub fn by_fd(&self, fd: RawFd) -> FdEntry {
        let entry = usize::try_from(fd)
            .ok()
            .and_then(|fd| self.idx().fd_map.get(fd).copied());
        let Some(entry) = entry else {
            return FdEntry::Unknown;
        };
        match entry {
            FD_NOP => FdEntry::Unknown,
            FD_WAKE => FdEntry::WakePipe,
            FD_LISTEN => FdEntry::Listener,
            slot => FdEntry::Session(self.slots[usize::from(slot)].clone()),
        }
    }

    /// Bind the transport peer address of a datagram session.
    pub fn bind_peer(&self, slot: u16, addr: SocketAddr) {
        self.slots[usize::from(slot)].set_peer(addr);
        self.idx().peers.insert(addr, slot);
    }

    /// Resolve a datagram source address to its session in O(1).
    pub fn by_peer(&self, addr: SocketAddr) -> Option<Arc<Session>> {
        let slot = *self.idx().peers.get(&addr)?;
        Some(self.slots[usize::from(slot)].clone())
    }
}
