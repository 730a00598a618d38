#![forbid(unsafe_code)]

//! The engine side of the tunnel device.
//!
//! Device creation and interface ioctls are services of the embedding
//! binary; the engine only requires a non-blocking descriptor that
//! yields one raw IPv4 frame per read and accepts one per write.

use std::fs::File;
use std::io::{self, Read, Write};
use std::net::Ipv4Addr;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};

use tokio::io::unix::AsyncFd;

use crate::proto::IfInfo;

/// Applies server-assigned parameters to the local tunnel device.
/// Interface ioctls live behind this seam.
pub trait IfaceConfigurator: Send + Sync {
    fn apply(&self, info: &IfInfo) -> io::Result<()>;
}

/// A configurator for setups where the device is already addressed.
pub struct NoopConfigurator;

impl IfaceConfigurator for NoopConfigurator {
    fn apply(&self, _info: &IfInfo) -> io::Result<()> {
        Ok(())
    }
}

/// A point-to-point tunnel device wrapped for the async engine.
#[derive(Debug)]
pub struct TunDevice {
    fd: AsyncFd<File>,
}

impl TunDevice {
    /// Wrap a pre-opened descriptor. It must already be non-blocking
    /// and packet-oriented (a TUN fd, or a datagram socketpair end in
    /// tests).
    pub fn from_owned_fd(fd: OwnedFd) -> io::Result<Self> {
        Ok(Self {
            fd: AsyncFd::new(File::from(fd))?,
        })
    }

    pub fn as_raw_fd(&self) -> RawFd {
        self.fd.get_ref().as_raw_fd()
    }

    /// Read one frame. Returns its length.
    pub async fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            let mut guard = self.fd.readable().await?;
            match guard.try_io(|inner| {
                let mut f: &File = inner.get_ref();
                f.read(buf)
            }) {
                Ok(res) => return res,
                Err(_would_block) => continue,
            }
        }
    }

    /// Write one frame.
    pub async fn send(&self, frame: &[u8]) -> io::Result<usize> {
        loop {
            let mut guard = self.fd.writable().await?;
            match guard.try_io(|inner| {
                let mut f: &File = inner.get_ref();
                f.write(frame)
            }) {
                Ok(res) => return res,
                Err(_would_block) => continue,
            }
        }
    }
}

/// Destination address of a raw IPv4 frame, when it is one.
pub fn ipv4_dst(frame: &[u8]) -> Option<Ipv4Addr> {
    if frame.len() < 20 || frame[0] >> 4 != 4 {
        return None;
    }
    Some(Ipv4Addr::new(frame[16], frame[17], frame[18], frame[19]))
}

/// Source address of a raw IPv4 frame, when it is one.
pub fn ipv4_src(frame: &[u8]) -> Option<Ipv4Addr> {
    if frame.len() < 20 || frame[0] >> 4 != 4 {
        return None;
    }
    Some(Ipv4Addr::new(frame[12], frame[13], frame[14], frame[15]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dst_of_short_or_non_ipv4_frames_is_none() {
        assert_eq!(ipv4_dst(&[0x45; 8]), None);
        let mut frame = [0u8; 20];
        frame[0] = 0x60; // IPv6
        assert_eq!(ipv4_dst(&frame), None);
    }

    #[test]
    fn dst_and_src_read_the_header_fields() {
        let mut frame = [0u8; 20];
        frame[0] = 0x45;
        frame[12..16].copy_from_slice(&[10, 8, 0, 2]);
        frame[16..20].copy_from_slice(&[10, 8, 0, 1]);
        assert_eq!(ipv4_src(&frame), Some(Ipv4Addr::new(10, 8, 0, 2)));
        assert_eq!(ipv4_dst(&frame), Some(Ipv4Addr::new(10, 8, 0, 1)));
    }
}
