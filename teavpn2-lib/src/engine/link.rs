#![forbid(unsafe_code)]

//! The narrow transport contract the session flows run against: a
//! reader that yields whole decoded frames and a writer that takes
//! whole frames. Stream reassembly and datagram demultiplexing stay
//! behind the implementations, so the flows never learn which engine
//! shape is running.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::mpsc;

use crate::error::{ProtocolError, Result};
use crate::proto::{Decoded, MAX_FRAME};

pub(crate) type DecodeFn<T> = fn(&[u8]) -> std::result::Result<Decoded<T>, ProtocolError>;
pub(crate) type DatagramDecodeFn<T> = fn(&[u8]) -> std::result::Result<T, ProtocolError>;
pub(crate) type EncodeFn<T> = fn(&T, &mut BytesMut) -> std::result::Result<usize, ProtocolError>;

pub(crate) trait LinkReader {
    type In;

    /// Datagram transports survive a malformed frame (the next datagram
    /// stands alone); a byte stream does not, it is desynchronized.
    const DATAGRAM: bool = false;

    /// Wait for the next whole frame. `None` is a clean end of the
    /// transport.
    async fn recv(&mut self) -> Result<Option<Self::In>>;
}

pub(crate) trait LinkWriter {
    type Out;

    /// Write one whole frame.
    async fn send(&mut self, pkt: &Self::Out) -> Result<()>;
}

/// Split a TCP stream into framed halves.
pub(crate) fn stream_link<In, Out>(
    stream: TcpStream,
    decode: DecodeFn<In>,
    encode: EncodeFn<Out>,
) -> (StreamReader<In>, StreamWriter<Out>) {
    let (rd, wr) = stream.into_split();
    (
        StreamReader {
            rd,
            rx: BytesMut::with_capacity(2 * MAX_FRAME),
            decode,
        },
        StreamWriter {
            wr,
            tx: BytesMut::with_capacity(MAX_FRAME),
            encode,
        },
    )
}

/// Frames packed back-to-back on a TCP stream. Decoded frames are cut
/// off the front of the receive buffer; the read cursor advances so the
/// next read appends contiguously.
pub(crate) struct StreamReader<In> {
    rd: OwnedReadHalf,
    rx: BytesMut,
    decode: DecodeFn<In>,
}

impl<In> LinkReader for StreamReader<In> {
    type In = In;

    async fn recv(&mut self) -> Result<Option<In>> {
        loop {
            match (self.decode)(&self.rx)? {
                Decoded::Frame { packet, consumed } => {
                    self.rx.advance(consumed);
                    return Ok(Some(packet));
                }
                Decoded::NeedMore(_) => {
                    if self.rx.capacity() - self.rx.len() < MAX_FRAME {
                        self.rx.reserve(MAX_FRAME);
                    }
                    let n = self.rd.read_buf(&mut self.rx).await?;
                    if n == 0 {
                        return if self.rx.is_empty() {
                            Ok(None)
                        } else {
                            Err(ProtocolError::TruncatedStream.into())
                        };
                    }
                }
            }
        }
    }
}

pub(crate) struct StreamWriter<Out> {
    wr: OwnedWriteHalf,
    tx: BytesMut,
    encode: EncodeFn<Out>,
}

impl<Out> LinkWriter for StreamWriter<Out> {
    type Out = Out;

    async fn send(&mut self, pkt: &Out) -> Result<()> {
        self.tx.clear();
        (self.encode)(pkt, &mut self.tx)?;
        self.wr.write_all(&self.tx).await?;
        Ok(())
    }
}

/// Server side of the datagram transport: frames arrive through the
/// demultiplexer's channel. A closed channel reads as end of transport.
pub(crate) struct DatagramChanReader<In> {
    inbound: mpsc::Receiver<Bytes>,
    decode: DatagramDecodeFn<In>,
}

impl<In> DatagramChanReader<In> {
    pub(crate) fn new(inbound: mpsc::Receiver<Bytes>, decode: DatagramDecodeFn<In>) -> Self {
        Self { inbound, decode }
    }
}

impl<In> LinkReader for DatagramChanReader<In> {
    type In = In;

    const DATAGRAM: bool = true;

    async fn recv(&mut self) -> Result<Option<In>> {
        match self.inbound.recv().await {
            Some(datagram) => Ok(Some((self.decode)(&datagram)?)),
            None => Ok(None),
        }
    }
}

/// Client side of the datagram transport: frames come straight off the
/// connected socket, one per datagram.
pub(crate) struct DatagramSockReader<In> {
    socket: Arc<UdpSocket>,
    rx: Vec<u8>,
    decode: DatagramDecodeFn<In>,
}

impl<In> DatagramSockReader<In> {
    pub(crate) fn new(socket: Arc<UdpSocket>, decode: DatagramDecodeFn<In>) -> Self {
        Self {
            socket,
            // One spare byte so kernel-side truncation is detectable.
            rx: vec![0u8; MAX_FRAME + 1],
            decode,
        }
    }
}

impl<In> LinkReader for DatagramSockReader<In> {
    type In = In;

    const DATAGRAM: bool = true;

    async fn recv(&mut self) -> Result<Option<In>> {
        let n = self.socket.recv(&mut self.rx).await?;
        if n > MAX_FRAME {
            return Err(ProtocolError::BadDatagram.into());
        }
        Ok(Some((self.decode)(&self.rx[..n])?))
    }
}

/// Datagram writer. With a peer address it targets one client through
/// the shared server socket; without, the socket must be connected.
pub(crate) struct DatagramWriter<Out> {
    socket: Arc<UdpSocket>,
    peer: Option<SocketAddr>,
    tx: BytesMut,
    encode: EncodeFn<Out>,
}

impl<Out> DatagramWriter<Out> {
    pub(crate) fn new(socket: Arc<UdpSocket>, peer: Option<SocketAddr>, encode: EncodeFn<Out>) -> Self {
        Self {
            socket,
            peer,
            tx: BytesMut::with_capacity(MAX_FRAME),
            encode,
        }
    }
}

impl<Out> LinkWriter for DatagramWriter<Out> {
    type Out = Out;

    async fn send(&mut self, pkt: &Out) -> Result<()> {
        self.tx.clear();
        let len = (self.encode)(pkt, &mut self.tx)?;
        let sent = match self.peer {
            Some(peer) => self.socket.send_to(&self.tx, peer).await?,
            None => self.socket.send(&self.tx).await?,
        };
        if sent != len {
            return Err(
                std::io::Error::new(std::io::ErrorKind::WriteZero, "short datagram send").into(),
            );
        }
        Ok(())
    }
}
