#![forbid(unsafe_code)]

//! Encode and decode of the framed wire format.
//!
//! Decoding never consumes bytes on its own: the caller keeps frames in
//! a receive buffer and discards `consumed` bytes only after a full
//! frame came out. That keeps the stream discipline (shift or advance
//! the cursor, then append) in one place, the engine.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::ProtocolError;

use super::packet::{
    ClientPacket, Credentials, IfInfo, ServerHandshake, ServerPacket, PASSWORD_CAP, USERNAME_CAP,
};
use super::version::{Version, VERSION_WIRE_LEN};
use super::{MAX_PAYLOAD, PREFIX_LEN};

const AUTH_LEN: usize = USERNAME_CAP + PASSWORD_CAP;
const SRV_HANDSHAKE_LEN: usize = 8 + 3 * VERSION_WIRE_LEN;
const IF_INFO_LEN: usize = 16;

/// Result of attempting to decode one frame from a receive buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded<T> {
    /// At least `n` more bytes are required before progress is possible.
    NeedMore(usize),
    /// One full frame. The caller may discard `consumed` bytes.
    Frame { packet: T, consumed: usize },
}

fn put_prefix(buf: &mut BytesMut, ty: u8, payload_len: usize) {
    buf.put_u8(ty);
    // pad_len stays zero until an encryption transform fills it.
    buf.put_u8(0);
    buf.put_u16(payload_len as u16);
}

fn put_cstr(buf: &mut BytesMut, s: &str, cap: usize) {
    buf.put_slice(s.as_bytes());
    buf.put_bytes(0, cap - s.len());
}

/// Read a NUL-terminated UTF-8 string out of a fixed wire buffer.
fn parse_cstr(raw: &[u8], kind: &'static str) -> Result<String, ProtocolError> {
    let end = raw.iter().position(|&b| b == 0).ok_or(
        // No terminator means the field filled its whole buffer.
        ProtocolError::MalformedPayload {
            kind,
            len: raw.len(),
        },
    )?;
    std::str::from_utf8(&raw[..end])
        .map(str::to_owned)
        .map_err(|_| ProtocolError::MalformedPayload {
            kind,
            len: raw.len(),
        })
}

/// Append one encoded frame to `buf`. Returns the on-wire frame size.
pub fn encode_client(pkt: &ClientPacket, buf: &mut BytesMut) -> Result<usize, ProtocolError> {
    let start = buf.len();
    match pkt {
        ClientPacket::Nop | ClientPacket::Reqsync | ClientPacket::Close => {
            put_prefix(buf, pkt.type_byte(), 0);
        }
        ClientPacket::Handshake(ver) => {
            put_prefix(buf, pkt.type_byte(), VERSION_WIRE_LEN);
            buf.put_slice(&ver.to_wire());
        }
        ClientPacket::Auth(creds) => {
            put_prefix(buf, pkt.type_byte(), AUTH_LEN);
            put_cstr(buf, creds.username(), USERNAME_CAP);
            put_cstr(buf, creds.password(), PASSWORD_CAP);
        }
        ClientPacket::IfaceData(frame) => {
            if frame.len() > MAX_PAYLOAD {
                return Err(ProtocolError::PayloadTooLarge(frame.len()));
            }
            put_prefix(buf, pkt.type_byte(), frame.len());
            buf.put_slice(frame);
        }
    }
    Ok(buf.len() - start)
}

/// Append one encoded frame to `buf`. Returns the on-wire frame size.
pub fn encode_server(pkt: &ServerPacket, buf: &mut BytesMut) -> Result<usize, ProtocolError> {
    let start = buf.len();
    match pkt {
        ServerPacket::Nop
        | ServerPacket::AuthReject
        | ServerPacket::Reqsync
        | ServerPacket::Close => {
            put_prefix(buf, pkt.type_byte(), 0);
        }
        ServerPacket::Handshake(hs) => {
            put_prefix(buf, pkt.type_byte(), SRV_HANDSHAKE_LEN);
            buf.put_u8(u8::from(hs.need_encryption));
            buf.put_u8(u8::from(hs.min.is_some()));
            buf.put_u8(u8::from(hs.max.is_some()));
            buf.put_bytes(0, 5);
            buf.put_slice(&hs.cur.to_wire());
            buf.put_slice(&hs.min.unwrap_or(Version::new(0, 0, 0)).to_wire());
            buf.put_slice(&hs.max.unwrap_or(Version::new(0, 0, 0)).to_wire());
        }
        ServerPacket::AuthOk(iff) => {
            put_prefix(buf, pkt.type_byte(), IF_INFO_LEN);
            buf.put_slice(&iff.ipv4.octets());
            buf.put_slice(&iff.netmask.octets());
            buf.put_slice(&iff.gateway.octets());
            buf.put_u16(iff.mtu);
            buf.put_bytes(0, 2);
        }
        ServerPacket::IfaceData(frame) => {
            if frame.len() > MAX_PAYLOAD {
                return Err(ProtocolError::PayloadTooLarge(frame.len()));
            }
            put_prefix(buf, pkt.type_byte(), frame.len());
            buf.put_slice(frame);
        }
    }
    Ok(buf.len() - start)
}

struct RawFrame<'a> {
    ty: u8,
    payload: &'a [u8],
    consumed: usize,
}

enum RawDecoded<'a> {
    NeedMore(usize),
    Frame(RawFrame<'a>),
}

fn decode_raw(buf: &[u8]) -> Result<RawDecoded<'_>, ProtocolError> {
    if buf.len() < PREFIX_LEN {
        return Ok(RawDecoded::NeedMore(1));
    }
    let len = usize::from(u16::from_be_bytes([buf[2], buf[3]]));
    if len > MAX_PAYLOAD {
        return Err(ProtocolError::OversizedLength(len as u16));
    }
    let total = PREFIX_LEN + len;
    if buf.len() < total {
        return Ok(RawDecoded::NeedMore(total - buf.len()));
    }
    Ok(RawDecoded::Frame(RawFrame {
        ty: buf[0],
        payload: &buf[PREFIX_LEN..total],
        consumed: total,
    }))
}

fn parse_version(payload: &[u8]) -> Result<Version, ProtocolError> {
    if payload.len() != VERSION_WIRE_LEN {
        return Err(ProtocolError::MalformedPayload {
            kind: "HANDSHAKE",
            len: payload.len(),
        });
    }
    Ok(Version::from_wire(payload))
}

fn parse_auth(payload: &[u8]) -> Result<Credentials, ProtocolError> {
    if payload.len() != AUTH_LEN {
        return Err(ProtocolError::MalformedPayload {
            kind: "AUTH",
            len: payload.len(),
        });
    }
    let username = parse_cstr(&payload[..USERNAME_CAP], "AUTH")?;
    let password = parse_cstr(&payload[USERNAME_CAP..], "AUTH")?;
    Credentials::new(&username, &password)
}

fn parse_server_handshake(payload: &[u8]) -> Result<ServerHandshake, ProtocolError> {
    if payload.len() != SRV_HANDSHAKE_LEN {
        return Err(ProtocolError::MalformedPayload {
            kind: "HANDSHAKE",
            len: payload.len(),
        });
    }
    let has_min = payload[1] != 0;
    let has_max = payload[2] != 0;
    let cur = Version::from_wire(&payload[8..16]);
    let min = has_min.then(|| Version::from_wire(&payload[16..24]));
    let max = has_max.then(|| Version::from_wire(&payload[24..32]));
    Ok(ServerHandshake {
        need_encryption: payload[0] != 0,
        cur,
        min,
        max,
    })
}

fn parse_if_info(payload: &[u8]) -> Result<IfInfo, ProtocolError> {
    if payload.len() != IF_INFO_LEN {
        return Err(ProtocolError::MalformedPayload {
            kind: "AUTH_OK",
            len: payload.len(),
        });
    }
    let octets = |at: usize| [payload[at], payload[at + 1], payload[at + 2], payload[at + 3]];
    Ok(IfInfo {
        ipv4: octets(0).into(),
        netmask: octets(4).into(),
        gateway: octets(8).into(),
        mtu: u16::from_be_bytes([payload[12], payload[13]]),
    })
}

/// Decode one client-to-server frame from the front of `buf`.
pub fn decode_client(buf: &[u8]) -> Result<Decoded<ClientPacket>, ProtocolError> {
    let raw = match decode_raw(buf)? {
        RawDecoded::NeedMore(n) => return Ok(Decoded::NeedMore(n)),
        RawDecoded::Frame(raw) => raw,
    };
    let packet = match raw.ty {
        0 => ClientPacket::Nop,
        1 => ClientPacket::Handshake(parse_version(raw.payload)?),
        2 => ClientPacket::Auth(parse_auth(raw.payload)?),
        4 => ClientPacket::IfaceData(Bytes::copy_from_slice(raw.payload)),
        8 => ClientPacket::Reqsync,
        16 => ClientPacket::Close,
        other => return Err(ProtocolError::UnknownType(other)),
    };
    Ok(Decoded::Frame {
        packet,
        consumed: raw.consumed,
    })
}

/// Decode one server-to-client frame from the front of `buf`.
pub fn decode_server(buf: &[u8]) -> Result<Decoded<ServerPacket>, ProtocolError> {
    let raw = match decode_raw(buf)? {
        RawDecoded::NeedMore(n) => return Ok(Decoded::NeedMore(n)),
        RawDecoded::Frame(raw) => raw,
    };
    let packet = match raw.ty {
        0 => ServerPacket::Nop,
        1 => ServerPacket::Handshake(parse_server_handshake(raw.payload)?),
        2 => ServerPacket::AuthOk(parse_if_info(raw.payload)?),
        4 => ServerPacket::AuthReject,
        8 => ServerPacket::IfaceData(Bytes::copy_from_slice(raw.payload)),
        16 => ServerPacket::Reqsync,
        32 => ServerPacket::Close,
        other => return Err(ProtocolError::UnknownType(other)),
    };
    Ok(Decoded::Frame {
        packet,
        consumed: raw.consumed,
    })
}

fn exactly_one<T>(decoded: Decoded<T>, len: usize) -> Result<T, ProtocolError> {
    match decoded {
        Decoded::Frame { packet, consumed } if consumed == len => Ok(packet),
        // Short datagrams and trailing bytes both break the
        // one-frame-per-datagram rule.
        _ => Err(ProtocolError::BadDatagram),
    }
}

/// Decode a datagram that must hold exactly one client frame.
pub fn decode_client_datagram(buf: &[u8]) -> Result<ClientPacket, ProtocolError> {
    exactly_one(decode_client(buf)?, buf.len())
}

/// Decode a datagram that must hold exactly one server frame.
pub fn decode_server_datagram(buf: &[u8]) -> Result<ServerPacket, ProtocolError> {
    exactly_one(decode_server(buf)?, buf.len())
}
