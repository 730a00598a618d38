#![forbid(unsafe_code)]

use std::net::Ipv4Addr;

use bytes::Bytes;

use crate::error::ProtocolError;

use super::version::Version;

/// Wire capacity of the AUTH username buffer, including the NUL.
pub const USERNAME_CAP: usize = 64;

/// Wire capacity of the AUTH password buffer, including the NUL.
pub const PASSWORD_CAP: usize = 256;

/// Username and password as carried by an AUTH frame. Construction
/// rejects strings that would not fit their fixed NUL-terminated
/// buffers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    username: String,
    password: String,
}

impl Credentials {
    pub fn new(username: &str, password: &str) -> Result<Self, ProtocolError> {
        if username.len() >= USERNAME_CAP || password.len() >= PASSWORD_CAP {
            return Err(ProtocolError::FieldTooLong);
        }
        // An embedded NUL would silently truncate on the wire.
        if username.contains('\0') || password.contains('\0') {
            return Err(ProtocolError::FieldTooLong);
        }
        Ok(Self {
            username: username.to_owned(),
            password: password.to_owned(),
        })
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn password(&self) -> &str {
        &self.password
    }
}

/// Tunnel interface parameters assigned by the server, delivered in
/// AUTH_OK. The client applies these to its local device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IfInfo {
    pub ipv4: Ipv4Addr,
    pub netmask: Ipv4Addr,
    pub gateway: Ipv4Addr,
    pub mtu: u16,
}

/// Server HANDSHAKE body: the encryption flag and the advertised
/// current/minimum/maximum versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerHandshake {
    pub need_encryption: bool,
    pub cur: Version,
    pub min: Option<Version>,
    pub max: Option<Version>,
}

impl ServerHandshake {
    pub fn advertise(cur: Version, min: Option<Version>, max: Option<Version>) -> Self {
        Self {
            // Plumbed but always zero until a transform is added.
            need_encryption: false,
            cur,
            min,
            max,
        }
    }

    /// A peer is accepted when its version lies within the advertised
    /// bounds; with no bounds advertised, the majors must match.
    pub fn accepts(&self, peer: &Version) -> bool {
        match (self.min, self.max) {
            (None, None) => peer.major == self.cur.major,
            (min, max) => {
                min.is_none_or(|lo| peer.triple() >= lo.triple())
                    && max.is_none_or(|hi| peer.triple() <= hi.triple())
            }
        }
    }
}

/// Frames sent client to server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientPacket {
    Nop,
    Handshake(Version),
    Auth(Credentials),
    IfaceData(Bytes),
    Reqsync,
    Close,
}

impl ClientPacket {
    pub(crate) fn type_byte(&self) -> u8 {
        match self {
            Self::Nop => 0,
            Self::Handshake(_) => 1,
            Self::Auth(_) => 2,
            Self::IfaceData(_) => 4,
            Self::Reqsync => 8,
            Self::Close => 16,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Nop => "NOP",
            Self::Handshake(_) => "HANDSHAKE",
            Self::Auth(_) => "AUTH",
            Self::IfaceData(_) => "IFACE_DATA",
            Self::Reqsync => "REQSYNC",
            Self::Close => "CLOSE",
        }
    }
}

/// Frames sent server to client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerPacket {
    Nop,
    Handshake(ServerHandshake),
    AuthOk(IfInfo),
    AuthReject,
    IfaceData(Bytes),
    Reqsync,
    Close,
}

impl ServerPacket {
    pub(crate) fn type_byte(&self) -> u8 {
        match self {
            Self::Nop => 0,
            Self::Handshake(_) => 1,
            Self::AuthOk(_) => 2,
            Self::AuthReject => 4,
            Self::IfaceData(_) => 8,
            Self::Reqsync => 16,
            Self::Close => 32,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Nop => "NOP",
            Self::Handshake(_) => "HANDSHAKE",
            Self::AuthOk(_) => "AUTH_OK",
            Self::AuthReject => "AUTH_REJECT",
            Self::IfaceData(_) => "IFACE_DATA",
            Self::Reqsync => "REQSYNC",
            Self::Close => "CLOSE",
        }
    }
}
