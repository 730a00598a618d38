#![forbid(unsafe_code)]

//! Framed packet protocol shared by client and server.
//!
//! Every message is a 4-byte prefix (type, pad_len, big-endian payload
//! length) followed by at most [`MAX_PAYLOAD`] payload bytes. The same
//! framing runs over TCP (frames packed back-to-back) and UDP (exactly
//! one frame per datagram).

pub mod codec;
pub mod packet;
pub mod version;

pub use codec::{
    decode_client, decode_client_datagram, decode_server, decode_server_datagram, encode_client,
    encode_server, Decoded,
};
pub use packet::{
    ClientPacket, Credentials, IfInfo, ServerHandshake, ServerPacket, PASSWORD_CAP, USERNAME_CAP,
};
pub use version::Version;

/// Size of the fixed frame prefix.
pub const PREFIX_LEN: usize = 4;

/// Largest payload a single frame may carry.
pub const MAX_PAYLOAD: usize = 0x2000;

/// Largest possible on-wire frame.
pub const MAX_FRAME: usize = PREFIX_LEN + MAX_PAYLOAD;
