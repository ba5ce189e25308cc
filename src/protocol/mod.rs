//! Protocol module - packet envelope, framing, and id assignment.
//!
//! This module implements the binary envelope used on the wire:
//!
//! ```text
//! ┌──────────────┬─────────────────────┬──────────────────────────┐
//! │ Header length│ Header (MsgPack)    │ Payload (encoding_type)  │
//! │ uint16 BE    │ header length bytes │ header.content_size bytes│
//! └──────────────┴─────────────────────┴──────────────────────────┘
//! ```
//!
//! - [`Header`] - route, encoding, package type, size, id, status
//! - [`Packet`] - header plus raw and/or decoded payload
//! - [`FrameBuffer`] - accumulates partial reads and yields whole packets
//! - [`IdGenerator`] - wrapping correlation ids in `[1, N]`

mod frame_buffer;
mod header;
mod id_gen;
mod packet;

pub use frame_buffer::FrameBuffer;
pub use header::{
    Header, PackageType, Status, StatusCode, DEFAULT_MAX_PAYLOAD_SIZE, LENGTH_PREFIX_SIZE, NO_ID,
};
pub use id_gen::{IdGenerator, DEFAULT_ID_MODULUS};
pub use packet::{Packet, RawPacket};
