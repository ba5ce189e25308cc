//! Packet envelope: header plus payload.
//!
//! A packet owns its header and raw payload bytes. The decoded value is
//! derived from the raw bytes on demand with the codec named in the header.
//! Outbound packets usually start with a decoded value and get their raw
//! bytes on [`Packet::encode`]; inbound packets start raw.
//!
//! # Example
//!
//! ```
//! use routewire::codec::EncodingType;
//! use routewire::protocol::{IdGenerator, Packet, RawPacket, DEFAULT_MAX_PAYLOAD_SIZE};
//! use bytes::BytesMut;
//!
//! let ids = IdGenerator::new(255);
//! let mut packet = Packet::request(7, "hello".to_string(), EncodingType::MsgPack, &ids);
//! let bytes = packet.encode().unwrap();
//!
//! let mut buf = BytesMut::from(&bytes[..]);
//! let raw = RawPacket::try_decode(&mut buf, DEFAULT_MAX_PAYLOAD_SIZE).unwrap().unwrap();
//! let text: String = raw.decode_typed().unwrap();
//! assert_eq!(text, "hello");
//! assert_eq!(raw.header.id, 1);
//! ```

use bytes::{BufMut, Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::header::{Header, PackageType, Status, LENGTH_PREFIX_SIZE, NO_ID};
use super::id_gen::IdGenerator;
use crate::codec::EncodingType;
use crate::error::{Result, RoutewireError};

/// A protocol packet.
#[derive(Debug, Clone, PartialEq)]
pub struct Packet<T = ()> {
    /// Packet metadata.
    pub header: Header,
    data: Option<T>,
    raw: Option<Bytes>,
}

/// A packet whose payload has not been decoded.
pub type RawPacket = Packet<()>;

impl<T> Packet<T> {
    /// Create a packet holding a decoded value.
    pub fn create(header: Header, data: T) -> Self {
        Self {
            header,
            data: Some(data),
            raw: None,
        }
    }

    /// Build a packet, assigning a fresh id only for requests.
    pub fn create_from_data(
        route: u32,
        data: T,
        package_type: PackageType,
        encoding: EncodingType,
        ids: &IdGenerator,
    ) -> Self {
        let id = if package_type == PackageType::Request {
            ids.next()
        } else {
            NO_ID
        };
        Self::create(Header::new(route, encoding, package_type, id), data)
    }

    /// Request packet with a fresh correlation id.
    pub fn request(route: u32, data: T, encoding: EncodingType, ids: &IdGenerator) -> Self {
        Self::create_from_data(route, data, PackageType::Request, encoding, ids)
    }

    /// One-way notify packet.
    pub fn notify(route: u32, data: T, encoding: EncodingType) -> Self {
        Self::create(Header::new(route, encoding, PackageType::Notify, NO_ID), data)
    }

    /// Server push packet.
    pub fn push(route: u32, data: T, encoding: EncodingType) -> Self {
        Self::create(Header::new(route, encoding, PackageType::Push, NO_ID), data)
    }

    /// Response to `request`, echoing its route, id and encoding.
    ///
    /// Error responses normally carry no data.
    pub fn response(request: &Header, status: Status, data: Option<T>) -> Self {
        let header = Header {
            route: request.route,
            encoding_type: request.encoding_type,
            package_type: PackageType::Response,
            content_size: 0,
            id: request.id,
            status: Some(status),
        };
        Self {
            header,
            data,
            raw: None,
        }
    }

    /// Decoded value, if one is held.
    #[inline]
    pub fn data(&self) -> Option<&T> {
        self.data.as_ref()
    }

    /// Take the decoded value.
    #[inline]
    pub fn into_data(self) -> Option<T> {
        self.data
    }

    /// Cached raw payload, if present.
    #[inline]
    pub fn raw(&self) -> Option<&Bytes> {
        self.raw.as_ref()
    }

    /// Raw payload bytes (empty when none are cached).
    #[inline]
    pub fn payload(&self) -> &[u8] {
        self.raw.as_deref().unwrap_or_default()
    }

    #[inline]
    pub fn route(&self) -> u32 {
        self.header.route
    }

    #[inline]
    pub fn id(&self) -> u32 {
        self.header.id
    }

    #[inline]
    pub fn package_type(&self) -> PackageType {
        self.header.package_type
    }

    /// Decode the raw payload into `U` using the header's codec.
    pub fn decode_typed<U: DeserializeOwned>(&self) -> Result<U> {
        let encoding = self.header.encoding()?;
        encoding.decode(self.payload())
    }

    /// Decode the raw payload into a new packet sharing header and raw bytes.
    pub fn decode_from_raw<U: DeserializeOwned>(&self) -> Result<Packet<U>> {
        let data = self.decode_typed()?;
        Ok(Packet {
            header: self.header.clone(),
            data: Some(data),
            raw: self.raw.clone(),
        })
    }
}

impl RawPacket {
    /// Create a packet around already-encoded payload bytes.
    pub fn create_raw(mut header: Header, raw: Bytes) -> Self {
        header.content_size = raw.len() as u32;
        Self {
            header,
            data: None,
            raw: Some(raw),
        }
    }

    /// Try to take one complete packet off the front of `buf`.
    ///
    /// Returns `Ok(None)` without touching `buf` when the length prefix,
    /// header, or payload is not fully available yet, so a caller that
    /// appends more bytes and retries sees the same result as if it had
    /// waited for all bytes up front.
    pub fn try_decode(buf: &mut BytesMut, max_payload_size: u32) -> Result<Option<RawPacket>> {
        let (header, header_end) = match peek_header(&buf[..], max_payload_size)? {
            Some(found) => found,
            None => return Ok(None),
        };
        Ok(take_packet(buf, header, header_end))
    }
}

impl<T: Serialize> Packet<T> {
    /// Serialize to `[u16 header length][header][payload]`.
    ///
    /// Encodes and caches the payload first if only a decoded value is held,
    /// and sets `content_size` to the payload length.
    pub fn encode(&mut self) -> Result<Bytes> {
        let (head, payload) = self.encode_parts()?;
        let mut buf = BytesMut::with_capacity(head.len() + payload.len());
        buf.extend_from_slice(&head);
        buf.extend_from_slice(&payload);
        Ok(buf.freeze())
    }

    /// Serialize as (length prefix + header, payload) for vectored writes.
    pub fn encode_parts(&mut self) -> Result<(Bytes, Bytes)> {
        let payload = self.encode_payload()?;
        self.header.content_size = u32::try_from(payload.len()).map_err(|_| {
            RoutewireError::FramingCorrupt(format!("payload of {} bytes", payload.len()))
        })?;

        let header_bytes = self.header.encode()?;
        let header_len = u16::try_from(header_bytes.len()).map_err(|_| {
            RoutewireError::FramingCorrupt(format!("header of {} bytes", header_bytes.len()))
        })?;

        let mut head = BytesMut::with_capacity(LENGTH_PREFIX_SIZE + header_bytes.len());
        head.put_u16(header_len);
        head.extend_from_slice(&header_bytes);
        Ok((head.freeze(), payload))
    }

    fn encode_payload(&mut self) -> Result<Bytes> {
        if let Some(raw) = &self.raw {
            return Ok(raw.clone());
        }
        let raw = match &self.data {
            Some(data) => Bytes::from(self.header.encoding()?.encode(data)?),
            None => Bytes::new(),
        };
        self.raw = Some(raw.clone());
        Ok(raw)
    }
}

/// Read the length prefix and header without consuming anything.
///
/// Returns the header and the offset where its payload starts.
pub(super) fn peek_header(buf: &[u8], max_payload_size: u32) -> Result<Option<(Header, usize)>> {
    if buf.len() < LENGTH_PREFIX_SIZE {
        return Ok(None);
    }

    let header_len = u16::from_be_bytes([buf[0], buf[1]]) as usize;
    if header_len == 0 {
        return Err(RoutewireError::FramingCorrupt(
            "zero-length header".to_string(),
        ));
    }

    let header_end = LENGTH_PREFIX_SIZE + header_len;
    if buf.len() < header_end {
        return Ok(None);
    }

    let header = Header::decode(&buf[LENGTH_PREFIX_SIZE..header_end])?;
    header.validate(max_payload_size)?;
    Ok(Some((header, header_end)))
}

/// Split a complete packet off `buf`, or leave `buf` untouched.
pub(super) fn take_packet(buf: &mut BytesMut, header: Header, header_end: usize) -> Option<RawPacket> {
    let total = header_end + header.content_size as usize;
    if buf.len() < total {
        return None;
    }

    let mut frame = buf.split_to(total);
    let payload = frame.split_off(header_end).freeze();
    Some(Packet {
        header,
        data: None,
        raw: Some(payload),
    })
}
