//! Incremental framing of an inbound byte stream.
//!
//! Bytes are appended to a `BytesMut` and whole packets are split off the
//! front. Two states:
//! - `WaitingForHeader`: need the length prefix and the whole header
//! - `WaitingForPayload`: header decoded, need `content_size` payload bytes
//!
//! Bytes are only removed from the buffer once a whole packet is available.
//! The decoded header is cached between pushes but the buffer itself is
//! never advanced on an incomplete parse.
//!
//! # Example
//!
//! ```ignore
//! use routewire::protocol::FrameBuffer;
//!
//! let mut buffer = FrameBuffer::new();
//!
//! // Data arrives in chunks from the socket
//! for packet in buffer.push(&chunk)? {
//!     println!("route {} id {}", packet.route(), packet.id());
//! }
//! ```

use bytes::BytesMut;

use super::header::{Header, DEFAULT_MAX_PAYLOAD_SIZE};
use super::packet::{peek_header, take_packet, RawPacket};
use crate::error::{Result, RoutewireError};

/// State machine for packet parsing.
#[derive(Debug, Clone)]
enum State {
    /// Waiting for the length prefix and complete header.
    WaitingForHeader,
    /// Header decoded, waiting for payload bytes.
    WaitingForPayload { header: Header, header_end: usize },
}

/// Buffer for accumulating incoming bytes and extracting complete packets.
pub struct FrameBuffer {
    buffer: BytesMut,
    state: State,
    max_payload_size: u32,
    /// Set once a malformed frame is seen; the stream cannot recover.
    corrupt: bool,
    /// Error held back because the same push also produced packets.
    held: Option<RoutewireError>,
}

impl FrameBuffer {
    /// Frame buffer with the default 16 MB payload limit.
    pub fn new() -> Self {
        Self::with_max_payload(DEFAULT_MAX_PAYLOAD_SIZE)
    }

    /// Frame buffer rejecting payloads above `max_payload_size`.
    pub fn with_max_payload(max_payload_size: u32) -> Self {
        Self {
            buffer: BytesMut::with_capacity(64 * 1024),
            state: State::WaitingForHeader,
            max_payload_size,
            corrupt: false,
            held: None,
        }
    }

    /// Push data into the buffer and extract all complete packets.
    ///
    /// Partial data stays buffered for the next push.
    ///
    /// Packets that precede a malformed frame are still returned. The error
    /// is then held back and reported by [`take_error`](Self::take_error) or
    /// by the next `push`.
    ///
    /// # Errors
    ///
    /// Returns `FramingCorrupt` for a malformed header or a payload larger
    /// than the configured maximum. The stream cannot be resumed after that.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<RawPacket>> {
        if self.corrupt {
            return Err(self.held.take().unwrap_or_else(|| {
                RoutewireError::FramingCorrupt("stream already corrupt".to_string())
            }));
        }
        self.buffer.extend_from_slice(data);

        let mut packets = Vec::new();
        loop {
            match self.try_extract_one() {
                Ok(Some(packet)) => packets.push(packet),
                Ok(None) => return Ok(packets),
                Err(err) => {
                    self.corrupt = true;
                    if packets.is_empty() {
                        return Err(err);
                    }
                    self.held = Some(err);
                    return Ok(packets);
                }
            }
        }
    }

    /// Framing error held back by the last `push`, if any.
    pub fn take_error(&mut self) -> Option<RoutewireError> {
        self.held.take()
    }

    /// True once a malformed frame has been seen.
    pub fn is_corrupt(&self) -> bool {
        self.corrupt
    }

    /// Try to extract a single packet from the buffer.
    ///
    /// Returns:
    /// - `Ok(Some(packet))` if a complete packet was extracted
    /// - `Ok(None)` if more data is needed (nothing consumed)
    /// - `Err(...)` on a protocol violation
    fn try_extract_one(&mut self) -> Result<Option<RawPacket>> {
        let (header, header_end) = match &self.state {
            State::WaitingForHeader => match peek_header(&self.buffer[..], self.max_payload_size)? {
                Some(found) => found,
                None => return Ok(None),
            },
            State::WaitingForPayload { header, header_end } => (header.clone(), *header_end),
        };

        match take_packet(&mut self.buffer, header.clone(), header_end) {
            Some(packet) => {
                self.state = State::WaitingForHeader;
                Ok(Some(packet))
            }
            None => {
                self.state = State::WaitingForPayload { header, header_end };
                Ok(None)
            }
        }
    }

    /// Bytes received but not yet returned as packets.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Discard buffered bytes and any framing error.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.state = State::WaitingForHeader;
        self.corrupt = false;
        self.held = None;
    }

    #[cfg(test)]
    fn state_name(&self) -> &'static str {
        match &self.state {
            State::WaitingForHeader => "WaitingForHeader",
            State::WaitingForPayload { .. } => "WaitingForPayload",
        }
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::EncodingType;
    use crate::error::RoutewireError;
    use crate::protocol::{IdGenerator, Packet, Status};

    fn request_bytes(ids: &IdGenerator, route: u32, text: &str) -> Vec<u8> {
        Packet::request(route, text.to_string(), EncodingType::MsgPack, ids)
            .encode()
            .unwrap()
            .to_vec()
    }

    fn stream_of_three() -> Vec<u8> {
        let ids = IdGenerator::new(255);
        let mut all = request_bytes(&ids, 1, "first");
        all.extend(request_bytes(&ids, 2, "second packet"));
        let request = Packet::request(3, (), EncodingType::MsgPack, &ids);
        let mut reply: Packet<String> = Packet::response(&request.header, Status::error("bad"), None);
        all.extend(reply.encode().unwrap().to_vec());
        all
    }

    fn summary(packets: &[RawPacket]) -> Vec<(u32, u32, Vec<u8>)> {
        packets
            .iter()
            .map(|p| (p.route(), p.id(), p.payload().to_vec()))
            .collect()
    }

    #[test]
    fn test_single_complete_packet() {
        let ids = IdGenerator::new(255);
        let mut buffer = FrameBuffer::new();

        let packets = buffer.push(&request_bytes(&ids, 7, "hello")).unwrap();

        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].route(), 7);
        assert_eq!(packets[0].id(), 1);
        let text: String = packets[0].decode_typed().unwrap();
        assert_eq!(text, "hello");
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_multiple_packets_in_one_push() {
        let mut buffer = FrameBuffer::new();
        let packets = buffer.push(&stream_of_three()).unwrap();

        assert_eq!(packets.len(), 3);
        assert_eq!(packets[0].route(), 1);
        assert_eq!(packets[1].route(), 2);
        assert!(packets[2].header.is_response());
        assert_eq!(packets[2].header.status().message, "bad");
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_fragmented_header() {
        let ids = IdGenerator::new(255);
        let bytes = request_bytes(&ids, 1, "test");
        let mut buffer = FrameBuffer::new();

        assert!(buffer.push(&bytes[..4]).unwrap().is_empty());
        assert_eq!(buffer.state_name(), "WaitingForHeader");
        assert_eq!(buffer.len(), 4);

        let packets = buffer.push(&bytes[4..]).unwrap();
        assert_eq!(packets.len(), 1);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_fragmented_payload_keeps_bytes() {
        let ids = IdGenerator::new(255);
        let bytes = request_bytes(&ids, 1, "this is a longer payload that will be fragmented");
        let mut buffer = FrameBuffer::new();

        let cut = bytes.len() - 10;
        assert!(buffer.push(&bytes[..cut]).unwrap().is_empty());
        assert_eq!(buffer.state_name(), "WaitingForPayload");
        // Nothing consumed while waiting.
        assert_eq!(buffer.len(), cut);

        let packets = buffer.push(&bytes[cut..]).unwrap();
        assert_eq!(packets.len(), 1);
        assert_eq!(buffer.state_name(), "WaitingForHeader");
    }

    #[test]
    fn test_every_split_point_matches_whole_push() {
        let all = stream_of_three();
        let expected = summary(&FrameBuffer::new().push(&all).unwrap());

        for cut in 0..=all.len() {
            let mut buffer = FrameBuffer::new();
            let mut got = buffer.push(&all[..cut]).unwrap();
            got.extend(buffer.push(&all[cut..]).unwrap());
            assert_eq!(summary(&got), expected, "split at {}", cut);
            assert!(buffer.is_empty());
        }
    }

    #[test]
    fn test_byte_at_a_time() {
        let all = stream_of_three();
        let expected = summary(&FrameBuffer::new().push(&all).unwrap());

        let mut buffer = FrameBuffer::new();
        let mut got = Vec::new();
        for byte in &all {
            got.extend(buffer.push(&[*byte]).unwrap());
        }
        assert_eq!(summary(&got), expected);
    }

    #[test]
    fn test_max_payload_validation() {
        let ids = IdGenerator::new(255);
        let bytes = request_bytes(&ids, 1, &"x".repeat(500));
        let mut buffer = FrameBuffer::with_max_payload(100);

        let result = buffer.push(&bytes);
        let err = result.unwrap_err();
        assert!(matches!(err, RoutewireError::FramingCorrupt(_)));
        assert!(err.to_string().contains("exceeds maximum"));
    }

    #[test]
    fn test_corrupt_header_is_error() {
        let mut buffer = FrameBuffer::new();
        let result = buffer.push(&[0, 3, 0xc1, 0xc1, 0xc1]);
        assert!(matches!(result, Err(RoutewireError::FramingCorrupt(_))));
    }

    #[test]
    fn test_packets_before_corruption_are_kept() {
        let ids = IdGenerator::new(255);
        let mut all = request_bytes(&ids, 4, "good");
        all.extend_from_slice(&[0, 3, 0xc1, 0xc1, 0xc1]);

        // Whole push hands back the good packet and holds the error.
        let mut whole = FrameBuffer::new();
        let packets = whole.push(&all).unwrap();
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].route(), 4);
        assert!(whole.is_corrupt());
        assert!(matches!(whole.take_error(), Some(RoutewireError::FramingCorrupt(_))));
        assert!(matches!(whole.push(&[]), Err(RoutewireError::FramingCorrupt(_))));

        // Split push yields the same packets before failing.
        let cut = all.len() - 5;
        let mut split = FrameBuffer::new();
        let first = split.push(&all[..cut]).unwrap();
        assert_eq!(summary(&first), summary(&packets));
        assert!(split.push(&all[cut..]).is_err());
        assert!(split.is_corrupt());
    }

    #[test]
    fn test_clear_resets_state() {
        let ids = IdGenerator::new(255);
        let bytes = request_bytes(&ids, 1, "some payload");
        let mut buffer = FrameBuffer::new();

        buffer.push(&bytes[..bytes.len() - 1]).unwrap();
        assert_eq!(buffer.state_name(), "WaitingForPayload");

        buffer.clear();
        assert_eq!(buffer.state_name(), "WaitingForHeader");
        assert!(buffer.is_empty());
    }
}
