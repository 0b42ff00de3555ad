// Copyright (c) 2021 The tlaloc developers. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Incremental packet framing.
//!
//! A socket hands the broker whatever byte slices the reactor produces;
//! packet boundaries fall anywhere. `StreamDecoder` consumes those slices
//! through a small state machine, one state per section of the fixed
//! header, and emits every completed `ControlPacket`:
//!
//! | State             | Reads                       | Next                |
//! |-------------------|-----------------------------|---------------------|
//! | `TypeByte`        | 1 byte, type + flag nibbles | `RemainingLength`   |
//! | `RemainingLength` | 1-4 bytes, var int          | `Body`, or emit if 0|
//! | `Body`            | `remaining_length` bytes    | emit, `TypeByte`    |

use crate::{
    ByteArray, ControlPacket, DecodeError, DecodePacket, PacketType, VarIntDecoder,
    MAX_PACKET_LEN,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    TypeByte,
    RemainingLength,
    Body,
}

/// Streaming decoder for a connection's inbound byte stream.
///
/// Feeding is fragmentation-agnostic: for any split of a valid byte
/// sequence into chunks, the same packets come out. Any error is fatal for
/// the stream; the caller is expected to drop the connection, or call
/// `reset()` before reusing the decoder.
#[allow(clippy::module_name_repetitions)]
#[derive(Debug)]
pub struct StreamDecoder {
    state: State,

    /// Raw bytes of the packet being framed, fixed header included.
    buf: Vec<u8>,

    var_int: VarIntDecoder,

    /// Body bytes still missing in state `Body`.
    pending: usize,

    /// Upper bound on the whole packet; 0 means the protocol limit only.
    max_packet_size: usize,
}

impl Default for StreamDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: State::TypeByte,
            buf: Vec::new(),
            var_int: VarIntDecoder::new(),
            pending: 0,
            max_packet_size: 0,
        }
    }

    /// Create a decoder that rejects packets larger than `max_packet_size`
    /// bytes with `PacketTooLarge`.
    #[must_use]
    pub fn with_max_packet_size(max_packet_size: usize) -> Self {
        let mut decoder = Self::new();
        decoder.max_packet_size = max_packet_size;
        decoder
    }

    /// Discard any partial packet and restart at a packet boundary.
    pub fn reset(&mut self) {
        self.state = State::TypeByte;
        self.buf.clear();
        self.var_int.reset();
        self.pending = 0;
    }

    /// Consume `data` and append every packet that completed to `packets`.
    ///
    /// # Errors
    ///
    /// Returns error on any framing or packet-level violation. Errors are
    /// terminal: the decoder stays in the failed state until `reset()`.
    pub fn feed(
        &mut self,
        data: &[u8],
        packets: &mut Vec<ControlPacket>,
    ) -> Result<(), DecodeError> {
        let mut offset = 0;
        while offset < data.len() {
            match self.state {
                State::TypeByte => {
                    let byte = data[offset];
                    offset += 1;
                    // Bad type/flag nibbles are known before the body
                    // arrives; fail fast.
                    PacketType::try_from(byte)?;
                    self.buf.push(byte);
                    self.var_int.reset();
                    self.state = State::RemainingLength;
                }
                State::RemainingLength => {
                    let byte = data[offset];
                    offset += 1;
                    self.buf.push(byte);
                    if let Some(remaining_length) = self.var_int.feed(byte)? {
                        if remaining_length > MAX_PACKET_LEN {
                            return Err(DecodeError::InvalidRemainingLength);
                        }
                        if self.max_packet_size > 0
                            && self.buf.len() + remaining_length > self.max_packet_size
                        {
                            return Err(DecodeError::PacketTooLarge);
                        }
                        if remaining_length == 0 {
                            self.emit(packets)?;
                        } else {
                            self.pending = remaining_length;
                            self.state = State::Body;
                        }
                    }
                }
                State::Body => {
                    let take = self.pending.min(data.len() - offset);
                    self.buf.extend_from_slice(&data[offset..offset + take]);
                    offset += take;
                    self.pending -= take;
                    if self.pending == 0 {
                        self.emit(packets)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Decode the accumulated bytes as exactly one packet.
    fn emit(&mut self, packets: &mut Vec<ControlPacket>) -> Result<(), DecodeError> {
        let mut ba = ByteArray::new(&self.buf);
        let packet = ControlPacket::decode(&mut ba)?;
        // The body must be consumed in full; a sub-parser stopping short
        // means the declared remaining length was wrong.
        if ba.remaining_bytes() != 0 {
            return Err(DecodeError::TrailingBytes);
        }
        packets.push(packet);
        self.buf.clear();
        self.state = State::TypeByte;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ConnectPacket, EncodePacket, PacketId, PingRequestPacket, PublishPacket, QoS,
        SubscribePacket,
    };

    fn sample_stream() -> (Vec<u8>, usize) {
        let mut buf = Vec::new();
        ConnectPacket::new("fragtest").unwrap().encode(&mut buf).unwrap();
        SubscribePacket::new("sport/#", QoS::AtLeastOnce, PacketId::new(10))
            .unwrap()
            .encode(&mut buf)
            .unwrap();
        let mut publish = PublishPacket::new("sport/tennis", QoS::AtLeastOnce, b"40-15").unwrap();
        publish.set_packet_id(PacketId::new(11));
        publish.encode(&mut buf).unwrap();
        PingRequestPacket::new().encode(&mut buf).unwrap();
        (buf, 4)
    }

    #[test]
    fn test_feed_whole() {
        let (buf, count) = sample_stream();
        let mut decoder = StreamDecoder::new();
        let mut packets = Vec::new();
        decoder.feed(&buf, &mut packets).unwrap();
        assert_eq!(packets.len(), count);
    }

    #[test]
    fn test_feed_byte_at_a_time() {
        let (buf, count) = sample_stream();
        let mut whole = Vec::new();
        let mut decoder = StreamDecoder::new();
        decoder.feed(&buf, &mut whole).unwrap();

        let mut split = Vec::new();
        let mut decoder = StreamDecoder::new();
        for byte in &buf {
            decoder.feed(std::slice::from_ref(byte), &mut split).unwrap();
        }
        assert_eq!(split.len(), count);
        assert_eq!(split, whole);
    }

    #[test]
    fn test_feed_every_split_point() {
        let (buf, _count) = sample_stream();
        let mut whole = Vec::new();
        StreamDecoder::new().feed(&buf, &mut whole).unwrap();

        for split_at in 1..buf.len() {
            let mut decoder = StreamDecoder::new();
            let mut packets = Vec::new();
            decoder.feed(&buf[..split_at], &mut packets).unwrap();
            decoder.feed(&buf[split_at..], &mut packets).unwrap();
            assert_eq!(packets, whole, "split at byte {split_at}");
        }
    }

    #[test]
    fn test_malformed_remaining_length() {
        // CONNECT type byte followed by five continuation bytes.
        let buf = [0x10, 0xff, 0xff, 0xff, 0xff, 0xff];
        let mut decoder = StreamDecoder::new();
        let mut packets = Vec::new();
        assert_eq!(
            decoder.feed(&buf, &mut packets),
            Err(DecodeError::InvalidVarInt)
        );
        assert!(packets.is_empty());
    }

    #[test]
    fn test_reserved_flag_violation() {
        // SUBSCRIBE with a zero flag nibble.
        let buf = [0x80, 0x00];
        let mut decoder = StreamDecoder::new();
        let mut packets = Vec::new();
        assert_eq!(
            decoder.feed(&buf, &mut packets),
            Err(DecodeError::InvalidPacketFlags)
        );
    }

    #[test]
    fn test_body_length_mismatch() {
        // PINGREQ declaring one body byte.
        let buf = [0xc0, 0x01, 0x00];
        let mut decoder = StreamDecoder::new();
        let mut packets = Vec::new();
        assert!(decoder.feed(&buf, &mut packets).is_err());
    }

    #[test]
    fn test_max_packet_size() {
        let mut publish_buf = Vec::new();
        PublishPacket::new("a/b", QoS::AtMostOnce, &[0u8; 128])
            .unwrap()
            .encode(&mut publish_buf)
            .unwrap();

        let mut decoder = StreamDecoder::with_max_packet_size(64);
        let mut packets = Vec::new();
        assert_eq!(
            decoder.feed(&publish_buf, &mut packets),
            Err(DecodeError::PacketTooLarge)
        );
    }

    #[test]
    fn test_reset_restarts_cleanly() {
        let mut decoder = StreamDecoder::new();
        let mut packets = Vec::new();
        // Half a packet, then abandon it.
        decoder.feed(&[0x10, 0x0c, 0x00], &mut packets).unwrap();
        decoder.reset();

        let mut buf = Vec::new();
        PingRequestPacket::new().encode(&mut buf).unwrap();
        decoder.feed(&buf, &mut packets).unwrap();
        assert_eq!(packets.len(), 1);
    }
}
