// Copyright (c) 2021 The tlaloc developers. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use crate::{
    ByteArray, DecodeError, DecodePacket, EncodeError, EncodePacket, FixedHeader, Packet, PacketId,
    PacketType, StringData, VarIntError,
};

/// An unsubscribe request: a packet identifier followed by at least one
/// topic filter [MQTT-3.10.3-2]. Filters are compared to the session's
/// subscriptions character-by-character.
#[allow(clippy::module_name_repetitions)]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnsubscribePacket {
    packet_id: PacketId,
    topics: Vec<String>,
}

impl UnsubscribePacket {
    #[must_use]
    pub fn new(topic: &str, packet_id: PacketId) -> Self {
        Self {
            packet_id,
            topics: vec![topic.to_string()],
        }
    }

    #[must_use]
    pub fn with_topics(packet_id: PacketId, topics: Vec<String>) -> Self {
        Self { packet_id, topics }
    }

    #[must_use]
    pub const fn packet_id(&self) -> PacketId {
        self.packet_id
    }

    #[must_use]
    pub fn topics(&self) -> &[String] {
        &self.topics
    }

    fn remaining_length(&self) -> usize {
        PacketId::bytes() + self.topics.iter().map(|t| 2 + t.len()).sum::<usize>()
    }
}

impl DecodePacket for UnsubscribePacket {
    fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        let fixed_header = FixedHeader::decode(ba)?;
        if fixed_header.packet_type() != PacketType::Unsubscribe {
            return Err(DecodeError::InvalidPacketType);
        }

        let packet_id = PacketId::decode(ba)?;
        if packet_id.value() == 0 {
            return Err(DecodeError::InvalidPacketId);
        }

        let mut topics = Vec::new();
        let mut consumed = PacketId::bytes();
        while consumed < fixed_header.remaining_length() {
            let topic = StringData::decode(ba)?;
            consumed += topic.bytes();
            topics.push(topic.as_ref().to_string());
        }
        if consumed != fixed_header.remaining_length() {
            return Err(DecodeError::InvalidRemainingLength);
        }
        if topics.is_empty() {
            return Err(DecodeError::EmptyTopicFilter);
        }

        Ok(Self { packet_id, topics })
    }
}

impl EncodePacket for UnsubscribePacket {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        let old_len = buf.len();

        let fixed_header = FixedHeader::new(PacketType::Unsubscribe, self.remaining_length())?;
        fixed_header.encode(buf)?;
        self.packet_id.encode(buf)?;
        for topic in &self.topics {
            StringData::from(topic)?.encode(buf)?;
        }

        Ok(buf.len() - old_len)
    }
}

impl Packet for UnsubscribePacket {
    fn packet_type(&self) -> PacketType {
        PacketType::Unsubscribe
    }

    fn bytes(&self) -> Result<usize, VarIntError> {
        let fixed_header = FixedHeader::new(PacketType::Unsubscribe, self.remaining_length())?;
        Ok(fixed_header.bytes() + fixed_header.remaining_length())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let packet = UnsubscribePacket::with_topics(
            PacketId::new(12),
            vec!["sport/#".to_string(), "a/b".to_string()],
        );
        let mut buf = Vec::new();
        packet.encode(&mut buf).unwrap();
        assert_eq!(buf[0], 0xa2);

        let mut ba = ByteArray::new(&buf);
        assert_eq!(UnsubscribePacket::decode(&mut ba), Ok(packet));
    }

    #[test]
    fn test_decode_empty_payload() {
        let buf = [0xa2, 0x02, 0x00, 0x0c];
        let mut ba = ByteArray::new(&buf);
        assert_eq!(
            UnsubscribePacket::decode(&mut ba),
            Err(DecodeError::EmptyTopicFilter)
        );
    }
}
