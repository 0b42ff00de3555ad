// Copyright (c) 2021 The tlaloc developers. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use bytes::Bytes;
use std::io::Write;

use crate::{
    ByteArray, DecodeError, DecodePacket, EncodeError, EncodePacket, FixedHeader, Packet, PacketId,
    PacketType, PubTopic, QoS, VarIntError,
};

/// `PublishPacket` transports an application message, from the Client to the
/// Server or from the Server to the Client.
///
/// ```text
///  7                     0
/// +-----------------------+
/// | Fixed header          |
/// |                       |
/// +-----------------------+
/// | Topic name length     |
/// |                       |
/// +-----------------------+
/// | Topic name ...        |
/// +-----------------------+
/// | Packet identifier     |
/// |                       |
/// +-----------------------+
/// | Msg payload ...       |
/// +-----------------------+
/// ```
///
/// The packet identifier is only present in QoS 1 and QoS 2 packets, and
/// the payload runs to the end of the remaining length. Expected responses:
/// none for QoS 0, `PublishAckPacket` for QoS 1, `PublishReceivedPacket`
/// for QoS 2.
#[allow(clippy::module_name_repetitions)]
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PublishPacket {
    /// False on the first delivery attempt of this packet; true on a
    /// re-delivery. Must be false when QoS is 0 [MQTT-3.3.1-2].
    dup: bool,

    /// Level of assurance for delivery.
    qos: QoS,

    /// A publish sent to the Server with `retain` set asks it to keep the
    /// message for future subscribers of the topic. The Server must clear
    /// the flag when fanning a message out to established subscriptions
    /// [MQTT-3.3.1-9].
    retain: bool,

    /// Topic name, no wildcard characters allowed.
    topic: PubTopic,

    /// Only meaningful while `qos` is above 0.
    packet_id: PacketId,

    /// Application payload. Reference counted so that a broker can clone
    /// one packet per subscriber without copying the body.
    msg: Bytes,
}

impl PublishPacket {
    /// Create a new publish packet.
    ///
    /// # Errors
    ///
    /// Returns error if `topic` is invalid.
    pub fn new(topic: &str, qos: QoS, msg: &[u8]) -> Result<Self, EncodeError> {
        let topic = PubTopic::new(topic).map_err(|_err| EncodeError::InvalidTopic)?;
        Ok(Self {
            dup: false,
            qos,
            retain: false,
            topic,
            packet_id: PacketId::new(0),
            msg: Bytes::copy_from_slice(msg),
        })
    }

    pub fn set_retain(&mut self, retain: bool) -> &mut Self {
        self.retain = retain;
        self
    }

    #[must_use]
    pub const fn retain(&self) -> bool {
        self.retain
    }

    /// Update the dup flag. It is reset for QoS 0 on encode.
    pub fn set_dup(&mut self, dup: bool) -> &mut Self {
        self.dup = dup;
        self
    }

    #[must_use]
    pub const fn dup(&self) -> bool {
        self.dup
    }

    /// Downgrade or upgrade the delivery QoS, as done when fanning out a
    /// message at the granted level of each subscription.
    pub fn set_qos(&mut self, qos: QoS) -> &mut Self {
        if qos == QoS::AtMostOnce {
            self.dup = false;
            self.packet_id = PacketId::new(0);
        }
        self.qos = qos;
        self
    }

    #[must_use]
    pub const fn qos(&self) -> QoS {
        self.qos
    }

    pub fn set_packet_id(&mut self, packet_id: PacketId) -> &mut Self {
        self.packet_id = packet_id;
        self
    }

    #[must_use]
    pub const fn packet_id(&self) -> PacketId {
        self.packet_id
    }

    #[must_use]
    pub fn topic(&self) -> &str {
        self.topic.as_ref()
    }

    #[must_use]
    pub fn message(&self) -> &[u8] {
        &self.msg
    }

    fn remaining_length(&self) -> usize {
        let packet_id_bytes = if self.qos == QoS::AtMostOnce {
            0
        } else {
            PacketId::bytes()
        };
        self.topic.bytes() + packet_id_bytes + self.msg.len()
    }
}

impl DecodePacket for PublishPacket {
    fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        let fixed_header = FixedHeader::decode(ba)?;
        let (dup, qos, retain) = match fixed_header.packet_type() {
            PacketType::Publish { dup, qos, retain } => (dup, qos, retain),
            _ => return Err(DecodeError::InvalidPacketType),
        };

        let topic = PubTopic::decode(ba)?;
        let mut consumed = topic.bytes();

        let packet_id = if qos == QoS::AtMostOnce {
            PacketId::new(0)
        } else {
            let packet_id = PacketId::decode(ba)?;
            // A QoS 1 or 2 publish MUST carry a non-zero packet identifier
            // [MQTT-2.3.1-1].
            if packet_id.value() == 0 {
                return Err(DecodeError::InvalidPacketId);
            }
            consumed += PacketId::bytes();
            packet_id
        };

        let msg_len = fixed_header
            .remaining_length()
            .checked_sub(consumed)
            .ok_or(DecodeError::InvalidRemainingLength)?;
        let msg = Bytes::copy_from_slice(ba.read_bytes(msg_len)?);

        Ok(Self {
            dup,
            qos,
            retain,
            topic,
            packet_id,
            msg,
        })
    }
}

impl EncodePacket for PublishPacket {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        let old_len = buf.len();

        let packet_type = PacketType::Publish {
            dup: self.dup && self.qos != QoS::AtMostOnce,
            qos: self.qos,
            retain: self.retain,
        };
        let fixed_header = FixedHeader::new(packet_type, self.remaining_length())?;
        fixed_header.encode(buf)?;

        self.topic.encode(buf)?;
        if self.qos != QoS::AtMostOnce {
            self.packet_id.encode(buf)?;
        }
        buf.write_all(&self.msg)?;

        Ok(buf.len() - old_len)
    }
}

impl Packet for PublishPacket {
    fn packet_type(&self) -> PacketType {
        PacketType::Publish {
            dup: self.dup,
            qos: self.qos,
            retain: self.retain,
        }
    }

    fn bytes(&self) -> Result<usize, VarIntError> {
        let fixed_header = FixedHeader::new(self.packet_type(), self.remaining_length())?;
        Ok(fixed_header.bytes() + fixed_header.remaining_length())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qos0_round_trip() {
        let packet = PublishPacket::new("sport/tennis/player1", QoS::AtMostOnce, b"score").unwrap();
        let mut buf = Vec::new();
        packet.encode(&mut buf).unwrap();
        assert_eq!(buf[0], 0x30);

        let mut ba = ByteArray::new(&buf);
        let decoded = PublishPacket::decode(&mut ba).unwrap();
        assert_eq!(decoded.topic(), "sport/tennis/player1");
        assert_eq!(decoded.message(), b"score");
        assert_eq!(decoded.qos(), QoS::AtMostOnce);
        assert_eq!(ba.remaining_bytes(), 0);
    }

    #[test]
    fn test_qos1_carries_packet_id() {
        let mut packet = PublishPacket::new("a/b", QoS::AtLeastOnce, b"x").unwrap();
        packet.set_packet_id(PacketId::new(17));
        let mut buf = Vec::new();
        packet.encode(&mut buf).unwrap();

        let mut ba = ByteArray::new(&buf);
        let decoded = PublishPacket::decode(&mut ba).unwrap();
        assert_eq!(decoded.packet_id(), PacketId::new(17));
        assert_eq!(decoded, packet);
    }

    #[test]
    fn test_qos1_zero_packet_id_rejected() {
        // 0x32 = PUBLISH qos 1; topic "a", packet id 0, no payload.
        let buf = [0x32, 0x05, 0x00, 0x01, b'a', 0x00, 0x00];
        let mut ba = ByteArray::new(&buf);
        assert_eq!(
            PublishPacket::decode(&mut ba),
            Err(DecodeError::InvalidPacketId)
        );
    }

    #[test]
    fn test_wildcard_topic_rejected() {
        let assert_invalid = PublishPacket::new("sport/#", QoS::AtMostOnce, b"");
        assert_eq!(assert_invalid.unwrap_err(), EncodeError::InvalidTopic);

        let buf = [0x30, 0x05, 0x00, 0x03, b'a', b'/', b'+'];
        let mut ba = ByteArray::new(&buf);
        assert_eq!(
            PublishPacket::decode(&mut ba),
            Err(DecodeError::InvalidTopicName)
        );
    }

    #[test]
    fn test_empty_payload() {
        let packet = PublishPacket::new("a", QoS::AtMostOnce, b"").unwrap();
        let mut buf = Vec::new();
        packet.encode(&mut buf).unwrap();
        assert_eq!(&buf, &[0x30, 0x03, 0x00, 0x01, b'a']);
    }
}
