// Copyright (c) 2021 The tlaloc developers. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use byteorder::{BigEndian, WriteBytesExt};
use std::convert::TryFrom;

use crate::utils::validate_client_id;
use crate::{
    BinaryData, ByteArray, ConnectFlags, DecodeError, DecodePacket, EncodeError, EncodePacket,
    FixedHeader, Packet, PacketType, ProtocolLevel, PubTopic, QoS, StringData, VarIntError,
    PROTOCOL_NAME,
};

/// `ConnectPacket` consists of the fixed header, a variable header with the
/// protocol name/level, connect flags and keep alive interval, and a payload
/// whose fields appear in this fixed order:
///
/// ```text
///  7                          0
/// +----------------------------+
/// | Fixed header               |
/// |                            |
/// +----------------------------+
/// | Protocol name length       |
/// |                            |
/// +----------------------------+
/// | "MQTT"                     |
/// +----------------------------+
/// | Protocol level             |
/// +----------------------------+
/// | Connect flags              |
/// +----------------------------+
/// | Keep alive                 |
/// |                            |
/// +----------------------------+
/// | Client id                  |
/// +----------------------------+
/// | [Will topic]               |
/// +----------------------------+
/// | [Will message]             |
/// +----------------------------+
/// | [Username]                 |
/// +----------------------------+
/// | [Password]                 |
/// +----------------------------+
/// ```
#[allow(clippy::module_name_repetitions)]
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ConnectPacket {
    protocol_name: StringData,

    protocol_level: ProtocolLevel,

    connect_flags: ConnectFlags,

    /// Time interval between two packets in seconds.
    ///
    /// Client must send PingRequest Packet before exceeding this interval.
    /// If this value is not zero and the interval expires after the last
    /// packet, the Server will disconnect the network. If this value is
    /// zero, the Server is not required to disconnect.
    keep_alive: u16,

    /// `client_id` identifies the session on the server side.
    ///
    /// MQTT 3.1.1 mandates 1 to 23 bytes; longer identifiers are accepted
    /// here as a server policy. A zero-byte client id is only acceptable
    /// together with `clean_session`, in which case the server assigns one.
    client_id: StringData,

    /// Topic of the Will Message, present iff the `will` connect flag is
    /// set.
    will_topic: Option<PubTopic>,

    /// Payload of the Will Message, 0 to 64k bytes of binary data.
    will_message: BinaryData,

    /// Present iff the `username` connect flag is set.
    username: StringData,

    /// Present iff the `password` connect flag is set.
    password: BinaryData,
}

impl ConnectPacket {
    /// Create a new connect packet with `client_id`.
    ///
    /// # Errors
    ///
    /// Returns error if `client_id` is invalid.
    pub fn new(client_id: &str) -> Result<Self, EncodeError> {
        let protocol_name =
            StringData::from(PROTOCOL_NAME).map_err(|_err| EncodeError::InvalidString)?;
        validate_client_id(client_id).map_err(|_err| EncodeError::InvalidClientId)?;
        let client_id = StringData::from(client_id)?;
        Ok(Self {
            protocol_name,
            keep_alive: 60,
            client_id,
            ..Self::default()
        })
    }

    pub fn set_connect_flags(&mut self, flags: ConnectFlags) -> &mut Self {
        self.connect_flags = flags;
        self
    }

    #[must_use]
    pub const fn connect_flags(&self) -> &ConnectFlags {
        &self.connect_flags
    }

    pub fn set_keep_alive(&mut self, keep_alive: u16) -> &mut Self {
        self.keep_alive = keep_alive;
        self
    }

    #[must_use]
    pub const fn keep_alive(&self) -> u16 {
        self.keep_alive
    }

    /// Update client id.
    ///
    /// # Errors
    ///
    /// Returns error if `client_id` is too long.
    pub fn set_client_id(&mut self, client_id: &str) -> Result<&mut Self, EncodeError> {
        self.client_id = StringData::from(client_id)?;
        Ok(self)
    }

    #[must_use]
    pub fn client_id(&self) -> &str {
        self.client_id.as_ref()
    }

    /// Update will-topic and will-message, setting the will flag.
    ///
    /// # Errors
    ///
    /// Returns error if `topic` is invalid or `message` is too long.
    pub fn set_will(&mut self, topic: &str, message: &[u8], qos: QoS, retain: bool) -> Result<&mut Self, EncodeError> {
        self.will_topic = Some(PubTopic::new(topic).map_err(|_err| EncodeError::InvalidTopic)?);
        self.will_message = BinaryData::from_slice(message)?;
        self.connect_flags.will = true;
        self.connect_flags.will_qos = qos;
        self.connect_flags.will_retain = retain;
        Ok(self)
    }

    #[must_use]
    pub fn will_topic(&self) -> Option<&str> {
        self.will_topic.as_ref().map(AsRef::as_ref)
    }

    #[must_use]
    pub fn will_message(&self) -> &[u8] {
        self.will_message.as_ref()
    }

    /// Update username value, setting the username flag.
    ///
    /// # Errors
    ///
    /// Returns error if `username` is too long or contains invalid chars.
    pub fn set_username(&mut self, username: &str) -> Result<&mut Self, EncodeError> {
        self.username = StringData::from(username)?;
        self.connect_flags.username = !username.is_empty();
        Ok(self)
    }

    #[must_use]
    pub fn username(&self) -> &str {
        self.username.as_ref()
    }

    /// Update password value, setting the password flag.
    ///
    /// # Errors
    ///
    /// Returns error if `password` is too long.
    pub fn set_password(&mut self, password: &[u8]) -> Result<&mut Self, EncodeError> {
        self.password = BinaryData::from_slice(password)?;
        self.connect_flags.password = !password.is_empty();
        Ok(self)
    }

    #[must_use]
    pub fn password(&self) -> &[u8] {
        self.password.as_ref()
    }

    fn remaining_length(&self) -> usize {
        let mut len = self.protocol_name.bytes()
            + 1 // protocol_level
            + 1 // connect_flags
            + 2 // keep_alive
            + self.client_id.bytes();

        if self.connect_flags.will {
            if let Some(will_topic) = &self.will_topic {
                len += will_topic.bytes();
            }
            len += self.will_message.bytes();
        }
        if self.connect_flags.username {
            len += self.username.bytes();
        }
        if self.connect_flags.password {
            len += self.password.bytes();
        }
        len
    }
}

impl DecodePacket for ConnectPacket {
    fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        let fixed_header = FixedHeader::decode(ba)?;
        if fixed_header.packet_type() != PacketType::Connect {
            return Err(DecodeError::InvalidPacketType);
        }

        let protocol_name = StringData::decode(ba)?;
        if protocol_name.as_ref() != PROTOCOL_NAME {
            return Err(DecodeError::InvalidProtocolName);
        }

        // Only 3.1.1 is spoken here. Remote levels 3 and 5 still parse into
        // the enum so that the session can answer with return code 0x01, but
        // they are rejected at this layer [MQTT-3.1.2-2].
        let protocol_level = ProtocolLevel::try_from(ba.read_byte()?)?;
        if protocol_level != ProtocolLevel::V311 {
            return Err(DecodeError::InvalidProtocolLevel);
        }

        let connect_flags = ConnectFlags::decode(ba)?;
        let keep_alive = ba.read_u16()?;
        let client_id = StringData::decode(ba)?;

        let (will_topic, will_message) = if connect_flags.will {
            let topic = PubTopic::decode(ba)?;
            let message = BinaryData::decode(ba)?;
            (Some(topic), message)
        } else {
            (None, BinaryData::new())
        };

        let username = if connect_flags.username {
            StringData::decode(ba)?
        } else {
            StringData::new()
        };

        let password = if connect_flags.password {
            BinaryData::decode(ba)?
        } else {
            BinaryData::new()
        };

        Ok(Self {
            protocol_name,
            protocol_level,
            connect_flags,
            keep_alive,
            client_id,
            will_topic,
            will_message,
            username,
            password,
        })
    }
}

impl EncodePacket for ConnectPacket {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        let old_len = buf.len();

        let fixed_header = FixedHeader::new(PacketType::Connect, self.remaining_length())?;
        fixed_header.encode(buf)?;

        // Variable header.
        self.protocol_name.encode(buf)?;
        self.protocol_level.encode(buf)?;
        self.connect_flags.encode(buf)?;
        buf.write_u16::<BigEndian>(self.keep_alive)?;

        // Payload.
        self.client_id.encode(buf)?;
        if self.connect_flags.will {
            if let Some(will_topic) = &self.will_topic {
                will_topic.encode(buf)?;
            }
            self.will_message.encode(buf)?;
        }
        if self.connect_flags.username {
            self.username.encode(buf)?;
        }
        if self.connect_flags.password {
            self.password.encode(buf)?;
        }

        Ok(buf.len() - old_len)
    }
}

impl Packet for ConnectPacket {
    fn packet_type(&self) -> PacketType {
        PacketType::Connect
    }

    fn bytes(&self) -> Result<usize, VarIntError> {
        let fixed_header = FixedHeader::new(PacketType::Connect, self.remaining_length())?;
        Ok(fixed_header.bytes() + fixed_header.remaining_length())
    }
}
