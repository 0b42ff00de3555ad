// Copyright (c) 2021 The tlaloc developers. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use std::convert::TryFrom;

use crate::{ByteArray, DecodeError, DecodePacket, EncodeError, EncodePacket, QoS};

/// Structure of `ConnectFlags` is:
///
/// ```text
///         7               6              5          4-3          2            1             0
/// +---------------+---------------+-------------+----------+-----------+---------------+----------+
/// | Username Flag | Password Flag | Will Retain | Will QoS | Will Flag | Clean Session | Reserved |
/// +---------------+---------------+-------------+----------+-----------+---------------+----------+
/// ```
///
/// The reserved bit MUST be zero; a violation is a malformed packet
/// [MQTT-3.1.2-3].
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct ConnectFlags {
    /// `username` field specifies whether `username` shall be presented in the Payload.
    pub username: bool,

    /// `password` field specifies whether `password` shall be presented in the Payload.
    /// If `username` field is false, then this field shall be false too.
    pub password: bool,

    /// `will_retain` field specifies if the Will Message is to be retained
    /// when it is published. Must be false if `will` is false.
    pub will_retain: bool,

    /// QoS level to be used in the Will Message.
    pub will_qos: QoS,

    /// If this field is set to true, a Will Message will be stored on the
    /// Server side when the Client connects, and published on its behalf
    /// when the connection closes abnormally:
    /// * I/O error or network error
    /// * keep alive timeout
    /// * connection closed without a Disconnect packet
    /// * protocol error
    pub will: bool,

    /// To control how to handle Session State.
    ///
    /// If `clean_session` is true, the Server must discard any previous
    /// Session State and start a new one, which lasts as long as the network
    /// connection. The Server side of Session State consists of the client
    /// subscriptions and undelivered/unacknowledged QoS 1 and QoS 2
    /// messages.
    pub clean_session: bool,
}

impl Default for ConnectFlags {
    fn default() -> Self {
        Self {
            username: false,
            password: false,
            will_retain: false,
            will_qos: QoS::AtMostOnce,
            will: false,
            clean_session: true,
        }
    }
}

impl DecodePacket for ConnectFlags {
    fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        let flags = ba.read_byte()?;
        if flags & 0b0000_0001 != 0 {
            return Err(DecodeError::InvalidConnectFlags);
        }

        let username = flags & 0b1000_0000 == 0b1000_0000;
        let password = flags & 0b0100_0000 == 0b0100_0000;
        let will_retain = flags & 0b0010_0000 == 0b0010_0000;
        let will_qos = QoS::try_from((flags & 0b0001_1000) >> 3)?;
        let will = flags & 0b0000_0100 == 0b0000_0100;
        let clean_session = flags & 0b0000_0010 == 0b0000_0010;

        // If the Will Flag is 0, Will QoS and Will Retain MUST be zero
        // [MQTT-3.1.2-11]. A password without a username is also malformed
        // [MQTT-3.1.2-22].
        if !will && (will_qos != QoS::AtMostOnce || will_retain) {
            return Err(DecodeError::InvalidConnectFlags);
        }
        if password && !username {
            return Err(DecodeError::InvalidConnectFlags);
        }

        Ok(Self {
            username,
            password,
            will_retain,
            will_qos,
            will,
            clean_session,
        })
    }
}

impl EncodePacket for ConnectFlags {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        let mut flags = 0b0000_0000;
        if self.username {
            flags |= 0b1000_0000;
        }
        if self.password {
            flags |= 0b0100_0000;
        }
        if self.will_retain {
            flags |= 0b0010_0000;
        }
        flags |= (self.will_qos as u8) << 3;
        if self.will {
            flags |= 0b0000_0100;
        }
        if self.clean_session {
            flags |= 0b0000_0010;
        }
        buf.push(flags);
        Ok(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_flags_round_trip() {
        let flags = ConnectFlags {
            username: true,
            password: true,
            will_retain: false,
            will_qos: QoS::AtLeastOnce,
            will: true,
            clean_session: true,
        };
        let mut buf = Vec::new();
        assert_eq!(flags.encode(&mut buf), Ok(1));
        assert_eq!(&buf, &[0b1100_1110]);

        let mut ba = ByteArray::new(&buf);
        assert_eq!(ConnectFlags::decode(&mut ba), Ok(flags));
    }

    #[test]
    fn test_connect_flags_reserved_bit() {
        let buf = [0b0000_0011];
        let mut ba = ByteArray::new(&buf);
        assert_eq!(
            ConnectFlags::decode(&mut ba),
            Err(DecodeError::InvalidConnectFlags)
        );
    }

    #[test]
    fn test_connect_flags_will_consistency() {
        // will_qos set while will flag is clear.
        let buf = [0b0000_1010];
        let mut ba = ByteArray::new(&buf);
        assert_eq!(
            ConnectFlags::decode(&mut ba),
            Err(DecodeError::InvalidConnectFlags)
        );

        // will_qos = 3 is never valid.
        let buf = [0b0001_1110];
        let mut ba = ByteArray::new(&buf);
        assert_eq!(ConnectFlags::decode(&mut ba), Err(DecodeError::InvalidQoS));
    }
}
