// Copyright (c) 2021 The tlaloc developers. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

use codec::{
    ConnectAckPacket, ConnectPacket, PublishPacket, SubscribeAckPacket, SubscribePacket,
    UnsubscribeAckPacket, UnsubscribePacket,
};

use crate::types::{SessionGid, SessionId};

#[derive(Debug, Clone)]
pub enum SessionToListenerCmd {
    Connect(SessionId, ConnectPacket),

    Publish(SessionId, PublishPacket),

    Subscribe(SessionId, SubscribePacket),

    Unsubscribe(SessionId, UnsubscribePacket),

    /// Connection ended. The will message is set on abnormal closes and
    /// absent after an orderly DISCONNECT.
    Disconnect(SessionId, Option<PublishPacket>),
}

#[derive(Debug, Clone)]
pub enum ListenerToSessionCmd {
    /// Accepted or not.
    ConnectAck(ConnectAckPacket),

    Publish(PublishPacket),

    SubscribeAck(SubscribeAckPacket),

    UnsubscribeAck(UnsubscribeAckPacket),

    /// Disconnect client connection.
    Disconnect,
}

#[derive(Debug, Clone)]
pub enum ListenerToDispatcherCmd {
    /// A session finished its CONNECT handshake and wants to bind
    /// `client_id`.
    Connect {
        gid: SessionGid,
        client_id: String,
        clean_session: bool,
    },

    Subscribe(SessionGid, SubscribePacket),

    Unsubscribe(SessionGid, UnsubscribePacket),

    Publish(PublishPacket),

    /// Connection went away; `will` is to be published on abnormal closes.
    SessionClosed {
        gid: SessionGid,
        will: Option<PublishPacket>,
    },
}

#[derive(Debug, Clone)]
pub enum DispatcherToListenerCmd {
    ConnectAck(SessionId, ConnectAckPacket),

    Publish(SessionId, PublishPacket),

    SubscribeAck(SessionId, SubscribeAckPacket),

    UnsubscribeAck(SessionId, UnsubscribeAckPacket),

    Disconnect(SessionId),
}
