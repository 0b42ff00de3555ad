// Copyright (c) 2021 The tlaloc developers. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

use codec::{
    ConnectAckPacket, ConnectPacket, ConnectReturnCode, ControlPacket, DecodeError, EncodePacket,
    PacketId, PingResponsePacket, PublishAckPacket, PublishCompletePacket, PublishPacket,
    PublishReceivedPacket, PublishReleasePacket, QoS, StreamDecoder,
};
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{Receiver, Sender};
use tokio::time::interval;

use crate::commands::{ListenerToSessionCmd, SessionToListenerCmd};
use crate::config;
use crate::error::Error;
use crate::stream::Stream;
use crate::types::SessionId;
use crate::utils;

/// Keep alive allows a grace period of half the negotiated interval: the
/// server waits one and a half times the keep alive before it closes the
/// connection [MQTT-3.1.2-24].
#[must_use]
pub const fn keep_alive_timeout(keep_alive: u64) -> u64 {
    keep_alive + keep_alive / 2
}

/// Connection lifecycle.
///
/// The transport handshake has already happened when a session actor is
/// spawned, so a fresh connection starts out waiting for its CONNECT
/// packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    /// No CONNECT packet seen yet; everything else is a protocol violation.
    AwaitingConnect,

    /// CONNECT forwarded, CONNACK not yet decided.
    Connecting,

    Connected,

    Disconnecting,

    Disconnected,
}

/// Per-listener snapshot of the config values a session needs.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Fallback keep alive for clients that send 0.
    pub keep_alive: u64,

    /// Cap on the client-chosen keep alive; 0 = no cap.
    pub max_keepalive: u64,

    /// Outbound QoS 1/2 window per connection.
    pub max_inflight_messages: usize,

    /// Packet size limit; 0 = protocol limit only.
    pub message_size_limit: usize,

    /// Highest QoS accepted in inbound publishes.
    pub max_qos: QoS,

    /// Whether a CONNECT without username is acceptable.
    pub allow_anonymous: bool,
}

impl SessionConfig {
    #[must_use]
    pub fn new(
        general: &config::General,
        security: &config::Security,
        listener: &config::Listener,
    ) -> Self {
        Self {
            keep_alive: listener.keep_alive,
            max_keepalive: general.max_keepalive,
            max_inflight_messages: general.max_inflight_messages,
            message_size_limit: general.message_size_limit,
            max_qos: general.max_qos,
            allow_anonymous: security.allow_anonymous,
        }
    }
}

/// Delivery state of one outbound QoS 1/2 publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InflightState {
    /// QoS 1, waiting for PUBACK.
    AwaitAck,

    /// QoS 2, waiting for PUBREC.
    AwaitReceived,

    /// QoS 2, PUBREL sent, waiting for PUBCOMP.
    AwaitComplete,
}

/// Session represents one client connection.
///
/// It owns the socket, drives the streaming decoder, answers the protocol
/// handshakes and forwards everything session-spanning to its listener.
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    config: SessionConfig,
    stream: Stream,
    decoder: StreamDecoder,
    status: Status,

    client_id: String,
    clean_session: bool,

    /// Effective keep alive in seconds; 0 disables the timeout.
    keep_alive: u64,
    last_packet: Instant,

    will: Option<PublishPacket>,

    next_packet_id: u16,
    inflight: HashMap<u16, InflightState>,

    /// Inbound QoS 2 packet ids seen but not yet released.
    pending_release: HashSet<u16>,

    sender: Sender<SessionToListenerCmd>,
    receiver: Receiver<ListenerToSessionCmd>,
}

impl Session {
    pub fn new(
        id: SessionId,
        config: SessionConfig,
        stream: Stream,
        sender: Sender<SessionToListenerCmd>,
        receiver: Receiver<ListenerToSessionCmd>,
    ) -> Self {
        let decoder = if config.message_size_limit > 0 {
            StreamDecoder::with_max_packet_size(config.message_size_limit)
        } else {
            StreamDecoder::new()
        };
        Self {
            id,
            config,
            stream,
            decoder,
            status: Status::AwaitingConnect,
            client_id: String::new(),
            clean_session: true,
            keep_alive: 0,
            last_packet: Instant::now(),
            will: None,
            next_packet_id: 1,
            inflight: HashMap::new(),
            pending_release: HashSet::new(),
            sender,
            receiver,
        }
    }

    pub async fn run_loop(mut self) {
        let mut buf = Vec::with_capacity(1024);
        let mut timer = interval(Duration::from_secs(1));

        while self.status != Status::Disconnected && self.status != Status::Disconnecting {
            tokio::select! {
                ret = self.stream.read_buf(&mut buf) => {
                    match ret {
                        Ok(0) => {
                            log::info!("session {}: client closed connection", self.id);
                            self.status = Status::Disconnected;
                        }
                        Ok(_n_recv) => {
                            if let Err(err) = self.handle_stream_bytes(&buf).await {
                                log::error!("session {}: {err}", self.id);
                                self.status = Status::Disconnected;
                            }
                            buf.clear();
                        }
                        Err(err) => {
                            log::info!("session {}: socket error: {err}", self.id);
                            self.status = Status::Disconnected;
                        }
                    }
                }
                Some(cmd) = self.receiver.recv() => {
                    if let Err(err) = self.handle_listener_cmd(cmd).await {
                        log::error!("session {}: listener cmd failed: {err}", self.id);
                        self.status = Status::Disconnected;
                    }
                }
                _ = timer.tick() => {
                    if self.keep_alive_expired() {
                        log::warn!(
                            "session {}: keep alive expired, disconnecting {}",
                            self.id, self.client_id
                        );
                        self.status = Status::Disconnecting;
                    }
                }
            }
        }

        // The will survives only an abnormal end; DISCONNECT and rejected
        // connects have cleared it already.
        let will = self.will.take();
        if let Err(err) = self
            .sender
            .send(SessionToListenerCmd::Disconnect(self.id, will))
            .await
        {
            log::error!(
                "session {}: failed to send disconnect cmd, err: {err:?}",
                self.id
            );
        }
    }

    fn keep_alive_expired(&self) -> bool {
        self.status == Status::Connected
            && self.keep_alive > 0
            && self.last_packet.elapsed().as_secs() >= keep_alive_timeout(self.keep_alive)
    }

    async fn send<P: EncodePacket>(&mut self, packet: &P) -> Result<(), Error> {
        let mut buf = Vec::new();
        packet.encode(&mut buf)?;
        self.stream.write(&buf).await.map(drop)
    }

    async fn handle_stream_bytes(&mut self, buf: &[u8]) -> Result<(), Error> {
        // Any packet resets the keep alive clock.
        self.last_packet = Instant::now();

        let mut packets = Vec::new();
        if let Err(err) = self.decoder.feed(buf, &mut packets) {
            // Process whatever framed completely before the stream died.
            for packet in packets {
                self.handle_client_packet(packet).await?;
            }
            return self.on_decode_error(err).await;
        }
        for packet in packets {
            self.handle_client_packet(packet).await?;
        }
        Ok(())
    }

    /// Framing errors close the connection without a reply; 3.1.1 has no
    /// generic error frame. The CONNECT-stage protocol errors that define a
    /// return code answer with it first [MQTT-3.1.4-1].
    async fn on_decode_error(&mut self, err: DecodeError) -> Result<(), Error> {
        if self.status == Status::AwaitingConnect
            && matches!(
                err,
                DecodeError::InvalidProtocolName | DecodeError::InvalidProtocolLevel
            )
        {
            let ack_packet = ConnectAckPacket::new(false, ConnectReturnCode::UnacceptedProtocol);
            self.send(&ack_packet).await?;
        }
        Err(err.into())
    }

    async fn handle_client_packet(&mut self, packet: ControlPacket) -> Result<(), Error> {
        // The first packet sent from the Client to the Server MUST be a
        // CONNECT packet [MQTT-3.1.0-1].
        if self.status == Status::AwaitingConnect
            && !matches!(packet, ControlPacket::Connect(_))
        {
            return Err(Error::new(
                crate::error::ErrorKind::DecodeError,
                "first packet is not CONNECT",
            ));
        }

        match packet {
            ControlPacket::Connect(packet) => self.on_client_connect(packet).await,
            ControlPacket::Publish(packet) => self.on_client_publish(packet).await,
            ControlPacket::PublishAck(packet) => {
                self.on_client_publish_ack(packet.packet_id());
                Ok(())
            }
            ControlPacket::PublishReceived(packet) => {
                self.on_client_publish_received(packet.packet_id()).await
            }
            ControlPacket::PublishRelease(packet) => {
                self.on_client_publish_release(packet.packet_id()).await
            }
            ControlPacket::PublishComplete(packet) => {
                self.on_client_publish_complete(packet.packet_id());
                Ok(())
            }
            ControlPacket::Subscribe(packet) => {
                self.sender
                    .send(SessionToListenerCmd::Subscribe(self.id, packet))
                    .await
                    .map_err(Into::into)
            }
            ControlPacket::Unsubscribe(packet) => {
                self.sender
                    .send(SessionToListenerCmd::Unsubscribe(self.id, packet))
                    .await
                    .map_err(Into::into)
            }
            ControlPacket::PingRequest(_packet) => {
                let ping_resp_packet = PingResponsePacket::new();
                self.send(&ping_resp_packet).await
            }
            ControlPacket::Disconnect(_packet) => {
                // Must not publish the will on an orderly shutdown
                // [MQTT-3.14.4-3].
                self.will = None;
                self.status = Status::Disconnected;
                Ok(())
            }
            packet => Err(Error::from_string(
                crate::error::ErrorKind::DecodeError,
                format!("unexpected client packet: {:?}", codec::Packet::packet_type(&packet)),
            )),
        }
    }

    async fn on_client_connect(&mut self, packet: ConnectPacket) -> Result<(), Error> {
        // A second CONNECT is a protocol violation [MQTT-3.1.0-2].
        if self.status != Status::AwaitingConnect {
            return Err(Error::new(
                crate::error::ErrorKind::DecodeError,
                "duplicated CONNECT packet",
            ));
        }

        let flags = *packet.connect_flags();
        self.clean_session = flags.clean_session;

        self.client_id = packet.client_id().to_string();
        if self.client_id.is_empty() {
            // A zero-byte client id requires a clean session; the broker
            // assigns the identifier [MQTT-3.1.3-7].
            if !flags.clean_session {
                return self
                    .reject_connect(ConnectReturnCode::IdentifierRejected)
                    .await;
            }
            self.client_id = utils::assigned_client_id();
            log::info!(
                "session {}: assigned client id {}",
                self.id,
                self.client_id
            );
        }

        if !self.config.allow_anonymous && !flags.username {
            return self.reject_connect(ConnectReturnCode::Unauthorized).await;
        }

        let mut keep_alive = u64::from(packet.keep_alive());
        if keep_alive == 0 {
            keep_alive = self.config.keep_alive;
        }
        if self.config.max_keepalive > 0 {
            keep_alive = keep_alive.min(self.config.max_keepalive);
        }
        self.keep_alive = keep_alive;

        if flags.will {
            if let Some(will_topic) = packet.will_topic() {
                let mut will =
                    PublishPacket::new(will_topic, flags.will_qos, packet.will_message())?;
                will.set_retain(flags.will_retain);
                self.will = Some(will);
            }
        }

        // Session ownership is decided by the dispatcher; the CONNACK
        // arrives as a listener command.
        let mut packet = packet;
        packet.set_client_id(&self.client_id)?;
        self.status = Status::Connecting;
        self.sender
            .send(SessionToListenerCmd::Connect(self.id, packet))
            .await
            .map_err(Into::into)
    }

    async fn reject_connect(&mut self, return_code: ConnectReturnCode) -> Result<(), Error> {
        let ack_packet = ConnectAckPacket::new(false, return_code);
        self.send(&ack_packet).await?;
        self.will = None;
        self.status = Status::Disconnected;
        Ok(())
    }

    async fn on_client_publish(&mut self, packet: PublishPacket) -> Result<(), Error> {
        if packet.qos() > self.config.max_qos {
            return Err(Error::from_string(
                crate::error::ErrorKind::DecodeError,
                format!(
                    "publish qos {:?} above configured maximum {:?}",
                    packet.qos(),
                    self.config.max_qos
                ),
            ));
        }

        match packet.qos() {
            QoS::AtMostOnce => {
                self.sender
                    .send(SessionToListenerCmd::Publish(self.id, packet))
                    .await?;
            }
            QoS::AtLeastOnce => {
                let packet_id = packet.packet_id();
                self.sender
                    .send(SessionToListenerCmd::Publish(self.id, packet))
                    .await?;
                let ack_packet = PublishAckPacket::new(packet_id);
                self.send(&ack_packet).await?;
            }
            QoS::ExactOnce => {
                let packet_id = packet.packet_id();
                // Route on first sight only; a re-delivered packet id is
                // acknowledged again without a second fan-out.
                if self.pending_release.insert(packet_id.value()) {
                    self.sender
                        .send(SessionToListenerCmd::Publish(self.id, packet))
                        .await?;
                }
                let received_packet = PublishReceivedPacket::new(packet_id);
                self.send(&received_packet).await?;
            }
        }
        Ok(())
    }

    async fn on_client_publish_release(&mut self, packet_id: PacketId) -> Result<(), Error> {
        self.pending_release.remove(&packet_id.value());
        let complete_packet = PublishCompletePacket::new(packet_id);
        self.send(&complete_packet).await
    }

    fn on_client_publish_ack(&mut self, packet_id: PacketId) {
        match self.inflight.remove(&packet_id.value()) {
            Some(InflightState::AwaitAck) => (),
            Some(state) => {
                log::warn!(
                    "session {}: PUBACK for packet {} in state {state:?}",
                    self.id,
                    packet_id
                );
            }
            None => {
                log::warn!(
                    "session {}: PUBACK for unknown packet {}",
                    self.id,
                    packet_id
                );
            }
        }
    }

    async fn on_client_publish_received(&mut self, packet_id: PacketId) -> Result<(), Error> {
        match self.inflight.get_mut(&packet_id.value()) {
            Some(state) if *state == InflightState::AwaitReceived => {
                *state = InflightState::AwaitComplete;
            }
            _ => {
                log::warn!(
                    "session {}: PUBREC for unknown packet {}",
                    self.id,
                    packet_id
                );
            }
        }
        let release_packet = PublishReleasePacket::new(packet_id);
        self.send(&release_packet).await
    }

    fn on_client_publish_complete(&mut self, packet_id: PacketId) {
        if self.inflight.remove(&packet_id.value()) != Some(InflightState::AwaitComplete) {
            log::warn!(
                "session {}: PUBCOMP for unknown packet {}",
                self.id,
                packet_id
            );
        }
    }

    async fn handle_listener_cmd(&mut self, cmd: ListenerToSessionCmd) -> Result<(), Error> {
        match cmd {
            ListenerToSessionCmd::ConnectAck(packet) => {
                self.status = if packet.return_code() == ConnectReturnCode::Accepted {
                    Status::Connected
                } else {
                    self.will = None;
                    Status::Disconnected
                };
                self.send(&packet).await
            }
            ListenerToSessionCmd::Publish(packet) => self.on_listener_publish(packet).await,
            ListenerToSessionCmd::SubscribeAck(packet) => self.send(&packet).await,
            ListenerToSessionCmd::UnsubscribeAck(packet) => self.send(&packet).await,
            ListenerToSessionCmd::Disconnect => {
                self.status = Status::Disconnected;
                Ok(())
            }
        }
    }

    /// Deliver one publish to this client at the QoS the dispatcher already
    /// granted.
    async fn on_listener_publish(&mut self, mut packet: PublishPacket) -> Result<(), Error> {
        if self.status != Status::Connected {
            log::info!(
                "session {}: dropping publish, connection is {:?}",
                self.id,
                self.status
            );
            return Ok(());
        }

        if packet.qos() == QoS::AtMostOnce {
            return self.send(&packet).await;
        }

        if self.inflight.len() >= self.config.max_inflight_messages {
            log::warn!(
                "session {}: inflight window full, dropping publish to {}",
                self.id,
                self.client_id
            );
            return Ok(());
        }

        let packet_id = self.alloc_packet_id();
        packet.set_packet_id(packet_id);
        let state = if packet.qos() == QoS::AtLeastOnce {
            InflightState::AwaitAck
        } else {
            InflightState::AwaitReceived
        };
        self.inflight.insert(packet_id.value(), state);
        self.send(&packet).await
    }

    /// Pick the next free non-zero packet identifier [MQTT-2.3.1-2].
    fn alloc_packet_id(&mut self) -> PacketId {
        loop {
            let id = self.next_packet_id;
            self.next_packet_id = self.next_packet_id.wrapping_add(1);
            if id != 0 && !self.inflight.contains_key(&id) {
                return PacketId::new(id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keep_alive_timeout() {
        // A client with keep_alive=10 is dropped at the 15 second mark.
        assert_eq!(keep_alive_timeout(10), 15);
        assert_eq!(keep_alive_timeout(60), 90);
        assert_eq!(keep_alive_timeout(1), 1);
        assert_eq!(keep_alive_timeout(0), 0);
    }
}
