// Copyright (c) 2021 The tlaloc developers. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! The dispatcher owns everything that spans connections: the client-id to
//! session mapping and the subscription tree. Listeners talk to it over
//! mpsc commands; it never touches sockets itself.

use codec::{
    ConnectAckPacket, ConnectReturnCode, PacketId, PublishPacket, SubscribeAck,
    SubscribeAckPacket, SubscribePacket, SubscribePattern, UnsubscribeAckPacket,
    UnsubscribePacket,
};
use std::collections::HashMap;
use tokio::sync::mpsc::{Receiver, Sender};

use crate::commands::{DispatcherToListenerCmd, ListenerToDispatcherCmd};
use crate::config;
use crate::types::{ListenerId, SessionGid};

mod sessions;
mod trie;

pub use sessions::{Acquired, ReleasedSession, Route, SessionManager};
pub use trie::{SubscriptionTreeManager, TrieNode};

/// Dispatcher is the message router of the broker.
#[derive(Debug)]
pub struct Dispatcher {
    sessions: SessionManager,
    sub_tree: SubscriptionTreeManager,

    listener_senders: HashMap<ListenerId, Sender<DispatcherToListenerCmd>>,
    listener_receiver: Receiver<ListenerToDispatcherCmd>,
}

impl Dispatcher {
    #[must_use]
    pub fn new(
        general: &config::General,
        listener_senders: Vec<(ListenerId, Sender<DispatcherToListenerCmd>)>,
        listener_receiver: Receiver<ListenerToDispatcherCmd>,
    ) -> Self {
        Self {
            sessions: SessionManager::new(general.max_queued_messages),
            sub_tree: SubscriptionTreeManager::new(),
            listener_senders: listener_senders.into_iter().collect(),
            listener_receiver,
        }
    }

    pub async fn run_loop(&mut self) {
        while let Some(cmd) = self.listener_receiver.recv().await {
            self.handle_listener_cmd(cmd).await;
        }
        log::info!("dispatcher: all listeners gone, exiting");
    }

    async fn handle_listener_cmd(&mut self, cmd: ListenerToDispatcherCmd) {
        match cmd {
            ListenerToDispatcherCmd::Connect {
                gid,
                client_id,
                clean_session,
            } => self.on_session_connect(gid, client_id, clean_session).await,
            ListenerToDispatcherCmd::Subscribe(gid, packet) => {
                self.on_session_subscribe(gid, &packet).await;
            }
            ListenerToDispatcherCmd::Unsubscribe(gid, packet) => {
                self.on_session_unsubscribe(gid, &packet).await;
            }
            ListenerToDispatcherCmd::Publish(packet) => self.publish(&packet).await,
            ListenerToDispatcherCmd::SessionClosed { gid, will } => {
                self.on_session_closed(gid, will).await;
            }
        }
    }

    async fn on_session_connect(&mut self, gid: SessionGid, client_id: String, clean_session: bool) {
        match self.sessions.acquire(&client_id, gid, clean_session) {
            Ok(acquired) => {
                // A clean restart forfeits the old subscription state.
                for pattern in &acquired.stale_subscriptions {
                    self.sub_tree.unsubscribe(&client_id, pattern.topic());
                }

                let ack_packet =
                    ConnectAckPacket::new(acquired.session_present, ConnectReturnCode::Accepted);
                self.send_to_listener(gid, DispatcherToListenerCmd::ConnectAck(
                    gid.session_id(),
                    ack_packet,
                ))
                .await;

                // Messages held while the session was detached follow the
                // CONNACK.
                for packet in acquired.queued_messages {
                    self.send_to_listener(
                        gid,
                        DispatcherToListenerCmd::Publish(gid.session_id(), packet),
                    )
                    .await;
                }
            }
            Err(err) => {
                log::warn!("dispatcher: rejecting connect of {client_id}: {err}");
                let ack_packet =
                    ConnectAckPacket::new(false, ConnectReturnCode::IdentifierRejected);
                self.send_to_listener(gid, DispatcherToListenerCmd::ConnectAck(
                    gid.session_id(),
                    ack_packet,
                ))
                .await;
            }
        }
    }

    async fn on_session_subscribe(&mut self, gid: SessionGid, packet: &SubscribePacket) {
        let Some(client_id) = self.sessions.client_of(gid) else {
            log::error!("dispatcher: subscribe from unknown session {gid:?}");
            let acks = vec![SubscribeAck::Failed; packet.topics().len()];
            let ack_packet = SubscribeAckPacket::with_vec(packet.packet_id(), acks);
            self.send_to_listener(
                gid,
                DispatcherToListenerCmd::SubscribeAck(gid.session_id(), ack_packet),
            )
            .await;
            return;
        };

        // Handle each filter on its own; a bad one gets a failure code while
        // the rest of the packet still takes effect [MQTT-3.8.4-5].
        let mut acks = Vec::with_capacity(packet.topics().len());
        let mut patterns = Vec::new();
        for topic in packet.topics() {
            match SubscribePattern::parse(topic.topic(), topic.qos()) {
                Ok(pattern) => {
                    acks.push(SubscribeAck::QoS(topic.qos()));
                    patterns.push(pattern);
                }
                Err(err) => {
                    log::error!(
                        "dispatcher: invalid subscribe topic {:?}, err: {err:?}",
                        topic.topic()
                    );
                    acks.push(SubscribeAck::Failed);
                }
            }
        }

        // Only genuinely new or re-granted filters touch the tree.
        for pattern in self.sessions.add_subscriptions(&client_id, patterns) {
            self.sub_tree.subscribe(&client_id, &pattern);
        }

        let ack_packet = SubscribeAckPacket::with_vec(packet.packet_id(), acks);
        self.send_to_listener(
            gid,
            DispatcherToListenerCmd::SubscribeAck(gid.session_id(), ack_packet),
        )
        .await;
    }

    async fn on_session_unsubscribe(&mut self, gid: SessionGid, packet: &UnsubscribePacket) {
        if let Some(client_id) = self.sessions.client_of(gid) {
            for pattern in self.sessions.remove_subscriptions(&client_id, packet.topics()) {
                self.sub_tree.unsubscribe(&client_id, pattern.topic());
            }
        } else {
            log::error!("dispatcher: unsubscribe from unknown session {gid:?}");
        }

        let ack_packet = UnsubscribeAckPacket::new(packet.packet_id());
        self.send_to_listener(
            gid,
            DispatcherToListenerCmd::UnsubscribeAck(gid.session_id(), ack_packet),
        )
        .await;
    }

    async fn on_session_closed(&mut self, gid: SessionGid, will: Option<PublishPacket>) {
        if let Some(will) = will {
            self.publish(&will).await;
        }
        if let Some(released) = self.sessions.release(gid) {
            // Clean session: its tree entries go away with it.
            for pattern in &released.subscriptions {
                self.sub_tree
                    .unsubscribe(&released.client_id, pattern.topic());
            }
        }
    }

    /// Fan a publish out to every matching session.
    ///
    /// Readers walk a lock-free snapshot of the tree; each match is
    /// delivered at `min(subscription QoS, publish QoS)` [MQTT-3.8.4-6].
    async fn publish(&mut self, packet: &PublishPacket) {
        let snapshot = self.sub_tree.snapshot();
        for (client_id, max_qos) in snapshot.matches(packet.topic()) {
            let mut out = packet.clone();
            out.set_qos(max_qos.min(packet.qos()));
            out.set_dup(false);
            // Forwarded publishes never carry the retain request
            // [MQTT-3.3.1-9].
            out.set_retain(false);
            out.set_packet_id(PacketId::new(0));

            match self.sessions.route(&client_id) {
                Route::Attached(gid) => {
                    self.send_to_listener(
                        gid,
                        DispatcherToListenerCmd::Publish(gid.session_id(), out),
                    )
                    .await;
                }
                Route::Queueable => {
                    // QoS 0 messages need not survive a detached period.
                    if out.qos() != codec::QoS::AtMostOnce {
                        self.sessions.queue_publish(&client_id, out);
                    }
                }
                Route::Gone => {
                    log::info!("dispatcher: dropping publish for stale entry {client_id}");
                }
            }
        }
    }

    async fn send_to_listener(&mut self, gid: SessionGid, cmd: DispatcherToListenerCmd) {
        if let Some(sender) = self.listener_senders.get(&gid.listener_id()) {
            if let Err(err) = sender.send(cmd).await {
                log::error!(
                    "dispatcher: failed to reach listener {}: {err}",
                    gid.listener_id()
                );
            }
        } else {
            log::error!(
                "dispatcher: no sender for listener {}",
                gid.listener_id()
            );
        }
    }
}
