// Copyright (c) 2021 The tlaloc developers. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Helpers to boot a broker on a loopback port and speak raw MQTT to it.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;

use codec::{
    ConnectAckPacket, ConnectFlags, ConnectPacket, ControlPacket, EncodePacket, StreamDecoder,
};
use tlaloc::config;
use tlaloc::dispatcher::Dispatcher;
use tlaloc::listener::Listener;
use tlaloc::session::SessionConfig;

pub const RECV_TIMEOUT: Duration = Duration::from_secs(5);

pub fn init_log() {
    let _ret = env_logger::builder().is_test(true).try_init();
}

/// Start one plain-TCP listener plus a dispatcher on an ephemeral port.
pub async fn start_broker() -> SocketAddr {
    start_broker_with_general(config::General::default()).await
}

pub async fn start_broker_with_general(general: config::General) -> SocketAddr {
    let listener_config = config::Listener {
        protocol: config::Protocol::Mqtt,
        address: "127.0.0.1:0".to_string(),
        cert_file: None,
        key_file: None,
        keep_alive: 60,
    };
    let security = config::Security::default();
    let session_config = SessionConfig::new(&general, &security, &listener_config);

    let (listener_to_dispatcher_sender, listener_to_dispatcher_receiver) = mpsc::channel(16);
    let (dispatcher_to_listener_sender, dispatcher_to_listener_receiver) = mpsc::channel(16);

    let mut listener = Listener::bind(
        0,
        &listener_config,
        session_config,
        listener_to_dispatcher_sender,
        dispatcher_to_listener_receiver,
    )
    .await
    .expect("Failed to bind test listener");
    let addr = listener.local_addr().expect("Invalid local addr");

    let mut dispatcher = Dispatcher::new(
        &general,
        vec![(0, dispatcher_to_listener_sender)],
        listener_to_dispatcher_receiver,
    );

    tokio::spawn(async move {
        listener.run_loop().await;
    });
    tokio::spawn(async move {
        dispatcher.run_loop().await;
    });

    addr
}

/// A raw MQTT client: a socket plus its half of the packet framing.
pub struct TestClient {
    pub stream: TcpStream,
    pub decoder: StreamDecoder,
    pending: Vec<ControlPacket>,
}

impl TestClient {
    pub async fn dial(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr)
            .await
            .expect("Failed to reach test broker");
        Self {
            stream,
            decoder: StreamDecoder::new(),
            pending: Vec::new(),
        }
    }

    /// Open a connection and complete the CONNECT handshake.
    pub async fn connect(addr: SocketAddr, client_id: &str, clean_session: bool) -> Self {
        let mut client = Self::dial(addr).await;
        let ack = client.send_connect(client_id, clean_session).await;
        assert_eq!(
            ack.return_code(),
            codec::ConnectReturnCode::Accepted,
            "broker refused connect of {client_id}"
        );
        client
    }

    pub async fn send_connect(
        &mut self,
        client_id: &str,
        clean_session: bool,
    ) -> ConnectAckPacket {
        let mut packet = ConnectPacket::new(client_id).expect("Invalid client id");
        packet.set_connect_flags(ConnectFlags {
            clean_session,
            ..ConnectFlags::default()
        });
        self.send(&packet).await;
        match self.read_packet().await {
            ControlPacket::ConnectAck(ack) => ack,
            packet => panic!("Expected CONNACK, got {packet:?}"),
        }
    }

    pub async fn send<P: EncodePacket>(&mut self, packet: &P) {
        let mut buf = Vec::new();
        packet.encode(&mut buf).expect("Failed to encode packet");
        self.send_raw(&buf).await;
    }

    pub async fn send_raw(&mut self, buf: &[u8]) {
        self.stream
            .write_all(buf)
            .await
            .expect("Failed to write to broker");
    }

    /// Read one packet, waiting up to `RECV_TIMEOUT`.
    pub async fn read_packet(&mut self) -> ControlPacket {
        if !self.pending.is_empty() {
            return self.pending.remove(0);
        }
        let mut buf = vec![0u8; 4096];
        loop {
            let n_recv = timeout(RECV_TIMEOUT, self.stream.read(&mut buf))
                .await
                .expect("Timed out waiting for broker packet")
                .expect("Failed to read from broker");
            assert_ne!(n_recv, 0, "Broker closed the connection");
            self.decoder
                .feed(&buf[..n_recv], &mut self.pending)
                .expect("Broker sent malformed bytes");
            if !self.pending.is_empty() {
                return self.pending.remove(0);
            }
        }
    }

    /// Expect the broker to close the connection without further bytes.
    pub async fn expect_close(&mut self) {
        let mut buf = vec![0u8; 256];
        loop {
            let n_recv = timeout(RECV_TIMEOUT, self.stream.read(&mut buf))
                .await
                .expect("Timed out waiting for broker close")
                .expect("Failed to read from broker");
            if n_recv == 0 {
                return;
            }
            // Tolerate a CONNACK-with-error in flight before the close.
            self.decoder
                .feed(&buf[..n_recv], &mut self.pending)
                .expect("Broker sent malformed bytes");
        }
    }
}
