// Copyright (c) 2021 The tlaloc developers. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Connection establishment against a live broker.

use tokio::io::AsyncReadExt;
use tokio::time::timeout;

use codec::{ControlPacket, EncodePacket, PingRequestPacket};

mod common;
use common::{start_broker, TestClient, RECV_TIMEOUT};

#[tokio::test]
async fn test_minimal_connect() {
    common::init_log();
    let addr = start_broker().await;
    let mut client = TestClient::dial(addr).await;

    // CONNECT, clean_session=1, keep_alive=60, zero-length client id.
    client
        .send_raw(&[
            0x10, 0x0c, 0x00, 0x04, 0x4d, 0x51, 0x54, 0x54, 0x04, 0x02, 0x00, 0x3c, 0x00, 0x00,
        ])
        .await;

    // CONNACK, session_present=0, accepted.
    let mut buf = [0u8; 4];
    timeout(RECV_TIMEOUT, client.stream.read_exact(&mut buf))
        .await
        .expect("Timed out waiting for CONNACK")
        .expect("Failed to read CONNACK");
    assert_eq!(&buf, &[0x20, 0x02, 0x00, 0x00]);
}

#[tokio::test]
async fn test_ping() {
    common::init_log();
    let addr = start_broker().await;
    let mut client = TestClient::connect(addr, "ping-test", true).await;

    client.send(&PingRequestPacket::new()).await;
    let packet = client.read_packet().await;
    assert!(matches!(packet, ControlPacket::PingResponse(_)));
}

#[tokio::test]
async fn test_malformed_remaining_length_closes() {
    common::init_log();
    let addr = start_broker().await;
    let mut client = TestClient::dial(addr).await;

    // Remaining length runs past four continuation bytes; the broker must
    // drop the connection without a CONNACK.
    client.send_raw(&[0x10, 0xff, 0xff, 0xff, 0xff, 0xff]).await;

    let mut buf = [0u8; 16];
    let n_recv = timeout(RECV_TIMEOUT, client.stream.read(&mut buf))
        .await
        .expect("Timed out waiting for broker close")
        .expect("Failed to read from broker");
    assert_eq!(n_recv, 0, "expected close without CONNACK");
}

#[tokio::test]
async fn test_first_packet_must_be_connect() {
    common::init_log();
    let addr = start_broker().await;
    let mut client = TestClient::dial(addr).await;

    let mut buf = Vec::new();
    PingRequestPacket::new().encode(&mut buf).unwrap();
    client.send_raw(&buf).await;
    client.expect_close().await;
}

#[tokio::test]
async fn test_unaccepted_protocol_level() {
    common::init_log();
    let addr = start_broker().await;
    let mut client = TestClient::dial(addr).await;

    // Protocol level 3 instead of 4.
    client
        .send_raw(&[
            0x10, 0x0c, 0x00, 0x04, 0x4d, 0x51, 0x54, 0x54, 0x03, 0x02, 0x00, 0x3c, 0x00, 0x00,
        ])
        .await;

    let mut buf = [0u8; 4];
    timeout(RECV_TIMEOUT, client.stream.read_exact(&mut buf))
        .await
        .expect("Timed out waiting for CONNACK")
        .expect("Failed to read CONNACK");
    // CONNACK with return code 1, then close.
    assert_eq!(&buf, &[0x20, 0x02, 0x00, 0x01]);
    client.expect_close().await;
}

#[tokio::test]
async fn test_zero_length_client_id_requires_clean_session() {
    common::init_log();
    let addr = start_broker().await;
    let mut client = TestClient::dial(addr).await;

    // clean_session=0 with an empty client id: identifier rejected.
    client
        .send_raw(&[
            0x10, 0x0c, 0x00, 0x04, 0x4d, 0x51, 0x54, 0x54, 0x04, 0x00, 0x00, 0x3c, 0x00, 0x00,
        ])
        .await;

    let mut buf = [0u8; 4];
    timeout(RECV_TIMEOUT, client.stream.read_exact(&mut buf))
        .await
        .expect("Timed out waiting for CONNACK")
        .expect("Failed to read CONNACK");
    assert_eq!(&buf, &[0x20, 0x02, 0x00, 0x02]);
    client.expect_close().await;
}
