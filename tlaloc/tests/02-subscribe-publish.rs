// Copyright (c) 2021 The tlaloc developers. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Subscription handling and publish routing.

use codec::{
    ControlPacket, PacketId, PublishPacket, QoS, SubscribeAck, SubscribePacket, UnsubscribePacket,
};

mod common;
use common::{start_broker, TestClient};

#[tokio::test]
async fn test_subscribe_ack_bytes() {
    common::init_log();
    let addr = start_broker().await;
    let mut client = TestClient::connect(addr, "subtest", true).await;

    let packet = SubscribePacket::new("sport/#", QoS::AtMostOnce, PacketId::new(10)).unwrap();
    client.send(&packet).await;

    match client.read_packet().await {
        ControlPacket::SubscribeAck(ack) => {
            assert_eq!(ack.packet_id(), PacketId::new(10));
            assert_eq!(ack.acknowledgements(), &[SubscribeAck::QoS(QoS::AtMostOnce)]);
        }
        packet => panic!("Expected SUBACK, got {packet:?}"),
    }
}

#[tokio::test]
async fn test_invalid_filter_gets_failure_code() {
    common::init_log();
    let addr = start_broker().await;
    let mut client = TestClient::connect(addr, "subfail", true).await;

    // "sport/#/x" is invalid, "sport/+" is fine; the packet must succeed
    // partially.
    let topics = vec![
        codec::SubscribeTopic::new("sport/+", QoS::AtMostOnce).unwrap(),
    ];
    let packet = SubscribePacket::with_topics(PacketId::new(2), topics);
    // Build the invalid entry on the wire by hand: the codec refuses to
    // construct it.
    let mut buf = Vec::new();
    use codec::EncodePacket;
    packet.encode(&mut buf).unwrap();
    // Splice in a second, broken filter: rewrite remaining length and
    // append "sport/#/x" with qos 0.
    let bad_filter = b"sport/#/x";
    buf[1] += (2 + bad_filter.len() + 1) as u8;
    buf.extend_from_slice(&[0x00, bad_filter.len() as u8]);
    buf.extend_from_slice(bad_filter);
    buf.push(0x00);
    client.send_raw(&buf).await;

    match client.read_packet().await {
        ControlPacket::SubscribeAck(ack) => {
            assert_eq!(
                ack.acknowledgements(),
                &[SubscribeAck::QoS(QoS::AtMostOnce), SubscribeAck::Failed]
            );
        }
        packet => panic!("Expected SUBACK, got {packet:?}"),
    }
}

#[tokio::test]
async fn test_publish_routing() {
    common::init_log();
    let addr = start_broker().await;

    let mut sub_a = TestClient::connect(addr, "sub-a", true).await;
    sub_a
        .send(&SubscribePacket::new("sport/#", QoS::AtMostOnce, PacketId::new(1)).unwrap())
        .await;
    let _suback = sub_a.read_packet().await;

    let mut sub_b = TestClient::connect(addr, "sub-b", true).await;
    sub_b
        .send(
            &SubscribePacket::new("sport/+/player1", QoS::AtMostOnce, PacketId::new(2)).unwrap(),
        )
        .await;
    let _suback = sub_b.read_packet().await;

    let mut publisher = TestClient::connect(addr, "pub", true).await;

    // Matches both filters.
    publisher
        .send(&PublishPacket::new("sport/tennis/player1", QoS::AtMostOnce, b"deuce").unwrap())
        .await;

    match sub_a.read_packet().await {
        ControlPacket::Publish(packet) => {
            assert_eq!(packet.topic(), "sport/tennis/player1");
            assert_eq!(packet.message(), b"deuce");
            assert_eq!(packet.qos(), QoS::AtMostOnce);
            assert!(!packet.retain());
        }
        packet => panic!("Expected PUBLISH for sub-a, got {packet:?}"),
    }
    match sub_b.read_packet().await {
        ControlPacket::Publish(packet) => {
            assert_eq!(packet.topic(), "sport/tennis/player1");
        }
        packet => panic!("Expected PUBLISH for sub-b, got {packet:?}"),
    }

    // One level deeper: only the multi-level wildcard still matches.
    publisher
        .send(
            &PublishPacket::new(
                "sport/tennis/wimbledon/player1",
                QoS::AtMostOnce,
                b"advantage",
            )
            .unwrap(),
        )
        .await;

    match sub_a.read_packet().await {
        ControlPacket::Publish(packet) => {
            assert_eq!(packet.topic(), "sport/tennis/wimbledon/player1");
        }
        packet => panic!("Expected PUBLISH for sub-a, got {packet:?}"),
    }

    // sub-b must stay silent; verify by racing a ping round-trip.
    sub_b.send(&codec::PingRequestPacket::new()).await;
    match sub_b.read_packet().await {
        ControlPacket::PingResponse(_) => (),
        packet => panic!("sub-b should not receive {packet:?}"),
    }
}

#[tokio::test]
async fn test_qos1_publish_acknowledged_and_downgraded() {
    common::init_log();
    let addr = start_broker().await;

    // Subscribed at qos 0: deliveries are capped there.
    let mut subscriber = TestClient::connect(addr, "sub-q", true).await;
    subscriber
        .send(&SubscribePacket::new("alerts/#", QoS::AtMostOnce, PacketId::new(1)).unwrap())
        .await;
    let _suback = subscriber.read_packet().await;

    let mut publisher = TestClient::connect(addr, "pub-q", true).await;
    let mut publish = PublishPacket::new("alerts/fire", QoS::AtLeastOnce, b"!").unwrap();
    publish.set_packet_id(PacketId::new(7));
    publisher.send(&publish).await;

    // Publisher gets its PUBACK.
    match publisher.read_packet().await {
        ControlPacket::PublishAck(ack) => assert_eq!(ack.packet_id(), PacketId::new(7)),
        packet => panic!("Expected PUBACK, got {packet:?}"),
    }

    // Subscriber sees qos min(1, 0) = 0.
    match subscriber.read_packet().await {
        ControlPacket::Publish(packet) => {
            assert_eq!(packet.qos(), QoS::AtMostOnce);
            assert_eq!(packet.message(), b"!");
        }
        packet => panic!("Expected PUBLISH, got {packet:?}"),
    }
}

#[tokio::test]
async fn test_unsubscribe_stops_delivery() {
    common::init_log();
    let addr = start_broker().await;

    let mut subscriber = TestClient::connect(addr, "unsub", true).await;
    subscriber
        .send(&SubscribePacket::new("news/#", QoS::AtMostOnce, PacketId::new(1)).unwrap())
        .await;
    let _suback = subscriber.read_packet().await;

    subscriber
        .send(&UnsubscribePacket::new("news/#", PacketId::new(2)))
        .await;
    match subscriber.read_packet().await {
        ControlPacket::UnsubscribeAck(ack) => assert_eq!(ack.packet_id(), PacketId::new(2)),
        packet => panic!("Expected UNSUBACK, got {packet:?}"),
    }

    let mut publisher = TestClient::connect(addr, "unsub-pub", true).await;
    publisher
        .send(&PublishPacket::new("news/today", QoS::AtMostOnce, b"x").unwrap())
        .await;

    // Nothing must arrive; a ping round-trip bounds the wait.
    subscriber.send(&codec::PingRequestPacket::new()).await;
    match subscriber.read_packet().await {
        ControlPacket::PingResponse(_) => (),
        packet => panic!("Still subscribed, got {packet:?}"),
    }
}
