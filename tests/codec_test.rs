use bytes::BytesMut;

use embermq::protocol::{
    ConnAck, Connect, Disconnect, MqttCodec, Packet, PingReq, PingResp, ProtocolLevel, PubAck,
    PubComp, PubRec, PubRel, Publish, Qos, SubAck, Subscribe, UnsubAck, Unsubscribe,
};

fn encode(packet: &Packet) -> BytesMut {
    let mut buf = BytesMut::new();
    MqttCodec::encode(packet, &mut buf).unwrap();
    buf
}

fn sample_packets() -> Vec<Packet> {
    vec![
        Packet::Connect(
            Connect::builder()
                .level(ProtocolLevel::V311)
                .clean_session(true)
                .keep_alive(60)
                .client_id("CLIENT")
                .build(),
        ),
        Packet::ConnAck(ConnAck::builder().session_present(false).reason(0).build()),
        Packet::Publish(
            Publish::builder()
                .topic("foo/bar")
                .payload(&b"TEST"[..])
                .qos(Qos::AtLeastOnce)
                .packet_id(123)
                .build(),
        ),
        Packet::Publish(
            Publish::builder()
                .topic("qos0/topic")
                .payload(&b"fire-and-forget"[..])
                .qos(Qos::AtMostOnce)
                .build(),
        ),
        Packet::PubAck(PubAck::new(7)),
        Packet::PubRec(PubRec::new(9)),
        Packet::PubRel(PubRel::new(11)),
        Packet::PubComp(PubComp::new(13)),
        Packet::Subscribe(
            Subscribe::builder()
                .packet_id(21)
                .topic("test/foo", 0)
                .topic("test/bar", 1)
                .build(),
        ),
        Packet::SubAck(SubAck::builder().packet_id(21).code(0).code(1).build()),
        Packet::Unsubscribe(
            Unsubscribe::builder()
                .packet_id(33)
                .topic("test/foo")
                .topic("test/bar")
                .build(),
        ),
        Packet::UnsubAck(UnsubAck::new(33)),
        Packet::PingReq(PingReq),
        Packet::PingResp(PingResp),
        Packet::Disconnect(Disconnect),
    ]
}

#[test]
fn every_builder_packet_roundtrips() {
    for packet in sample_packets() {
        let mut codec = MqttCodec::new();
        let mut buffer = encode(&packet);
        let decoded = codec
            .decode(&mut buffer)
            .unwrap()
            .unwrap_or_else(|| panic!("no packet decoded for {:?}", packet));
        assert_eq!(decoded, packet);
        assert!(buffer.is_empty(), "leftover bytes for {:?}", packet);
    }
}

#[test]
fn equal_packets_encode_identically() {
    for packet in sample_packets() {
        assert_eq!(encode(&packet), encode(&packet.clone()));
    }
}

#[test]
fn connack_canonical_bytes() {
    let packet = Packet::ConnAck(ConnAck::builder().session_present(false).reason(0).build());
    assert_eq!(encode(&packet).as_ref(), &[0x20, 0x02, 0x00, 0x00]);
}

#[test]
fn connect_v311_minimal_bytes() {
    let packet = Packet::Connect(
        Connect::builder()
            .level(ProtocolLevel::V311)
            .clean_session(true)
            .keep_alive(60)
            .client_id("CLIENT")
            .build(),
    );
    assert_eq!(
        encode(&packet).as_ref(),
        &[
            0x10, 0x12, 0x00, 0x04, 0x4D, 0x51, 0x54, 0x54, 0x04, 0x02, 0x00, 0x3C, 0x00, 0x06,
            0x43, 0x4C, 0x49, 0x45, 0x4E, 0x54
        ]
    );
}

#[test]
fn suback_canonical_bytes() {
    let packet = Packet::SubAck(SubAck::builder().packet_id(21).code(0).code(1).build());
    assert_eq!(
        encode(&packet).as_ref(),
        &[0x90, 0x04, 0x00, 0x15, 0x00, 0x01]
    );
}

#[test]
fn publish_qos1_canonical_bytes() {
    let packet = Packet::Publish(
        Publish::builder()
            .topic("foo/bar")
            .payload(&b"TEST"[..])
            .qos(Qos::AtLeastOnce)
            .packet_id(123)
            .build(),
    );
    assert_eq!(
        encode(&packet).as_ref(),
        &[
            0x32, 0x0F, 0x00, 0x07, 0x66, 0x6F, 0x6F, 0x2F, 0x62, 0x61, 0x72, 0x00, 0x7B, 0x54,
            0x45, 0x53, 0x54
        ]
    );
    assert_eq!(
        encode(&Packet::PubAck(PubAck::new(123))).as_ref(),
        &[0x40, 0x02, 0x00, 0x7B]
    );
}

#[test]
fn ping_wire_bytes() {
    assert_eq!(encode(&Packet::PingReq(PingReq)).as_ref(), &[0xC0, 0x00]);
    assert_eq!(encode(&Packet::PingResp(PingResp)).as_ref(), &[0xD0, 0x00]);
    assert_eq!(
        encode(&Packet::Disconnect(Disconnect)).as_ref(),
        &[0xE0, 0x00]
    );
}

#[test]
fn byte_at_a_time_decode_yields_the_same_sequence() {
    let packets = sample_packets();
    let mut stream = BytesMut::new();
    for packet in &packets {
        MqttCodec::encode(packet, &mut stream).unwrap();
    }

    let mut codec = MqttCodec::new();
    let mut buffer = BytesMut::new();
    let mut decoded = Vec::new();
    for byte in stream.iter().copied() {
        buffer.extend_from_slice(&[byte]);
        // a partial frame must never be promoted to a protocol error
        while let Some(packet) = codec.decode(&mut buffer).unwrap() {
            decoded.push(packet);
        }
    }
    assert_eq!(decoded, packets);
    assert!(buffer.is_empty());
}

#[test]
fn the_decoder_never_reads_past_the_declared_frame() {
    let mut buffer = encode(&Packet::PubAck(PubAck::new(1)));
    // an unrelated partial frame right behind it
    buffer.extend_from_slice(&[0x32, 0x7F, 0x00]);

    let mut codec = MqttCodec::new();
    assert_eq!(
        codec.decode(&mut buffer).unwrap(),
        Some(Packet::PubAck(PubAck::new(1)))
    );
    assert_eq!(buffer.as_ref(), &[0x32, 0x7F, 0x00]);
    assert!(codec.decode(&mut buffer).unwrap().is_none());
    assert_eq!(buffer.as_ref(), &[0x32, 0x7F, 0x00]);
}

#[test]
fn large_payloads_stretch_the_remaining_length() {
    let payload = vec![0xABu8; 200_000];
    let packet = Packet::Publish(
        Publish::builder()
            .topic("bulk")
            .payload(payload.clone())
            .qos(Qos::AtLeastOnce)
            .packet_id(2)
            .build(),
    );
    let mut buffer = encode(&packet);
    // 2 + 4 (topic) + 2 (packet id) + payload needs a three-byte varint
    assert_eq!(buffer[0], 0x32);
    assert!(buffer[1] & 0x80 != 0);
    assert!(buffer[2] & 0x80 != 0);
    assert_eq!(buffer[3] & 0x80, 0);

    let mut codec = MqttCodec::new();
    let decoded = codec.decode(&mut buffer).unwrap().unwrap();
    assert_eq!(decoded, packet);
}

#[test]
fn a_v5_connect_switches_later_decodes() {
    // V5 connect with an empty property block
    let mut buffer = BytesMut::new();
    buffer.extend_from_slice(&[
        0x10, 0x0F, 0x00, 0x04, b'M', b'Q', b'T', b'T', 0x05, 0x02, 0x00, 0x3C, 0x00, 0x00,
        0x02, b'c', b'5',
    ]);

    let mut codec = MqttCodec::new();
    let packet = codec.decode(&mut buffer).unwrap().unwrap();
    let Packet::Connect(connect) = packet else {
        panic!("expected a connect");
    };
    assert_eq!(connect.level, ProtocolLevel::V5);
    assert_eq!(connect.client_id, "c5");

    // V5 publish: topic "t", packet id 5, empty property block, payload "x"
    buffer.extend_from_slice(&[0x32, 0x07, 0x00, 0x01, b't', 0x00, 0x05, 0x00, b'x']);
    let packet = codec.decode(&mut buffer).unwrap().unwrap();
    let Packet::Publish(publish) = packet else {
        panic!("expected a publish");
    };
    assert_eq!(publish.packet_id, Some(5));
    assert_eq!(publish.payload.as_ref(), b"x");
}
