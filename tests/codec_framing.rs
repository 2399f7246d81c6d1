//! Property-based tests for the frame codec
//!
//! Frames must survive arbitrary read boundaries with any combination of
//! compression and encryption, and hostile input must fail cleanly.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use bytes::BytesMut;
use intercept_tunnel::core::codec::FrameCodec;
use intercept_tunnel::core::packet::Packet;
use intercept_tunnel::core::types::{peek_varint, varint_len, WireWrite};
use intercept_tunnel::utils::crypto::SharedSecret;
use proptest::prelude::*;
use tokio_util::codec::{Decoder, Encoder};

fn packet_strategy() -> impl Strategy<Value = Packet> {
    (0..0x80i32, prop::collection::vec(any::<u8>(), 0..1500))
        .prop_map(|(id, payload)| Packet::new(id, payload))
}

fn codecs(threshold: Option<usize>, key: Option<[u8; 16]>) -> (FrameCodec, FrameCodec) {
    let mut writer = FrameCodec::default();
    let mut reader = FrameCodec::default();
    writer.set_threshold(threshold);
    reader.set_threshold(threshold);
    if let Some(key) = key {
        let secret = SharedSecret::from_slice(&key).unwrap();
        writer.enable_encryption(&secret).unwrap();
        reader.enable_decryption(&secret).unwrap();
    }
    (writer, reader)
}

// Property: VarInt length matches what is written and read back
proptest! {
    #[test]
    fn prop_varint_length_consistent(value in any::<i32>()) {
        let mut buf = BytesMut::new();
        buf.write_varint(value);

        prop_assert_eq!(buf.len(), varint_len(value));
        prop_assert_eq!(peek_varint(&buf).unwrap(), Some((value, buf.len())));
        prop_assert_eq!(peek_varint(&buf[..buf.len() - 1]).unwrap(), None);
    }
}

// Property: a stream of frames decodes the same no matter how reads split it
proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]
    #[test]
    fn prop_frames_survive_any_chunking(
        packets in prop::collection::vec(packet_strategy(), 1..12),
        chunk in 1usize..300,
        threshold in prop::option::of(0usize..512),
        key in prop::option::of(any::<[u8; 16]>()),
    ) {
        let (mut writer, mut reader) = codecs(threshold, key);
        let mut wire = BytesMut::new();
        for packet in &packets {
            writer.encode(packet.clone(), &mut wire).unwrap();
        }

        let mut buf = BytesMut::new();
        let mut decoded = Vec::new();
        for piece in wire.chunks(chunk) {
            buf.extend_from_slice(piece);
            while let Some(packet) = reader.decode(&mut buf).unwrap() {
                decoded.push(packet);
            }
        }

        prop_assert!(buf.is_empty());
        prop_assert_eq!(decoded, packets);
    }
}

// Property: bodies under the threshold are sent with a zero data length
proptest! {
    #[test]
    fn prop_small_bodies_not_compressed(packet in packet_strategy()) {
        let threshold = packet.body_len() + 1;
        let (mut writer, _) = codecs(Some(threshold), None);
        let mut wire = BytesMut::new();
        writer.encode(packet.clone(), &mut wire).unwrap();

        let (length, prefix) = peek_varint(&wire).unwrap().unwrap();
        prop_assert_eq!(length as usize, wire.len() - prefix);
        prop_assert_eq!(wire[prefix], 0x00);
    }
}

// Property: garbage never panics the decoder
proptest! {
    #[test]
    fn prop_garbage_fails_cleanly(
        data in prop::collection::vec(any::<u8>(), 0..2048),
        threshold in prop::option::of(0usize..512),
    ) {
        let mut reader = FrameCodec::new(4096);
        reader.set_threshold(threshold);
        let mut buf = BytesMut::from(&data[..]);
        loop {
            match reader.decode(&mut buf) {
                Ok(Some(_)) => continue,
                Ok(None) | Err(_) => break,
            }
        }
    }
}

#[test]
fn test_wrong_key_does_not_yield_original_frame() {
    let packet = Packet::new(0x05, b"secret payload".to_vec());
    let mut writer = FrameCodec::default();
    writer
        .enable_encryption(&SharedSecret::from_slice(&[1; 16]).unwrap())
        .unwrap();
    let mut wire = BytesMut::new();
    writer.encode(packet.clone(), &mut wire).unwrap();

    let mut reader = FrameCodec::default();
    reader
        .enable_decryption(&SharedSecret::from_slice(&[2; 16]).unwrap())
        .unwrap();
    match reader.decode(&mut wire) {
        Ok(Some(decoded)) => assert_ne!(decoded, packet),
        Ok(None) | Err(_) => {}
    }
}
