//! Frame decoder integration tests
//!
//! Feeds packet streams shaped like real GC2 captures through the decoder:
//! - Multi-packet shot frames (early and final readings)
//! - Device status pulses between shots
//! - Lossy recovery when a frame is interrupted
//! - Arbitrary packet chunking (proptest)
//!
//! Run with: `cargo test -p protocol --test decoder_tests`

use proptest::prelude::*;
use protocol::{
    DecodedMessage, DeviceStatus, Event, EventCategory, FrameDecoder, FrameKind, PACKET_SIZE,
    ShotData, encode_frame, split_packets,
};

// ============================================================================
// Test Utilities
// ============================================================================

fn shot_fields(shot_id: u32, msec: u32, spin: Option<(i32, i32)>) -> Vec<(String, String)> {
    let mut fields = vec![
        ("SHOT_ID".to_string(), shot_id.to_string()),
        ("TIME_SEC".to_string(), "0".to_string()),
        ("MSEC_SINCE_CONTACT".to_string(), msec.to_string()),
        ("SPEED_MPH".to_string(), "161.37".to_string()),
        ("AZIMUTH_DEG".to_string(), "-1.42".to_string()),
        ("ELEVATION_DEG".to_string(), "11.08".to_string()),
        ("SPIN_RPM".to_string(), "2711".to_string()),
    ];
    if let Some((back, side)) = spin {
        fields.push(("BACK_RPM".to_string(), back.to_string()));
        fields.push(("SIDE_RPM".to_string(), side.to_string()));
    }
    fields.extend([
        ("IS_LEFT".to_string(), "0".to_string()),
        ("WORLDSTART_X".to_string(), "-53.53".to_string()),
        ("WORLDSTART_Y".to_string(), "91.40".to_string()),
        ("WORLDSTART_Z".to_string(), "-477.94".to_string()),
        ("HMT".to_string(), "0".to_string()),
    ]);
    fields
}

fn encode(kind: FrameKind, fields: &[(String, String)]) -> Vec<u8> {
    let borrowed: Vec<(&str, &str)> = fields
        .iter()
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect();
    encode_frame(kind, &borrowed)
}

fn decode_all(decoder: &mut FrameDecoder, stream: &[u8]) -> Vec<DecodedMessage> {
    split_packets(stream)
        .iter()
        .filter_map(|packet| decoder.push_packet(packet))
        .collect()
}

// ============================================================================
// Shot Frames
// ============================================================================

mod shot_frames {
    use super::*;

    #[test]
    fn test_final_reading_roundtrip() {
        let fields = shot_fields(7, 1000, Some((2501, -193)));
        let frame = encode(FrameKind::Shot, &fields);
        assert!(frame.len() > PACKET_SIZE, "frame should span packets");

        let mut decoder = FrameDecoder::new();
        let decoded = decode_all(&mut decoder, &frame);

        assert_eq!(decoded.len(), 1);
        let expected = ShotData::from_fields(fields.clone());
        assert_eq!(decoded[0], DecodedMessage::Shot(expected));

        let DecodedMessage::Shot(shot) = &decoded[0] else {
            panic!("expected shot");
        };
        for (key, value) in &fields {
            assert_eq!(shot.get(key), Some(value.as_str()), "field {}", key);
        }
        assert!(shot.is_final_reading());
        assert_eq!(shot.shot_id(), Some(7));
        assert_eq!(shot.get_f64("BACK_RPM"), Some(2501.0));
    }

    #[test]
    fn test_early_then_final_reading() {
        let mut stream = encode(FrameKind::Shot, &shot_fields(3, 200, None));
        // Next frame starts on a fresh packet
        let pad = (PACKET_SIZE - stream.len() % PACKET_SIZE) % PACKET_SIZE;
        stream.extend(std::iter::repeat_n(0u8, pad));
        stream.extend(encode(FrameKind::Shot, &shot_fields(3, 1000, Some((2600, 140)))));

        let mut decoder = FrameDecoder::new();
        let decoded = decode_all(&mut decoder, &stream);
        assert_eq!(decoded.len(), 2);

        let shots: Vec<&ShotData> = decoded
            .iter()
            .map(|m| match m {
                DecodedMessage::Shot(shot) => shot,
                other => panic!("unexpected {:?}", other),
            })
            .collect();
        assert!(!shots[0].is_final_reading());
        assert!(shots[1].is_final_reading());
        assert_eq!(shots[0].shot_id(), shots[1].shot_id());
        assert_eq!(decoder.stats().frames_decoded, 2);
    }

    #[test]
    fn test_shot_payload_carries_numbers() {
        let frame = encode(FrameKind::Shot, &shot_fields(11, 1000, Some((2450, -75))));
        let mut decoder = FrameDecoder::new();
        let event: Event = decode_all(&mut decoder, &frame)
            .pop()
            .expect("one message")
            .into();

        assert_eq!(event.category(), EventCategory::Shot);
        let json: serde_json::Value = serde_json::from_str(&event.payload()).unwrap();
        assert_eq!(json["SHOT_ID"], 11);
        assert_eq!(json["SIDE_RPM"], -75);
        assert_eq!(json["WORLDSTART_Z"], -477.94);
    }
}

// ============================================================================
// Mixed Streams
// ============================================================================

mod mixed_streams {
    use super::*;

    #[test]
    fn test_status_between_shots() {
        let mut decoder = FrameDecoder::new();
        let mut decoded = Vec::new();

        decoded.extend(decode_all(&mut decoder, b"0M\nFLAGS=7\nBALLS=1\nBALL1=198,206,12\n\t"));
        decoded.extend(decode_all(
            &mut decoder,
            &encode(FrameKind::Shot, &shot_fields(1, 1000, Some((2500, 10)))),
        ));
        decoded.extend(decode_all(&mut decoder, b"0M\nFLAGS=1\nBALLS=0\n\t"));

        assert_eq!(decoded.len(), 3);
        assert!(matches!(
            &decoded[0],
            DecodedMessage::DeviceStatus(s) if s.is_ready && s.ball_detected
        ));
        assert!(matches!(&decoded[1], DecodedMessage::Shot(_)));
        assert_eq!(
            decoded[2],
            DecodedMessage::DeviceStatus(DeviceStatus::from_fields([("FLAGS", "1"), ("BALLS", "0")]))
        );
    }

    #[test]
    fn test_interrupted_shot_never_surfaces() {
        let frame = encode(FrameKind::Shot, &shot_fields(5, 1000, Some((2400, 0))));
        let packets = split_packets(&frame);
        assert!(packets.len() >= 2);

        let mut decoder = FrameDecoder::new();
        // Only the first packet of the shot arrives
        assert!(decoder.push_packet(&packets[0]).is_none());

        // A new frame begins; the stale shot is dropped, the new frame decodes
        let status = decoder.push(b"0M\nFLAGS=7\nBALLS=1\n\t");
        assert!(matches!(status, Some(DecodedMessage::DeviceStatus(_))));

        // The rest of the interrupted shot is orphaned, not glued to anything
        for packet in &packets[1..] {
            assert!(decoder.push_packet(packet).is_none());
        }
        let stats = decoder.stats();
        assert_eq!(stats.stale_frames_dropped, 1);
        assert_eq!(stats.frames_decoded, 1);
        assert_eq!(stats.orphan_packets as usize, packets.len() - 1);
    }

    #[test]
    fn test_completed_then_restarted_shot() {
        // A finished multi-packet shot, then a second shot interrupted by a third
        let first = encode(FrameKind::Shot, &shot_fields(1, 1000, Some((2500, 5))));
        let second = encode(FrameKind::Shot, &shot_fields(2, 1000, Some((2600, 6))));
        let third = encode(FrameKind::Shot, &shot_fields(3, 1000, Some((2700, 7))));

        let mut decoder = FrameDecoder::new();
        let mut decoded = decode_all(&mut decoder, &first);
        decoded.extend(decoder.push_packet(&split_packets(&second)[0]));
        decoded.extend(decode_all(&mut decoder, &third));

        let ids: Vec<Option<u32>> = decoded
            .iter()
            .map(|m| match m {
                DecodedMessage::Shot(shot) => shot.shot_id(),
                other => panic!("unexpected {:?}", other),
            })
            .collect();
        assert_eq!(ids, vec![Some(1), Some(3)]);
    }

    #[test]
    fn test_unknown_type_does_not_stop_decoding() {
        let mut decoder = FrameDecoder::new();
        let mut decoded = decode_all(&mut decoder, b"0Q\nMYSTERY=1\n\t");
        decoded.extend(decode_all(&mut decoder, b"0M\nFLAGS=7\nBALLS=1\n\t"));

        assert_eq!(decoded.len(), 2);
        match &decoded[0] {
            DecodedMessage::Error(text) => assert!(text.contains("0Q")),
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(decoded[1], DecodedMessage::DeviceStatus(_)));
    }

    #[test]
    fn test_discriminator_only_start_packet() {
        let fields = shot_fields(1, 1000, Some((1500, 0)));
        let frame = encode(FrameKind::Shot, &fields);

        let mut decoder = FrameDecoder::new();
        assert!(decoder.push(&frame[..2]).is_none());
        assert!(decoder.has_partial());
        let decoded = decoder.push(&frame[2..]);

        assert_eq!(decoded, Some(DecodedMessage::Shot(ShotData::from_fields(fields))));
        assert_eq!(decoder.stats().orphan_packets, 0);
    }

    #[test]
    fn test_split_discriminator_is_not_a_frame_start() {
        // Frames start at a packet boundary with the whole discriminator
        let frame = encode(FrameKind::Shot, &shot_fields(1, 1000, Some((1500, 0))));

        let mut decoder = FrameDecoder::new();
        assert!(decoder.push(&frame[..1]).is_none());
        assert!(decoder.push(&frame[1..]).is_none());
        assert_eq!(decoder.stats().orphan_packets, 2);
        assert!(!decoder.has_partial());
    }
}

// ============================================================================
// Property Tests
// ============================================================================

proptest! {
    #[test]
    fn prop_any_chunking_decodes_exactly_once(
        shot_id in 1u32..10_000,
        back in 1_500i32..11_000,
        side in -600i32..600,
        first in 2usize..=PACKET_SIZE,
        cuts in prop::collection::vec(1usize..=PACKET_SIZE, 1..40),
    ) {
        let fields = shot_fields(shot_id, 1000, Some((back, side)));
        let frame = encode(FrameKind::Shot, &fields);

        let mut decoder = FrameDecoder::new();
        let mut decoded = Vec::new();
        decoded.extend(decoder.push(&frame[..first]));
        let mut offset = first;
        let mut i = 0;
        while offset < frame.len() {
            let n = cuts[i % cuts.len()].min(frame.len() - offset);
            decoded.extend(decoder.push(&frame[offset..offset + n]));
            offset += n;
            i += 1;
        }

        prop_assert_eq!(decoded.len(), 1);
        prop_assert_eq!(&decoded[0], &DecodedMessage::Shot(ShotData::from_fields(fields)));
        prop_assert!(!decoder.has_partial());
    }

    #[test]
    fn prop_truncated_frame_never_emits(cut in 1usize..200) {
        let frame = encode(FrameKind::Shot, &shot_fields(1, 1000, Some((2500, 0))));
        // Anything short of the terminator stays buffered
        let cut = cut.min(frame.len() - 2);
        let mut decoder = FrameDecoder::new();
        let decoded = decode_all(&mut decoder, &frame[..cut]);
        prop_assert!(decoded.is_empty());
    }
}
