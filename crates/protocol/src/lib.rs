//! Protocol library for the GC2 launch monitor
//!
//! This crate defines the device constants, the frame decoder that turns the
//! 64-byte interrupt stream into typed messages, and the event types handed
//! to consumers. It has no USB or threading dependencies, so everything here
//! can be exercised with synthetic packet streams.
//!
//! # Example
//!
//! ```
//! use protocol::{DecodedMessage, FrameDecoder, FrameKind, encode_frame, split_packets};
//!
//! let frame = encode_frame(
//!     FrameKind::Shot,
//!     &[("SHOT_ID", "1"), ("SPEED_MPH", "161.20"), ("BACK_RPM", "2450"), ("SIDE_RPM", "-210")],
//! );
//!
//! let mut decoder = FrameDecoder::new();
//! let mut shots = Vec::new();
//! for packet in split_packets(&frame) {
//!     if let Some(DecodedMessage::Shot(shot)) = decoder.push_packet(&packet) {
//!         shots.push(shot);
//!     }
//! }
//!
//! assert_eq!(shots.len(), 1);
//! assert_eq!(shots[0].shot_id(), Some(1));
//! assert!(shots[0].is_final_reading());
//! ```

pub mod codec;
pub mod constants;
pub mod error;
pub mod events;
pub mod messages;
pub mod types;

pub use codec::{DecoderStats, FrameDecoder, encode_frame, split_packets};
pub use constants::{
    FRAME_TERMINATOR, GC2_EP_IN, GC2_INTERFACE, GC2_PRODUCT_ID, GC2_VENDOR_ID, MAX_FRAME_SIZE,
    PACKET_SIZE, READ_TIMEOUT,
};
pub use error::DecodeError;
pub use events::{Event, EventCategory};
pub use messages::{DecodedMessage, DeviceStatus, FrameKind, ShotData, parse_fields};
pub use types::{ConnectionState, DeviceIdentity, RawPacket};
