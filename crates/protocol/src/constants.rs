//! Fixed GC2 device constants
//!
//! These values are part of the contract with the physical launch monitor
//! and must not change.

use std::time::Duration;

/// GC2 USB Vendor ID
pub const GC2_VENDOR_ID: u16 = 0x2C79;

/// GC2 USB Product ID
pub const GC2_PRODUCT_ID: u16 = 0x0110;

/// Interrupt IN endpoint the device streams frames on
pub const GC2_EP_IN: u8 = 0x82;

/// Interface claimed for the interrupt stream
pub const GC2_INTERFACE: u8 = 0;

/// USB packet size (bytes)
pub const PACKET_SIZE: usize = 64;

/// Per-read interrupt transfer timeout
pub const READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Upper bound for one reassembled frame (16 packets)
pub const MAX_FRAME_SIZE: usize = 16 * PACKET_SIZE;

/// Two-byte sequence that ends every frame
pub const FRAME_TERMINATOR: &[u8; 2] = b"\n\t";
