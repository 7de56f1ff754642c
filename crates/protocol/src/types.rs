//! Device and session type definitions
//!
//! This module defines the raw packet buffer handed from the transport to the
//! frame decoder, the identity of a connected device and the connection
//! lifecycle states.

use crate::constants::{GC2_PRODUCT_ID, GC2_VENDOR_ID, PACKET_SIZE};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One interrupt transfer worth of bytes
///
/// Fixed 64-byte buffer plus the number of bytes the device actually
/// transferred. Only `as_bytes()` is meaningful to the decoder.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct RawPacket {
    data: [u8; PACKET_SIZE],
    len: usize,
}

impl RawPacket {
    /// Create an empty packet ready to be filled by a transfer
    pub fn new() -> Self {
        Self {
            data: [0; PACKET_SIZE],
            len: 0,
        }
    }

    /// Build a packet from a byte slice, truncated to the packet size
    pub fn from_slice(bytes: &[u8]) -> Self {
        let mut packet = Self::new();
        let len = bytes.len().min(PACKET_SIZE);
        packet.data[..len].copy_from_slice(&bytes[..len]);
        packet.len = len;
        packet
    }

    /// Full buffer for the transport to read into
    pub fn buffer_mut(&mut self) -> &mut [u8; PACKET_SIZE] {
        &mut self.data
    }

    /// Record how many bytes the transfer produced
    pub fn set_len(&mut self, len: usize) {
        self.len = len.min(PACKET_SIZE);
    }

    /// Transferred bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.data[..self.len]
    }

    /// Number of transferred bytes
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the transfer produced no bytes
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Default for RawPacket {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RawPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawPacket")
            .field("len", &self.len)
            .field("data", &String::from_utf8_lossy(self.as_bytes()))
            .finish()
    }
}

/// Identity of the connected launch monitor
///
/// Vendor and product IDs are fixed; serial and firmware are filled in by
/// the identity query after a successful open and stay `None` when the
/// device does not report them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    /// USB Vendor ID
    pub vendor_id: u16,
    /// USB Product ID
    pub product_id: u16,
    /// Serial number string (if reported)
    pub serial: Option<String>,
    /// Firmware version string (if reported)
    pub firmware_version: Option<String>,
}

impl DeviceIdentity {
    /// Identity with the GC2 IDs and nothing queried yet
    pub fn gc2() -> Self {
        Self {
            vendor_id: GC2_VENDOR_ID,
            product_id: GC2_PRODUCT_ID,
            serial: None,
            firmware_version: None,
        }
    }

    /// Identity with queried strings attached
    pub fn with_strings(serial: Option<String>, firmware_version: Option<String>) -> Self {
        Self {
            serial,
            firmware_version,
            ..Self::gc2()
        }
    }
}

impl Default for DeviceIdentity {
    fn default() -> Self {
        Self::gc2()
    }
}

/// Connection lifecycle state of a session
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConnectionState {
    /// No device open (initial state)
    #[default]
    Disconnected,
    /// Open in progress
    Connecting,
    /// Device open and read loop running
    Connected,
    /// Read loop stopping and device being released
    Disconnecting,
    /// Read loop died unexpectedly; device released
    Failed(String),
}

impl ConnectionState {
    /// Whether the session is live
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    /// Whether `connect()` may start a new session from here
    pub fn accepts_connect(&self) -> bool {
        matches!(
            self,
            ConnectionState::Disconnected | ConnectionState::Failed(_)
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Disconnecting => write!(f, "disconnecting"),
            ConnectionState::Failed(reason) => write!(f, "failed ({})", reason),
        }
    }
}
