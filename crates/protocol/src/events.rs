//! Consumer-facing events and their boundary encodings
//!
//! Every event belongs to exactly one [`EventCategory`]. At the host boundary
//! each event is carried as text:
//!
//! | Category | Payload |
//! |----------|---------|
//! | shot | JSON object of the decoded shot fields |
//! | connection | `"true"` / `"false"` |
//! | error | free text |
//! | device status | `{"isReady": bool, "ballDetected": bool}` |

use crate::messages::{DecodedMessage, DeviceStatus, ShotData};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Callback slot an event is routed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    Shot,
    Connection,
    Error,
    DeviceStatus,
}

impl EventCategory {
    pub const ALL: [EventCategory; 4] = [
        EventCategory::Shot,
        EventCategory::Connection,
        EventCategory::Error,
        EventCategory::DeviceStatus,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventCategory::Shot => "shot",
            EventCategory::Connection => "connection",
            EventCategory::Error => "error",
            EventCategory::DeviceStatus => "device_status",
        }
    }
}

impl fmt::Display for EventCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An event on its way to the consumer
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Shot(ShotData),
    DeviceStatus(DeviceStatus),
    /// Session became connected (`true`) or disconnected (`false`)
    Connection(bool),
    Error(String),
}

impl Event {
    pub fn error(message: impl Into<String>) -> Self {
        Event::Error(message.into())
    }

    pub fn category(&self) -> EventCategory {
        match self {
            Event::Shot(_) => EventCategory::Shot,
            Event::DeviceStatus(_) => EventCategory::DeviceStatus,
            Event::Connection(_) => EventCategory::Connection,
            Event::Error(_) => EventCategory::Error,
        }
    }

    /// Text form handed to host-side notification sinks
    pub fn payload(&self) -> String {
        match self {
            Event::Shot(shot) => shot.to_json_value().to_string(),
            Event::DeviceStatus(status) => serde_json::json!({
                "isReady": status.is_ready,
                "ballDetected": status.ball_detected,
            })
            .to_string(),
            Event::Connection(connected) => connected.to_string(),
            Event::Error(message) => message.clone(),
        }
    }
}

impl From<DecodedMessage> for Event {
    fn from(msg: DecodedMessage) -> Self {
        match msg {
            DecodedMessage::Shot(shot) => Event::Shot(shot),
            DecodedMessage::DeviceStatus(status) => Event::DeviceStatus(status),
            DecodedMessage::Error(message) => Event::Error(message),
        }
    }
}
