//! Decoded GC2 messages
//!
//! A GC2 frame is a discriminator line (`0H` for shots, `0M` for device
//! status) followed by `KEY=VALUE` lines. This module turns a complete frame
//! body into typed messages; reassembly lives in [`crate::codec`].
//!
//! # Example
//!
//! ```
//! use protocol::{DecodedMessage, FrameKind};
//!
//! let msg = DecodedMessage::from_frame(FrameKind::DeviceStatus, "FLAGS=7\nBALLS=1\n");
//! match msg {
//!     DecodedMessage::DeviceStatus(status) => {
//!         assert!(status.is_ready);
//!         assert!(status.ball_detected);
//!     }
//!     other => panic!("unexpected {:?}", other),
//! }
//! ```

use crate::error::DecodeError;
use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::{Map, Number, Value};
use std::collections::BTreeMap;
use tracing::debug;

/// `FLAGS` value the device reports when it is armed for a shot
pub const FLAGS_READY: u32 = 7;

/// Frame types identified by the discriminator line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameKind {
    /// `0H` - ball flight results
    Shot,
    /// `0M` - readiness and ball detection
    DeviceStatus,
}

impl FrameKind {
    /// Map the discriminator letter (the byte after `0`) to a frame kind
    pub fn from_marker(letter: u8) -> Option<Self> {
        match letter {
            b'H' => Some(FrameKind::Shot),
            b'M' => Some(FrameKind::DeviceStatus),
            _ => None,
        }
    }

    /// Discriminator line for this frame kind
    pub fn marker(&self) -> &'static str {
        match self {
            FrameKind::Shot => "0H",
            FrameKind::DeviceStatus => "0M",
        }
    }
}

/// Shot result as reported by the device
///
/// The field set is opaque: every `KEY=VALUE` pair from the frame is kept as
/// raw text. Typed accessors exist for the handful of keys consumers commonly
/// branch on.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ShotData {
    fields: BTreeMap<String, String>,
}

impl ShotData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from `(key, value)` pairs; later duplicates overwrite earlier ones
    pub fn from_fields<I, K, V>(fields: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            fields: fields
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.fields.insert(key.into(), value.into());
    }

    /// Raw value for a key
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    /// Numeric value for a key, if present and parseable
    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(|v| v.trim().parse().ok())
    }

    /// Device-assigned shot counter (`SHOT_ID`)
    pub fn shot_id(&self) -> Option<u32> {
        self.get("SHOT_ID").and_then(|v| v.trim().parse().ok())
    }

    /// Whether this is the final reading of a shot
    ///
    /// The device first sends an early reading without spin, then a final
    /// one carrying `BACK_RPM` and `SIDE_RPM` for the same `SHOT_ID`.
    pub fn is_final_reading(&self) -> bool {
        self.fields.contains_key("BACK_RPM") && self.fields.contains_key("SIDE_RPM")
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// JSON object with numeric-looking values emitted as numbers
    pub fn to_json_value(&self) -> Value {
        let map: Map<String, Value> = self
            .fields
            .iter()
            .map(|(k, v)| (k.clone(), field_value(v)))
            .collect();
        Value::Object(map)
    }
}

impl Serialize for ShotData {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (key, value) in &self.fields {
            map.serialize_entry(key, &field_value(value))?;
        }
        map.end()
    }
}

fn field_value(raw: &str) -> Value {
    let trimmed = raw.trim();
    if let Ok(int) = trimmed.parse::<i64>() {
        return Value::Number(int.into());
    }
    trimmed
        .parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map(Value::Number)
        .unwrap_or_else(|| Value::String(raw.to_string()))
}

/// Device readiness pulse (`0M` frames)
#[derive(Debug, Clone, PartialEq, Eq, Default, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceStatus {
    /// Device is armed and ready for a shot
    pub is_ready: bool,
    /// A ball is sitting in the hitting zone
    pub ball_detected: bool,
    /// Raw `FLAGS` value
    #[serde(skip)]
    pub flags: Option<u32>,
    /// Raw `BALLS` count
    #[serde(skip)]
    pub balls: Option<u32>,
    /// Raw `BALL1` position string
    #[serde(skip)]
    pub ball_position: Option<String>,
}

impl DeviceStatus {
    pub fn new(is_ready: bool, ball_detected: bool) -> Self {
        Self {
            is_ready,
            ball_detected,
            ..Self::default()
        }
    }

    /// Interpret `FLAGS`/`BALLS`/`BALL1`; missing or garbled fields read as false
    pub fn from_fields<'a>(fields: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let mut status = Self::default();
        for (key, value) in fields {
            match key {
                "FLAGS" => status.flags = value.trim().parse().ok(),
                "BALLS" => status.balls = value.trim().parse().ok(),
                "BALL1" => status.ball_position = Some(value.to_string()),
                _ => {}
            }
        }
        status.is_ready = status.flags == Some(FLAGS_READY);
        status.ball_detected = status.balls.is_some_and(|n| n > 0);
        status
    }
}

/// One logically complete frame, decoded
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedMessage {
    /// Shot result
    Shot(ShotData),
    /// Device status pulse
    DeviceStatus(DeviceStatus),
    /// Decoding anomaly, human-readable
    Error(String),
}

impl DecodedMessage {
    /// Decode the body of a complete frame (text after the discriminator line)
    pub fn from_frame(kind: FrameKind, body: &str) -> Self {
        let fields = parse_fields(body);
        match kind {
            FrameKind::Shot => DecodedMessage::Shot(ShotData::from_fields(fields)),
            FrameKind::DeviceStatus => DecodedMessage::DeviceStatus(DeviceStatus::from_fields(fields)),
        }
    }
}

impl From<DecodeError> for DecodedMessage {
    fn from(err: DecodeError) -> Self {
        DecodedMessage::Error(err.to_string())
    }
}

/// Split a frame body into `KEY=VALUE` pairs
///
/// Lines without `=` are skipped; the split happens at the first `=`.
/// Keys are trimmed, values are kept verbatim.
pub fn parse_fields(body: &str) -> Vec<(&str, &str)> {
    body.split('\n')
        .map(|line| line.strip_suffix('\r').unwrap_or(line))
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| match line.split_once('=') {
            Some((key, value)) => Some((key.trim(), value)),
            None => {
                debug!("Ignoring frame line without '=': {:?}", line);
                None
            }
        })
        .collect()
}
