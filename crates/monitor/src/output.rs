//! Event printing for the monitor

use crate::config::{OutputFormat, OutputSettings};
use device::NotificationSink;
use protocol::EventCategory;
use serde_json::{Value, json};
use std::io::{self, Write};
use std::sync::{Mutex, PoisonError};

/// Writes every driver notification as one line
pub struct EventPrinter<W: Write + Send> {
    settings: OutputSettings,
    out: Mutex<W>,
}

impl EventPrinter<io::Stdout> {
    pub fn stdout(settings: OutputSettings) -> Self {
        Self::new(settings, io::stdout())
    }
}

impl<W: Write + Send> EventPrinter<W> {
    pub fn new(settings: OutputSettings, out: W) -> Self {
        Self {
            settings,
            out: Mutex::new(out),
        }
    }

    /// Line for one notification, `None` if filtered out
    pub fn render(&self, category: EventCategory, payload: &str) -> Option<String> {
        let data = match category {
            EventCategory::Error => Value::String(payload.to_string()),
            _ => serde_json::from_str(payload).unwrap_or_else(|_| Value::String(payload.to_string())),
        };

        if category == EventCategory::Shot
            && self.settings.final_readings_only
            && !(data.get("BACK_RPM").is_some() && data.get("SIDE_RPM").is_some())
        {
            return None;
        }

        Some(match self.settings.format {
            OutputFormat::Json => json!({ "event": category.as_str(), "data": data }).to_string(),
            OutputFormat::Text => render_text(category, &data),
        })
    }

    #[cfg(test)]
    fn into_inner(self) -> W {
        self.out.into_inner().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<W: Write + Send> NotificationSink for EventPrinter<W> {
    fn notify(&self, category: EventCategory, payload: &str) {
        let Some(line) = self.render(category, payload) else {
            tracing::debug!("Filtered early shot reading");
            return;
        };
        let mut out = self.out.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = writeln!(out, "{}", line).and_then(|_| out.flush()) {
            tracing::warn!("Failed to write event: {}", e);
        }
    }
}

fn field(data: &Value, key: &str) -> String {
    match data.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(value) => value.to_string(),
        None => "-".to_string(),
    }
}

fn render_text(category: EventCategory, data: &Value) -> String {
    match category {
        EventCategory::Shot => {
            let reading = if data.get("BACK_RPM").is_some() {
                "final"
            } else {
                "early"
            };
            format!(
                "Shot {} ({}): {} mph, launch {} deg, azimuth {} deg, back spin {} rpm, side spin {} rpm",
                field(data, "SHOT_ID"),
                reading,
                field(data, "SPEED_MPH"),
                field(data, "ELEVATION_DEG"),
                field(data, "AZIMUTH_DEG"),
                field(data, "BACK_RPM"),
                field(data, "SIDE_RPM"),
            )
        }
        EventCategory::Connection => match data.as_bool() {
            Some(true) => "Connected to GC2".to_string(),
            _ => "Disconnected from GC2".to_string(),
        },
        EventCategory::Error => format!("Error: {}", data.as_str().unwrap_or_default()),
        EventCategory::DeviceStatus => format!(
            "Status: ready={} ball={}",
            field(data, "isReady"),
            field(data, "ballDetected")
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EARLY: &str = r#"{"SHOT_ID":4,"SPEED_MPH":151.2,"ELEVATION_DEG":12.5}"#;
    const FINAL: &str =
        r#"{"SHOT_ID":4,"SPEED_MPH":151.2,"ELEVATION_DEG":12.5,"BACK_RPM":2650,"SIDE_RPM":-310}"#;

    fn printer(format: OutputFormat, final_readings_only: bool) -> EventPrinter<Vec<u8>> {
        EventPrinter::new(
            OutputSettings {
                format,
                final_readings_only,
            },
            Vec::new(),
        )
    }

    #[test]
    fn test_json_lines() {
        let printer = printer(OutputFormat::Json, false);
        let line = printer.render(EventCategory::Shot, FINAL).unwrap();
        let value: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["event"], "shot");
        assert_eq!(value["data"]["BACK_RPM"], 2650);

        let line = printer.render(EventCategory::Connection, "true").unwrap();
        assert_eq!(line, r#"{"data":true,"event":"connection"}"#);

        let line = printer.render(EventCategory::Error, "boom").unwrap();
        let value: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["data"], "boom");
    }

    #[test]
    fn test_final_readings_filter() {
        let printer = printer(OutputFormat::Json, true);
        assert!(printer.render(EventCategory::Shot, EARLY).is_none());
        assert!(printer.render(EventCategory::Shot, FINAL).is_some());
        assert!(printer.render(EventCategory::Connection, "false").is_some());
    }

    #[test]
    fn test_text_lines() {
        let printer = printer(OutputFormat::Text, false);
        let line = printer.render(EventCategory::Shot, EARLY).unwrap();
        assert!(line.starts_with("Shot 4 (early): 151.2 mph"));
        assert!(line.contains("back spin - rpm"));

        assert_eq!(
            printer.render(EventCategory::Connection, "false").unwrap(),
            "Disconnected from GC2"
        );
        assert_eq!(
            printer
                .render(
                    EventCategory::DeviceStatus,
                    r#"{"isReady":true,"ballDetected":false}"#
                )
                .unwrap(),
            "Status: ready=true ball=false"
        );
    }

    #[test]
    fn test_notify_writes_lines() {
        let printer = printer(OutputFormat::Text, true);
        printer.notify(EventCategory::Connection, "true");
        printer.notify(EventCategory::Shot, EARLY);
        printer.notify(EventCategory::Error, "Device read failed: I/O error: pipe");

        let written = String::from_utf8(printer.into_inner()).unwrap();
        assert_eq!(
            written,
            "Connected to GC2\nError: Device read failed: I/O error: pipe\n"
        );
    }
}
