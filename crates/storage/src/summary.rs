//! Per-packet summary columns.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// What a packet list shows for one packet, as computed by the dissector.
///
/// Every part is optional; a summary with nothing set is not stored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PacketSummary {
    /// Capture time.
    pub timestamp: Option<DateTime<Utc>>,
    /// Length of the packet on the wire, which may exceed the captured bytes.
    pub captured_length: Option<u32>,
    pub interface_id: Option<u32>,
    pub source: Option<String>,
    pub destination: Option<String>,
    pub protocol: Option<String>,
    pub info: Option<String>,
}

impl PacketSummary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn with_captured_length(mut self, length: u32) -> Self {
        self.captured_length = Some(length);
        self
    }

    pub fn with_interface(mut self, interface_id: u32) -> Self {
        self.interface_id = Some(interface_id);
        self
    }

    /// Set the source and destination address columns.
    pub fn with_endpoints(mut self, source: impl Into<String>, destination: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self.destination = Some(destination.into());
        self
    }

    pub fn with_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = Some(protocol.into());
        self
    }

    pub fn with_info(mut self, info: impl Into<String>) -> Self {
        self.info = Some(info.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Stored timestamps are RFC 3339 with nanoseconds in UTC, so text order is
/// time order.
pub(crate) fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

pub(crate) fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_summary() {
        assert!(PacketSummary::new().is_empty());
        assert!(!PacketSummary::new().with_protocol("DNS").is_empty());
    }

    #[test]
    fn test_timestamp_text_keeps_nanoseconds() {
        let timestamp = DateTime::from_timestamp(1_700_000_000, 123_456_789).unwrap();
        let text = format_timestamp(&timestamp);
        assert_eq!(text, "2023-11-14T22:13:20.123456789Z");
        assert_eq!(parse_timestamp(&text), Some(timestamp));
        assert_eq!(parse_timestamp("yesterday"), None);
    }
}
