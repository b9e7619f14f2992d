use std::fmt;

use serde::{Deserialize, Serialize};

/// Telemetry events emitted by the sender and receiver engines.
///
/// Serialized as `{"event":"PACKET_SENT","seq":3,"windowStart":1,"windowEnd":4}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "event",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum TransferEvent {
    /// Initial transmission of a METADATA or DATA packet
    PacketSent {
        seq: i32,
        window_start: i32,
        window_end: i32,
    },

    /// Receiver accepted a METADATA or DATA packet
    PacketReceived { seq: i32 },

    /// Receiver emitted a cumulative ack
    AckSent { ack: i32 },

    /// Sender accepted a valid ack
    AckReceived { ack: i32 },

    /// An unacked packet exceeded the retransmission timeout
    Timeout { seq: i32 },

    /// A stored packet was sent again
    Retransmit { seq: i32 },

    /// The sender window advanced after an ack
    WindowMoved {
        old_start: i32,
        new_start: i32,
        new_end: i32,
    },

    /// Receiver byte progress against the advertised file size
    Progress { received: u64, total: u64 },

    /// Receiver wrote the reassembled file
    FileComplete { name: String, size: u64 },
}

impl TransferEvent {
    /// The wire tag of this event.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PacketSent { .. } => "PACKET_SENT",
            Self::PacketReceived { .. } => "PACKET_RECEIVED",
            Self::AckSent { .. } => "ACK_SENT",
            Self::AckReceived { .. } => "ACK_RECEIVED",
            Self::Timeout { .. } => "TIMEOUT",
            Self::Retransmit { .. } => "RETRANSMIT",
            Self::WindowMoved { .. } => "WINDOW_MOVED",
            Self::Progress { .. } => "PROGRESS",
            Self::FileComplete { .. } => "FILE_COMPLETE",
        }
    }
}

impl fmt::Display for TransferEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PacketSent { seq, window_start, window_end } => {
                write!(f, "packet_sent seq={} window=[{}, {}]", seq, window_start, window_end)
            }
            Self::PacketReceived { seq } => write!(f, "packet_received seq={}", seq),
            Self::AckSent { ack } => write!(f, "ack_sent ack={}", ack),
            Self::AckReceived { ack } => write!(f, "ack_received ack={}", ack),
            Self::Timeout { seq } => write!(f, "timeout seq={}", seq),
            Self::Retransmit { seq } => write!(f, "retransmit seq={}", seq),
            Self::WindowMoved { old_start, new_start, new_end } => {
                write!(f, "window_moved {} -> [{}, {}]", old_start, new_start, new_end)
            }
            Self::Progress { received, total } => {
                write!(f, "progress {}/{} bytes", received, total)
            }
            Self::FileComplete { name, size } => {
                write!(f, "file_complete name={} size={}", name, size)
            }
        }
    }
}

/// A timestamped event, one per telemetry datagram.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    #[serde(flatten)]
    pub event: TransferEvent,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
}

impl EventRecord {
    pub fn now(event: TransferEvent) -> Self {
        Self {
            event,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packet_sent_uses_camel_case_fields() {
        let record = EventRecord {
            event: TransferEvent::PacketSent {
                seq: 3,
                window_start: 1,
                window_end: 4,
            },
            timestamp: 1_700_000_000_000,
        };
        let value: serde_json::Value = serde_json::from_str(&record.to_json().unwrap()).unwrap();
        assert_eq!(value["event"], "PACKET_SENT");
        assert_eq!(value["seq"], 3);
        assert_eq!(value["windowStart"], 1);
        assert_eq!(value["windowEnd"], 4);
        assert_eq!(value["timestamp"], 1_700_000_000_000i64);
    }

    #[test]
    fn window_moved_shape() {
        let record = EventRecord {
            event: TransferEvent::WindowMoved {
                old_start: 0,
                new_start: 2,
                new_end: 5,
            },
            timestamp: 7,
        };
        let json = record.to_json().unwrap();
        assert_eq!(
            json,
            r#"{"event":"WINDOW_MOVED","oldStart":0,"newStart":2,"newEnd":5,"timestamp":7}"#
        );
    }

    #[test]
    fn record_parses_back() {
        let json = r#"{"event":"FILE_COMPLETE","name":"a.bin","size":3500,"timestamp":42}"#;
        let record: EventRecord = serde_json::from_str(json).unwrap();
        assert_eq!(
            record.event,
            TransferEvent::FileComplete {
                name: "a.bin".into(),
                size: 3500
            }
        );
        assert_eq!(record.timestamp, 42);
        assert_eq!(record.event.kind(), "FILE_COMPLETE");
    }
}
