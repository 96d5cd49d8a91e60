//! Protobuf wire record for events.
//!
//! [`EventRecord`] maps 1:1 onto [`Event`] with the format tag as a
//! protobuf enumeration and the create time as a protobuf timestamp.
//! Backends that store binary blobs persist the record bytes; backends
//! that prefer strings can use the compact text form on
//! [`Event::to_text`] instead.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use prost::Message;

use crate::error::Error;
use crate::event::{Event, Format};

/// The wire shape of one event.
#[derive(Clone, PartialEq, Message)]
pub struct EventRecord {
    #[prost(string, tag = "1")]
    pub topic: String,
    #[prost(string, tag = "2")]
    pub aggregate_id: String,
    #[prost(int64, tag = "3")]
    pub version: i64,
    #[prost(string, tag = "4")]
    pub schema: String,
    #[prost(enumeration = "Format", tag = "5")]
    pub format: i32,
    #[prost(bytes = "vec", tag = "6")]
    pub data: Vec<u8>,
    #[prost(int32, tag = "7")]
    pub priority: i32,
    #[prost(string, tag = "8")]
    pub signature: String,
    #[prost(string, tag = "9")]
    pub origin_name: String,
    #[prost(string, tag = "10")]
    pub origin_ip: String,
    #[prost(map = "string, string", tag = "11")]
    pub metadata: std::collections::HashMap<String, String>,
    #[prost(message, optional, tag = "12")]
    pub create_time: Option<prost_types::Timestamp>,
}

impl From<&Event> for EventRecord {
    fn from(event: &Event) -> Self {
        Self {
            topic: event.topic.clone(),
            aggregate_id: event.aggregate_id.clone(),
            version: event.version,
            schema: event.schema.clone(),
            // Events reach the wire only after marshalling, so a
            // missing tag collapses to the protobuf default.
            format: event.format.map(|f| f as i32).unwrap_or_default(),
            data: event.data.clone(),
            priority: event.priority,
            signature: event.signature.clone(),
            origin_name: event.origin_name.clone(),
            origin_ip: event.origin_ip.clone(),
            metadata: event.metadata.clone(),
            create_time: Some(timestamp_from(event.create_time)),
        }
    }
}

impl From<EventRecord> for Event {
    fn from(record: EventRecord) -> Self {
        Self {
            topic: record.topic,
            aggregate_id: record.aggregate_id,
            version: record.version,
            schema: record.schema,
            format: Format::try_from(record.format).ok(),
            data: record.data,
            priority: record.priority,
            signature: record.signature,
            origin_name: record.origin_name,
            origin_ip: record.origin_ip,
            metadata: record.metadata,
            create_time: record
                .create_time
                .map(|ts| time_from(&ts))
                .unwrap_or(UNIX_EPOCH),
        }
    }
}

/// Encode an event into its wire bytes.
pub fn encode_event(event: &Event) -> Vec<u8> {
    EventRecord::from(event).encode_to_vec()
}

/// Decode an event from its wire bytes.
pub fn decode_event(data: &[u8]) -> Result<Event, Error> {
    Ok(EventRecord::decode(data)?.into())
}

fn timestamp_from(time: SystemTime) -> prost_types::Timestamp {
    match time.duration_since(UNIX_EPOCH) {
        Ok(elapsed) => prost_types::Timestamp {
            seconds: elapsed.as_secs() as i64,
            nanos: elapsed.subsec_nanos() as i32,
        },
        // Pre-epoch times clamp to the epoch.
        Err(_) => prost_types::Timestamp::default(),
    }
}

fn time_from(ts: &prost_types::Timestamp) -> SystemTime {
    UNIX_EPOCH + Duration::new(ts.seconds.max(0) as u64, ts.nanos.max(0) as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::test_fixtures::luke;

    #[test]
    fn wire_roundtrip_preserves_every_field() {
        let mut event =
            Event::with_payload("user_created", "u1", &luke()).expect("factory should succeed");
        event.set_version(7);
        event.priority = 2;
        event
            .metadata
            .insert("region".to_string(), "eu".to_string());

        let bytes = encode_event(&event);
        let decoded = decode_event(&bytes).expect("decode should succeed");
        assert_eq!(decoded, event);
    }

    #[test]
    fn record_carries_format_as_enumeration() {
        let event =
            Event::with_payload("user_created", "u1", &luke()).expect("factory should succeed");
        let record = EventRecord::from(&event);
        assert_eq!(record.format, Format::Protobuf as i32);
        assert_eq!(record.format(), Format::Protobuf);
    }

    #[test]
    fn unknown_format_tag_decodes_to_none() {
        let mut record = EventRecord::from(
            &Event::with_payload("user_created", "u1", &luke()).expect("factory should succeed"),
        );
        record.format = 99;
        let event = Event::from(record);
        assert_eq!(event.format, None);
    }

    #[test]
    fn decode_rejects_garbage() {
        let result = decode_event(&[0xff, 0xff, 0xff, 0xff]);
        assert!(
            matches!(result, Err(Error::Decode(_))),
            "expected Decode, got: {result:?}"
        );
    }

    #[test]
    fn missing_timestamp_defaults_to_epoch() {
        let mut record = EventRecord::from(
            &Event::with_payload("user_created", "u1", &luke()).expect("factory should succeed"),
        );
        record.create_time = None;
        let event = Event::from(record);
        assert_eq!(event.create_time, UNIX_EPOCH);
    }
}
