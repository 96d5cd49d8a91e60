//! In-memory event log and cache, for tests and examples.
//!
//! Both types honour the full collaborator contracts -- version
//! uniqueness and ordering on the store side, the field-level
//! `{version, schema, state}` layout on the cache side -- so
//! application test suites can exercise dispatch end-to-end without a
//! database.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::aggregate::Aggregate;
use crate::cache::{self, Cache, FIELD_SCHEMA, FIELD_STATE, FIELD_VERSION};
use crate::error::Error;
use crate::event::Event;
use crate::store::{EventStore, ListParams};

/// In-memory [`EventStore`] keeping one ordered log per aggregate.
#[derive(Debug, Default)]
pub struct MemoryEventStore {
    logs: Mutex<HashMap<String, Vec<Event>>>,
}

impl MemoryEventStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of events stored for `aggregate_id`.
    pub fn event_count(&self, aggregate_id: &str) -> usize {
        self.logs
            .lock()
            .expect("event log lock poisoned")
            .get(aggregate_id)
            .map(Vec::len)
            .unwrap_or(0)
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn create(&self, event: &Event) -> Result<(), Error> {
        let mut logs = self.logs.lock().expect("event log lock poisoned");
        let log = logs.entry(event.aggregate_id.clone()).or_default();
        if log.iter().any(|existing| existing.version == event.version) {
            return Err(Error::backend(format!(
                "event {}@{} already exists",
                event.aggregate_id, event.version
            )));
        }
        log.push(event.clone());
        log.sort_by_key(|e| e.version);
        Ok(())
    }

    async fn get_last_version(&self, aggregate_id: &str) -> Result<i64, Error> {
        Ok(self
            .logs
            .lock()
            .expect("event log lock poisoned")
            .get(aggregate_id)
            .and_then(|log| log.last())
            .map(|event| event.version)
            .unwrap_or(0))
    }

    async fn list(&self, params: ListParams) -> Result<Vec<Event>, Error> {
        if params.id.is_empty() {
            return Err(Error::ParamsIdRequired);
        }
        let logs = self.logs.lock().expect("event log lock poisoned");
        let Some(log) = logs.get(&params.id) else {
            return Ok(Vec::new());
        };
        let events = match params.bounds() {
            Some((from, to)) => log
                .iter()
                .filter(|event| event.version >= from && event.version <= to)
                .cloned()
                .collect(),
            None => log.clone(),
        };
        Ok(events)
    }
}

/// In-memory [`Cache`] storing snapshots as field hashes, the way a
/// key-value backend would.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, HashMap<String, String>>>,
}

impl MemoryCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a raw field hash, bypassing the snapshot encoding.
    /// Lets tests plant malformed entries.
    pub fn insert_fields(&self, aggregate_id: impl Into<String>, fields: HashMap<String, String>) {
        self.entries
            .lock()
            .expect("cache lock poisoned")
            .insert(aggregate_id.into(), fields);
    }

    /// Inspect the stored field hash for `aggregate_id`.
    pub fn fields(&self, aggregate_id: &str) -> Option<HashMap<String, String>> {
        self.entries
            .lock()
            .expect("cache lock poisoned")
            .get(aggregate_id)
            .cloned()
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, aggregate_id: &str, out: &mut Aggregate) -> Result<(), Error> {
        let entries = self.entries.lock().expect("cache lock poisoned");
        let fields = entries.get(aggregate_id).ok_or(Error::CacheKeyMissing)?;

        let version = fields
            .get(FIELD_VERSION)
            .ok_or(Error::CacheFieldMissing("version"))?;
        if !version.is_empty() {
            let version: i64 = version.parse().map_err(Error::backend)?;
            if version != 0 {
                out.set_version(version);
            }
        }

        let state = fields
            .get(FIELD_STATE)
            .ok_or(Error::CacheFieldMissing("state"))?;
        cache::decode_state_text(state, out)
    }

    async fn set(&self, aggregate_id: &str, agg: &Aggregate) -> Result<(), Error> {
        let fields = HashMap::from([
            (FIELD_VERSION.to_string(), agg.version().to_string()),
            (
                FIELD_SCHEMA.to_string(),
                agg.state().map(|s| s.schema()).unwrap_or_default(),
            ),
            (FIELD_STATE.to_string(), cache::encode_state_text(agg)?),
        ]);
        self.entries
            .lock()
            .expect("cache lock poisoned")
            .insert(aggregate_id.to_string(), fields);
        Ok(())
    }
}
