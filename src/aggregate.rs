//! Versioned aggregate state and the replay engine.

use crate::error::Error;
use crate::event::Event;
use crate::payload::Payload;
use crate::rules::ReducerFn;

/// An in-memory projection of one entity, built by folding its event
/// history.
///
/// The aggregate is transient: it is rebuilt on demand from the event
/// log (or restored from a cache snapshot) and discarded when its
/// owner drops it. `version` always equals the version of the last
/// event applied, or 0 when no event has been applied.
#[derive(Debug)]
pub struct Aggregate {
    id: String,
    state: Option<Box<dyn Payload>>,
    version: i64,
}

impl Clone for Aggregate {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            state: self.state.as_ref().map(|s| s.clone_payload()),
            version: self.version,
        }
    }
}

impl Aggregate {
    /// Create a fresh aggregate at version 0 with no state.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            state: None,
            version: 0,
        }
    }

    /// Create an aggregate at a known version with no state, as left
    /// behind by a state-erasing reducer.
    pub(crate) fn with_version(id: impl Into<String>, version: i64) -> Self {
        Self {
            id: id.into(),
            state: None,
            version,
        }
    }

    /// The aggregate identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Version of the last event applied, 0 if none.
    pub fn version(&self) -> i64 {
        self.version
    }

    /// Borrow the current state, if any.
    pub fn state(&self) -> Option<&dyn Payload> {
        self.state.as_deref()
    }

    /// Borrow the current state downcast to its concrete type.
    pub fn state_as<M: Payload>(&self) -> Option<&M> {
        self.state().and_then(|s| s.downcast_ref())
    }

    /// Mutably borrow the current state.
    ///
    /// Used by [`Cache`](crate::Cache) implementations to decode a
    /// stored snapshot into the pre-seeded buffer.
    pub fn state_mut(&mut self) -> Option<&mut dyn Payload> {
        self.state.as_deref_mut()
    }

    /// Overwrite the version.
    ///
    /// Used by [`Cache`](crate::Cache) implementations when restoring
    /// a snapshot.
    pub fn set_version(&mut self, version: i64) {
        self.version = version;
    }

    /// Drop the current state, leaving the version untouched.
    ///
    /// Used by [`Cache`](crate::Cache) implementations when the stored
    /// snapshot records an empty state.
    pub fn clear_state(&mut self) {
        self.state = None;
    }

    /// Seed the state with a typed buffer before a cache read, so the
    /// cache knows what to decode into.
    pub(crate) fn seed_state(&mut self, state: Box<dyn Payload>) {
        self.state = Some(state);
    }

    /// Apply one event: decode it into `buffer`, fold it through the
    /// reducer, and advance the version.
    ///
    /// The reducer's `previous` argument is a copy of the prior state,
    /// so a reducer that mutates it in place cannot rewrite history;
    /// likewise the reducer receives its own copy of the decoded
    /// payload, so later caller-side mutation of `buffer` cannot reach
    /// the stored state.
    pub(crate) fn apply(
        &mut self,
        event: &Event,
        buffer: &mut dyn Payload,
        rules: &ReducerFn,
    ) -> Result<(), Error> {
        let previous = self.state.as_ref().map(|s| s.clone_payload());
        event.unmarshal(buffer)?;
        self.state = rules(&event.topic, buffer.clone_payload(), previous);
        self.version = event.version;
        Ok(())
    }

    /// Replay `events` in input order, aborting on the first error.
    ///
    /// After a successful load the aggregate's version equals the
    /// version of the last event.
    pub(crate) fn load(
        &mut self,
        events: &[Event],
        buffer: &mut dyn Payload,
        rules: &ReducerFn,
    ) -> Result<(), Error> {
        for event in events {
            self.apply(event, buffer, rules)?;
        }
        Ok(())
    }
}
