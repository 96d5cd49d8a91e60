//! Event log collaborator interface.
//!
//! The concrete backend (a time-series database, a SQL table, the
//! in-memory store in [`memory`](crate::memory)) lives outside the
//! core. The dispatcher only relies on the contract spelled out on
//! [`EventStore`].

use async_trait::async_trait;

use crate::error::Error;
use crate::event::Event;

/// Parameters for listing an aggregate's events.
///
/// `id` is required. When `from_version >= 0 && to_version > 0` the
/// range bounds the listing inclusively; any other combination lists
/// the aggregate's full history.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ListParams {
    /// Aggregate identifier (required).
    pub id: String,
    /// Lower version bound, inclusive (optional).
    pub from_version: i64,
    /// Upper version bound, inclusive (optional).
    pub to_version: i64,
}

impl ListParams {
    /// List the full history of one aggregate.
    pub fn for_aggregate(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    /// The effective version range, if one is requested.
    pub fn bounds(&self) -> Option<(i64, i64)> {
        (self.from_version >= 0 && self.to_version > 0)
            .then_some((self.from_version, self.to_version))
    }
}

/// An append-only event log keyed by aggregate identifier.
///
/// # Contract
///
/// - Events for a given aggregate are returned in ascending `version`
///   order, and versions form a contiguous sequence starting at 1.
/// - [`create`](EventStore::create) enforces uniqueness on
///   `(aggregate_id, version)` and returns an error on collision;
///   this is the final arbiter of the optimistic-concurrency
///   protocol.
/// - [`get_last_version`](EventStore::get_last_version) returns the
///   maximum stored version, or 0 when the aggregate has no events.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Append one event. The event is durable once this returns `Ok`.
    async fn create(&self, event: &Event) -> Result<(), Error>;

    /// Maximum stored version for the aggregate, 0 if none.
    async fn get_last_version(&self, aggregate_id: &str) -> Result<i64, Error>;

    /// List events in ascending version order.
    ///
    /// # Errors
    ///
    /// [`Error::ParamsIdRequired`] when `params.id` is empty.
    async fn list(&self, params: ListParams) -> Result<Vec<Event>, Error>;
}
