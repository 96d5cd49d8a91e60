//! Embeddable event sourcing over a pluggable event log.
//!
//! `eventgate` derives aggregate state by replaying an ordered log of
//! events keyed by aggregate identifier, appends new events under
//! optimistic concurrency control, and fans every persisted event out
//! to in-process subscribers. The event log and the snapshot cache
//! are collaborator traits; any backend that honours their contracts
//! plugs in.
//!
//! # Key Types
//!
//! | Type | Role |
//! |------|------|
//! | [`Client`] | Dispatch protocol: fetch, hooks, persist, apply, cache, publish |
//! | [`Event`] | Immutable record of one state transition |
//! | [`Aggregate`] | Versioned projection built by folding event history |
//! | [`Payload`] | Typed payload codec, auto-implemented for prost messages |
//! | [`EventStore`] | Append-only event log collaborator |
//! | [`Cache`] | Aggregate snapshot collaborator |
//! | [`Bus`] | In-process topic pub/sub with worker dispatch |
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use eventgate::{Client, Event, MemoryEventStore};
//!
//! // 1. Define a payload type. Any prost message with a canonical
//! //    name works.
//! #[derive(Clone, PartialEq, prost::Message)]
//! struct User {
//!     #[prost(string, tag = "1")]
//!     id: String,
//!     #[prost(string, tag = "2")]
//!     name: String,
//! }
//!
//! impl prost::Name for User {
//!     const NAME: &'static str = "User";
//!     const PACKAGE: &'static str = "example";
//! }
//!
//! # async fn run() -> Result<(), eventgate::Error> {
//! // 2. Wire a client over an event log and register domain rules.
//! let client = Client::new(Arc::new(MemoryEventStore::new()));
//! client.register_domain_rules(
//!     |topic: &str, new: Box<User>, previous: Option<Box<User>>| match topic {
//!         "user_created" => Some(new),
//!         _ => previous,
//!     },
//!     User::default(),
//! );
//!
//! // 3. Dispatch an event and observe the aggregate it produced.
//! let mut user = User { id: "u1".into(), name: "Luke".into() };
//! let event = Event::with_payload("user_created", "u1", &user)?;
//! let agg = client.dispatch(event, &mut user, &[]).await?;
//! assert_eq!(agg.version(), 1);
//! # Ok(())
//! # }
//! ```
//!
//! # Dispatch protocol
//!
//! Persistence is the commit point. A dispatch that fails before
//! `EventStore::create` leaves no trace in the log; once `create` has
//! returned, the event is durable and later failures (cache write,
//! publication) never roll it back. Optimistic concurrency rests on
//! the backend's uniqueness constraint over `(aggregate_id, version)`,
//! double-checked by a last-version read bracketing each rebuild.

mod aggregate;
pub use aggregate::Aggregate;
mod cache;
pub use cache::{Cache, FIELD_SCHEMA, FIELD_STATE, FIELD_VERSION, decode_state_text, encode_state_text};
mod client;
pub use client::{Client, Hook};
mod error;
pub use error::{BoxError, Error};
mod event;
pub use event::{Event, Format};
mod memory;
pub use memory::{MemoryCache, MemoryEventStore};
mod payload;
pub use payload::Payload;
mod pubsub;
pub use pubsub::{
    ActionFn, ActionTopics, Bus, SubscriberId, subscribe, topics, unsubscribe, worker,
};
mod rules;
pub use rules::{DomainRules, ReducerFn};
mod store;
pub use store::{EventStore, ListParams};
mod wire;
pub use wire::{EventRecord, decode_event, encode_event};
