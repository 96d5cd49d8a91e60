//! Crate-level error type shared by the dispatcher, codec, and collaborators.

use crate::event::Format;

/// Boxed error type used for backend and hook failures.
///
/// Backends (event log, cache) surface their own error types through
/// [`Error::Backend`] unchanged; the dispatcher never inspects them.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors produced by dispatch, fetch, the codec, and the collaborator
/// traits.
///
/// Two variants are *soft sentinels* rather than failures:
/// [`Error::NoEventsForAggregate`] and [`Error::EmptyState`]. `fetch`
/// returns them to describe an aggregate with no history (or no state
/// after replay); `dispatch` treats both as a fresh starting point and
/// proceeds.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Dispatch was given an event without an aggregate id.
    #[error("aggregate id is required")]
    AggregateIdRequired,

    /// `EventStore::list` was called without an aggregate id.
    #[error("list params: id is required")]
    ParamsIdRequired,

    /// The event carries no format tag, so no codec can be selected.
    #[error("event format not provided")]
    FormatNotProvided,

    /// The event's format tag does not match the active codec.
    #[error("invalid event format")]
    InvalidEventFormat,

    /// The requested codec exists as a format tag but has no
    /// implementation. JSON and STRING payloads are refused at the
    /// boundary until a codec is defined for them.
    #[error("{0:?} codec is not implemented")]
    NotImplemented(Format),

    /// The event's schema does not match the buffer it is being
    /// decoded into.
    #[error("invalid schema: event carries {event:?}, buffer expects {buffer:?}")]
    InvalidSchema {
        /// Schema recorded on the event.
        event: String,
        /// Canonical schema of the target buffer.
        buffer: String,
    },

    /// The payload bytes could not be decoded.
    #[error("failed to decode payload: {0}")]
    Decode(#[from] prost::DecodeError),

    /// The event's compact text form could not be produced or parsed.
    #[error("event text form: {0}")]
    Text(#[source] serde_json::Error),

    /// The log advanced between replay and the last-version check.
    ///
    /// The writer that observes this should re-fetch and retry; the
    /// backend's uniqueness constraint on `(aggregate_id, version)`
    /// remains the final arbiter for concurrent appends.
    #[error("concurrency exception: aggregate at version {aggregate}, log at version {last}")]
    ConcurrencyException {
        /// Version the replayed aggregate reached.
        aggregate: i64,
        /// Last version reported by the event log.
        last: i64,
    },

    /// Soft sentinel: the log holds no events for this aggregate.
    #[error("no events for aggregate {0}")]
    NoEventsForAggregate(String),

    /// Soft sentinel: replay finished but left the aggregate with no
    /// state (a reducer returned nothing). Carries the replayed
    /// version so a follow-up dispatch keeps assigning successor
    /// versions.
    #[error("aggregate state is empty at version {version}")]
    EmptyState {
        /// Version the aggregate reached before the state went empty.
        version: i64,
    },

    /// The cache holds no entry for the requested aggregate id.
    #[error("cache key does not exist")]
    CacheKeyMissing,

    /// The cache entry exists but is missing a required field.
    #[error("cache {0} field does not exist")]
    CacheFieldMissing(&'static str),

    /// A caller-supplied hook rejected the dispatch.
    #[error("hook failed: {0}")]
    Hook(#[source] BoxError),

    /// An error from an event log or cache backend, propagated
    /// unchanged.
    #[error("backend: {0}")]
    Backend(#[source] BoxError),
}

impl Error {
    /// Wrap a backend error for propagation through the dispatcher.
    pub fn backend(err: impl Into<BoxError>) -> Self {
        Error::Backend(err.into())
    }

    /// Whether this error is one of the soft fetch sentinels that
    /// dispatch treats as a fresh aggregate.
    pub fn is_fetch_sentinel(&self) -> bool {
        matches!(
            self,
            Error::NoEventsForAggregate(_) | Error::EmptyState { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinels_are_recognised() {
        assert!(Error::NoEventsForAggregate("u1".into()).is_fetch_sentinel());
        assert!(Error::EmptyState { version: 3 }.is_fetch_sentinel());
        assert!(!Error::AggregateIdRequired.is_fetch_sentinel());
        assert!(
            !Error::ConcurrencyException {
                aggregate: 1,
                last: 2
            }
            .is_fetch_sentinel()
        );
    }

    #[test]
    fn backend_wraps_and_displays_source() {
        let io_err = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "log backend down");
        let err = Error::backend(io_err);
        assert!(err.to_string().contains("log backend down"));
    }

    #[test]
    fn concurrency_exception_reports_both_versions() {
        let err = Error::ConcurrencyException {
            aggregate: 4,
            last: 7,
        };
        let msg = err.to_string();
        assert!(
            msg.contains('4'),
            "message should carry the aggregate version: {msg}"
        );
        assert!(msg.contains('7'), "message should carry the log version: {msg}");
    }

    #[test]
    fn cache_field_missing_names_the_field() {
        assert_eq!(
            Error::CacheFieldMissing("version").to_string(),
            "cache version field does not exist"
        );
        assert_eq!(
            Error::CacheFieldMissing("state").to_string(),
            "cache state field does not exist"
        );
    }

    // Errors cross task boundaries inside the dispatcher, so they must
    // be `Send + Sync`.
    const _: () = {
        #[allow(dead_code)]
        fn assert_send_sync<T: Send + Sync>() {}

        #[allow(dead_code)]
        fn check() {
            assert_send_sync::<Error>();
        }
    };
}
