//! The dispatch client: fetch, optimistic concurrency, hooks,
//! persistence, cache write-back, and publication.
//!
//! [`Client`] ties the collaborators together. One dispatch runs the
//! full protocol: rebuild the aggregate (cache-assisted), run the
//! caller's hooks against it, persist the new event under the next
//! version, fold it into the aggregate, write the snapshot back to the
//! cache, and publish on the bus. Persistence is the commit point:
//! any failure strictly before `create` leaves no trace in the log;
//! any failure after it is reported, but the log remains
//! authoritative.

use std::sync::Arc;
use std::time::Instant;

use crate::aggregate::Aggregate;
use crate::cache::Cache;
use crate::error::{BoxError, Error};
use crate::event::Event;
use crate::payload::Payload;
use crate::pubsub::Bus;
use crate::rules::DomainRules;
use crate::store::{EventStore, ListParams};

/// Caller-supplied function invoked after fetch and before
/// persistence.
///
/// A hook observes the reconstructed aggregate as it stood *before*
/// the new event, and may amend the dispatch buffer; the amended
/// buffer is what gets re-encoded into the event and persisted. The
/// first hook error aborts the dispatch with no durable effect.
pub type Hook = Box<dyn Fn(&Aggregate, &mut dyn Payload) -> Result<(), BoxError> + Send + Sync>;

/// Event-sourcing client: aggregate fetch and event dispatch over a
/// pluggable event log, with an optional snapshot cache and an
/// in-process pub/sub bus.
pub struct Client {
    store: Arc<dyn EventStore>,
    cache: Option<Arc<dyn Cache>>,
    rules: DomainRules,
    bus: Bus,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("cache", &self.cache.is_some())
            .field("rules", &self.rules)
            .finish()
    }
}

impl Client {
    /// Create a client over the given event log.
    ///
    /// The client publishes on the process-wide default bus; use
    /// [`with_bus`](Client::with_bus) for an isolated one.
    pub fn new(store: Arc<dyn EventStore>) -> Self {
        Self {
            store,
            cache: None,
            rules: DomainRules::new(),
            bus: Bus::global().clone(),
        }
    }

    /// Replace the bus this client publishes on.
    pub fn with_bus(mut self, bus: Bus) -> Self {
        self.bus = bus;
        self
    }

    /// Attach a snapshot cache. Fetch will consult it before
    /// replaying the log, and dispatch writes each new snapshot back.
    pub fn register_cache_service(&mut self, cache: Arc<dyn Cache>) {
        self.cache = Some(cache);
    }

    /// Register domain rules for the payload type of `exemplar`.
    /// See [`DomainRules::register`].
    pub fn register_domain_rules<M, F>(&self, rules: F, exemplar: M)
    where
        M: Payload,
        F: Fn(&str, Box<M>, Option<Box<M>>) -> Option<Box<M>> + Send + Sync + 'static,
    {
        self.rules.register(rules, exemplar);
    }

    /// The bus this client publishes persisted events on.
    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    /// Dispatch one event: rebuild the aggregate, run `hooks`, persist
    /// the event at the aggregate's successor version, apply it, cache
    /// the snapshot, and publish.
    ///
    /// `buffer` determines the payload type: the incoming event is
    /// validated against it, hooks may amend it, and its re-encoded
    /// bytes are what gets persisted.
    ///
    /// # Errors
    ///
    /// Before persistence (no durable effect): precondition, codec,
    /// fetch, and hook errors. After persistence (the event is already
    /// durable): apply and cache errors; publication failures are
    /// never reported.
    #[tracing::instrument(
        name = "dispatch",
        skip_all,
        fields(aggregate_id = %event.aggregate_id, topic = %event.topic)
    )]
    pub async fn dispatch(
        &self,
        mut event: Event,
        buffer: &mut dyn Payload,
        hooks: &[Hook],
    ) -> Result<Aggregate, Error> {
        if event.aggregate_id.is_empty() {
            return Err(Error::AggregateIdRequired);
        }
        let started = Instant::now();

        // 1. Decode the incoming event into a private copy of the
        //    caller's buffer. Hooks may mutate the buffer itself, so
        //    the decoded view used for replay must be independent.
        let mut decoded = buffer.clone_payload();
        event.unmarshal(decoded.as_mut())?;

        // 2. Rebuild the aggregate. An aggregate with no history (or
        //    no state after replay) is a valid starting point, not a
        //    failure.
        let mut agg = match self.fetch_aggregate(&event.aggregate_id, decoded.as_mut()).await {
            Ok(agg) => agg,
            Err(Error::NoEventsForAggregate(_)) => Aggregate::new(&event.aggregate_id),
            Err(Error::EmptyState { version }) => {
                Aggregate::with_version(&event.aggregate_id, version)
            }
            Err(err) => return Err(err),
        };

        // 3. Hooks observe the aggregate before the new event exists
        //    anywhere; the first error aborts with no durable effect.
        for hook in hooks {
            hook(&agg, buffer).map_err(Error::Hook)?;
        }

        // 4. Re-encode the (possibly amended) buffer into the event.
        event.marshal(buffer)?;

        // 5. The new event extends the history by exactly one.
        event.set_version(agg.version() + 1);

        // 6. Persist. The backend's uniqueness constraint on
        //    (aggregate_id, version) rejects a concurrent writer that
        //    raced us to the same successor version. Once `create`
        //    returns, the event is durable and authoritative.
        self.store.create(&event).await?;
        tracing::info!(
            version = event.version,
            elapsed = ?started.elapsed(),
            "event persisted"
        );

        // 7. Fold the event into the in-memory aggregate.
        let rules = self.rules.for_payload(buffer);
        agg.apply(&event, buffer, &rules)?;

        // 8. Write the snapshot back so the next fetch can skip
        //    replay. The event is already durable, so this error is
        //    reported while the log stays ahead of the cache.
        if let Some(cache) = &self.cache {
            cache.set(&event.aggregate_id, &agg).await?;
        }

        // 9. Best-effort fan-out; failures are never reported.
        self.bus.publish(Arc::new(event));

        Ok(agg)
    }

    /// Rebuild the aggregate identified by `aggregate_id`, consulting
    /// the cache first when one is configured.
    ///
    /// `buffer` supplies the payload type for decoding and rules
    /// lookup; its contents are overwritten during replay.
    ///
    /// The rebuild is bracketed by a final last-version check: if the
    /// log grew between `list` and `get_last_version`, the fetch fails
    /// with [`Error::ConcurrencyException`]. The backend's uniqueness
    /// constraint remains the final arbiter at append time.
    ///
    /// # Errors
    ///
    /// * [`Error::NoEventsForAggregate`] -- soft sentinel, the log has
    ///   no events for this aggregate.
    /// * [`Error::EmptyState`] -- soft sentinel, replay finished with
    ///   no state.
    /// * [`Error::ConcurrencyException`] -- the log advanced during
    ///   the rebuild.
    #[tracing::instrument(name = "fetch", skip_all, fields(aggregate_id = %aggregate_id))]
    pub async fn fetch(
        &self,
        aggregate_id: &str,
        buffer: &mut dyn Payload,
    ) -> Result<Aggregate, Error> {
        self.fetch_aggregate(aggregate_id, buffer).await
    }

    async fn fetch_aggregate(
        &self,
        aggregate_id: &str,
        buffer: &mut dyn Payload,
    ) -> Result<Aggregate, Error> {
        // Cache-first attempt: a snapshot is only trusted when it
        // matches the log's last version exactly; anything else falls
        // through to a full rebuild.
        if let Some(cache) = &self.cache {
            let mut cached = Aggregate::new(aggregate_id);
            cached.seed_state(buffer.clone_payload());
            match cache.get(aggregate_id, &mut cached).await {
                Ok(()) => {
                    let last = self.store.get_last_version(aggregate_id).await?;
                    if cached.version() == last {
                        tracing::debug!(version = last, "cache hit");
                        return Ok(cached);
                    }
                    tracing::debug!(
                        cached = cached.version(),
                        last,
                        "cache stale, rebuilding from log"
                    );
                }
                Err(err) => tracing::debug!(error = %err, "cache miss, rebuilding from log"),
            }
        }

        // Rebuild from the log.
        let events = self
            .store
            .list(ListParams::for_aggregate(aggregate_id))
            .await?;
        if events.is_empty() {
            return Err(Error::NoEventsForAggregate(aggregate_id.to_string()));
        }

        let mut agg = Aggregate::new(aggregate_id);
        let rules = self.rules.for_payload(buffer);
        agg.load(&events, buffer, &rules)?;

        // The log may have grown while we were replaying.
        let last = self.store.get_last_version(aggregate_id).await?;
        if agg.version() != last {
            return Err(Error::ConcurrencyException {
                aggregate: agg.version(),
                last,
            });
        }

        if agg.state().is_none() {
            return Err(Error::EmptyState {
                version: agg.version(),
            });
        }

        Ok(agg)
    }
}
