//! Topic pub/sub bus with worker dispatch.
//!
//! Every successfully persisted event is fanned out, best effort, to
//! in-process subscribers. A subscriber registers a channel sender
//! together with the topics it cares about (optionally with action
//! functions per topic); [`Bus::publish`] delivers matching events
//! without blocking, and [`Bus::worker`] drains a subscriber's channel
//! and runs its registered actions.
//!
//! The bus is an owned object -- the [`Client`](crate::Client) holds
//! one -- and a process-wide default is exposed through
//! [`Bus::global`] and the free functions at the crate root.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use tokio::sync::mpsc;

use crate::error::BoxError;
use crate::event::Event;

/// Action run by a worker for each event on a subscribed topic.
///
/// Failures are logged and skipped; they never reach the publisher.
pub type ActionFn = Arc<dyn Fn(&Event) -> Result<(), BoxError> + Send + Sync>;

/// Topics to subscribe to, each with its (possibly empty) list of
/// worker actions.
pub type ActionTopics = HashMap<String, Vec<ActionFn>>;

/// Build an [`ActionTopics`] with no actions attached, for
/// subscribers that only want raw events on their channel.
pub fn topics<I, S>(names: I) -> ActionTopics
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    names.into_iter().map(|name| (name.into(), Vec::new())).collect()
}

/// Identity of one subscription, handed out by [`Bus::subscribe`].
///
/// Channel senders are not hashable, so the table is keyed by this id
/// rather than by the channel itself.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

impl std::fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One subscriber's channel and topic set.
struct Handler {
    sender: mpsc::Sender<Arc<Event>>,
    topics: HashMap<String, Vec<ActionFn>>,
}

/// The two tables guarded by the bus mutex.
///
/// Invariant: `refs[t]` equals the number of subscribers whose topic
/// set contains `t`; topics at zero are removed.
#[derive(Default)]
struct Tables {
    subscribers: HashMap<SubscriberId, Handler>,
    refs: HashMap<String, i64>,
}

/// In-process topic bus.
///
/// Cheap to clone; clones share the same subscriber tables.
#[derive(Clone, Default)]
pub struct Bus {
    inner: Arc<BusInner>,
}

#[derive(Default)]
struct BusInner {
    tables: Mutex<Tables>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for Bus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tables = self.inner.tables.lock().expect("pubsub lock poisoned");
        f.debug_struct("Bus")
            .field("subscribers", &tables.subscribers.len())
            .field("topics", &tables.refs.len())
            .finish()
    }
}

static GLOBAL_BUS: OnceLock<Bus> = OnceLock::new();

impl Bus {
    /// Create a bus with no subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide default bus.
    pub fn global() -> &'static Bus {
        GLOBAL_BUS.get_or_init(Bus::new)
    }

    /// Register `sender` for the given topics and return the
    /// subscription's identity.
    ///
    /// Empty topic names are skipped. The bus never blocks sending to
    /// the channel, so the caller must size its buffer to tolerate
    /// the expected burst rate; a buffer of 1 is sufficient for a
    /// channel used to observe a single event.
    pub fn subscribe(&self, sender: mpsc::Sender<Arc<Event>>, topics: ActionTopics) -> SubscriberId {
        let id = SubscriberId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let mut guard = self.inner.tables.lock().expect("pubsub lock poisoned");
        let tables = &mut *guard;
        tables.subscribers.insert(
            id,
            Handler {
                sender,
                topics: HashMap::new(),
            },
        );
        merge_topics(tables, id, topics);
        id
    }

    /// Expand an existing subscription with more topics.
    ///
    /// Topics already held by the subscription gain the extra actions
    /// without counting twice in the reference table. Unknown ids are
    /// ignored.
    pub fn add_topics(&self, id: SubscriberId, topics: ActionTopics) {
        let mut guard = self.inner.tables.lock().expect("pubsub lock poisoned");
        merge_topics(&mut guard, id, topics);
    }

    /// Remove a subscription, releasing its topic references.
    ///
    /// Dropping the stored sender closes the subscriber's channel once
    /// no other senders remain, which is what ends a running worker.
    pub fn unsubscribe(&self, id: SubscriberId) {
        let mut guard = self.inner.tables.lock().expect("pubsub lock poisoned");
        let tables = &mut *guard;
        let Some(handler) = tables.subscribers.remove(&id) else {
            return;
        };
        for topic in handler.topics.into_keys() {
            let count = tables.refs.get(&topic).copied().unwrap_or(0);
            if count <= 1 {
                tables.refs.remove(&topic);
            } else {
                tables.refs.insert(topic, count - 1);
            }
        }
    }

    /// Deliver `event` to every subscriber of its topic.
    ///
    /// Fan-out is non-blocking: a send that would block (the
    /// subscriber's channel is full) or that fails (the receiver is
    /// gone) drops the event for that subscriber and is logged. An
    /// event with an empty topic is ignored.
    pub fn publish(&self, event: Arc<Event>) {
        if event.topic.is_empty() {
            return;
        }
        let tables = self.inner.tables.lock().expect("pubsub lock poisoned");
        for (id, handler) in &tables.subscribers {
            if !handler.topics.contains_key(&event.topic) {
                continue;
            }
            if let Err(err) = handler.sender.try_send(event.clone()) {
                tracing::warn!(
                    subscriber = %id,
                    topic = %event.topic,
                    error = %err,
                    "subscriber channel unavailable, event dropped"
                );
            }
        }
    }

    /// Drain a subscriber's channel, running the actions registered
    /// for each event's topic.
    ///
    /// Action failures are logged and the loop continues. The worker
    /// returns when the channel closes (every sender dropped, which
    /// [`unsubscribe`](Bus::unsubscribe) triggers for a channel with
    /// no external senders) or when the process receives SIGINT or
    /// SIGTERM; the subscription is released on the way out.
    pub async fn worker(&self, id: SubscriberId, mut events: mpsc::Receiver<Arc<Event>>) {
        loop {
            tokio::select! {
                received = events.recv() => match received {
                    Some(event) => self.run_actions(id, &event),
                    None => break,
                },
                _ = termination_signal() => {
                    tracing::info!(subscriber = %id, "termination signal received, stopping worker");
                    break;
                }
            }
        }
        self.unsubscribe(id);
    }

    /// Reference count for `topic`: how many subscribers hold it.
    pub fn topic_refs(&self, topic: &str) -> i64 {
        self.inner
            .tables
            .lock()
            .expect("pubsub lock poisoned")
            .refs
            .get(topic)
            .copied()
            .unwrap_or(0)
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.inner
            .tables
            .lock()
            .expect("pubsub lock poisoned")
            .subscribers
            .len()
    }

    fn run_actions(&self, id: SubscriberId, event: &Event) {
        let actions: Vec<ActionFn> = {
            let tables = self.inner.tables.lock().expect("pubsub lock poisoned");
            tables
                .subscribers
                .get(&id)
                .and_then(|handler| handler.topics.get(&event.topic))
                .cloned()
                .unwrap_or_default()
        };
        for action in actions {
            if let Err(err) = action(event) {
                tracing::warn!(
                    subscriber = %id,
                    topic = %event.topic,
                    error = %err,
                    "subscriber action failed"
                );
            }
        }
    }
}

/// Merge topics into a subscriber's handler, bumping the reference
/// count only on first addition of each topic for that subscriber.
fn merge_topics(tables: &mut Tables, id: SubscriberId, topics: ActionTopics) {
    let Some(handler) = tables.subscribers.get_mut(&id) else {
        return;
    };
    for (topic, actions) in topics {
        if topic.is_empty() {
            continue;
        }
        match handler.topics.entry(topic.clone()) {
            Entry::Vacant(entry) => {
                entry.insert(actions);
                *tables.refs.entry(topic).or_insert(0) += 1;
            }
            Entry::Occupied(mut entry) => entry.get_mut().extend(actions),
        }
    }
}

/// Resolves when the process receives SIGINT or, on unix, SIGTERM.
async fn termination_signal() {
    let interrupt = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %err, "failed to install SIGINT handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                tracing::warn!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = interrupt => {}
        _ = terminate => {}
    }
}

/// Subscribe on the process-wide default bus. See [`Bus::subscribe`].
pub fn subscribe(sender: mpsc::Sender<Arc<Event>>, topics: ActionTopics) -> SubscriberId {
    Bus::global().subscribe(sender, topics)
}

/// Unsubscribe from the process-wide default bus. See
/// [`Bus::unsubscribe`].
pub fn unsubscribe(id: SubscriberId) {
    Bus::global().unsubscribe(id)
}

/// Run a worker against the process-wide default bus. See
/// [`Bus::worker`].
pub async fn worker(id: SubscriberId, events: mpsc::Receiver<Arc<Event>>) {
    Bus::global().worker(id, events).await
}
