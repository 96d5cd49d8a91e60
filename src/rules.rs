//! Domain rules registry: reducers keyed by payload schema.
//!
//! A reducer computes the next aggregate state from
//! `(topic, decoded new payload, previous state)`. Applications
//! register one reducer per payload type; the registry derives the
//! key from the payload's canonical schema string, so lookup never
//! relies on runtime reflection.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::payload::Payload;

/// Type-erased reducer stored in the registry.
///
/// Pure by contract: identical inputs must yield indistinguishable
/// outputs. The reducer owns both the decoded payload and the copy of
/// the previous state, and may return either of them (or a new value);
/// returning `None` leaves the aggregate with no state.
pub type ReducerFn = Arc<
    dyn Fn(&str, Box<dyn Payload>, Option<Box<dyn Payload>>) -> Option<Box<dyn Payload>>
        + Send
        + Sync,
>;

/// Registry mapping payload schema strings to reducers.
///
/// Registration is expected at startup but remains safe afterwards:
/// the table sits behind a read-write lock, written by
/// [`register`](DomainRules::register) and read on every dispatch.
#[derive(Default)]
pub struct DomainRules {
    table: RwLock<HashMap<String, ReducerFn>>,
}

impl std::fmt::Debug for DomainRules {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let table = self.table.read().expect("domain rules lock poisoned");
        f.debug_struct("DomainRules")
            .field("schemas", &table.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl DomainRules {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `rules` for the payload type of `exemplar`.
    ///
    /// The exemplar's value is irrelevant; only its type matters
    /// (`M::default()` works fine). Registering a schema twice is a
    /// logged no-op: the first reducer wins.
    pub fn register<M, F>(&self, rules: F, exemplar: M)
    where
        M: Payload,
        F: Fn(&str, Box<M>, Option<Box<M>>) -> Option<Box<M>> + Send + Sync + 'static,
    {
        let schema = exemplar.schema();
        let mut table = self.table.write().expect("domain rules lock poisoned");
        if table.contains_key(&schema) {
            tracing::warn!(schema = %schema, "domain rules already registered, ignoring");
            return;
        }

        let registered = schema.clone();
        let erased: ReducerFn = Arc::new(
            move |topic: &str, new: Box<dyn Payload>, previous: Option<Box<dyn Payload>>| {
                let new = match new.into_any().downcast::<M>() {
                    Ok(payload) => payload,
                    Err(_) => {
                        tracing::warn!(
                            schema = %registered,
                            "payload does not match registered rules, keeping previous state"
                        );
                        return previous;
                    }
                };
                let previous = previous.and_then(|p| p.into_any().downcast::<M>().ok());
                rules(topic, new, previous).map(|next| next as Box<dyn Payload>)
            },
        );
        table.insert(schema, erased);
    }

    /// Look up the reducer for `buffer`'s payload type.
    ///
    /// Falls back to the identity reducer (the decoded payload becomes
    /// the next state) when no rules are registered for the schema.
    pub fn for_payload(&self, buffer: &dyn Payload) -> ReducerFn {
        let schema = buffer.schema();
        if let Some(rules) = self
            .table
            .read()
            .expect("domain rules lock poisoned")
            .get(&schema)
        {
            return rules.clone();
        }
        tracing::warn!(schema = %schema, "no domain rules registered, using identity reducer");
        identity()
    }

    /// Number of registered schemas.
    pub fn len(&self) -> usize {
        self.table.read().expect("domain rules lock poisoned").len()
    }

    /// Whether no rules have been registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Identity reducer: `(topic, new, previous) -> new`.
fn identity() -> ReducerFn {
    Arc::new(
        |_topic: &str, new: Box<dyn Payload>, _previous: Option<Box<dyn Payload>>| Some(new),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::test_fixtures::{Order, User, luke};

    fn keep_on_created(
        topic: &str,
        new: Box<User>,
        previous: Option<Box<User>>,
    ) -> Option<Box<User>> {
        match topic {
            "user_created" | "user_updated" => Some(new),
            _ => previous,
        }
    }

    #[test]
    fn registered_rules_are_resolved_by_schema() {
        let rules = DomainRules::new();
        rules.register(keep_on_created, User::default());
        assert_eq!(rules.len(), 1);

        let reducer = rules.for_payload(&User::default());
        let next = reducer("user_created", Box::new(luke()), None)
            .expect("reducer should produce a state");
        assert_eq!(next.downcast_ref::<User>().map(|u| u.name.as_str()), Some("Luke"));
    }

    #[test]
    fn unmatched_topic_returns_previous() {
        let rules = DomainRules::new();
        rules.register(keep_on_created, User::default());

        let reducer = rules.for_payload(&User::default());
        let previous = Box::new(luke());
        let next = reducer("nothing_changed", Box::new(User::default()), Some(previous))
            .expect("previous state should survive");
        assert_eq!(next.downcast_ref::<User>().map(|u| u.name.as_str()), Some("Luke"));
    }

    #[test]
    fn duplicate_registration_keeps_first() {
        let rules = DomainRules::new();
        rules.register(keep_on_created, User::default());
        // A reducer that erases state; it must never win.
        rules.register(
            |_topic: &str, _new: Box<User>, _previous: Option<Box<User>>| None,
            User::default(),
        );
        assert_eq!(rules.len(), 1);

        let reducer = rules.for_payload(&User::default());
        let next = reducer("user_created", Box::new(luke()), None);
        assert!(next.is_some(), "first registration should still be active");
    }

    #[test]
    fn missing_rules_fall_back_to_identity() {
        let rules = DomainRules::new();
        assert!(rules.is_empty());

        let reducer = rules.for_payload(&Order::default());
        let order = Order {
            id: "o1".to_string(),
            total: 42,
        };
        let next = reducer("order_placed", Box::new(order.clone()), None)
            .expect("identity reducer should return the payload");
        assert_eq!(next.downcast_ref::<Order>(), Some(&order));
    }

    #[test]
    fn schemas_are_independent() {
        let rules = DomainRules::new();
        rules.register(keep_on_created, User::default());
        rules.register(
            |_topic: &str, new: Box<Order>, _previous: Option<Box<Order>>| Some(new),
            Order::default(),
        );
        assert_eq!(rules.len(), 2);
    }

    #[test]
    fn reducer_may_erase_state() {
        let rules = DomainRules::new();
        rules.register(
            |_topic: &str, _new: Box<User>, _previous: Option<Box<User>>| None,
            User::default(),
        );

        let reducer = rules.for_payload(&User::default());
        assert!(reducer("user_erased", Box::new(luke()), None).is_none());
    }
}
