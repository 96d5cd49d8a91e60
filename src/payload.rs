//! Payload codec: typed event payloads behind an object-safe surface.
//!
//! The dispatcher, aggregate, and cache all handle payloads without
//! knowing their concrete type. [`Payload`] erases the type while
//! keeping three capabilities the core depends on: the canonical
//! schema string (used to key the domain rules registry and to verify
//! events on decode), the marshal/unmarshal codec operations, and a
//! deep copy. A blanket implementation covers every protobuf message
//! that exposes its canonical name, so applications only derive
//! `prost::Message` and implement `prost::Name` on their payload
//! structs -- no manual trait implementation is needed.

use std::any::Any;

use crate::error::Error;
use crate::event::Format;

/// A typed event payload.
///
/// Implemented automatically for every `prost::Message + prost::Name`
/// type. The trait is object-safe so aggregate state and reducer
/// arguments can be passed as `Box<dyn Payload>`.
///
/// # Codec contract
///
/// - [`marshal`](Payload::marshal) encodes under the given format tag.
///   JSON and STRING are recognised tags without an implementation and
///   report [`Error::NotImplemented`].
/// - [`unmarshal`](Payload::unmarshal) decodes bytes produced by
///   `marshal`. A format tag other than the active protobuf codec
///   reports [`Error::InvalidEventFormat`].
/// - [`clone_payload`](Payload::clone_payload) returns a fully
///   independent value; mutating the copy never affects the original.
pub trait Payload: Any + std::fmt::Debug + Send + Sync {
    /// Canonical schema string for this payload type (the fully
    /// qualified protobuf message name, e.g. `"shop.User"`).
    fn schema(&self) -> String;

    /// Encode this payload under `format`.
    fn marshal(&self, format: Format) -> Result<Vec<u8>, Error>;

    /// Decode `data` under `format`, replacing this payload's contents.
    fn unmarshal(&mut self, format: Format, data: &[u8]) -> Result<(), Error>;

    /// Deep copy.
    fn clone_payload(&self) -> Box<dyn Payload>;

    /// Borrow as [`Any`] for downcasting.
    fn as_any(&self) -> &dyn Any;

    /// Borrow mutably as [`Any`] for downcasting.
    fn as_any_mut(&mut self) -> &mut dyn Any;

    /// Convert into [`Any`] for by-value downcasting.
    fn into_any(self: Box<Self>) -> Box<dyn Any>;
}

impl<M> Payload for M
where
    M: prost::Message + prost::Name + Clone + Default + 'static,
{
    fn schema(&self) -> String {
        M::full_name()
    }

    fn marshal(&self, format: Format) -> Result<Vec<u8>, Error> {
        match format {
            Format::Protobuf => Ok(self.encode_to_vec()),
            Format::Json | Format::String => Err(Error::NotImplemented(format)),
        }
    }

    fn unmarshal(&mut self, format: Format, data: &[u8]) -> Result<(), Error> {
        match format {
            Format::Protobuf => {
                *self = M::decode(data)?;
                Ok(())
            }
            // The active codec is protobuf; any other tag on an
            // incoming event is a mismatch, not a missing feature.
            Format::Json | Format::String => Err(Error::InvalidEventFormat),
        }
    }

    fn clone_payload(&self) -> Box<dyn Payload> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }
}

impl dyn Payload {
    /// Downcast a borrowed payload to its concrete type.
    pub fn downcast_ref<M: Payload>(&self) -> Option<&M> {
        self.as_any().downcast_ref()
    }

    /// Downcast a mutably borrowed payload to its concrete type.
    pub fn downcast_mut<M: Payload>(&mut self) -> Option<&mut M> {
        self.as_any_mut().downcast_mut()
    }
}

#[cfg(test)]
pub(crate) mod test_fixtures {
    //! Hand-derived protobuf messages standing in for application
    //! payload types.

    /// A user payload, the canonical fixture across the crate's tests.
    #[derive(Clone, PartialEq, prost::Message)]
    pub(crate) struct User {
        #[prost(string, tag = "1")]
        pub id: String,
        #[prost(string, tag = "2")]
        pub name: String,
        #[prost(string, tag = "3")]
        pub email: String,
    }

    impl prost::Name for User {
        const NAME: &'static str = "User";
        const PACKAGE: &'static str = "eventgate.test";
    }

    /// A second payload type, used to exercise schema mismatches and
    /// per-schema rules lookup.
    #[derive(Clone, PartialEq, prost::Message)]
    pub(crate) struct Order {
        #[prost(string, tag = "1")]
        pub id: String,
        #[prost(int64, tag = "2")]
        pub total: i64,
    }

    impl prost::Name for Order {
        const NAME: &'static str = "Order";
        const PACKAGE: &'static str = "eventgate.test";
    }

    pub(crate) fn luke() -> User {
        User {
            id: "u1".to_string(),
            name: "Luke".to_string(),
            email: "luke@e".to_string(),
        }
    }
}
