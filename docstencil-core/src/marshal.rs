//! Conversion between application values and native documents.
//!
//! - [`Marshal`] is implemented for every `Serialize` type and lets an argument carry an
//!   application object until the binder needs it as a document.
//! - [`Marshaller`] turns a [`Marshal`] value into a [`Document`].
//! - [`Unmarshaller`] turns a [`Document`] back into a typed value.
//! - [`BsonMapper`] is the default serde-backed implementation of both.

use std::{any::type_name, fmt::Debug};

use bson::{Bson, Document, de::deserialize_from_bson, ser::serialize_to_bson};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::error::{StencilError, StencilResult};

/// An application value that can be marshalled into a document.
///
/// This trait is object-safe and implemented for every `Serialize + Send + Sync` type, so
/// arguments can hold heterogeneous objects behind `Box<dyn Marshal>`.
pub trait Marshal: Send + Sync {
    /// Returns the name of the value's type, for diagnostics.
    fn type_name(&self) -> &'static str;

    /// Serializes the value into BSON.
    ///
    /// # Errors
    ///
    /// Returns [`StencilError::Marshalling`] if serialization fails.
    fn to_bson(&self) -> StencilResult<Bson>;
}

impl<T: Serialize + Send + Sync> Marshal for T {
    fn type_name(&self) -> &'static str {
        type_name::<T>()
    }

    fn to_bson(&self) -> StencilResult<Bson> {
        serialize_to_bson(self)
            .map_err(|e| StencilError::Marshalling(format!("{}: {e}", type_name::<T>())))
    }
}

/// Converts application objects into native documents.
pub trait Marshaller: Send + Sync {
    /// Marshals `object` into a document.
    ///
    /// # Errors
    ///
    /// Returns [`StencilError::Marshalling`] if the object cannot be represented as a document.
    fn marshal(&self, object: &dyn Marshal) -> StencilResult<Document>;
}

/// Converts native documents into application values.
pub trait Unmarshaller: Send + Sync {
    /// Unmarshals `document` into a `T`.
    ///
    /// # Errors
    ///
    /// Returns [`StencilError::Unmarshalling`] if the document does not match the shape of `T`.
    fn unmarshal<T: DeserializeOwned>(&self, document: Document) -> StencilResult<T>;
}

/// A marshaller and unmarshaller pair, as used by a [`Stencil`](crate::store::Stencil).
pub trait Mapper: Marshaller + Unmarshaller + Debug + 'static {}

impl<M: Marshaller + Unmarshaller + Debug + 'static> Mapper for M {}

/// Configuration for [`BsonMapper`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MapperConfig {
    /// Drop top-level `null` fields from marshalled objects.
    pub skip_null_fields: bool,
}

/// The default mapper, backed by serde and the `bson` serializer.
#[derive(Debug, Clone, Default)]
pub struct BsonMapper {
    config: MapperConfig,
}

impl BsonMapper {
    /// Creates a mapper with the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a mapper with the given configuration.
    pub fn with_config(config: MapperConfig) -> Self {
        Self { config }
    }

    /// Returns the mapper configuration.
    pub fn config(&self) -> &MapperConfig {
        &self.config
    }
}

impl Marshaller for BsonMapper {
    fn marshal(&self, object: &dyn Marshal) -> StencilResult<Document> {
        match object.to_bson()? {
            Bson::Document(document) if self.config.skip_null_fields => Ok(document
                .into_iter()
                .filter(|(_, value)| !matches!(value, Bson::Null))
                .collect()),
            Bson::Document(document) => Ok(document),
            other => Err(StencilError::Marshalling(format!(
                "{} marshalled into {:?} instead of a document",
                object.type_name(),
                other.element_type()
            ))),
        }
    }
}

impl Unmarshaller for BsonMapper {
    fn unmarshal<T: DeserializeOwned>(&self, document: Document) -> StencilResult<T> {
        deserialize_from_bson(Bson::Document(document))
            .map_err(|e| StencilError::Unmarshalling(format!("{}: {e}", type_name::<T>())))
    }
}

#[cfg(test)]
mod tests {
    use bson::doc;

    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Friend {
        name: String,
        nickname: Option<String>,
    }

    #[test]
    fn test_marshal_object() {
        let friend = Friend { name: "Robert".into(), nickname: None };

        let document = BsonMapper::new().marshal(&friend).unwrap();
        assert_eq!(document, doc! { "name": "Robert", "nickname": null });
    }

    #[test]
    fn test_marshal_skips_null_fields() {
        let mapper = BsonMapper::with_config(MapperConfig { skip_null_fields: true });
        let friend = Friend { name: "Robert".into(), nickname: None };

        assert_eq!(mapper.marshal(&friend).unwrap(), doc! { "name": "Robert" });
    }

    #[test]
    fn test_marshal_rejects_non_documents() {
        let err = BsonMapper::new().marshal(&42_i32).unwrap_err();
        assert!(matches!(err, StencilError::Marshalling(message) if message.starts_with("i32")));
    }

    #[test]
    fn test_unmarshal() {
        let friend: Friend = BsonMapper::new()
            .unmarshal(doc! { "name": "Robert", "nickname": "Bob" })
            .unwrap();

        assert_eq!(friend, Friend { name: "Robert".into(), nickname: Some("Bob".into()) });
    }

    #[test]
    fn test_unmarshal_shape_mismatch() {
        let result: StencilResult<Friend> = BsonMapper::new().unmarshal(doc! { "name": 7 });
        assert!(matches!(result, Err(StencilError::Unmarshalling(_))));
    }
}
