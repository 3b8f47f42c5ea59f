//! Entity types and identifier handling.
//!
//! Documents are identified by their `_id` field. This module names that field, provides the
//! [`Entity`] trait that ties a Rust type to its collection, and the helpers used by the
//! operation builders to add or strip identifiers.

use bson::{Bson, Document, oid::ObjectId};
use serde::{Serialize, de::DeserializeOwned};

/// Name of the identifier field of every document.
pub const ID_FIELD: &str = "_id";

/// A type stored in a named collection.
///
/// # Example
///
/// ```ignore
/// use docstencil::document::Entity;
/// use bson::oid::ObjectId;
/// use serde::{Serialize, Deserialize};
///
/// #[derive(Debug, Clone, Serialize, Deserialize)]
/// pub struct Friend {
///     #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
///     pub id: Option<ObjectId>,
///     pub name: String,
/// }
///
/// impl Entity for Friend {
///     fn collection_name() -> &'static str {
///         "friends"
///     }
/// }
/// ```
pub trait Entity: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Returns the name of the collection this type belongs to.
    fn collection_name() -> &'static str;
}

/// Removes the identifier field from `document`, returning it if present.
pub(crate) fn strip_id(document: &mut Document) -> Option<Bson> {
    document.remove(ID_FIELD)
}

/// Returns `document` with an identifier, generating an ObjectId when it has none.
///
/// A generated identifier is placed first.
pub(crate) fn with_id(document: Document) -> (Bson, Document) {
    if let Some(id) = document.get(ID_FIELD) {
        return (id.clone(), document);
    }

    let id = Bson::ObjectId(ObjectId::new());
    let document = std::iter::once((ID_FIELD.to_string(), id.clone()))
        .chain(document)
        .collect();

    (id, document)
}
