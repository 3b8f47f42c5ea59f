//! Update builder.
//!
//! An [`Update`] is created bound to a criteria template and finished with either a modifier
//! template ([`Update::with`]) or an application object ([`Update::with_object`]).
//!
//! ```ignore
//! friends
//!     .update("{name: #}", params!["Robert"])
//!     .upsert()
//!     .with("{$inc: {visits: 1}}", params![])
//!     .await?;
//!
//! // `_id` never ends up in the `$set` payload
//! friends.update_by_id(id).with_object(&friend).await?;
//! ```

use bson::{Bson, Document, doc};
use serde::Serialize;
use tracing::trace;

use crate::{
    argument::Argument,
    clause::Clause,
    collection::Collection,
    document::{ID_FIELD, strip_id},
    driver::{Driver, UpdateOptions, UpdateOutcome, is_operator_document},
    error::{StencilError, StencilResult},
    marshal::Mapper,
};

const UPDATE: &str = "update";

/// Builder for an update of the documents matching a criteria template.
///
/// Updates a single document unless [`multi`](Update::multi) is called, and never inserts
/// unless [`upsert`](Update::upsert) is called.
#[derive(Debug)]
pub struct Update<'a, B: Driver, M: Mapper> {
    collection: Collection<'a, B, M>,
    criteria: Clause,
    options: UpdateOptions,
}

impl<'a, B: Driver, M: Mapper> Update<'a, B, M> {
    pub(crate) fn new(collection: Collection<'a, B, M>, criteria: Clause) -> Self {
        Self {
            collection,
            criteria,
            options: UpdateOptions::default(),
        }
    }

    /// Inserts a document when nothing matches.
    pub fn upsert(mut self) -> Self {
        self.options.upsert = true;
        self
    }

    /// Updates every matching document.
    pub fn multi(mut self) -> Self {
        self.options.multi = true;
        self
    }

    /// Applies the modifier compiled from `template`.
    ///
    /// # Errors
    ///
    /// - [`StencilError::InvalidArgument`] if the template is blank, or if the criteria or the
    ///   modifier fails to compile (the message names the template)
    /// - driver errors, unchanged
    pub async fn with(self, template: &str, params: Vec<Argument>) -> StencilResult<UpdateOutcome> {
        let modifier = Clause::new(template, params);
        if modifier.is_blank() {
            return Err(StencilError::invalid_argument("Modifier may not be empty"));
        }

        let factory = self.collection.factory();
        let modifier = modifier.compile_document(factory, UPDATE)?;

        self.execute(modifier).await
    }

    /// Sets the fields of `object` on the matching documents.
    ///
    /// The object is marshalled and its `_id` is dropped, then the result is sent as a `$set`.
    /// An object that marshals into update operators (every top-level key starts with `$`) is
    /// sent as is, with `_id` dropped from its `$set`.
    ///
    /// # Errors
    ///
    /// - [`StencilError::Marshalling`] if the object cannot be marshalled
    /// - [`StencilError::InvalidArgument`] if nothing is left to set once `_id` is dropped
    /// - driver errors, unchanged
    pub async fn with_object<T>(self, object: &T) -> StencilResult<UpdateOutcome>
    where
        T: Serialize + Send + Sync,
    {
        let marshalled = self.collection.mapper().marshal(object)?;
        let modifier = set_modifier(marshalled)?;

        self.execute(modifier).await
    }

    async fn execute(self, modifier: Document) -> StencilResult<UpdateOutcome> {
        let criteria = self
            .criteria
            .compile_document(self.collection.factory(), UPDATE)?;

        self.collection
            .driver()
            .update(self.collection.name(), criteria, modifier, self.options)
            .await
    }
}

/// Builds the modifier of an object update from its marshalled (and owned) document.
pub(crate) fn set_modifier(mut document: Document) -> StencilResult<Document> {
    if is_operator_document(&document) {
        if let Ok(set) = document.get_document_mut("$set") {
            if strip_id(set).is_some() {
                trace!("dropped {ID_FIELD} from $set");
            }
        }
        return Ok(document);
    }

    if strip_id(&mut document).is_some() {
        trace!("dropped {ID_FIELD} from updated object");
    }
    if document.is_empty() {
        return Err(StencilError::invalid_argument(
            "Object has no fields to update besides its identifier",
        ));
    }

    Ok(doc! { "$set": Bson::Document(document) })
}
