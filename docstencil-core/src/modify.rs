//! Find-and-modify builder.
//!
//! [`FindAndModify`] atomically modifies (or removes) the first document matching its criteria
//! and returns it. The returned image is the document after the modification.
//!
//! ```ignore
//! let friend: Option<Friend> = friends
//!     .find_and_modify("{name: #}", params!["Robert"])
//!     .with("{$inc: {visits: #}}", params![1])
//!     .sort("{visits: -1}")
//!     .as_type()
//!     .await?;
//! ```

use bson::Document;
use serde::de::DeserializeOwned;

use crate::{
    argument::Argument,
    clause::{Clause, compile_optional},
    collection::Collection,
    driver::{Driver, FindAndModifyOptions, ReturnDocument},
    error::{StencilError, StencilResult},
    marshal::Mapper,
    result::{ResultHandler, Unmarshalling, map_result},
};

const FIND_AND_MODIFY: &str = "find and modify";

/// Builder for a find-and-modify operation.
#[derive(Debug)]
pub struct FindAndModify<'a, B: Driver, M: Mapper> {
    collection: Collection<'a, B, M>,
    criteria: Clause,
    modifier: Option<Clause>,
    projection: Option<Clause>,
    sort: Option<Clause>,
    upsert: bool,
    remove: bool,
}

impl<'a, B: Driver, M: Mapper> FindAndModify<'a, B, M> {
    pub(crate) fn new(collection: Collection<'a, B, M>, criteria: Clause) -> Self {
        Self {
            collection,
            criteria,
            modifier: None,
            projection: None,
            sort: None,
            upsert: false,
            remove: false,
        }
    }

    /// Sets the modifier template. A later call replaces an earlier one.
    pub fn with(mut self, template: &str, params: Vec<Argument>) -> Self {
        self.modifier = Some(Clause::new(template, params));
        self
    }

    /// Restricts the returned fields.
    pub fn projection(self, template: &str) -> Self {
        self.projection_with(template, Vec::new())
    }

    /// Restricts the returned fields with a parameterized projection template.
    pub fn projection_with(mut self, template: &str, params: Vec<Argument>) -> Self {
        self.projection = Some(Clause::new(template, params));
        self
    }

    /// Decides which document is modified when several match.
    pub fn sort(mut self, template: &str) -> Self {
        self.sort = Some(Clause::new(template, Vec::new()));
        self
    }

    /// Inserts a document when nothing matches.
    pub fn upsert(mut self) -> Self {
        self.upsert = true;
        self
    }

    /// Removes the matching document instead of modifying it. No modifier is needed.
    pub fn remove(mut self) -> Self {
        self.remove = true;
        self
    }

    /// Returns the document as it is after the modification, which is always the case.
    pub fn return_new(self) -> Self {
        self
    }

    /// Runs the operation and unmarshals the returned document into `T`.
    ///
    /// Returns `Ok(None)`, without unmarshalling anything, when nothing matched.
    ///
    /// # Errors
    ///
    /// - [`StencilError::InvalidArgument`] if the modifier is missing or blank, or a clause
    ///   fails to compile
    /// - driver and unmarshalling errors, unchanged
    pub async fn as_type<T: DeserializeOwned>(self) -> StencilResult<Option<T>> {
        let mapper = self.collection.mapper();
        let document = self.document().await?;

        map_result(document, &Unmarshalling::<M, T>::new(mapper))
    }

    /// Runs the operation and passes the returned document to `handler`, which is not called
    /// when nothing matched.
    pub async fn map<T, H: ResultHandler<T>>(self, handler: H) -> StencilResult<Option<T>> {
        let document = self.document().await?;

        map_result(document, &handler)
    }

    /// Runs the operation and returns the raw document.
    pub async fn document(self) -> StencilResult<Option<Document>> {
        let factory = self.collection.factory();

        let modifier = match (&self.modifier, self.remove) {
            (Some(modifier), _) if modifier.is_blank() => {
                return Err(StencilError::invalid_argument("Modifier may not be empty"));
            }
            (None, false) => {
                return Err(StencilError::invalid_argument(
                    "A modifier is required unless the document is removed",
                ));
            }
            (Some(_), true) | (None, true) => None,
            (Some(modifier), false) => Some(modifier.compile_document(factory, FIND_AND_MODIFY)?),
        };

        let criteria = self.criteria.compile_document(factory, FIND_AND_MODIFY)?;
        let projection = compile_optional(self.projection.as_ref(), factory, FIND_AND_MODIFY)?;
        let sort = compile_optional(self.sort.as_ref(), factory, FIND_AND_MODIFY)?;

        let driver = self.collection.driver();
        let name = self.collection.name();
        match modifier {
            None => driver.find_one_and_delete(name, criteria, projection, sort).await,
            Some(modifier) => {
                let options = FindAndModifyOptions {
                    projection,
                    sort,
                    upsert: self.upsert,
                    return_document: ReturnDocument::After,
                };
                driver
                    .find_one_and_update(name, criteria, modifier, options)
                    .await
            }
        }
    }
}
