//! Database driver abstraction.
//!
//! The [`Driver`] trait is the seam between compiled queries and a database client. Operation
//! builders compile their clauses into native documents and hand them to a driver; the driver
//! executes them and returns raw documents or write outcomes.
//!
//! Driver errors are reported as [`StencilError::Backend`](crate::error::StencilError::Backend)
//! and reach the caller unchanged.
//!
//! # Example
//!
//! ```ignore
//! use docstencil::memory::InMemoryDriver;
//! use docstencil_core::driver::{Driver, FindRequest};
//! use bson::doc;
//!
//! let driver = InMemoryDriver::new();
//! driver.insert("friends", vec![doc! { "name": "Robert" }]).await?;
//!
//! let found = driver
//!     .find("friends", FindRequest::new(doc! { "name": "Robert" }))
//!     .await?;
//! ```

use std::{fmt::Debug, sync::Arc};

use async_trait::async_trait;
use bson::{Bson, Document};

use crate::error::StencilResult;

/// Parameters of a find operation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindRequest {
    pub criteria: Document,
    pub projection: Option<Document>,
    pub sort: Option<Document>,
    pub skip: Option<u64>,
    pub limit: Option<u64>,
}

impl FindRequest {
    /// Creates a request matching `criteria`, with no projection, sort or paging.
    pub fn new(criteria: Document) -> Self {
        Self {
            criteria,
            ..Self::default()
        }
    }
}

/// Which image of the document a find-and-modify returns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReturnDocument {
    /// The document as it was before the modification.
    Before,
    /// The document as it is after the modification.
    #[default]
    After,
}

/// Options of a find-and-modify operation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindAndModifyOptions {
    pub projection: Option<Document>,
    pub sort: Option<Document>,
    pub upsert: bool,
    pub return_document: ReturnDocument,
}

/// Options of an update operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateOptions {
    /// Insert a document when nothing matches.
    pub upsert: bool,
    /// Update every match instead of the first one.
    pub multi: bool,
}

/// Result of an update operation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateOutcome {
    pub matched: u64,
    pub modified: u64,
    /// Identifier of the inserted document, when the update was an upsert that matched nothing.
    pub upserted_id: Option<Bson>,
}

/// Result of an insert operation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InsertOutcome {
    /// Identifiers of the inserted documents, in insertion order.
    pub inserted_ids: Vec<Bson>,
}

/// Result of a remove operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RemoveOutcome {
    pub removed: u64,
}

/// Executes compiled operations against a document database.
///
/// Implementations must be thread-safe; a single driver is shared by every collection handle
/// and builder of a [`Stencil`](crate::store::Stencil).
///
/// Modifiers whose top-level keys are not update operators replace the matched document.
#[async_trait]
pub trait Driver: Send + Sync + Debug {
    /// Returns the documents of `collection` matching the request.
    async fn find(&self, collection: &str, request: FindRequest) -> StencilResult<Vec<Document>>;

    /// Counts the documents of `collection` matching `criteria`.
    async fn count(&self, collection: &str, criteria: Document) -> StencilResult<u64>;

    /// Modifies the first document matching `criteria` and returns it.
    ///
    /// Returns `Ok(None)` when nothing matched and no document was upserted.
    async fn find_one_and_update(
        &self,
        collection: &str,
        criteria: Document,
        modifier: Document,
        options: FindAndModifyOptions,
    ) -> StencilResult<Option<Document>>;

    /// Removes the first document matching `criteria` and returns it.
    async fn find_one_and_delete(
        &self,
        collection: &str,
        criteria: Document,
        projection: Option<Document>,
        sort: Option<Document>,
    ) -> StencilResult<Option<Document>>;

    /// Applies `modifier` to the documents matching `criteria`.
    async fn update(
        &self,
        collection: &str,
        criteria: Document,
        modifier: Document,
        options: UpdateOptions,
    ) -> StencilResult<UpdateOutcome>;

    /// Inserts `documents`, which already carry their identifiers.
    async fn insert(&self, collection: &str, documents: Vec<Document>) -> StencilResult<InsertOutcome>;

    /// Removes the first document matching `criteria`, or all of them when `multi` is set.
    async fn remove(&self, collection: &str, criteria: Document, multi: bool) -> StencilResult<RemoveOutcome>;

    /// Runs an aggregation pipeline and collects its output.
    async fn aggregate(&self, collection: &str, pipeline: Vec<Document>) -> StencilResult<Vec<Document>>;

    /// Releases the driver's resources.
    async fn shutdown(self) -> StencilResult<()>
    where
        Self: Sized,
    {
        Ok(())
    }
}

#[async_trait]
impl<B> Driver for &B
where
    B: Driver,
{
    async fn find(&self, collection: &str, request: FindRequest) -> StencilResult<Vec<Document>> {
        (**self).find(collection, request).await
    }

    async fn count(&self, collection: &str, criteria: Document) -> StencilResult<u64> {
        (**self).count(collection, criteria).await
    }

    async fn find_one_and_update(
        &self,
        collection: &str,
        criteria: Document,
        modifier: Document,
        options: FindAndModifyOptions,
    ) -> StencilResult<Option<Document>> {
        (**self)
            .find_one_and_update(collection, criteria, modifier, options)
            .await
    }

    async fn find_one_and_delete(
        &self,
        collection: &str,
        criteria: Document,
        projection: Option<Document>,
        sort: Option<Document>,
    ) -> StencilResult<Option<Document>> {
        (**self)
            .find_one_and_delete(collection, criteria, projection, sort)
            .await
    }

    async fn update(
        &self,
        collection: &str,
        criteria: Document,
        modifier: Document,
        options: UpdateOptions,
    ) -> StencilResult<UpdateOutcome> {
        (**self)
            .update(collection, criteria, modifier, options)
            .await
    }

    async fn insert(&self, collection: &str, documents: Vec<Document>) -> StencilResult<InsertOutcome> {
        (**self).insert(collection, documents).await
    }

    async fn remove(&self, collection: &str, criteria: Document, multi: bool) -> StencilResult<RemoveOutcome> {
        (**self).remove(collection, criteria, multi).await
    }

    async fn aggregate(&self, collection: &str, pipeline: Vec<Document>) -> StencilResult<Vec<Document>> {
        (**self).aggregate(collection, pipeline).await
    }
}

#[async_trait]
impl<B> Driver for Arc<B>
where
    B: Driver,
{
    async fn find(&self, collection: &str, request: FindRequest) -> StencilResult<Vec<Document>> {
        (**self).find(collection, request).await
    }

    async fn count(&self, collection: &str, criteria: Document) -> StencilResult<u64> {
        (**self).count(collection, criteria).await
    }

    async fn find_one_and_update(
        &self,
        collection: &str,
        criteria: Document,
        modifier: Document,
        options: FindAndModifyOptions,
    ) -> StencilResult<Option<Document>> {
        (**self)
            .find_one_and_update(collection, criteria, modifier, options)
            .await
    }

    async fn find_one_and_delete(
        &self,
        collection: &str,
        criteria: Document,
        projection: Option<Document>,
        sort: Option<Document>,
    ) -> StencilResult<Option<Document>> {
        (**self)
            .find_one_and_delete(collection, criteria, projection, sort)
            .await
    }

    async fn update(
        &self,
        collection: &str,
        criteria: Document,
        modifier: Document,
        options: UpdateOptions,
    ) -> StencilResult<UpdateOutcome> {
        (**self)
            .update(collection, criteria, modifier, options)
            .await
    }

    async fn insert(&self, collection: &str, documents: Vec<Document>) -> StencilResult<InsertOutcome> {
        (**self).insert(collection, documents).await
    }

    async fn remove(&self, collection: &str, criteria: Document, multi: bool) -> StencilResult<RemoveOutcome> {
        (**self).remove(collection, criteria, multi).await
    }

    async fn aggregate(&self, collection: &str, pipeline: Vec<Document>) -> StencilResult<Vec<Document>> {
        (**self).aggregate(collection, pipeline).await
    }

    async fn shutdown(self) -> StencilResult<()>
    where
        Self: Sized,
    {
        match Arc::try_unwrap(self) {
            Ok(driver) => driver.shutdown().await,
            Err(_) => Ok(()),
        }
    }
}

/// Asynchronously constructs a [`Driver`].
#[async_trait]
pub trait DriverBuilder {
    type Driver: Driver;

    /// Builds the driver, connecting to the database if needed.
    ///
    /// # Errors
    ///
    /// Returns [`StencilError::Initialization`](crate::error::StencilError::Initialization) if
    /// the driver cannot be set up.
    async fn build(self) -> StencilResult<Self::Driver>;
}

/// Returns `true` when every top-level key of `modifier` is an update operator.
///
/// An empty modifier is not an operator document.
pub fn is_operator_document(modifier: &Document) -> bool {
    !modifier.is_empty() && modifier.keys().all(|key| key.starts_with('$'))
}
