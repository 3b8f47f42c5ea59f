//! Find builders.
//!
//! [`Find`] returns every matching document, [`FindOne`] the first one. Both compile their
//! criteria, projection and sort clauses when a terminal method runs.
//!
//! ```ignore
//! let friends: Vec<Friend> = stencil
//!     .collection("friends")
//!     .find("{age: {$gt: #}}", params![18])
//!     .projection("{name: 1, age: 1}")
//!     .sort("{age: -1, name: 1}")
//!     .skip(20)
//!     .limit(10)
//!     .as_type()
//!     .await?;
//! ```

use bson::Document;
use serde::de::DeserializeOwned;

use crate::{
    argument::Argument,
    clause::{Clause, compile_optional},
    collection::Collection,
    driver::{Driver, FindRequest},
    error::StencilResult,
    marshal::Mapper,
    result::{ResultHandler, Unmarshalling, map_result, map_results},
};

const FIND: &str = "find";
const FIND_ONE: &str = "find one";

/// Builder for a find over all matching documents.
#[derive(Debug)]
pub struct Find<'a, B: Driver, M: Mapper> {
    collection: Collection<'a, B, M>,
    criteria: Clause,
    projection: Option<Clause>,
    sort: Option<Clause>,
    skip: Option<u64>,
    limit: Option<u64>,
}

impl<'a, B: Driver, M: Mapper> Find<'a, B, M> {
    pub(crate) fn new(collection: Collection<'a, B, M>, criteria: Clause) -> Self {
        Self {
            collection,
            criteria,
            projection: None,
            sort: None,
            skip: None,
            limit: None,
        }
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

    /// Orders the results, e.g. `{age: -1, name: 1}`.
    pub fn sort(mut self, template: &str) -> Self {
        self.sort = Some(Clause::new(template, Vec::new()));
        self
    }

    /// Skips the first `skip` results.
    pub fn skip(mut self, skip: u64) -> Self {
        self.skip = Some(skip);
        self
    }

    /// Returns at most `limit` results.
    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Runs the find and unmarshals every result into `T`.
    ///
    /// # Errors
    ///
    /// Returns [`StencilError::InvalidArgument`](crate::error::StencilError::InvalidArgument)
    /// naming the clause that failed to compile, driver errors unchanged, and unmarshalling
    /// errors.
    pub async fn as_type<T: DeserializeOwned>(self) -> StencilResult<Vec<T>> {
        let mapper = self.collection.mapper();
        let documents = self.documents().await?;

        map_results(documents, &Unmarshalling::<M, T>::new(mapper))
    }

    /// Runs the find and passes every result to `handler`.
    pub async fn map<T, H: ResultHandler<T>>(self, handler: H) -> StencilResult<Vec<T>> {
        let documents = self.documents().await?;

        map_results(documents, &handler)
    }

    /// Runs the find and returns the raw documents.
    pub async fn documents(self) -> StencilResult<Vec<Document>> {
        let factory = self.collection.factory();
        let request = FindRequest {
            criteria: self.criteria.compile_document(factory, FIND)?,
            projection: compile_optional(self.projection.as_ref(), factory, FIND)?,
            sort: compile_optional(self.sort.as_ref(), factory, FIND)?,
            skip: self.skip,
            limit: self.limit,
        };

        self.collection
            .driver()
            .find(self.collection.name(), request)
            .await
    }
}

/// Builder for a find returning the first matching document.
#[derive(Debug)]
pub struct FindOne<'a, B: Driver, M: Mapper> {
    collection: Collection<'a, B, M>,
    criteria: Clause,
    projection: Option<Clause>,
    sort: Option<Clause>,
}

impl<'a, B: Driver, M: Mapper> FindOne<'a, B, M> {
    pub(crate) fn new(collection: Collection<'a, B, M>, criteria: Clause) -> Self {
        Self {
            collection,
            criteria,
            projection: None,
            sort: None,
        }
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

    /// Decides which document comes first when several match.
    pub fn sort(mut self, template: &str) -> Self {
        self.sort = Some(Clause::new(template, Vec::new()));
        self
    }

    /// Runs the find and unmarshals the result into `T`.
    ///
    /// Returns `Ok(None)` when nothing matches.
    pub async fn as_type<T: DeserializeOwned>(self) -> StencilResult<Option<T>> {
        let mapper = self.collection.mapper();
        let document = self.document().await?;

        map_result(document, &Unmarshalling::<M, T>::new(mapper))
    }

    /// Runs the find and passes the result to `handler`, which is not called when nothing
    /// matches.
    pub async fn map<T, H: ResultHandler<T>>(self, handler: H) -> StencilResult<Option<T>> {
        let document = self.document().await?;

        map_result(document, &handler)
    }

    /// Runs the find and returns the raw document.
    pub async fn document(self) -> StencilResult<Option<Document>> {
        let factory = self.collection.factory();
        let request = FindRequest {
            criteria: self.criteria.compile_document(factory, FIND_ONE)?,
            projection: compile_optional(self.projection.as_ref(), factory, FIND_ONE)?,
            sort: compile_optional(self.sort.as_ref(), factory, FIND_ONE)?,
            skip: None,
            limit: Some(1),
        };

        let documents = self
            .collection
            .driver()
            .find(self.collection.name(), request)
            .await?;

        Ok(documents.into_iter().next())
    }
}
