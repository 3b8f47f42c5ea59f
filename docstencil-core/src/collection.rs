//! Collection handles.
//!
//! A [`Collection`] names one collection of a [`Stencil`](crate::store::Stencil) and is the
//! starting point of every operation on it. Reads and updates return builders, which compile
//! their templates when their terminal method is awaited. Counting, inserting and removing run
//! directly.
//!
//! # Example
//!
//! ```ignore
//! use docstencil::prelude::*;
//!
//! let friends = stencil.collection("friends");
//!
//! let id = friends.insert(&Friend { id: None, name: "Robert".into(), age: 30 }).await?;
//! let robert: Option<Friend> = friends.find_one("{name: #}", params!["Robert"]).as_type().await?;
//! let adults = friends.count("{age: {$gte: #}}", params![18]).await?;
//! friends.remove_by_id(id.as_object_id().unwrap()).await?;
//! ```

use std::fmt;

use bson::{Bson, Document, oid::ObjectId};
use serde::Serialize;

use crate::{
    aggregate::Aggregate,
    argument::Argument,
    clause::Clause,
    document::with_id,
    driver::{Driver, InsertOutcome, RemoveOutcome},
    error::{StencilError, StencilResult},
    find::{Find, FindOne},
    marshal::{BsonMapper, Mapper},
    modify::FindAndModify,
    params,
    query::QueryFactory,
    update::Update,
};

const BY_ID: &str = "{_id: #}";

/// A handle on a named collection.
pub struct Collection<'a, B: Driver, M: Mapper = BsonMapper> {
    name: String,
    driver: &'a B,
    mapper: &'a M,
    factory: &'a QueryFactory,
}

impl<'a, B: Driver, M: Mapper> Collection<'a, B, M> {
    pub(crate) fn new(name: &str, driver: &'a B, mapper: &'a M, factory: &'a QueryFactory) -> Self {
        Self {
            name: name.to_string(),
            driver,
            mapper,
            factory,
        }
    }

    /// Returns the collection name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn driver(&self) -> &'a B {
        self.driver
    }

    pub(crate) fn mapper(&self) -> &'a M {
        self.mapper
    }

    pub(crate) fn factory(&self) -> &'a QueryFactory {
        self.factory
    }

    /// Finds every document matching the criteria template.
    pub fn find(&self, template: &str, params: Vec<Argument>) -> Find<'a, B, M> {
        Find::new(self.clone(), Clause::new(template, params))
    }

    /// Finds the first document matching the criteria template.
    pub fn find_one(&self, template: &str, params: Vec<Argument>) -> FindOne<'a, B, M> {
        FindOne::new(self.clone(), Clause::new(template, params))
    }

    /// Finds the document with the given identifier.
    pub fn find_one_by_id(&self, id: ObjectId) -> FindOne<'a, B, M> {
        self.find_one(BY_ID, params![id])
    }

    /// Counts the documents matching the criteria template.
    ///
    /// # Errors
    ///
    /// [`StencilError::InvalidArgument`] if the template fails to compile, and driver errors
    /// unchanged.
    pub async fn count(&self, template: &str, params: Vec<Argument>) -> StencilResult<u64> {
        let criteria = Clause::new(template, params).compile_document(self.factory, "count")?;

        self.driver.count(&self.name, criteria).await
    }

    /// Updates the documents matching the criteria template.
    pub fn update(&self, template: &str, params: Vec<Argument>) -> Update<'a, B, M> {
        Update::new(self.clone(), Clause::new(template, params))
    }

    /// Updates the document with the given identifier.
    pub fn update_by_id(&self, id: ObjectId) -> Update<'a, B, M> {
        self.update(BY_ID, params![id])
    }

    /// Modifies or removes the first document matching the criteria template and returns it.
    pub fn find_and_modify(&self, template: &str, params: Vec<Argument>) -> FindAndModify<'a, B, M> {
        FindAndModify::new(self.clone(), Clause::new(template, params))
    }

    /// Starts an aggregation pipeline with its first stage.
    pub fn aggregate(&self, template: &str, params: Vec<Argument>) -> Aggregate<'a, B, M> {
        Aggregate::new(self.clone(), Clause::new(template, params))
    }

    /// Marshals and inserts `object`, returning its identifier.
    ///
    /// A fresh ObjectId is assigned as `_id` when the marshalled document has none.
    ///
    /// # Errors
    ///
    /// [`StencilError::Marshalling`] if the object cannot be marshalled, and driver errors
    /// unchanged.
    pub async fn insert<T>(&self, object: &T) -> StencilResult<Bson>
    where
        T: Serialize + Send + Sync,
    {
        let (id, document) = with_id(self.mapper.marshal(object)?);
        self.driver.insert(&self.name, vec![document]).await?;

        Ok(id)
    }

    /// Marshals and inserts every object of `objects` in one driver call.
    pub async fn insert_many<T>(&self, objects: &[T]) -> StencilResult<InsertOutcome>
    where
        T: Serialize + Send + Sync,
    {
        let documents = objects
            .iter()
            .map(|object| self.mapper.marshal(object).map(|document| with_id(document).1))
            .collect::<StencilResult<Vec<_>>>()?;

        self.driver.insert(&self.name, documents).await
    }

    /// Inserts the document compiled from `template`, or each document of a template that
    /// compiles into an array.
    ///
    /// # Errors
    ///
    /// [`StencilError::InvalidArgument`] if the template fails to compile or contains
    /// something other than documents, and driver errors unchanged.
    pub async fn insert_template(&self, template: &str, params: Vec<Argument>) -> StencilResult<InsertOutcome> {
        let documents = Clause::new(template, params)
            .compile(self.factory, "insert")?
            .to_pipeline()
            .map_err(|e| StencilError::clause("insert", template, e))?
            .into_iter()
            .map(|document| with_id(document).1)
            .collect::<Vec<Document>>();

        self.driver.insert(&self.name, documents).await
    }

    /// Removes every document matching the criteria template.
    pub async fn remove(&self, template: &str, params: Vec<Argument>) -> StencilResult<RemoveOutcome> {
        let criteria = Clause::new(template, params).compile_document(self.factory, "remove")?;

        self.driver.remove(&self.name, criteria, true).await
    }

    /// Removes the document with the given identifier.
    pub async fn remove_by_id(&self, id: ObjectId) -> StencilResult<RemoveOutcome> {
        let criteria = Clause::new(BY_ID, params![id]).compile_document(self.factory, "remove")?;

        self.driver.remove(&self.name, criteria, false).await
    }
}

impl<B: Driver, M: Mapper> Clone for Collection<'_, B, M> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            driver: self.driver,
            mapper: self.mapper,
            factory: self.factory,
        }
    }
}

impl<B: Driver, M: Mapper> fmt::Debug for Collection<'_, B, M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collection")
            .field("name", &self.name)
            .field("driver", self.driver)
            .finish()
    }
}
