//! Aggregation builder.
//!
//! Each stage is a template of its own. A stage template that compiles into an array adds all
//! of its elements, so a whole pipeline can also be written as one template.
//!
//! ```ignore
//! let totals = orders
//!     .aggregate("{$match: {status: #}}", params!["paid"])
//!     .and("{$sort: {total: -1}}", params![])
//!     .and("{$limit: #}", params![10])
//!     .documents()
//!     .await?;
//! ```

use bson::Document;
use serde::de::DeserializeOwned;

use crate::{
    argument::Argument,
    clause::Clause,
    collection::Collection,
    driver::Driver,
    error::{StencilError, StencilResult},
    marshal::Mapper,
    result::{ResultHandler, Unmarshalling, map_results},
};

const AGGREGATE: &str = "aggregate";

/// Builder for an aggregation pipeline.
#[derive(Debug)]
pub struct Aggregate<'a, B: Driver, M: Mapper> {
    collection: Collection<'a, B, M>,
    stages: Vec<Clause>,
}

impl<'a, B: Driver, M: Mapper> Aggregate<'a, B, M> {
    pub(crate) fn new(collection: Collection<'a, B, M>, stage: Clause) -> Self {
        Self {
            collection,
            stages: vec![stage],
        }
    }

    /// Appends a stage.
    pub fn and(mut self, template: &str, params: Vec<Argument>) -> Self {
        self.stages.push(Clause::new(template, params));
        self
    }

    /// Runs the pipeline and unmarshals every result into `T`.
    pub async fn as_type<T: DeserializeOwned>(self) -> StencilResult<Vec<T>> {
        let mapper = self.collection.mapper();
        let documents = self.documents().await?;

        map_results(documents, &Unmarshalling::<M, T>::new(mapper))
    }

    /// Runs the pipeline and passes every result to `handler`.
    pub async fn map<T, H: ResultHandler<T>>(self, handler: H) -> StencilResult<Vec<T>> {
        let documents = self.documents().await?;

        map_results(documents, &handler)
    }

    /// Runs the pipeline and returns the raw documents.
    ///
    /// # Errors
    ///
    /// [`StencilError::InvalidArgument`] naming the first stage template that fails to compile
    /// or does not compile into documents, and driver errors unchanged.
    pub async fn documents(self) -> StencilResult<Vec<Document>> {
        let factory = self.collection.factory();

        let mut pipeline = Vec::with_capacity(self.stages.len());
        for stage in &self.stages {
            let stages = stage
                .compile(factory, AGGREGATE)?
                .to_pipeline()
                .map_err(|e| StencilError::clause(AGGREGATE, stage.template(), e))?;
            pipeline.extend(stages);
        }

        self.collection
            .driver()
            .aggregate(self.collection.name(), pipeline)
            .await
    }
}
