//! MongoDB driver implementation.
//!
//! Compiled documents are handed to the official client as they are: criteria become filters,
//! modifiers become update documents (or replacements when they hold no operator), and pipelines
//! are run with `aggregate`.

use async_trait::async_trait;
use bson::{Bson, Document};
use futures::TryStreamExt;
use mongodb::{
    Client, Collection as MongoCollection,
    options::{
        ClientOptions, FindOneAndDeleteOptions, FindOneAndReplaceOptions, FindOneAndUpdateOptions,
        FindOptions, ReplaceOptions, ReturnDocument as MongoReturnDocument,
        UpdateOptions as MongoUpdateOptions,
    },
};
use tracing::instrument;

use docstencil_core::{
    driver::{
        Driver, DriverBuilder, FindAndModifyOptions, FindRequest, InsertOutcome, RemoveOutcome,
        ReturnDocument, UpdateOptions, UpdateOutcome, is_operator_document,
    },
    error::{StencilError, StencilResult},
};

/// [`Driver`] backed by a MongoDB database.
#[derive(Debug, Clone)]
pub struct MongoDbDriver {
    client: Client,
    database: String,
}

impl MongoDbDriver {
    pub fn new(client: Client, database: String) -> Self {
        Self { client, database }
    }

    pub fn builder(dsn: &str, database: &str) -> MongoDbDriverBuilder {
        MongoDbDriverBuilder::new(dsn, database)
    }

    fn get_collection(&self, collection_name: &str) -> MongoCollection<Document> {
        self.client
            .database(&self.database)
            .collection(collection_name)
    }
}

fn backend(error: mongodb::error::Error) -> StencilError {
    StencilError::Backend(error.to_string())
}

fn return_document(value: ReturnDocument) -> MongoReturnDocument {
    match value {
        ReturnDocument::Before => MongoReturnDocument::Before,
        ReturnDocument::After => MongoReturnDocument::After,
    }
}

#[async_trait]
impl Driver for MongoDbDriver {
    #[instrument(skip(self, request))]
    async fn find(&self, collection: &str, request: FindRequest) -> StencilResult<Vec<Document>> {
        let mut options = FindOptions::default();
        options.projection = request.projection;
        options.sort = request.sort;
        options.skip = request.skip;
        options.limit = request
            .limit
            .map(i64::try_from)
            .transpose()
            .map_err(|e| StencilError::invalid_argument(format!("Limit out of range: {e}")))?;

        self.get_collection(collection)
            .find(request.criteria)
            .with_options(options)
            .await
            .map_err(backend)?
            .try_collect::<Vec<Document>>()
            .await
            .map_err(backend)
    }

    #[instrument(skip(self, criteria))]
    async fn count(&self, collection: &str, criteria: Document) -> StencilResult<u64> {
        self.get_collection(collection)
            .count_documents(criteria)
            .await
            .map_err(backend)
    }

    #[instrument(skip(self, criteria, modifier, options))]
    async fn find_one_and_update(
        &self,
        collection: &str,
        criteria: Document,
        modifier: Document,
        options: FindAndModifyOptions,
    ) -> StencilResult<Option<Document>> {
        let target = self.get_collection(collection);

        if !is_operator_document(&modifier) {
            let mut replace = FindOneAndReplaceOptions::default();
            replace.projection = options.projection;
            replace.sort = options.sort;
            replace.upsert = Some(options.upsert);
            replace.return_document = Some(return_document(options.return_document));

            return target
                .find_one_and_replace(criteria, modifier)
                .with_options(replace)
                .await
                .map_err(backend);
        }

        let mut update = FindOneAndUpdateOptions::default();
        update.projection = options.projection;
        update.sort = options.sort;
        update.upsert = Some(options.upsert);
        update.return_document = Some(return_document(options.return_document));

        target
            .find_one_and_update(criteria, modifier)
            .with_options(update)
            .await
            .map_err(backend)
    }

    #[instrument(skip(self, criteria, projection, sort))]
    async fn find_one_and_delete(
        &self,
        collection: &str,
        criteria: Document,
        projection: Option<Document>,
        sort: Option<Document>,
    ) -> StencilResult<Option<Document>> {
        let mut options = FindOneAndDeleteOptions::default();
        options.projection = projection;
        options.sort = sort;

        self.get_collection(collection)
            .find_one_and_delete(criteria)
            .with_options(options)
            .await
            .map_err(backend)
    }

    #[instrument(skip(self, criteria, modifier))]
    async fn update(
        &self,
        collection: &str,
        criteria: Document,
        modifier: Document,
        options: UpdateOptions,
    ) -> StencilResult<UpdateOutcome> {
        let target = self.get_collection(collection);

        let result = if !is_operator_document(&modifier) {
            if options.multi {
                return Err(StencilError::Backend(
                    "A replacement document cannot update multiple documents".to_string(),
                ));
            }
            let mut replace = ReplaceOptions::default();
            replace.upsert = Some(options.upsert);

            target
                .replace_one(criteria, modifier)
                .with_options(replace)
                .await
        } else {
            let mut update = MongoUpdateOptions::default();
            update.upsert = Some(options.upsert);

            if options.multi {
                target.update_many(criteria, modifier).with_options(update).await
            } else {
                target.update_one(criteria, modifier).with_options(update).await
            }
        }
        .map_err(backend)?;

        Ok(UpdateOutcome {
            matched: result.matched_count,
            modified: result.modified_count,
            upserted_id: result.upserted_id,
        })
    }

    #[instrument(skip(self, documents), fields(count = documents.len()))]
    async fn insert(&self, collection: &str, documents: Vec<Document>) -> StencilResult<InsertOutcome> {
        if documents.is_empty() {
            return Ok(InsertOutcome::default());
        }

        let mut inserted: Vec<(usize, Bson)> = self
            .get_collection(collection)
            .insert_many(documents)
            .await
            .map_err(backend)?
            .inserted_ids
            .into_iter()
            .collect();
        inserted.sort_by_key(|(index, _)| *index);

        Ok(InsertOutcome {
            inserted_ids: inserted.into_iter().map(|(_, id)| id).collect(),
        })
    }

    #[instrument(skip(self, criteria))]
    async fn remove(&self, collection: &str, criteria: Document, multi: bool) -> StencilResult<RemoveOutcome> {
        let target = self.get_collection(collection);

        let result = if multi {
            target.delete_many(criteria).await
        } else {
            target.delete_one(criteria).await
        }
        .map_err(backend)?;

        Ok(RemoveOutcome {
            removed: result.deleted_count,
        })
    }

    #[instrument(skip(self, pipeline), fields(stages = pipeline.len()))]
    async fn aggregate(&self, collection: &str, pipeline: Vec<Document>) -> StencilResult<Vec<Document>> {
        self.get_collection(collection)
            .aggregate(pipeline)
            .await
            .map_err(backend)?
            .try_collect::<Vec<Document>>()
            .await
            .map_err(backend)
    }

    async fn shutdown(self) -> StencilResult<()> {
        self.client.shutdown().await;

        Ok(())
    }
}

/// Connects a [`MongoDbDriver`] from a connection string.
#[derive(Debug)]
pub struct MongoDbDriverBuilder {
    dsn: String,
    database: String,
}

impl MongoDbDriverBuilder {
    pub fn new(dsn: &str, database: &str) -> Self {
        Self {
            dsn: dsn.to_string(),
            database: database.to_string(),
        }
    }
}

#[async_trait]
impl DriverBuilder for MongoDbDriverBuilder {
    type Driver = MongoDbDriver;

    async fn build(self) -> StencilResult<Self::Driver> {
        Ok(MongoDbDriver::new(
            Client::with_options(
                ClientOptions::parse(&self.dsn)
                    .await
                    .map_err(|e| StencilError::Initialization(e.to_string()))?,
            )
            .map_err(|e| StencilError::Initialization(e.to_string()))?,
            self.database,
        ))
    }
}
