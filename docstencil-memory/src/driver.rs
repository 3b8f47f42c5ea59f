//! In-memory driver implementation.
//!
//! Collections are kept as insertion-ordered vectors of documents behind an async-aware
//! read-write lock. Every operation scans its collection; there is no indexing.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use bson::{Bson, Document, oid::ObjectId};
use mea::rwlock::RwLock;
use tracing::{debug, trace};

use docstencil_core::{
    document::ID_FIELD,
    driver::{
        Driver, DriverBuilder, FindAndModifyOptions, FindRequest, InsertOutcome, RemoveOutcome,
        ReturnDocument, UpdateOptions, UpdateOutcome, is_operator_document,
    },
    error::{StencilError, StencilResult},
};

use crate::{
    cursor::{self, project},
    evaluator::{filter, matches},
    modifier::{self, upsert_document, with_id_first},
    pipeline,
};

type CollectionMap = HashMap<String, Vec<Document>>;

/// Thread-safe in-memory [`Driver`].
///
/// Clones share the same underlying collections, so a driver can be handed to several
/// [`Stencil`](docstencil_core::store::Stencil) instances or tasks at once.
///
/// # Example
///
/// ```ignore
/// use docstencil_memory::InMemoryDriver;
/// use docstencil_core::driver::{Driver, FindRequest};
/// use bson::doc;
///
/// let driver = InMemoryDriver::new();
/// driver.insert("friends", vec![doc! { "name": "Robert", "age": 30 }]).await?;
///
/// let adults = driver
///     .find("friends", FindRequest::new(doc! { "age": { "$gte": 18 } }))
///     .await?;
/// assert_eq!(adults.len(), 1);
/// ```
#[derive(Default, Clone, Debug)]
pub struct InMemoryDriver {
    /// collection name -> documents in insertion order
    collections: Arc<RwLock<CollectionMap>>,
}

impl InMemoryDriver {
    /// Creates an empty driver.
    pub fn new() -> Self {
        Self {
            collections: Arc::new(RwLock::new(CollectionMap::new())),
        }
    }

    /// Creates a builder, which can seed collections before use.
    pub fn builder() -> InMemoryDriverBuilder {
        InMemoryDriverBuilder::default()
    }

    /// Returns the names of the collections holding at least one document, sorted.
    pub async fn collection_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .collections
            .read()
            .await
            .iter()
            .filter(|(_, documents)| !documents.is_empty())
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();

        names
    }
}

#[async_trait]
impl Driver for InMemoryDriver {
    async fn find(&self, collection: &str, request: FindRequest) -> StencilResult<Vec<Document>> {
        let collections = self.collections.read().await;
        let Some(documents) = collections.get(collection) else {
            return Ok(Vec::new());
        };

        let mut found = filter(documents, &request.criteria)?;
        if let Some(sort) = &request.sort {
            cursor::sort(&mut found, sort, |document| *document)?;
        }

        let skip = window(request.skip);
        // a limit of zero means no limit
        let limit = match window(request.limit) {
            0 => usize::MAX,
            limit => limit,
        };

        found
            .into_iter()
            .skip(skip)
            .take(limit)
            .map(|document| shape(document, request.projection.as_ref()))
            .collect()
    }

    async fn count(&self, collection: &str, criteria: Document) -> StencilResult<u64> {
        let collections = self.collections.read().await;

        match collections.get(collection) {
            Some(documents) => Ok(filter(documents, &criteria)?.len() as u64),
            None => Ok(0),
        }
    }

    async fn find_one_and_update(
        &self,
        collection: &str,
        criteria: Document,
        modifier: Document,
        options: FindAndModifyOptions,
    ) -> StencilResult<Option<Document>> {
        let mut collections = self.collections.write().await;
        let documents = collections.entry(collection.to_string()).or_default();

        let (before, after) = match first_match(documents, &criteria, options.sort.as_ref())? {
            Some(index) => {
                let mut after = documents[index].clone();
                modifier::apply(&mut after, &modifier, false)?;
                let before = std::mem::replace(&mut documents[index], after.clone());
                (Some(before), after)
            }
            None if options.upsert => {
                let inserted = upsert_document(&criteria, &modifier)?;
                debug!(collection, id = ?inserted.get(ID_FIELD), "upserted document");
                documents.push(inserted.clone());
                (None, inserted)
            }
            None => return Ok(None),
        };

        let returned = match options.return_document {
            ReturnDocument::Before => before,
            ReturnDocument::After => Some(after),
        };

        returned
            .map(|document| shape(&document, options.projection.as_ref()))
            .transpose()
    }

    async fn find_one_and_delete(
        &self,
        collection: &str,
        criteria: Document,
        projection: Option<Document>,
        sort: Option<Document>,
    ) -> StencilResult<Option<Document>> {
        let mut collections = self.collections.write().await;
        let Some(documents) = collections.get_mut(collection) else {
            return Ok(None);
        };

        match first_match(documents, &criteria, sort.as_ref())? {
            Some(index) => {
                let removed = documents.remove(index);
                shape(&removed, projection.as_ref()).map(Some)
            }
            None => Ok(None),
        }
    }

    async fn update(
        &self,
        collection: &str,
        criteria: Document,
        modifier: Document,
        options: UpdateOptions,
    ) -> StencilResult<UpdateOutcome> {
        if options.multi && !is_operator_document(&modifier) {
            return Err(StencilError::Backend(
                "A replacement document cannot update multiple documents".to_string(),
            ));
        }

        let mut collections = self.collections.write().await;
        let documents = collections.entry(collection.to_string()).or_default();

        let mut targets = matching(documents, &criteria)?;
        if !options.multi {
            targets.truncate(1);
        }

        let mut outcome = UpdateOutcome::default();
        for index in targets {
            let mut updated = documents[index].clone();
            modifier::apply(&mut updated, &modifier, false)?;

            outcome.matched += 1;
            if updated != documents[index] {
                outcome.modified += 1;
                documents[index] = updated;
            }
        }

        if outcome.matched == 0 && options.upsert {
            let inserted = upsert_document(&criteria, &modifier)?;
            outcome.upserted_id = inserted.get(ID_FIELD).cloned();
            documents.push(inserted);
        }

        trace!(
            collection,
            matched = outcome.matched,
            modified = outcome.modified,
            upserted = outcome.upserted_id.is_some(),
            "updated documents"
        );

        Ok(outcome)
    }

    async fn insert(&self, collection: &str, documents: Vec<Document>) -> StencilResult<InsertOutcome> {
        let mut collections = self.collections.write().await;
        let stored = collections.entry(collection.to_string()).or_default();

        let mut prepared: Vec<Document> = Vec::with_capacity(documents.len());
        for document in documents {
            let document = match document.get(ID_FIELD) {
                Some(_) => document,
                None => with_id_first(document, Bson::ObjectId(ObjectId::new())),
            };
            let id = document.get(ID_FIELD);

            if stored.iter().chain(prepared.iter()).any(|existing| existing.get(ID_FIELD) == id) {
                return Err(StencilError::Backend(format!(
                    "Duplicate key {} in collection '{collection}'",
                    id.map_or_else(String::new, ToString::to_string)
                )));
            }
            prepared.push(document);
        }

        let inserted_ids = prepared
            .iter()
            .filter_map(|document| document.get(ID_FIELD).cloned())
            .collect();
        stored.extend(prepared);

        Ok(InsertOutcome { inserted_ids })
    }

    async fn remove(&self, collection: &str, criteria: Document, multi: bool) -> StencilResult<RemoveOutcome> {
        let mut collections = self.collections.write().await;
        let Some(documents) = collections.get_mut(collection) else {
            return Ok(RemoveOutcome::default());
        };

        let mut targets = matching(documents, &criteria)?;
        if !multi {
            targets.truncate(1);
        }

        for index in targets.iter().rev() {
            documents.remove(*index);
        }

        Ok(RemoveOutcome {
            removed: targets.len() as u64,
        })
    }

    async fn aggregate(&self, collection: &str, pipeline: Vec<Document>) -> StencilResult<Vec<Document>> {
        let documents = self
            .collections
            .read()
            .await
            .get(collection)
            .cloned()
            .unwrap_or_default();

        pipeline::run(documents, &pipeline)
    }
}

fn window(value: Option<u64>) -> usize {
    value
        .map(|value| usize::try_from(value).unwrap_or(usize::MAX))
        .unwrap_or(0)
}

fn shape(document: &Document, projection: Option<&Document>) -> StencilResult<Document> {
    match projection {
        Some(projection) if !projection.is_empty() => project(document, projection),
        _ => Ok(document.clone()),
    }
}

fn matching(documents: &[Document], criteria: &Document) -> StencilResult<Vec<usize>> {
    let mut indices = Vec::new();
    for (index, document) in documents.iter().enumerate() {
        if matches(document, criteria)? {
            indices.push(index);
        }
    }

    Ok(indices)
}

fn first_match(documents: &[Document], criteria: &Document, sort: Option<&Document>) -> StencilResult<Option<usize>> {
    let indices = matching(documents, criteria)?;

    let Some(sort) = sort else {
        return Ok(indices.first().copied());
    };

    let mut candidates: Vec<(usize, &Document)> = indices.into_iter().map(|index| (index, &documents[index])).collect();
    cursor::sort(&mut candidates, sort, |(_, document)| *document)?;

    Ok(candidates.first().map(|(index, _)| *index))
}

/// Builder for [`InMemoryDriver`] instances, optionally seeded with documents.
///
/// # Example
///
/// ```ignore
/// use docstencil_memory::InMemoryDriver;
/// use docstencil_core::driver::DriverBuilder;
/// use bson::doc;
///
/// let driver = InMemoryDriver::builder()
///     .collection("friends", vec![doc! { "name": "Robert" }])
///     .build()
///     .await?;
/// ```
#[derive(Debug, Default)]
pub struct InMemoryDriverBuilder {
    seed: Vec<(String, Vec<Document>)>,
}

impl InMemoryDriverBuilder {
    /// Seeds the named collection with `documents`.
    pub fn collection(mut self, name: &str, documents: Vec<Document>) -> Self {
        self.seed.push((name.to_string(), documents));
        self
    }
}

#[async_trait]
impl DriverBuilder for InMemoryDriverBuilder {
    type Driver = InMemoryDriver;

    /// Builds the driver and inserts the seeded documents.
    ///
    /// Fails if a seeded document repeats an `_id`.
    async fn build(self) -> StencilResult<Self::Driver> {
        let driver = InMemoryDriver::new();
        for (name, documents) in self.seed {
            driver.insert(&name, documents).await?;
        }

        Ok(driver)
    }
}

#[cfg(test)]
mod tests {
    use bson::doc;

    use super::*;

    async fn seeded() -> InMemoryDriver {
        InMemoryDriver::builder()
            .collection(
                "friends",
                vec![
                    doc! { "_id": 1, "name": "John", "age": 18 },
                    doc! { "_id": 2, "name": "Peter", "age": 25 },
                    doc! { "_id": 3, "name": "Robert", "age": 30 },
                ],
            )
            .build()
            .await
            .unwrap()
    }

    fn names(documents: &[Document]) -> Vec<&str> {
        documents.iter().map(|d| d.get_str("name").unwrap()).collect()
    }

    #[tokio::test]
    async fn test_find_with_options() {
        let driver = seeded().await;

        let request = FindRequest {
            criteria: doc! { "age": { "$gte": 18 } },
            projection: Some(doc! { "name": 1, "_id": 0 }),
            sort: Some(doc! { "age": -1 }),
            skip: Some(1),
            limit: Some(1),
        };
        let found = driver.find("friends", request).await.unwrap();
        assert_eq!(found, vec![doc! { "name": "Peter" }]);

        let all = driver.find("friends", FindRequest::new(doc! {})).await.unwrap();
        assert_eq!(names(&all), vec!["John", "Peter", "Robert"]);

        assert!(driver.find("missing", FindRequest::new(doc! {})).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_count() {
        let driver = seeded().await;

        assert_eq!(driver.count("friends", doc! { "age": { "$gt": 18 } }).await.unwrap(), 2);
        assert_eq!(driver.count("missing", doc! {}).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_insert_assigns_ids_and_rejects_duplicates() {
        let driver = seeded().await;

        let outcome = driver.insert("friends", vec![doc! { "name": "Sarah" }]).await.unwrap();
        assert!(matches!(outcome.inserted_ids.as_slice(), [Bson::ObjectId(_)]));

        let stored = driver.find("friends", FindRequest::new(doc! { "name": "Sarah" })).await.unwrap();
        assert_eq!(stored[0].keys().next().map(String::as_str), Some(ID_FIELD));

        let duplicate = driver.insert("friends", vec![doc! { "_id": 1, "name": "Again" }]).await;
        assert!(matches!(duplicate, Err(StencilError::Backend(_))));
        assert_eq!(driver.count("friends", doc! {}).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_update_single_and_multi() {
        let driver = seeded().await;

        let single = driver
            .update("friends", doc! {}, doc! { "$inc": { "age": 1 } }, UpdateOptions::default())
            .await
            .unwrap();
        assert_eq!((single.matched, single.modified), (1, 1));

        let multi = driver
            .update(
                "friends",
                doc! { "age": { "$lt": 30 } },
                doc! { "$set": { "young": true } },
                UpdateOptions { upsert: false, multi: true },
            )
            .await
            .unwrap();
        assert_eq!((multi.matched, multi.modified), (2, 2));

        let unchanged = driver
            .update("friends", doc! { "_id": 3 }, doc! { "$set": { "age": 30 } }, UpdateOptions::default())
            .await
            .unwrap();
        assert_eq!((unchanged.matched, unchanged.modified), (1, 0));

        let john = driver.find("friends", FindRequest::new(doc! { "_id": 1 })).await.unwrap();
        assert_eq!(john[0], doc! { "_id": 1, "name": "John", "age": 19, "young": true });
    }

    #[tokio::test]
    async fn test_update_upsert() {
        let driver = seeded().await;

        let outcome = driver
            .update(
                "friends",
                doc! { "name": "Sarah" },
                doc! { "$set": { "age": 41 } },
                UpdateOptions { upsert: true, multi: false },
            )
            .await
            .unwrap();

        assert_eq!(outcome.matched, 0);
        assert!(matches!(outcome.upserted_id, Some(Bson::ObjectId(_))));

        let sarah = driver.find("friends", FindRequest::new(doc! { "name": "Sarah" })).await.unwrap();
        assert_eq!(sarah[0].get_i32("age").unwrap(), 41);
    }

    #[tokio::test]
    async fn test_replacement_update() {
        let driver = seeded().await;

        driver
            .update("friends", doc! { "_id": 2 }, doc! { "name": "Pete" }, UpdateOptions::default())
            .await
            .unwrap();
        let pete = driver.find("friends", FindRequest::new(doc! { "_id": 2 })).await.unwrap();
        assert_eq!(pete, vec![doc! { "_id": 2, "name": "Pete" }]);

        let multi = driver
            .update("friends", doc! {}, doc! { "name": "x" }, UpdateOptions { upsert: false, multi: true })
            .await;
        assert!(multi.is_err());
    }

    #[tokio::test]
    async fn test_find_one_and_update() {
        let driver = seeded().await;

        let options = FindAndModifyOptions {
            sort: Some(doc! { "age": -1 }),
            projection: Some(doc! { "age": 1 }),
            ..FindAndModifyOptions::default()
        };
        let after = driver
            .find_one_and_update("friends", doc! {}, doc! { "$inc": { "age": 1 } }, options)
            .await
            .unwrap();
        assert_eq!(after, Some(doc! { "_id": 3, "age": 31 }));

        let before = driver
            .find_one_and_update(
                "friends",
                doc! { "_id": 1 },
                doc! { "$set": { "age": 20 } },
                FindAndModifyOptions { return_document: ReturnDocument::Before, ..FindAndModifyOptions::default() },
            )
            .await
            .unwrap();
        assert_eq!(before.and_then(|d| d.get_i32("age").ok()), Some(18));

        let nothing = driver
            .find_one_and_update("friends", doc! { "_id": 9 }, doc! { "$set": { "a": 1 } }, FindAndModifyOptions::default())
            .await
            .unwrap();
        assert_eq!(nothing, None);
    }

    #[tokio::test]
    async fn test_find_one_and_update_upsert() {
        let driver = seeded().await;

        let upserted = driver
            .find_one_and_update(
                "friends",
                doc! { "name": "Sarah" },
                doc! { "$set": { "age": 41 } },
                FindAndModifyOptions { upsert: true, ..FindAndModifyOptions::default() },
            )
            .await
            .unwrap()
            .unwrap();

        assert_eq!(upserted.get_str("name").unwrap(), "Sarah");
        assert_eq!(upserted.get_i32("age").unwrap(), 41);
        assert_eq!(driver.count("friends", doc! {}).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_find_one_and_delete() {
        let driver = seeded().await;

        let removed = driver
            .find_one_and_delete("friends", doc! {}, Some(doc! { "name": 1 }), Some(doc! { "age": -1 }))
            .await
            .unwrap();
        assert_eq!(removed, Some(doc! { "_id": 3, "name": "Robert" }));
        assert_eq!(driver.count("friends", doc! {}).await.unwrap(), 2);

        let nothing = driver.find_one_and_delete("missing", doc! {}, None, None).await.unwrap();
        assert_eq!(nothing, None);
    }

    #[tokio::test]
    async fn test_remove() {
        let driver = seeded().await;

        let one = driver.remove("friends", doc! { "age": { "$gt": 18 } }, false).await.unwrap();
        assert_eq!(one.removed, 1);

        let all = driver.remove("friends", doc! {}, true).await.unwrap();
        assert_eq!(all.removed, 2);
        assert!(driver.collection_names().await.is_empty());
    }

    #[tokio::test]
    async fn test_aggregate() {
        let driver = seeded().await;

        let result = driver
            .aggregate(
                "friends",
                vec![doc! { "$match": { "age": { "$gt": 18 } } }, doc! { "$count": "n" }],
            )
            .await
            .unwrap();
        assert_eq!(result, vec![doc! { "n": 2 }]);

        assert!(driver.aggregate("missing", vec![]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_clones_share_collections() {
        let driver = InMemoryDriver::new();
        let clone = driver.clone();

        clone.insert("friends", vec![doc! { "name": "x" }]).await.unwrap();

        assert_eq!(driver.collection_names().await, vec!["friends".to_string()]);
    }
}
