use std::{
    cell::Cell,
    error::Error,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use bson::{Bson, Document, doc, oid::ObjectId};
use docstencil::{
    driver::{
        FindAndModifyOptions, FindRequest, InsertOutcome, RemoveOutcome, ReturnDocument, UpdateOptions,
        UpdateOutcome,
    },
    marshal::{Marshal, Marshaller, Unmarshaller},
    memory::InMemoryDriver,
    prelude::*,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Friend {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    id: Option<ObjectId>,
    name: String,
    age: i32,
    address: String,
}

impl Entity for Friend {
    fn collection_name() -> &'static str {
        "friends"
    }
}

fn friend(name: &str, age: i32, address: &str) -> Friend {
    Friend {
        id: None,
        name: name.to_string(),
        age,
        address: address.to_string(),
    }
}

async fn seeded() -> Stencil<InMemoryDriver> {
    let stencil = Stencil::new(InMemoryDriver::new());
    stencil
        .collection_for::<Friend>()
        .insert_many(&[
            friend("John", 18, "London"),
            friend("Peter", 25, "Paris"),
            friend("Robert", 30, "Paris"),
        ])
        .await
        .unwrap();

    stencil
}

fn names(friends: &[Friend]) -> Vec<&str> {
    friends.iter().map(|f| f.name.as_str()).collect()
}

/// Records the arguments of every update and delegates to an in-memory driver.
#[derive(Debug, Default)]
struct RecordingDriver {
    inner: InMemoryDriver,
    updates: Mutex<Vec<(Document, Document, UpdateOptions)>>,
    modified: Mutex<Vec<FindAndModifyOptions>>,
}

impl RecordingDriver {
    fn updates(&self) -> Vec<(Document, Document, UpdateOptions)> {
        self.updates.lock().unwrap().clone()
    }

    fn modified(&self) -> Vec<FindAndModifyOptions> {
        self.modified.lock().unwrap().clone()
    }
}

/// Counts the documents handed to the unmarshaller.
#[derive(Debug, Default)]
struct CountingMapper {
    inner: BsonMapper,
    unmarshalled: AtomicUsize,
}

impl CountingMapper {
    fn unmarshalled(&self) -> usize {
        self.unmarshalled.load(Ordering::SeqCst)
    }
}

impl Marshaller for CountingMapper {
    fn marshal(&self, object: &dyn Marshal) -> StencilResult<Document> {
        self.inner.marshal(object)
    }
}

impl Unmarshaller for CountingMapper {
    fn unmarshal<T: serde::de::DeserializeOwned>(&self, document: Document) -> StencilResult<T> {
        self.unmarshalled.fetch_add(1, Ordering::SeqCst);
        self.inner.unmarshal(document)
    }
}

#[async_trait]
impl Driver for RecordingDriver {
    async fn find(&self, collection: &str, request: FindRequest) -> StencilResult<Vec<Document>> {
        self.inner.find(collection, request).await
    }

    async fn count(&self, collection: &str, criteria: Document) -> StencilResult<u64> {
        self.inner.count(collection, criteria).await
    }

    async fn find_one_and_update(
        &self,
        collection: &str,
        criteria: Document,
        modifier: Document,
        options: FindAndModifyOptions,
    ) -> StencilResult<Option<Document>> {
        self.modified.lock().unwrap().push(options.clone());
        self.inner
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
        self.inner
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
        self.updates
            .lock()
            .unwrap()
            .push((criteria.clone(), modifier.clone(), options));
        self.inner.update(collection, criteria, modifier, options).await
    }

    async fn insert(&self, collection: &str, documents: Vec<Document>) -> StencilResult<InsertOutcome> {
        self.inner.insert(collection, documents).await
    }

    async fn remove(&self, collection: &str, criteria: Document, multi: bool) -> StencilResult<RemoveOutcome> {
        self.inner.remove(collection, criteria, multi).await
    }

    async fn aggregate(&self, collection: &str, pipeline: Vec<Document>) -> StencilResult<Vec<Document>> {
        self.inner.aggregate(collection, pipeline).await
    }
}

#[tokio::test]
async fn test_insert_and_find_one() {
    let stencil = Stencil::new(InMemoryDriver::new());
    let friends = stencil.collection_for::<Friend>();

    let id = friends.insert(&friend("Robert", 30, "Paris")).await.unwrap();

    let robert: Friend = friends
        .find_one("{name: #}", params!["Robert"])
        .as_type()
        .await
        .unwrap()
        .unwrap();
    assert_eq!(robert.id, id.as_object_id());
    assert_eq!(robert.age, 30);

    let by_id: Option<Friend> = friends
        .find_one_by_id(robert.id.unwrap())
        .as_type()
        .await
        .unwrap();
    assert_eq!(by_id, Some(robert));
}

#[tokio::test]
async fn test_find_with_builder_options() {
    let stencil = seeded().await;
    let friends = stencil.collection("friends");

    let adults: Vec<Friend> = friends
        .find("{age: {$gte: #}}", params![18])
        .sort("{age: -1}")
        .skip(1)
        .limit(1)
        .as_type()
        .await
        .unwrap();
    assert_eq!(names(&adults), vec!["Peter"]);

    let projected = friends
        .find("{address: #}", params!["Paris"])
        .projection("{name: 1, _id: 0}")
        .sort("{name: 1}")
        .documents()
        .await
        .unwrap();
    assert_eq!(projected, vec![doc! { "name": "Peter" }, doc! { "name": "Robert" }]);

    let projected_with = friends
        .find_one("{name: #}", params!["John"])
        .projection_with("{#: 1, _id: 0}", params!["age"])
        .document()
        .await
        .unwrap();
    assert_eq!(projected_with, Some(doc! { "age": 18 }));
}

#[tokio::test]
async fn test_find_with_regex_and_single_quotes() {
    let stencil = seeded().await;
    let friends = stencil.collection("friends");

    let found: Vec<Friend> = friends
        .find("{name: /^r/i, address: 'Paris'}", params![])
        .as_type()
        .await
        .unwrap();

    assert_eq!(names(&found), vec!["Robert"]);
}

#[tokio::test]
async fn test_string_arguments_cannot_change_query_structure() {
    let stencil = seeded().await;
    let friends = stencil.collection("friends");

    let injected = "Robert', age: {$gt: 0}, x: '";
    let found = friends
        .find("{name: #}", params![injected])
        .documents()
        .await
        .unwrap();
    assert!(found.is_empty());

    let query = stencil.create_query("{name: #}", &params![injected]).unwrap();
    assert_eq!(query.to_document().unwrap(), doc! { "name": injected });
}

#[tokio::test]
async fn test_no_match_does_not_invoke_handler() {
    let stencil = seeded().await;
    let friends = stencil.collection("friends");
    let invoked = Cell::new(false);

    let result = friends
        .find_one("{name: #}", params!["Nobody"])
        .map(|document: Document| -> StencilResult<String> {
            invoked.set(true);
            Ok(document.get_str("name").unwrap_or_default().to_string())
        })
        .await
        .unwrap();

    assert_eq!(result, None);
    assert!(!invoked.get());

    let ages = friends
        .find("{}", params![])
        .sort("{age: 1}")
        .map(|document: Document| -> StencilResult<i32> { Ok(document.get_i32("age").unwrap_or(0)) })
        .await
        .unwrap();
    assert_eq!(ages, vec![18, 25, 30]);
}

#[tokio::test]
async fn test_object_id_coercion() {
    let stencil = seeded().await;
    let friends = stencil.collection("friends");

    let robert = friends
        .find_one("{name: #}", params!["Robert"])
        .document()
        .await
        .unwrap()
        .unwrap();
    let id = robert.get_object_id("_id").unwrap();

    for template in ["{_id: #oid}", "{_id: {$oid: #}}"] {
        let found = friends
            .find_one(template, params![id.to_hex()])
            .document()
            .await
            .unwrap();
        assert_eq!(found.as_ref(), Some(&robert), "template {template}");
    }

    let not_an_id = friends.find_one("{_id: #oid}", params!["zz"]).document().await;
    assert!(not_an_id.is_err());
}

#[tokio::test]
async fn test_count_and_remove() {
    let stencil = seeded().await;
    let friends = stencil.collection("friends");

    assert_eq!(friends.count("{address: #}", params!["Paris"]).await.unwrap(), 2);
    assert_eq!(friends.count("{}", params![]).await.unwrap(), 3);

    let removed = friends.remove("{address: #}", params!["Paris"]).await.unwrap();
    assert_eq!(removed.removed, 2);

    let john = friends.find_one("{}", params![]).document().await.unwrap().unwrap();
    let removed = friends.remove_by_id(john.get_object_id("_id").unwrap()).await.unwrap();
    assert_eq!(removed.removed, 1);
    assert_eq!(friends.count("{}", params![]).await.unwrap(), 0);
}

#[tokio::test]
async fn test_insert_template() {
    let stencil = Stencil::new(InMemoryDriver::new());
    let friends = stencil.collection("friends");

    let single = friends
        .insert_template("{name: #, age: #}", params!["Sarah", 41])
        .await
        .unwrap();
    assert_eq!(single.inserted_ids.len(), 1);

    let many = friends
        .insert_template("[{name: #}, {name: #}]", params!["A", "B"])
        .await
        .unwrap();
    assert_eq!(many.inserted_ids.len(), 2);
    assert!(many.inserted_ids.iter().all(|id| matches!(id, Bson::ObjectId(_))));

    assert_eq!(friends.count("{}", params![]).await.unwrap(), 3);
    assert!(friends.insert_template("[1, 2]", params![]).await.is_err());
}

#[tokio::test]
async fn test_update_does_not_upsert_by_default() {
    let driver = Arc::new(RecordingDriver::default());
    let stencil = Stencil::new(Arc::clone(&driver));
    let friends = stencil.collection("friends");

    let outcome = friends
        .update("{name: #}", params!["Sarah"])
        .with("{$set: {age: #}}", params![41])
        .await
        .unwrap();
    assert_eq!((outcome.matched, outcome.upserted_id), (0, None));
    assert_eq!(friends.count("{}", params![]).await.unwrap(), 0);

    let outcome = friends
        .update("{name: #}", params!["Sarah"])
        .upsert()
        .with("{$set: {age: #}}", params![41])
        .await
        .unwrap();
    assert!(outcome.upserted_id.is_some());

    let updates = driver.updates();
    assert_eq!(updates.len(), 2);
    assert_eq!(updates[0].0, doc! { "name": "Sarah" });
    assert_eq!(updates[0].1, doc! { "$set": { "age": 41 } });
    assert!(!updates[0].2.upsert && !updates[0].2.multi);
    assert!(updates[1].2.upsert);

    let sarah: Option<Friend> = friends
        .find_one("{name: #}", params!["Sarah"])
        .projection("{_id: 1, name: 1, age: 1, address: 1}")
        .map(|document: Document| -> StencilResult<Friend> {
            Ok(friend(
                document.get_str("name").unwrap_or_default(),
                document.get_i32("age").unwrap_or_default(),
                "",
            ))
        })
        .await
        .unwrap();
    assert_eq!(sarah.map(|f| f.age), Some(41));
}

#[tokio::test]
async fn test_update_multi() {
    let stencil = seeded().await;
    let friends = stencil.collection("friends");

    let outcome = friends
        .update("{address: #}", params!["Paris"])
        .multi()
        .with("{$inc: {age: #}}", params![1])
        .await
        .unwrap();
    assert_eq!((outcome.matched, outcome.modified), (2, 2));

    let single = friends
        .update("{address: #}", params!["Paris"])
        .with("{$set: {moved: true}}", params![])
        .await
        .unwrap();
    assert_eq!(single.matched, 1);
}

#[tokio::test]
async fn test_update_with_object_drops_id() {
    let driver = Arc::new(RecordingDriver::default());
    let stencil = Stencil::new(Arc::clone(&driver));
    let friends = stencil.collection_for::<Friend>();

    friends.insert(&friend("Robert", 30, "Paris")).await.unwrap();

    let replacement = Friend {
        id: Some(ObjectId::new()),
        ..friend("Robert", 31, "London")
    };
    let outcome = friends
        .update("{name: #}", params!["Robert"])
        .with_object(&replacement)
        .await
        .unwrap();
    assert_eq!(outcome.modified, 1);

    let (_, modifier, _) = driver.updates().remove(0);
    assert_eq!(modifier, doc! { "$set": { "name": "Robert", "age": 31, "address": "London" } });

    let robert: Friend = friends
        .find_one("{name: #}", params!["Robert"])
        .as_type()
        .await
        .unwrap()
        .unwrap();
    assert_eq!((robert.age, robert.address.as_str()), (31, "London"));
    assert_ne!(robert.id, replacement.id);
}

#[tokio::test]
async fn test_update_requires_modifier() {
    let stencil = seeded().await;
    let friends = stencil.collection("friends");

    let blank = friends.update("{}", params![]).with("  ", params![]).await;
    assert!(matches!(blank, Err(StencilError::InvalidArgument { .. })));
}

#[tokio::test]
async fn test_find_and_modify() {
    let stencil = seeded().await;
    let friends = stencil.collection_for::<Friend>();

    let updated: Friend = friends
        .find_and_modify("{name: #}", params!["Robert"])
        .with("{$inc: {age: #}}", params![1])
        .return_new()
        .as_type()
        .await
        .unwrap()
        .unwrap();
    assert_eq!(updated.age, 31);

    let oldest = friends
        .find_and_modify("{}", params![])
        .with("{$set: {oldest: true}}", params![])
        .sort("{age: -1}")
        .projection("{name: 1, oldest: 1, _id: 0}")
        .document()
        .await
        .unwrap();
    assert_eq!(oldest, Some(doc! { "name": "Robert", "oldest": true }));

    let missing = friends
        .find_and_modify("{name: #}", params!["Nobody"])
        .with("{$set: {age: 1}}", params![])
        .document()
        .await
        .unwrap();
    assert_eq!(missing, None);

    let upserted: Option<Friend> = friends
        .find_and_modify("{name: #}", params!["Sarah"])
        .with("{$set: {age: #, address: #}}", params![41, "Rome"])
        .upsert()
        .as_type()
        .await
        .unwrap();
    assert_eq!(upserted.map(|f| f.address), Some("Rome".to_string()));
}

#[tokio::test]
async fn test_find_and_modify_projection_with_parameters() {
    let stencil = seeded().await;
    let friends = stencil.collection("friends");

    let projected = friends
        .find_and_modify("{name: #}", params!["Peter"])
        .with("{$inc: {age: #}}", params![1])
        .projection_with("{#: 1, _id: 0}", params!["age"])
        .document()
        .await
        .unwrap();
    assert_eq!(projected, Some(doc! { "age": 26 }));

    let err = friends
        .find_and_modify("{name: #}", params!["Peter"])
        .with("{$inc: {age: 1}}", params![])
        .projection_with("{#: 1}", params![])
        .document()
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "Unable to execute find and modify using template {#: 1}");
}

#[tokio::test]
async fn test_find_and_modify_options_reach_the_driver() {
    let driver = Arc::new(RecordingDriver::default());
    let stencil = Stencil::new(Arc::clone(&driver));
    let friends = stencil.collection("friends");

    friends
        .find_and_modify("{name: #}", params!["Sarah"])
        .with("{$set: {age: #}}", params![41])
        .document()
        .await
        .unwrap();
    friends
        .find_and_modify("{name: #}", params!["Sarah"])
        .upsert()
        .with("{$set: {age: #}}", params![41])
        .document()
        .await
        .unwrap();
    friends
        .find_and_modify("{name: #}", params!["Sarah"])
        .with("{$inc: {age: 1}}", params![])
        .sort("{age: -1}")
        .upsert()
        .document()
        .await
        .unwrap();

    let modified = driver.modified();
    assert_eq!(modified.len(), 3);
    assert!(!modified[0].upsert);
    assert!(modified[1].upsert && modified[2].upsert);
    assert_eq!(modified[2].sort, Some(doc! { "age": -1 }));
    assert!(
        modified
            .iter()
            .all(|options| options.return_document == ReturnDocument::After)
    );

    assert_eq!(friends.count("{}", params![]).await.unwrap(), 1);
}

#[tokio::test]
async fn test_find_and_modify_without_match_skips_unmarshalling() {
    let stencil = Stencil::builder(InMemoryDriver::new())
        .mapper(CountingMapper::default())
        .build()
        .unwrap();
    let friends = stencil.collection_for::<Friend>();
    friends.insert(&friend("Robert", 30, "Paris")).await.unwrap();

    let missing: Option<Friend> = friends
        .find_and_modify("{name: #}", params!["Nobody"])
        .with("{$set: {age: 1}}", params![])
        .as_type()
        .await
        .unwrap();
    assert_eq!(missing, None);
    assert_eq!(stencil.mapper().unmarshalled(), 0);

    let robert: Option<Friend> = friends
        .find_and_modify("{name: #}", params!["Robert"])
        .with("{$inc: {age: 1}}", params![])
        .as_type()
        .await
        .unwrap();
    assert_eq!(robert.map(|f| f.age), Some(31));
    assert_eq!(stencil.mapper().unmarshalled(), 1);
}

#[tokio::test]
async fn test_find_and_modify_remove() {
    let stencil = seeded().await;
    let friends = stencil.collection_for::<Friend>();

    let removed: Option<Friend> = friends
        .find_and_modify("{address: #}", params!["Paris"])
        .sort("{age: 1}")
        .remove()
        .as_type()
        .await
        .unwrap();
    assert_eq!(removed.map(|f| f.name), Some("Peter".to_string()));
    assert_eq!(friends.count("{}", params![]).await.unwrap(), 2);
}

#[tokio::test]
async fn test_find_and_modify_modifier_errors() {
    let stencil = seeded().await;
    let friends = stencil.collection("friends");

    let missing = friends.find_and_modify("{}", params![]).document().await;
    assert!(matches!(missing, Err(StencilError::InvalidArgument { .. })));

    let blank = friends
        .find_and_modify("{}", params![])
        .with("", params![])
        .document()
        .await;
    assert!(matches!(blank, Err(StencilError::InvalidArgument { .. })));

    assert_eq!(friends.count("{}", params![]).await.unwrap(), 3);
}

#[tokio::test]
async fn test_aggregate() {
    let stencil = seeded().await;
    let friends = stencil.collection_for::<Friend>();

    let parisians: Vec<Friend> = friends
        .aggregate("{$match: {address: #}}", params!["Paris"])
        .and("{$sort: {age: #}}", params![-1])
        .as_type()
        .await
        .unwrap();
    assert_eq!(names(&parisians), vec!["Robert", "Peter"]);

    let counted = friends
        .aggregate("[{$match: {age: {$gt: #}}}, {$count: 'n'}]", params![20])
        .documents()
        .await
        .unwrap();
    assert_eq!(counted, vec![doc! { "n": 2 }]);
}

#[tokio::test]
async fn test_clause_errors_name_the_template() {
    let stencil = seeded().await;
    let friends = stencil.collection("friends");

    let err = friends
        .find("{name: #, age: #}", params!["Robert"])
        .documents()
        .await
        .unwrap_err();

    assert_eq!(err.to_string(), "Unable to execute find using template {name: #, age: #}");
    assert!(matches!(
        err.source().and_then(|e| e.downcast_ref::<StencilError>()),
        Some(StencilError::ArgumentCountMismatch { expected: 2, actual: 1, .. })
    ));

    let err = friends
        .update("{name: #}", params!["Robert"])
        .with("{$set: #}", params![])
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "Unable to execute update using template {$set: #}");
}

#[test]
fn test_create_query() {
    let stencil = Stencil::new(InMemoryDriver::new());

    let query = stencil
        .create_query("{name: #, age: {$gt: #}}", &params!["Robert", 30])
        .unwrap();
    assert_eq!(query.as_str(), r#"{"name":"Robert","age":{"$gt":30}}"#);

    let ordered = stencil.create_query("{b: 1, a: #, c: 3}", &params![2]).unwrap();
    assert_eq!(ordered.as_str(), r#"{"b":1,"a":2,"c":3}"#);

    let fixed = stencil.create_query("{a: 1}", &params![]).unwrap();
    assert_eq!(fixed, stencil.create_query("{a: 1}", &params![]).unwrap());

    assert!(matches!(
        stencil.create_query("{a: #}", &params![]),
        Err(StencilError::ArgumentCountMismatch { expected: 1, actual: 0, .. })
    ));
    assert!(matches!(
        stencil.create_query("{#: 1}", &params![doc! { "$gt": 1 }]),
        Err(StencilError::InvalidArgumentType { .. })
    ));
}

#[tokio::test]
async fn test_custom_marker() {
    let stencil = Stencil::builder(InMemoryDriver::new())
        .config(QueryConfig {
            marker: '@',
            ..QueryConfig::default()
        })
        .build()
        .unwrap();
    let friends = stencil.collection("friends");

    friends.insert_template("{name: @, tag: '#1'}", params!["Robert"]).await.unwrap();

    let robert = friends
        .find_one("{name: @}", params!["Robert"])
        .document()
        .await
        .unwrap()
        .unwrap();
    assert_eq!(robert.get_str("tag").unwrap(), "#1");

    assert!(matches!(
        Stencil::builder(InMemoryDriver::new())
            .config(QueryConfig {
                marker: '{',
                ..QueryConfig::default()
            })
            .build(),
        Err(StencilError::Initialization(_))
    ));
}

#[tokio::test]
async fn test_entities_with_dates() {
    #[derive(Debug, Serialize, Deserialize)]
    struct Event {
        name: String,
        at: bson::DateTime,
    }

    let stencil = Stencil::new(InMemoryDriver::new());
    let events = stencil.collection("events");

    let at = chrono::Utc::now();
    events
        .insert(&Event {
            name: "launch".to_string(),
            at: bson::DateTime::from_chrono(at),
        })
        .await
        .unwrap();

    let found: Vec<Event> = events
        .find("{at: {$lte: #}}", params![at])
        .as_type()
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].name, "launch");

    stencil.shutdown().await.unwrap();
}
