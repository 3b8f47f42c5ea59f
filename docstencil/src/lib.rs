//! Parameterized document query templates for Rust.
//!
//! This crate is the primary entry point of the docstencil project. It re-exports the core
//! types from the sub-crates and gives access to the available drivers.
//!
//! Queries are written in a relaxed document notation with `#` placeholders, bound to typed
//! arguments and compiled straight into BSON, so an argument can never change the structure
//! of a query.
//!
//! # Features
//!
//! - **Templates** - `{name: #, age: {$gt: #}}`, with unquoted keys, single quotes and regexes
//! - **Typed binding** - Strings stay strings, objects are marshalled, ids are coerced
//! - **Operation builders** - Find, update, find-and-modify, aggregate, insert and remove
//! - **Result mapping** - Results deserialized with Serde or mapped by any closure
//! - **Multiple drivers** - In-memory and MongoDB drivers behind the [`driver::Driver`] trait
//!
//! # Quick Start
//!
//! ```ignore
//! use docstencil::{prelude::*, memory::InMemoryDriver};
//! use bson::oid::ObjectId;
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Debug, Clone, Serialize, Deserialize)]
//! pub struct Friend {
//!     #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
//!     pub id: Option<ObjectId>,
//!     pub name: String,
//!     pub age: i32,
//! }
//!
//! impl Entity for Friend {
//!     fn collection_name() -> &'static str { "friends" }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let stencil = Stencil::new(InMemoryDriver::new());
//!     let friends = stencil.collection_for::<Friend>();
//!
//!     friends.insert(&Friend { id: None, name: "Robert".into(), age: 30 }).await?;
//!
//!     // Compiled into {"age": {"$gt": 18}}, then sorted and mapped
//!     let adults: Vec<Friend> = friends
//!         .find("{age: {$gt: #}}", params![18])
//!         .sort("{name: 1}")
//!         .as_type()
//!         .await?;
//!
//!     // Upsert is off unless asked for
//!     friends
//!         .update("{name: #}", params!["Robert"])
//!         .with("{$inc: {age: #}}", params![1])
//!         .await?;
//!
//!     stencil.shutdown().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Compiling without running
//!
//! ```ignore
//! let query = stencil.create_query("{name: #, address: {city: #}}", &params!["Robert", "Paris"])?;
//! assert_eq!(query.as_str(), r#"{"name":"Robert","address":{"city":"Paris"}}"#);
//! ```
//!
//! # Drivers
//!
//! - [`memory`] - In-memory driver for development and testing
//! - [`mongodb`] - MongoDB driver (requires the `mongodb` feature)

pub mod prelude;

pub use docstencil_core::{
    aggregate, argument, binder, collection, compiler, config, document, driver, error, find, marshal, modify,
    params, query, result, store, template, update,
};

// Re-export BSON types for convenience
pub use bson;

/// In-memory driver implementations.
pub mod memory {
    pub use docstencil_memory::{InMemoryDriver, InMemoryDriverBuilder};
}

/// MongoDB driver implementations.
///
/// This module is only available when the `mongodb` feature is enabled.
#[cfg(feature = "mongodb")]
pub mod mongodb {
    pub use docstencil_mongodb::{MongoDbDriver, MongoDbDriverBuilder};
}
