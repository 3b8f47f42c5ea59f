//! In-memory driver for docstencil.
//!
//! This crate provides a thread-safe, in-memory implementation of the
//! [`Driver`](docstencil_core::driver::Driver) trait. It evaluates compiled criteria, update
//! modifiers, projections, sorts and a subset of aggregation stages against documents held in
//! memory, which makes it suited to development, tests and small deployments.
//!
//! # Features
//!
//! - **Thread-safe access** - Concurrent reads and writes through an async-aware RwLock
//! - **Query operators** - Comparison, logical, element, array and regex operators
//! - **Update operators** - `$set`, `$unset`, `$inc`, `$push`, `$pull` and friends, plus upserts
//! - **Aggregation** - `$match`, `$sort`, `$skip`, `$limit`, `$project` and `$count`
//!
//! # Quick Start
//!
//! ```ignore
//! use docstencil::{params, prelude::*, memory::InMemoryDriver};
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Debug, Clone, Serialize, Deserialize)]
//! pub struct Friend {
//!     pub name: String,
//!     pub age: i32,
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let stencil = Stencil::new(InMemoryDriver::new());
//!     let friends = stencil.collection("friends");
//!
//!     friends.insert(&Friend { name: "Robert".into(), age: 30 }).await?;
//!
//!     let robert: Option<Friend> = friends
//!         .find_one("{name: #}", params!["Robert"])
//!         .as_type()
//!         .await?;
//!
//!     Ok(())
//! }
//! ```

#[allow(unused_extern_crates)]
extern crate self as docstencil_memory;

mod cursor;
pub mod driver;
mod evaluator;
mod modifier;
mod path;
mod pipeline;

pub use driver::{InMemoryDriver, InMemoryDriverBuilder};
