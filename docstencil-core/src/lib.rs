//! Parameterized query templates compiled into native BSON documents, with typed result mapping.
//!
//! This crate is the core of the docstencil project and provides:
//!
//! - **Templates** ([`template`]) - Parsing of relaxed document notation with `#` placeholders
//! - **Arguments** ([`argument`]) - Primitive, document and object arguments, and the [`params!`] macro
//! - **Binding and compilation** ([`binder`], [`compiler`]) - Rendering arguments into typed documents
//! - **Compiled queries** ([`query`]) - The immutable [`Query`](query::Query) and the caching [`QueryFactory`](query::QueryFactory)
//! - **Marshalling** ([`marshal`], [`result`]) - Converting between application values and documents
//! - **Driver abstraction** ([`driver`]) - The async seam to a database client
//! - **Operation builders** ([`find`], [`update`], [`modify`], [`aggregate`]) - Find, update, find-and-modify and aggregate
//! - **Entry points** ([`store`], [`collection`]) - [`Stencil`](store::Stencil) and collection handles
//! - **Error handling** ([`error`]) and **configuration** ([`config`])
//!
//! # Example
//!
//! ```ignore
//! use docstencil_core::{params, store::Stencil};
//!
//! let stencil = Stencil::new(driver);
//! let query = stencil.create_query("{name: #, age: {$gt: #}}", &params!["Robert", 30])?;
//!
//! assert_eq!(query.as_str(), r#"{"name":"Robert","age":{"$gt":30}}"#);
//! ```

#[allow(unused_extern_crates)]
extern crate self as docstencil_core;

pub mod aggregate;
pub mod argument;
pub mod binder;
mod clause;
pub mod collection;
pub mod compiler;
pub mod config;
pub mod document;
pub mod driver;
pub mod error;
pub mod find;
pub mod marshal;
pub mod modify;
pub mod query;
pub mod result;
pub mod store;
pub mod template;
pub mod update;
