//! MongoDB driver for docstencil.
//!
//! This crate provides a MongoDB-based implementation of the
//! [`Driver`](docstencil_core::driver::Driver) trait. Compiled queries are executed by the
//! official async client, so every operator the server understands is available to templates.
//!
//! To use this driver, include the `mongodb` feature in your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! docstencil = { version = "x.y.z", features = ["mongodb"] }
//! ```
//!
//! # Example
//!
//! ```ignore
//! use docstencil::{driver::DriverBuilder, mongodb::MongoDbDriver, prelude::*};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let driver = MongoDbDriver::builder("mongodb://localhost:27017", "my_database")
//!         .build()
//!         .await?;
//!     let stencil = Stencil::new(driver);
//!
//!     let count = stencil.collection("friends").count("{age: {$gt: #}}", params![18]).await?;
//!
//!     stencil.shutdown().await?;
//!     Ok(())
//! }
//! ```

#[allow(unused_extern_crates)]
extern crate self as docstencil_mongodb;

pub mod driver;

pub use driver::{MongoDbDriver, MongoDbDriverBuilder};
