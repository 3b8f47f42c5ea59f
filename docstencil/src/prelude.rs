//! Convenient re-exports of commonly used types from docstencil.
//!
//! ```ignore
//! use docstencil::prelude::*;
//! ```
//!
//! This provides access to:
//! - The [`Stencil`] entry point, its builder and collection handles
//! - Arguments and the `params!` macro
//! - Entity, mapper and configuration types
//! - The driver trait and its builder
//! - Error types

pub use docstencil_core::{
    argument::Argument,
    collection::Collection,
    config::{QueryConfig, StencilConfig},
    document::{Entity, ID_FIELD},
    driver::{Driver, DriverBuilder},
    error::{StencilError, StencilResult},
    marshal::{BsonMapper, Mapper, MapperConfig},
    params,
    query::{Query, QueryFactory},
    result::ResultHandler,
    store::{Stencil, StencilBuilder},
};
