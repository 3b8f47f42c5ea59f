//! The main entry point.
//!
//! A [`Stencil`] ties a [`Driver`] to a [`Mapper`] and a [`QueryFactory`], and hands out
//! [`Collection`] handles.
//!
//! # Example
//!
//! ```ignore
//! use docstencil::prelude::*;
//! use docstencil::memory::InMemoryDriver;
//!
//! let stencil = Stencil::builder(InMemoryDriver::new())
//!     .config(QueryConfig { marker: '@', ..QueryConfig::default() })
//!     .build()?;
//!
//! let friends = stencil.collection_for::<Friend>();
//! let robert: Option<Friend> = friends.find_one("{name: @}", params!["Robert"]).as_type().await?;
//!
//! stencil.shutdown().await?;
//! ```

use std::sync::Arc;

use crate::{
    argument::Argument,
    collection::Collection,
    config::{QueryConfig, StencilConfig},
    document::Entity,
    driver::Driver,
    error::StencilResult,
    marshal::{BsonMapper, Mapper, Marshaller},
    query::{Query, QueryFactory},
};

/// Owns a driver, a mapper and a query factory.
#[derive(Debug)]
pub struct Stencil<B: Driver, M: Mapper = BsonMapper> {
    driver: B,
    mapper: Arc<M>,
    factory: QueryFactory,
}

impl<B: Driver> Stencil<B> {
    /// Creates a stencil with the default mapper and configuration.
    pub fn new(driver: B) -> Self {
        let mapper = Arc::new(BsonMapper::new());
        let factory = QueryFactory::new(Arc::clone(&mapper) as Arc<dyn Marshaller>);

        Self { driver, mapper, factory }
    }

    /// Starts building a stencil around `driver`.
    pub fn builder(driver: B) -> StencilBuilder<B> {
        StencilBuilder {
            driver,
            mapper: BsonMapper::new(),
            config: QueryConfig::default(),
        }
    }
}

impl<B: Driver, M: Mapper> Stencil<B, M> {
    /// Returns a handle on the named collection.
    pub fn collection(&self, name: &str) -> Collection<'_, B, M> {
        Collection::new(name, &self.driver, &*self.mapper, &self.factory)
    }

    /// Returns a handle on the collection of entity type `E`.
    pub fn collection_for<E: Entity>(&self) -> Collection<'_, B, M> {
        self.collection(E::collection_name())
    }

    /// Returns the query factory.
    pub fn query_factory(&self) -> &QueryFactory {
        &self.factory
    }

    /// Compiles `template` with `params` without running anything.
    ///
    /// # Errors
    ///
    /// Any parse, binding or marshalling error.
    pub fn create_query(&self, template: &str, params: &[Argument]) -> StencilResult<Query> {
        self.factory.create_query(template, params)
    }

    /// Returns the driver.
    pub fn driver(&self) -> &B {
        &self.driver
    }

    /// Returns the mapper.
    pub fn mapper(&self) -> &M {
        &self.mapper
    }

    /// Shuts the driver down.
    pub async fn shutdown(self) -> StencilResult<()> {
        self.driver.shutdown().await
    }
}

/// Builder for a [`Stencil`].
#[derive(Debug)]
pub struct StencilBuilder<B: Driver, M: Mapper = BsonMapper> {
    driver: B,
    mapper: M,
    config: QueryConfig,
}

impl<B: Driver> StencilBuilder<B> {
    /// Applies a complete configuration, including the default mapper's.
    pub fn configure(self, config: StencilConfig) -> Self {
        Self {
            driver: self.driver,
            mapper: BsonMapper::with_config(config.mapper),
            config: config.query,
        }
    }
}

impl<B: Driver, M: Mapper> StencilBuilder<B, M> {
    /// Replaces the mapper.
    pub fn mapper<N: Mapper>(self, mapper: N) -> StencilBuilder<B, N> {
        StencilBuilder {
            driver: self.driver,
            mapper,
            config: self.config,
        }
    }

    /// Sets the query configuration.
    pub fn config(mut self, config: QueryConfig) -> Self {
        self.config = config;
        self
    }

    /// Builds the stencil.
    ///
    /// # Errors
    ///
    /// Returns [`StencilError::Initialization`](crate::error::StencilError::Initialization) if
    /// the query configuration is invalid.
    pub fn build(self) -> StencilResult<Stencil<B, M>> {
        let mapper = Arc::new(self.mapper);
        let factory = QueryFactory::with_config(Arc::clone(&mapper) as Arc<dyn Marshaller>, self.config)?;

        Ok(Stencil {
            driver: self.driver,
            mapper,
            factory,
        })
    }
}
