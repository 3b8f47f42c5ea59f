//! Compiled queries and the factory that produces them.
//!
//! A [`Query`] is the immutable result of compiling a template with its arguments. Its native
//! BSON value, its relaxed extended JSON form and its text rendering are all computed once, when
//! the query is built, so every accessor is cheap and returns the same value on every call.
//!
//! A [`QueryFactory`] parses templates (keeping recently used ones in a shared cache) and
//! compiles them with a [`Marshaller`]:
//!
//! ```ignore
//! use docstencil_core::{params, query::QueryFactory, marshal::BsonMapper};
//! use std::sync::Arc;
//!
//! let factory = QueryFactory::new(Arc::new(BsonMapper::new()));
//! let query = factory.create_query("{name: #, age: {$gt: #}}", &params!["Robert", 30])?;
//!
//! assert_eq!(query.as_str(), r#"{"name":"Robert","age":{"$gt":30}}"#);
//! ```

use std::{fmt, sync::Arc};

use bson::{Bson, Document};
use dashmap::DashMap;
use tracing::trace;

use crate::{
    argument::Argument,
    compiler::compile,
    config::QueryConfig,
    error::{StencilError, StencilResult},
    marshal::Marshaller,
    template::Template,
};

/// A compiled query, update, projection, sort or pipeline expression.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    root: Bson,
    json: serde_json::Value,
    text: String,
}

impl Query {
    pub(crate) fn new(root: Bson) -> Self {
        let json = root.clone().into_relaxed_extjson();
        let text = json.to_string();

        Self { root, json, text }
    }

    /// Wraps an existing document as a query.
    pub fn from_document(document: Document) -> Self {
        Self::new(Bson::Document(document))
    }

    /// Returns the native value: a document, or an array for pipeline templates.
    pub fn as_bson(&self) -> &Bson {
        &self.root
    }

    /// Returns an owned copy of the native value.
    pub fn to_bson(&self) -> Bson {
        self.root.clone()
    }

    /// Consumes the query, returning the native value.
    pub fn into_bson(self) -> Bson {
        self.root
    }

    /// Returns the native document, or `None` for an array.
    pub fn as_document(&self) -> Option<&Document> {
        self.root.as_document()
    }

    /// Returns an owned copy of the native document.
    ///
    /// # Errors
    ///
    /// Returns [`StencilError::InvalidArgument`] if the query is an array.
    pub fn to_document(&self) -> StencilResult<Document> {
        self.as_document()
            .cloned()
            .ok_or_else(|| StencilError::invalid_argument(format!("Query {} is not a document", self.text)))
    }

    /// Returns the query as a list of pipeline stages.
    ///
    /// A document is a single stage; an array contributes each of its elements.
    ///
    /// # Errors
    ///
    /// Returns [`StencilError::InvalidArgument`] if an array element is not a document.
    pub fn to_pipeline(&self) -> StencilResult<Vec<Document>> {
        match &self.root {
            Bson::Document(document) => Ok(vec![document.clone()]),
            Bson::Array(stages) => stages
                .iter()
                .map(|stage| {
                    stage.as_document().cloned().ok_or_else(|| {
                        StencilError::invalid_argument(format!(
                            "Pipeline stage {stage} of {} is not a document",
                            self.text
                        ))
                    })
                })
                .collect(),
            _ => Err(StencilError::invalid_argument(format!("Query {} is not a pipeline", self.text))),
        }
    }

    /// Returns the relaxed extended JSON form of the query.
    pub fn to_json(&self) -> &serde_json::Value {
        &self.json
    }

    /// Returns the query rendered as relaxed extended JSON text.
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Returns `true` for an empty document or array.
    pub fn is_empty(&self) -> bool {
        match &self.root {
            Bson::Document(document) => document.is_empty(),
            Bson::Array(items) => items.is_empty(),
            _ => false,
        }
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl From<Query> for Bson {
    fn from(query: Query) -> Self {
        query.root
    }
}

/// Parses and compiles templates into [`Query`] values.
///
/// The factory is cheap to clone; clones share the marshaller and the template cache. It is
/// `Send + Sync` and may be used from any number of tasks at once.
#[derive(Clone)]
pub struct QueryFactory {
    marshaller: Arc<dyn Marshaller>,
    config: QueryConfig,
    cache: Option<Arc<DashMap<String, Arc<Template>>>>,
}

impl QueryFactory {
    /// Creates a factory with the default configuration.
    pub fn new(marshaller: Arc<dyn Marshaller>) -> Self {
        Self::build(marshaller, QueryConfig::default())
    }

    /// Creates a factory with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns [`StencilError::Initialization`] if the configured marker is invalid.
    pub fn with_config(marshaller: Arc<dyn Marshaller>, config: QueryConfig) -> StencilResult<Self> {
        config.validate()?;

        Ok(Self::build(marshaller, config))
    }

    fn build(marshaller: Arc<dyn Marshaller>, config: QueryConfig) -> Self {
        let cache = (config.template_cache_size > 0).then(|| Arc::new(DashMap::new()));

        Self { marshaller, config, cache }
    }

    /// Returns the factory configuration.
    pub fn config(&self) -> &QueryConfig {
        &self.config
    }

    /// Returns the marshaller used for object arguments.
    pub fn marshaller(&self) -> &dyn Marshaller {
        self.marshaller.as_ref()
    }

    /// Parses `template`, reusing a cached parse of the same text when available.
    ///
    /// # Errors
    ///
    /// Returns [`StencilError::MalformedTemplate`] if the template cannot be parsed.
    pub fn parse(&self, template: &str) -> StencilResult<Arc<Template>> {
        let Some(cache) = &self.cache else {
            return Template::parse_with_marker(template, self.config.marker).map(Arc::new);
        };

        if let Some(parsed) = cache.get(template) {
            trace!(template, "template cache hit");
            return Ok(Arc::clone(parsed.value()));
        }

        let parsed = Arc::new(Template::parse_with_marker(template, self.config.marker)?);
        if cache.len() < self.config.template_cache_size {
            cache.insert(template.to_string(), Arc::clone(&parsed));
        }

        Ok(parsed)
    }

    /// Parses `template` and compiles it with `arguments`.
    ///
    /// # Errors
    ///
    /// Any parse, binding or marshalling error; see [`compile`].
    pub fn create_query(&self, template: &str, arguments: &[Argument]) -> StencilResult<Query> {
        let parsed = self.parse(template)?;

        compile(&parsed, arguments, self.marshaller())
    }

    /// Returns the number of cached templates.
    pub fn cached_templates(&self) -> usize {
        self.cache.as_ref().map_or(0, |cache| cache.len())
    }
}

impl fmt::Debug for QueryFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryFactory")
            .field("config", &self.config)
            .field("cached_templates", &self.cached_templates())
            .finish()
    }
}
