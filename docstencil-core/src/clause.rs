//! Uncompiled builder clauses.

use bson::Document;

use crate::{
    argument::Argument,
    error::{StencilError, StencilResult},
    query::{Query, QueryFactory},
};

/// A template and its arguments, compiled when the builder's terminal method runs.
#[derive(Debug)]
pub(crate) struct Clause {
    template: String,
    arguments: Vec<Argument>,
}

impl Clause {
    pub(crate) fn new(template: &str, arguments: Vec<Argument>) -> Self {
        Self {
            template: template.to_string(),
            arguments,
        }
    }

    pub(crate) fn template(&self) -> &str {
        &self.template
    }

    pub(crate) fn is_blank(&self) -> bool {
        self.template.trim().is_empty()
    }

    /// Compiles the clause, naming `operation` and the template if it fails.
    pub(crate) fn compile(&self, factory: &QueryFactory, operation: &str) -> StencilResult<Query> {
        factory
            .create_query(&self.template, &self.arguments)
            .map_err(|e| StencilError::clause(operation, &self.template, e))
    }

    /// Compiles the clause into a single document.
    pub(crate) fn compile_document(&self, factory: &QueryFactory, operation: &str) -> StencilResult<Document> {
        self.compile(factory, operation)?
            .to_document()
            .map_err(|e| StencilError::clause(operation, &self.template, e))
    }
}

/// Compiles an optional clause into an optional document.
pub(crate) fn compile_optional(
    clause: Option<&Clause>,
    factory: &QueryFactory,
    operation: &str,
) -> StencilResult<Option<Document>> {
    clause
        .map(|clause| clause.compile_document(factory, operation))
        .transpose()
}

#[cfg(test)]
mod tests {
    use std::{error::Error, sync::Arc};

    use bson::doc;

    use super::*;
    use crate::{marshal::BsonMapper, params};

    fn factory() -> QueryFactory {
        QueryFactory::new(Arc::new(BsonMapper::new()))
    }

    #[test]
    fn test_compile_document() {
        let clause = Clause::new("{name: #}", params!["Robert"]);

        assert_eq!(clause.compile_document(&factory(), "find").unwrap(), doc! { "name": "Robert" });
    }

    #[test]
    fn test_failure_names_operation_and_template() {
        let err = Clause::new("{$set: #}", params![])
            .compile_document(&factory(), "update")
            .unwrap_err();

        assert_eq!(err.to_string(), "Unable to execute update using template {$set: #}");
        assert!(matches!(
            err.source().and_then(|e| e.downcast_ref::<StencilError>()),
            Some(StencilError::ArgumentCountMismatch { .. })
        ));
    }

    #[test]
    fn test_array_is_not_a_document() {
        let err = Clause::new("[1]", params![]).compile_document(&factory(), "find").unwrap_err();

        assert!(matches!(err, StencilError::InvalidArgument { source: Some(_), .. }));
    }

    #[test]
    fn test_blank() {
        assert!(Clause::new("  ", params![]).is_blank());
        assert!(!Clause::new("{}", params![]).is_blank());
    }
}
