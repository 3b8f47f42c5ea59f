//! Error types and result types for template compilation and query execution.
//!
//! Every fallible operation in this crate returns [`StencilResult<T>`]. Errors fall in three
//! groups: template errors raised while parsing or binding, collaborator errors raised by the
//! marshaller or unmarshaller, and driver errors raised by the database client.

use thiserror::Error;

use crate::template::PlaceholderContext;

/// Represents all possible errors raised while compiling templates or executing operations.
#[derive(Error, Debug)]
pub enum StencilError {
    /// The template is not valid document notation.
    ///
    /// `position` is the byte offset in the template where parsing stopped.
    #[error("Malformed template {template:?} at offset {position}: {reason}")]
    MalformedTemplate {
        template: String,
        position: usize,
        reason: String,
    },
    /// The number of supplied arguments differs from the number of placeholders.
    #[error("Template {template:?} expects {expected} argument(s) but {actual} were supplied")]
    ArgumentCountMismatch {
        template: String,
        expected: usize,
        actual: usize,
    },
    /// An argument cannot be rendered in the context of its placeholder.
    #[error("Argument {index} of template {template:?} cannot be used as {context}: {reason}")]
    InvalidArgumentType {
        template: String,
        index: usize,
        context: PlaceholderContext,
        reason: String,
    },
    /// An application object could not be converted into a document.
    #[error("Marshalling error: {0}")]
    Marshalling(String),
    /// A document could not be converted into the requested type.
    #[error("Unmarshalling error: {0}")]
    Unmarshalling(String),
    /// A builder was misused, or one of its clauses failed to compile.
    ///
    /// When the failure comes from compiling a clause, `source` holds the compilation error.
    #[error("{message}")]
    InvalidArgument {
        message: String,
        #[source]
        source: Option<Box<StencilError>>,
    },
    /// Error during driver or factory setup.
    #[error("Initialization error: {0}")]
    Initialization(String),
    /// An error reported by the underlying database driver.
    #[error("Backend error: {0}")]
    Backend(String),
}

impl StencilError {
    /// Creates an [`StencilError::InvalidArgument`] without an underlying cause.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        StencilError::InvalidArgument {
            message: message.into(),
            source: None,
        }
    }

    /// Wraps a clause compilation failure so the message names the offending template.
    pub(crate) fn clause(operation: &str, template: &str, source: StencilError) -> Self {
        StencilError::InvalidArgument {
            message: format!("Unable to execute {operation} using template {template}"),
            source: Some(Box::new(source)),
        }
    }
}

/// A specialized `Result` type for template and query operations.
pub type StencilResult<T> = Result<T, StencilError>;
