//! Template arguments.
//!
//! Each placeholder of a template is bound to one [`Argument`]. Arguments come in three kinds,
//! which decide how the binder renders them:
//!
//! - [`Argument::Primitive`] - a scalar inserted as a typed value
//! - [`Argument::Document`] - a document or array inserted as nested structure
//! - [`Argument::Object`] - an application object marshalled into a document first
//!
//! Most Rust values convert into an argument with `From`; application objects are wrapped with
//! [`Argument::object`]. The [`params!`](crate::params) macro builds an argument list.

use std::fmt;

use bson::{Binary, Bson, DateTime, Document, oid::ObjectId, spec::BinarySubtype};

use crate::marshal::Marshal;

/// A value bound to a template placeholder.
pub enum Argument {
    /// A scalar value: string, number, boolean, null, date, binary or ObjectId.
    Primitive(Bson),
    /// A document or an array.
    Document(Bson),
    /// An application object, marshalled when the template is compiled.
    Object(Box<dyn Marshal>),
}

impl Argument {
    /// Wraps an application object so it is marshalled into a document at compile time.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let friend = Friend { name: "Robert".into() };
    /// let query = factory.create_query("{$set: #}", &[Argument::object(friend)])?;
    /// ```
    pub fn object<T: Marshal + 'static>(value: T) -> Self {
        Argument::Object(Box::new(value))
    }

    /// Returns a short description of the argument kind, for diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Argument::Primitive(_) => "a primitive",
            Argument::Document(_) => "a document",
            Argument::Object(_) => "an object",
        }
    }
}

impl fmt::Debug for Argument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Argument::Primitive(value) => f.debug_tuple("Primitive").field(value).finish(),
            Argument::Document(value) => f.debug_tuple("Document").field(value).finish(),
            Argument::Object(object) => f.debug_tuple("Object").field(&object.type_name()).finish(),
        }
    }
}

impl From<Bson> for Argument {
    fn from(value: Bson) -> Self {
        match value {
            Bson::Document(_) | Bson::Array(_) => Argument::Document(value),
            _ => Argument::Primitive(value),
        }
    }
}

impl From<Document> for Argument {
    fn from(value: Document) -> Self {
        Argument::Document(Bson::Document(value))
    }
}

impl From<Vec<Bson>> for Argument {
    fn from(value: Vec<Bson>) -> Self {
        Argument::Document(Bson::Array(value))
    }
}

impl From<&Document> for Argument {
    fn from(value: &Document) -> Self {
        Argument::Document(Bson::Document(value.clone()))
    }
}

impl From<&str> for Argument {
    fn from(value: &str) -> Self {
        Argument::Primitive(Bson::String(value.to_string()))
    }
}

impl From<u32> for Argument {
    fn from(value: u32) -> Self {
        Argument::Primitive(Bson::Int64(i64::from(value)))
    }
}

impl From<Vec<u8>> for Argument {
    fn from(value: Vec<u8>) -> Self {
        Argument::Primitive(Bson::Binary(Binary {
            subtype: BinarySubtype::Generic,
            bytes: value,
        }))
    }
}

impl From<chrono::DateTime<chrono::Utc>> for Argument {
    fn from(value: chrono::DateTime<chrono::Utc>) -> Self {
        Argument::Primitive(Bson::DateTime(DateTime::from_chrono(value)))
    }
}

impl<T: Into<Argument>> From<Option<T>> for Argument {
    fn from(value: Option<T>) -> Self {
        value.map_or(Argument::Primitive(Bson::Null), Into::into)
    }
}

macro_rules! primitive_arguments {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Argument {
                fn from(value: $ty) -> Self {
                    Argument::Primitive(Bson::$variant(value))
                }
            }
        )*
    };
}

primitive_arguments! {
    String => String,
    i32 => Int32,
    i64 => Int64,
    f64 => Double,
    bool => Boolean,
    ObjectId => ObjectId,
    DateTime => DateTime,
    Binary => Binary,
}

/// Builds a `Vec<Argument>` from values convertible into [`Argument`].
///
/// ```ignore
/// use docstencil_core::params;
///
/// let params = params!["Robert", 42, Argument::object(address)];
/// ```
#[macro_export]
macro_rules! params {
    () => {
        ::std::vec::Vec::<$crate::argument::Argument>::new()
    };
    ($($arg:expr),+ $(,)?) => {
        ::std::vec![$($crate::argument::Argument::from($arg)),+]
    };
}
