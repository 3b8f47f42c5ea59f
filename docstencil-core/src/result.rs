//! Mapping raw result documents into application values.
//!
//! Terminal builder calls either unmarshal documents into a type (`as_type::<T>()`) or hand
//! them to a [`ResultHandler`] (`map(handler)`). Both go through [`map_result`] and
//! [`map_results`]; an absent document is reported as `None` and never reaches the handler.

use std::marker::PhantomData;

use bson::Document;
use serde::de::DeserializeOwned;

use crate::{error::StencilResult, marshal::Unmarshaller};

/// Converts a raw result document into a `T`.
///
/// Implemented for every `Fn(Document) -> StencilResult<T>` closure:
///
/// ```ignore
/// let names = friends
///     .find("{}", params![])
///     .map(|document: Document| -> StencilResult<String> {
///         Ok(document.get_str("name").unwrap_or_default().to_string())
///     })
///     .await?;
/// ```
pub trait ResultHandler<T> {
    /// Maps `document` into a `T`.
    fn map(&self, document: Document) -> StencilResult<T>;
}

impl<T, F> ResultHandler<T> for F
where
    F: Fn(Document) -> StencilResult<T>,
{
    fn map(&self, document: Document) -> StencilResult<T> {
        self(document)
    }
}

/// A [`ResultHandler`] that unmarshals documents into `T`.
pub struct Unmarshalling<'a, U, T> {
    unmarshaller: &'a U,
    _marker: PhantomData<fn() -> T>,
}

impl<'a, U: Unmarshaller, T: DeserializeOwned> Unmarshalling<'a, U, T> {
    pub fn new(unmarshaller: &'a U) -> Self {
        Self {
            unmarshaller,
            _marker: PhantomData,
        }
    }
}

impl<U: Unmarshaller, T: DeserializeOwned> ResultHandler<T> for Unmarshalling<'_, U, T> {
    fn map(&self, document: Document) -> StencilResult<T> {
        self.unmarshaller.unmarshal(document)
    }
}

/// Maps an optional result, returning `None` without calling `handler` when it is absent.
///
/// # Errors
///
/// Whatever `handler` returns.
pub fn map_result<T, H>(document: Option<Document>, handler: &H) -> StencilResult<Option<T>>
where
    H: ResultHandler<T> + ?Sized,
{
    document.map(|document| handler.map(document)).transpose()
}

/// Maps every document of a result set, stopping at the first error.
///
/// # Errors
///
/// The first error returned by `handler`.
pub fn map_results<T, H>(documents: Vec<Document>, handler: &H) -> StencilResult<Vec<T>>
where
    H: ResultHandler<T> + ?Sized,
{
    documents
        .into_iter()
        .map(|document| handler.map(document))
        .collect()
}
