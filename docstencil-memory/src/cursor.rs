//! Projection and sorting of query results.

use std::cmp::Ordering;

use bson::{Bson, Document};

use docstencil_core::{
    document::ID_FIELD,
    error::{StencilError, StencilResult},
};

use crate::{
    evaluator::{Comparable, truthy, unsupported},
    path,
};

/// Shapes `document` according to `projection`.
///
/// A projection either includes or excludes fields. `_id` is kept unless it is excluded
/// explicitly, and is the only field that may be excluded from an inclusion projection.
///
/// # Errors
///
/// Returns [`StencilError::Backend`] when inclusion and exclusion are mixed, or when a
/// projection operator is used.
pub(crate) fn project(document: &Document, projection: &Document) -> StencilResult<Document> {
    let mut keep_id = true;
    let mut included = Vec::new();
    let mut excluded = Vec::new();

    for (field, value) in projection {
        let keep = match value {
            Bson::Boolean(_) | Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) => truthy(value),
            Bson::Document(operator) => {
                let name = operator.keys().next().map_or("{}", String::as_str);
                return Err(unsupported("projection operator", name));
            }
            other => {
                return Err(StencilError::Backend(format!(
                    "Invalid projection value {other} for '{field}'"
                )));
            }
        };

        match (field.as_str(), keep) {
            (ID_FIELD, keep) => keep_id = keep,
            (field, true) => included.push(field),
            (field, false) => excluded.push(field),
        }
    }

    if !included.is_empty() && !excluded.is_empty() {
        return Err(StencilError::Backend(
            "Projection cannot mix inclusion and exclusion".to_string(),
        ));
    }

    if included.is_empty() {
        let mut projected = document.clone();
        if !keep_id {
            projected.remove(ID_FIELD);
        }
        for field in excluded {
            path::remove(&mut projected, field);
        }
        return Ok(projected);
    }

    if keep_id {
        included.push(ID_FIELD);
    }

    Ok(include(document, &included))
}

fn include(document: &Document, fields: &[&str]) -> Document {
    let mut projected = Document::new();

    for (key, value) in document {
        if fields.contains(&key.as_str()) {
            projected.insert(key.clone(), value.clone());
            continue;
        }

        let prefix = format!("{key}.");
        let nested: Vec<&str> = fields
            .iter()
            .filter_map(|field| field.strip_prefix(prefix.as_str()))
            .collect();
        if nested.is_empty() {
            continue;
        }

        match value {
            Bson::Document(child) => {
                projected.insert(key.clone(), include(child, &nested));
            }
            Bson::Array(items) => {
                let items = items
                    .iter()
                    .filter_map(|item| match item {
                        Bson::Document(child) => Some(Bson::Document(include(child, &nested))),
                        _ => None,
                    })
                    .collect();
                projected.insert(key.clone(), Bson::Array(items));
            }
            _ => {}
        }
    }

    projected
}

/// Stable, compound sort of `items` by the fields of `sort`.
///
/// Each field maps to `1` (ascending) or `-1` (descending). Missing fields sort as null.
///
/// # Errors
///
/// Returns [`StencilError::Backend`] when a direction is not a non-zero number.
pub(crate) fn sort<T>(items: &mut [T], sort: &Document, document: impl Fn(&T) -> &Document) -> StencilResult<()> {
    let mut keys = Vec::with_capacity(sort.len());
    for (field, direction) in sort {
        let descending = match direction {
            Bson::Int32(n) if *n != 0 => *n < 0,
            Bson::Int64(n) if *n != 0 => *n < 0,
            Bson::Double(n) if *n != 0.0 => *n < 0.0,
            other => {
                return Err(StencilError::Backend(format!(
                    "Invalid sort direction {other} for '{field}'"
                )));
            }
        };
        keys.push((field.as_str(), descending));
    }

    items.sort_by(|a, b| {
        let (a, b) = (document(a), document(b));

        keys.iter().fold(Ordering::Equal, |ordering, (field, descending)| {
            ordering.then_with(|| {
                let ordering = sort_key(a, field).sort_cmp(&sort_key(b, field));
                if *descending { ordering.reverse() } else { ordering }
            })
        })
    });

    Ok(())
}

fn sort_key<'a>(document: &'a Document, field: &str) -> Comparable<'a> {
    path::get(document, field)
        .map(Comparable::from)
        .unwrap_or(Comparable::Null)
}
