//! Dotted field paths.
//!
//! A path such as `address.city` or `items.0.qty` walks nested documents, and numeric segments
//! index into arrays. When reading, a non-numeric segment applied to an array fans out over its
//! document elements, so `items.qty` yields the `qty` of every item.

use bson::{Bson, Document};

use docstencil_core::error::{StencilError, StencilResult};

// the server refuses to pad an array past this many nulls
const MAX_ARRAY_PADDING: usize = 1_500_000;

/// Returns every value reachable through `path`, fanning out over arrays.
pub(crate) fn lookup<'a>(document: &'a Document, path: &str) -> Vec<&'a Bson> {
    let segments: Vec<&str> = path.split('.').collect();
    let mut found = Vec::new();

    if let Some((head, rest)) = segments.split_first() {
        if let Some(value) = document.get(*head) {
            collect(value, rest, &mut found);
        }
    }

    found
}

fn collect<'a>(value: &'a Bson, segments: &[&str], found: &mut Vec<&'a Bson>) {
    let Some((head, rest)) = segments.split_first() else {
        found.push(value);
        return;
    };

    match value {
        Bson::Document(document) => {
            if let Some(child) = document.get(*head) {
                collect(child, rest, found);
            }
        }
        Bson::Array(items) => match head.parse::<usize>() {
            Ok(index) => {
                if let Some(item) = items.get(index) {
                    collect(item, rest, found);
                }
            }
            Err(_) => {
                for item in items.iter().filter(|item| matches!(item, Bson::Document(_))) {
                    collect(item, segments, found);
                }
            }
        },
        _ => {}
    }
}

/// Returns the single value at `path`, without fanning out over arrays.
pub(crate) fn get<'a>(document: &'a Document, path: &str) -> Option<&'a Bson> {
    let mut segments = path.split('.');
    let mut current = document.get(segments.next()?)?;

    for segment in segments {
        current = match current {
            Bson::Document(document) => document.get(segment)?,
            Bson::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }

    Some(current)
}

/// Sets the value at `path`, creating intermediate documents as needed.
///
/// Setting an array index past the end pads the array with nulls.
pub(crate) fn set(document: &mut Document, path: &str, value: Bson) -> StencilResult<()> {
    let segments: Vec<&str> = path.split('.').collect();

    set_in_document(document, &segments, value, path)
}

fn set_in_document(document: &mut Document, segments: &[&str], value: Bson, path: &str) -> StencilResult<()> {
    match segments {
        [] => Err(StencilError::Backend(format!("Empty field path '{path}'"))),
        [last] => {
            document.insert(*last, value);
            Ok(())
        }
        [head, rest @ ..] => {
            if !document.contains_key(*head) {
                document.insert(*head, Document::new());
            }
            match document.get_mut(*head) {
                Some(child) => set_in_value(child, rest, value, path),
                None => Err(StencilError::Backend(format!("Cannot create field '{head}' at '{path}'"))),
            }
        }
    }
}

fn set_in_value(target: &mut Bson, segments: &[&str], value: Bson, path: &str) -> StencilResult<()> {
    match target {
        Bson::Document(document) => set_in_document(document, segments, value, path),
        Bson::Array(items) => {
            let Some((head, rest)) = segments.split_first() else {
                return Err(StencilError::Backend(format!("Empty field path '{path}'")));
            };
            let index = head.parse::<usize>().map_err(|_| {
                StencilError::Backend(format!("Cannot create field '{head}' in an array at '{path}'"))
            })?;

            if items.len() <= index {
                let padding = index - items.len();
                if padding > MAX_ARRAY_PADDING {
                    return Err(StencilError::Backend(format!(
                        "Setting index {index} at '{path}' would pad the array with more than \
                         {MAX_ARRAY_PADDING} nulls"
                    )));
                }
                items.resize(index + 1, Bson::Null);
            }

            if rest.is_empty() {
                items[index] = value;
                return Ok(());
            }
            if items[index] == Bson::Null {
                items[index] = Bson::Document(Document::new());
            }
            set_in_value(&mut items[index], rest, value, path)
        }
        other => Err(StencilError::Backend(format!(
            "Cannot traverse {:?} at '{path}'",
            other.element_type()
        ))),
    }
}

/// Removes the value at `path`, returning it.
pub(crate) fn remove(document: &mut Document, path: &str) -> Option<Bson> {
    match path.rsplit_once('.') {
        None => document.remove(path),
        Some((parent, last)) => match get_mut(document, parent)? {
            Bson::Document(parent) => parent.remove(last),
            Bson::Array(items) => {
                // removing an array element leaves a null in its place
                let slot = items.get_mut(last.parse::<usize>().ok()?)?;
                Some(std::mem::replace(slot, Bson::Null))
            }
            _ => None,
        },
    }
}

pub(crate) fn get_mut<'a>(document: &'a mut Document, path: &str) -> Option<&'a mut Bson> {
    let mut segments = path.split('.');
    let mut current = document.get_mut(segments.next()?)?;

    for segment in segments {
        current = match current {
            Bson::Document(document) => document.get_mut(segment)?,
            Bson::Array(items) => items.get_mut(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }

    Some(current)
}
