//! Update modifiers and upserts.

use bson::{Bson, Document, oid::ObjectId};

use docstencil_core::{
    document::ID_FIELD,
    driver::is_operator_document,
    error::{StencilError, StencilResult},
};

use crate::{
    evaluator::{Comparable, is_operator_condition, matches, matches_field, unsupported},
    path,
};

/// Applies `modifier` to `document`.
///
/// A modifier made of update operators changes fields in place; any other modifier replaces
/// the document, keeping its `_id`. `$setOnInsert` only applies when `inserting` is set.
///
/// # Errors
///
/// Returns [`StencilError::Backend`] for unsupported operators, operands of the wrong type, and
/// attempts to change `_id`.
pub(crate) fn apply(document: &mut Document, modifier: &Document, inserting: bool) -> StencilResult<()> {
    if !is_operator_document(modifier) {
        return replace(document, modifier);
    }

    let id = document.get(ID_FIELD).cloned();

    for (operator, fields) in modifier {
        let Bson::Document(fields) = fields else {
            return Err(StencilError::Backend(format!("{operator} expects a document")));
        };

        for (field, operand) in fields {
            match operator.as_str() {
                "$set" => path::set(document, field, operand.clone())?,
                "$setOnInsert" if inserting => path::set(document, field, operand.clone())?,
                "$setOnInsert" => {}
                "$unset" => {
                    path::remove(document, field);
                }
                "$inc" => arithmetic(document, field, operand, operator, |a, b| a + b, i64::checked_add)?,
                "$mul" => arithmetic(document, field, operand, operator, |a, b| a * b, i64::checked_mul)?,
                "$min" => bound(document, field, operand, std::cmp::Ordering::Less)?,
                "$max" => bound(document, field, operand, std::cmp::Ordering::Greater)?,
                "$rename" => {
                    let Bson::String(target) = operand else {
                        return Err(StencilError::Backend(format!("$rename target of '{field}' must be a string")));
                    };
                    if let Some(value) = path::remove(document, field) {
                        path::set(document, target, value)?;
                    }
                }
                "$push" => push(document, field, operand, false)?,
                "$addToSet" => push(document, field, operand, true)?,
                "$pull" => pull(document, field, operand)?,
                other => return Err(unsupported("update operator", other)),
            }
        }
    }

    if document.get(ID_FIELD).cloned() != id {
        return Err(StencilError::Backend(format!("Field '{ID_FIELD}' is immutable")));
    }

    Ok(())
}

fn replace(document: &mut Document, replacement: &Document) -> StencilResult<()> {
    let id = document.get(ID_FIELD).cloned();
    if let (Some(id), Some(new_id)) = (&id, replacement.get(ID_FIELD)) {
        if id != new_id {
            return Err(StencilError::Backend(format!("Field '{ID_FIELD}' is immutable")));
        }
    }

    *document = id
        .map(|id| (ID_FIELD.to_string(), id))
        .into_iter()
        .chain(
            replacement
                .iter()
                .filter(|(key, _)| key.as_str() != ID_FIELD)
                .map(|(key, value)| (key.clone(), value.clone())),
        )
        .collect();

    Ok(())
}

/// Builds the document inserted by an upsert that matched nothing.
///
/// The document is seeded from the equality conditions of `criteria`, then modified. A fresh
/// ObjectId is assigned when no `_id` results.
pub(crate) fn upsert_document(criteria: &Document, modifier: &Document) -> StencilResult<Document> {
    let mut document = Document::new();

    for (field, condition) in criteria {
        if field.starts_with('$') || is_operator_condition(condition) {
            continue;
        }
        path::set(&mut document, field, condition.clone())?;
    }

    if is_operator_document(modifier) {
        apply(&mut document, modifier, true)?;
    } else {
        let id = document.remove(ID_FIELD);
        document = modifier.clone();
        if let Some(id) = id.filter(|_| !document.contains_key(ID_FIELD)) {
            document = with_id_first(document, id);
        }
    }

    if !document.contains_key(ID_FIELD) {
        document = with_id_first(document, Bson::ObjectId(ObjectId::new()));
    }

    Ok(document)
}

pub(crate) fn with_id_first(document: Document, id: Bson) -> Document {
    std::iter::once((ID_FIELD.to_string(), id))
        .chain(document)
        .collect()
}

fn arithmetic(
    document: &mut Document,
    field: &str,
    operand: &Bson,
    operator: &str,
    float: impl Fn(f64, f64) -> f64,
    integer: impl Fn(i64, i64) -> Option<i64>,
) -> StencilResult<()> {
    if as_f64(operand).is_none() {
        return Err(StencilError::Backend(format!("{operator} expects a number for '{field}'")));
    }

    let current = path::get(document, field).cloned();
    let result = match (current, operand) {
        (None, operand) if operator == "$mul" => zero_like(operand),
        (None, operand) => operand.clone(),
        (Some(Bson::Int32(a)), Bson::Int32(b)) => integer(i64::from(a), i64::from(*b))
            .map(|n| i32::try_from(n).map_or(Bson::Int64(n), Bson::Int32))
            .ok_or_else(|| overflow(field))?,
        (Some(a @ (Bson::Int32(_) | Bson::Int64(_))), b @ (Bson::Int32(_) | Bson::Int64(_))) => {
            integer(as_i64(&a), as_i64(b))
                .map(Bson::Int64)
                .ok_or_else(|| overflow(field))?
        }
        (Some(a), b) => match (as_f64(&a), as_f64(b)) {
            (Some(a), Some(b)) => Bson::Double(float(a, b)),
            _ => {
                return Err(StencilError::Backend(format!(
                    "Cannot apply {operator} to non-numeric field '{field}'"
                )));
            }
        },
    };

    path::set(document, field, result)
}

fn zero_like(operand: &Bson) -> Bson {
    match operand {
        Bson::Int32(_) => Bson::Int32(0),
        Bson::Int64(_) => Bson::Int64(0),
        _ => Bson::Double(0.0),
    }
}

fn as_i64(value: &Bson) -> i64 {
    match value {
        Bson::Int32(n) => i64::from(*n),
        Bson::Int64(n) => *n,
        _ => 0,
    }
}

fn as_f64(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(n) => Some(f64::from(*n)),
        Bson::Int64(n) => Some(*n as f64),
        Bson::Double(n) => Some(*n),
        _ => None,
    }
}

fn overflow(field: &str) -> StencilError {
    StencilError::Backend(format!("Integer overflow updating '{field}'"))
}

fn bound(document: &mut Document, field: &str, operand: &Bson, keep_if: std::cmp::Ordering) -> StencilResult<()> {
    let replace = match path::get(document, field) {
        None => true,
        Some(current) => Comparable::from(operand).sort_cmp(&Comparable::from(current)) == keep_if,
    };

    if replace {
        path::set(document, field, operand.clone())?;
    }

    Ok(())
}

fn array_at<'d>(document: &'d mut Document, field: &str, operator: &str) -> StencilResult<&'d mut Vec<Bson>> {
    if path::get(document, field).is_none() {
        path::set(document, field, Bson::Array(Vec::new()))?;
    }

    match path::get_mut(document, field) {
        Some(Bson::Array(items)) => Ok(items),
        _ => Err(StencilError::Backend(format!("Cannot apply {operator} to non-array field '{field}'"))),
    }
}

fn push(document: &mut Document, field: &str, operand: &Bson, unique: bool) -> StencilResult<()> {
    let operator = if unique { "$addToSet" } else { "$push" };
    let values = match operand {
        Bson::Document(each) if each.contains_key("$each") => match each.get("$each") {
            Some(Bson::Array(values)) => values.clone(),
            _ => return Err(StencilError::Backend(format!("{operator} $each expects an array"))),
        },
        value => vec![value.clone()],
    };

    let items = array_at(document, field, operator)?;
    for value in values {
        let present = unique
            && items
                .iter()
                .any(|item| Comparable::from(item) == Comparable::from(&value));
        if !present {
            items.push(value);
        }
    }

    Ok(())
}

fn pull(document: &mut Document, field: &str, condition: &Bson) -> StencilResult<()> {
    let Some(Bson::Array(items)) = path::get(document, field) else {
        return Ok(());
    };

    let mut kept = Vec::with_capacity(items.len());
    for item in items {
        let remove = match (item, condition) {
            (_, condition) if is_operator_condition(condition) => matches_field(&[item], condition)?,
            (Bson::Document(element), Bson::Document(criteria)) => matches(element, criteria)?,
            (item, value) => Comparable::from(item) == Comparable::from(value),
        };
        if !remove {
            kept.push(item.clone());
        }
    }

    path::set(document, field, Bson::Array(kept))
}

#[cfg(test)]
mod tests {
    use bson::doc;

    use super::*;

    fn apply_to(mut document: Document, modifier: Document) -> StencilResult<Document> {
        apply(&mut document, &modifier, false).map(|_| document)
    }

    #[test]
    fn test_set_unset_rename() {
        let document = apply_to(
            doc! { "_id": 1, "name": "x", "old": true, "tmp": 1 },
            doc! { "$set": { "name": "y", "address.city": "Paris" }, "$unset": { "tmp": "" }, "$rename": { "old": "new" } },
        )
        .unwrap();

        assert_eq!(
            document,
            doc! { "_id": 1, "name": "y", "address": { "city": "Paris" }, "new": true }
        );
    }

    #[test]
    fn test_inc_and_mul() {
        let document = apply_to(
            doc! { "a": 1, "b": 2.5, "c": 3 },
            doc! { "$inc": { "a": 2, "b": 1, "missing": 4 }, "$mul": { "c": 2, "other": 5 } },
        )
        .unwrap();

        assert_eq!(document, doc! { "a": 3, "b": 3.5, "c": 6, "missing": 4, "other": 0 });
        assert!(apply_to(doc! { "a": "x" }, doc! { "$inc": { "a": 1 } }).is_err());
        assert!(apply_to(doc! { "a": i32::MAX }, doc! { "$inc": { "a": 1 } }).unwrap().get_i64("a").is_ok());
    }

    #[test]
    fn test_non_numeric_operand_on_missing_field() {
        assert!(matches!(
            apply_to(doc! { "a": 1 }, doc! { "$mul": { "missing": "abc" } }),
            Err(StencilError::Backend(_))
        ));
        assert!(matches!(
            apply_to(doc! { "a": 1 }, doc! { "$inc": { "missing": "abc" } }),
            Err(StencilError::Backend(_))
        ));
        assert!(apply_to(doc! { "a": 1 }, doc! { "$inc": { "a": true } }).is_err());
    }

    #[test]
    fn test_min_max() {
        let document = apply_to(
            doc! { "low": 5, "high": 5 },
            doc! { "$min": { "low": 3, "high": 9 }, "$max": { "high": 9, "new": 1 } },
        )
        .unwrap();

        assert_eq!(document, doc! { "low": 3, "high": 9, "new": 1 });
    }

    #[test]
    fn test_array_operators() {
        let document = apply_to(
            doc! { "tags": ["a"], "scores": [1, 5, 8] },
            doc! {
                "$push": { "tags": { "$each": ["b", "a"] }, "log": "created" },
                "$addToSet": { "tags": "c" },
                "$pull": { "scores": { "$gte": 5 } },
            },
        )
        .unwrap();

        assert_eq!(
            document,
            doc! { "tags": ["a", "b", "a", "c"], "scores": [1], "log": ["created"] }
        );

        let deduped = apply_to(doc! { "tags": ["a"] }, doc! { "$addToSet": { "tags": { "$each": ["a", "b"] } } }).unwrap();
        assert_eq!(deduped, doc! { "tags": ["a", "b"] });
        assert!(apply_to(doc! { "tags": "a" }, doc! { "$push": { "tags": "b" } }).is_err());
    }

    #[test]
    fn test_pull_documents() {
        let document = apply_to(
            doc! { "items": [{ "sku": 1 }, { "sku": 2 }, 3] },
            doc! { "$pull": { "items": { "sku": 2 } } },
        )
        .unwrap();

        assert_eq!(document, doc! { "items": [{ "sku": 1 }, 3] });
    }

    #[test]
    fn test_replacement_keeps_id() {
        let document = apply_to(doc! { "_id": 7, "a": 1, "b": 2 }, doc! { "c": 3 }).unwrap();
        assert_eq!(document, doc! { "_id": 7, "c": 3 });

        assert!(apply_to(doc! { "_id": 7 }, doc! { "_id": 8, "c": 3 }).is_err());
    }

    #[test]
    fn test_id_is_immutable() {
        assert!(apply_to(doc! { "_id": 1 }, doc! { "$set": { "_id": 2 } }).is_err());
        assert!(apply_to(doc! { "_id": 1 }, doc! { "$set": { "_id": 1 } }).is_ok());
    }

    #[test]
    fn test_unsupported_operator() {
        assert!(matches!(
            apply_to(doc! {}, doc! { "$currentDate": { "a": true } }),
            Err(StencilError::Backend(_))
        ));
    }

    #[test]
    fn test_upsert_document() {
        let document = upsert_document(
            &doc! { "name": "Robert", "age": { "$gt": 18 }, "$or": [{ "a": 1 }] },
            &doc! { "$inc": { "visits": 1 }, "$setOnInsert": { "created": true } },
        )
        .unwrap();

        assert!(matches!(document.keys().next().map(String::as_str), Some(ID_FIELD)));
        assert_eq!(document.get_str("name").unwrap(), "Robert");
        assert_eq!(document.get_i32("visits").unwrap(), 1);
        assert!(document.get_bool("created").unwrap());
        assert!(!document.contains_key("age"));
    }

    #[test]
    fn test_upsert_replacement_keeps_criteria_id() {
        let document = upsert_document(&doc! { "_id": 5 }, &doc! { "name": "x" }).unwrap();

        assert_eq!(document, doc! { "_id": 5, "name": "x" });
    }
}
