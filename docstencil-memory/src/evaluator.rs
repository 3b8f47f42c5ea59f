//! Criteria evaluation for in-memory document filtering.
//!
//! Criteria are the compiled MongoDB-style documents produced by the core, e.g.
//! `{age: {$gte: 18}, $or: [{city: "Paris"}, {tags: "remote"}]}`.

use std::cmp::Ordering;

use bson::{Bson, Document, datetime::DateTime, oid::ObjectId};
use regex::RegexBuilder;

use docstencil_core::error::{StencilError, StencilResult};

use crate::path::lookup;

/// Comparable representation of BSON values.
///
/// Numbers of every width compare as `f64`. Values of different kinds are only ordered by
/// [`Comparable::sort_cmp`], which ranks kinds the way the database does.
#[derive(Debug)]
pub(crate) enum Comparable<'a> {
    Null,
    Number(f64),
    String(&'a str),
    Map(Vec<(&'a str, Comparable<'a>)>),
    Array(Vec<Comparable<'a>>),
    Binary(&'a [u8]),
    ObjectId(ObjectId),
    Bool(bool),
    DateTime(DateTime),
    /// Any other value, compared by its BSON form.
    Other(&'a Bson),
}

impl<'a> From<&'a Bson> for Comparable<'a> {
    fn from(bson: &'a Bson) -> Self {
        match bson {
            Bson::Null | Bson::Undefined => Comparable::Null,
            Bson::Boolean(value) => Comparable::Bool(*value),
            Bson::Int32(value) => Comparable::Number(f64::from(*value)),
            Bson::Int64(value) => Comparable::Number(*value as f64),
            Bson::Double(value) => Comparable::Number(*value),
            Bson::DateTime(value) => Comparable::DateTime(*value),
            Bson::String(value) => Comparable::String(value),
            Bson::ObjectId(value) => Comparable::ObjectId(*value),
            Bson::Binary(value) => Comparable::Binary(&value.bytes),
            Bson::Array(items) => Comparable::Array(items.iter().map(Comparable::from).collect()),
            Bson::Document(document) => Comparable::Map(
                document
                    .iter()
                    .map(|(key, value)| (key.as_str(), Comparable::from(value)))
                    .collect(),
            ),
            other => Comparable::Other(other),
        }
    }
}

impl Comparable<'_> {
    fn rank(&self) -> u8 {
        match self {
            Comparable::Null => 1,
            Comparable::Number(_) => 2,
            Comparable::String(_) => 3,
            Comparable::Map(_) => 4,
            Comparable::Array(_) => 5,
            Comparable::Binary(_) => 6,
            Comparable::ObjectId(_) => 7,
            Comparable::Bool(_) => 8,
            Comparable::DateTime(_) => 9,
            Comparable::Other(_) => 10,
        }
    }

    /// Total order used for sorting: kinds first, then values.
    pub(crate) fn sort_cmp(&self, other: &Self) -> Ordering {
        self.rank()
            .cmp(&other.rank())
            .then_with(|| self.partial_cmp(other).unwrap_or(Ordering::Equal))
    }
}

impl PartialEq for Comparable<'_> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Comparable::Null, Comparable::Null) => true,
            (Comparable::Bool(a), Comparable::Bool(b)) => a == b,
            (Comparable::Number(a), Comparable::Number(b)) => a == b,
            (Comparable::DateTime(a), Comparable::DateTime(b)) => a == b,
            (Comparable::String(a), Comparable::String(b)) => a == b,
            (Comparable::ObjectId(a), Comparable::ObjectId(b)) => a == b,
            (Comparable::Binary(a), Comparable::Binary(b)) => a == b,
            (Comparable::Array(a), Comparable::Array(b)) => a == b,
            (Comparable::Map(a), Comparable::Map(b)) => a == b,
            (Comparable::Other(a), Comparable::Other(b)) => a == b,
            _ => false,
        }
    }
}

impl PartialOrd for Comparable<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Comparable::Null, Comparable::Null) => Some(Ordering::Equal),
            (Comparable::Bool(a), Comparable::Bool(b)) => a.partial_cmp(b),
            (Comparable::Number(a), Comparable::Number(b)) => a.partial_cmp(b),
            (Comparable::DateTime(a), Comparable::DateTime(b)) => a.partial_cmp(b),
            (Comparable::String(a), Comparable::String(b)) => a.partial_cmp(b),
            (Comparable::ObjectId(a), Comparable::ObjectId(b)) => a.bytes().partial_cmp(&b.bytes()),
            (Comparable::Binary(a), Comparable::Binary(b)) => a.partial_cmp(b),
            _ => None,
        }
    }
}

/// Returns `true` when `document` satisfies `criteria`.
///
/// # Errors
///
/// Returns [`StencilError::Backend`] for unsupported operators, malformed operands and invalid
/// regular expressions.
pub(crate) fn matches(document: &Document, criteria: &Document) -> StencilResult<bool> {
    for (key, condition) in criteria {
        let matched = match key.as_str() {
            "$and" => all_of(document, condition)?,
            "$or" => any_of(document, condition)?,
            "$nor" => !any_of(document, condition)?,
            operator if operator.starts_with('$') => {
                return Err(unsupported("query operator", operator));
            }
            path => matches_field(&lookup(document, path), condition)?,
        };

        if !matched {
            return Ok(false);
        }
    }

    Ok(true)
}

/// Keeps the documents satisfying `criteria`.
pub(crate) fn filter<'a>(
    documents: impl IntoIterator<Item = &'a Document>,
    criteria: &Document,
) -> StencilResult<Vec<&'a Document>> {
    let mut matched = Vec::new();
    for document in documents {
        if matches(document, criteria)? {
            matched.push(document);
        }
    }

    Ok(matched)
}

fn clauses<'c>(condition: &'c Bson) -> StencilResult<impl Iterator<Item = StencilResult<&'c Document>>> {
    let Bson::Array(clauses) = condition else {
        return Err(StencilError::Backend("Logical operators expect an array".to_string()));
    };

    Ok(clauses.iter().map(|clause| {
        clause
            .as_document()
            .ok_or_else(|| StencilError::Backend("Logical operator clauses must be documents".to_string()))
    }))
}

fn all_of(document: &Document, condition: &Bson) -> StencilResult<bool> {
    for clause in clauses(condition)? {
        if !matches(document, clause?)? {
            return Ok(false);
        }
    }

    Ok(true)
}

fn any_of(document: &Document, condition: &Bson) -> StencilResult<bool> {
    for clause in clauses(condition)? {
        if matches(document, clause?)? {
            return Ok(true);
        }
    }

    Ok(false)
}

/// Returns `true` when `condition` is an operator document such as `{$gt: 1}`.
pub(crate) fn is_operator_condition(condition: &Bson) -> bool {
    matches!(condition, Bson::Document(document)
        if document.keys().next().is_some_and(|key| key.starts_with('$')))
}

/// Matches the values found at a path against an equality or operator condition.
pub(crate) fn matches_field(values: &[&Bson], condition: &Bson) -> StencilResult<bool> {
    match condition {
        Bson::Document(operators) if is_operator_condition(condition) => matches_operators(values, operators),
        expected => Ok(equals(values, expected)),
    }
}

fn matches_operators(values: &[&Bson], operators: &Document) -> StencilResult<bool> {
    for (operator, operand) in operators {
        let matched = match operator.as_str() {
            "$eq" => equals(values, operand),
            "$ne" => !equals(values, operand),
            "$gt" => compares(values, operand, |o| o == Ordering::Greater),
            "$gte" => compares(values, operand, |o| o != Ordering::Less),
            "$lt" => compares(values, operand, |o| o == Ordering::Less),
            "$lte" => compares(values, operand, |o| o != Ordering::Greater),
            "$in" => is_in(values, operand)?,
            "$nin" => !is_in(values, operand)?,
            "$exists" => !values.is_empty() == truthy(operand),
            "$regex" => {
                let options = operators.get_str("$options").unwrap_or_default();
                matches_regex(values, operand, options)?
            }
            "$options" => true,
            "$not" => !matches_field(values, operand)?,
            "$size" => {
                let size = as_count(operand).ok_or_else(|| invalid_operand("$size", operand))?;
                values
                    .iter()
                    .any(|value| matches!(value, Bson::Array(items) if items.len() as u64 == size))
            }
            "$all" => {
                let Bson::Array(expected) = operand else {
                    return Err(invalid_operand("$all", operand));
                };
                !expected.is_empty() && expected.iter().all(|item| equals(values, item))
            }
            "$elemMatch" => {
                let Bson::Document(condition) = operand else {
                    return Err(invalid_operand("$elemMatch", operand));
                };
                elem_match(values, condition)?
            }
            other => return Err(unsupported("query operator", other)),
        };

        if !matched {
            return Ok(false);
        }
    }

    Ok(true)
}

/// Values found at a path, plus the elements of those that are arrays.
fn expand<'a>(values: &[&'a Bson]) -> Vec<&'a Bson> {
    let mut expanded = Vec::with_capacity(values.len());
    for value in values {
        expanded.push(*value);
        if let Bson::Array(items) = value {
            expanded.extend(items.iter());
        }
    }

    expanded
}

fn equals(values: &[&Bson], expected: &Bson) -> bool {
    if values.is_empty() {
        return matches!(expected, Bson::Null);
    }

    let expected = Comparable::from(expected);
    expand(values)
        .into_iter()
        .any(|value| Comparable::from(value) == expected)
}

fn compares(values: &[&Bson], operand: &Bson, accept: impl Fn(Ordering) -> bool) -> bool {
    let operand = Comparable::from(operand);
    expand(values).into_iter().any(|value| {
        Comparable::from(value)
            .partial_cmp(&operand)
            .is_some_and(&accept)
    })
}

fn is_in(values: &[&Bson], operand: &Bson) -> StencilResult<bool> {
    let Bson::Array(candidates) = operand else {
        return Err(invalid_operand("$in", operand));
    };

    Ok(candidates.iter().any(|candidate| equals(values, candidate)))
}

fn matches_regex(values: &[&Bson], pattern: &Bson, options: &str) -> StencilResult<bool> {
    let Bson::String(pattern) = pattern else {
        return Err(invalid_operand("$regex", pattern));
    };

    let regex = RegexBuilder::new(pattern)
        .case_insensitive(options.contains('i'))
        .multi_line(options.contains('m'))
        .dot_matches_new_line(options.contains('s'))
        .ignore_whitespace(options.contains('x'))
        .build()
        .map_err(|e| StencilError::Backend(format!("Invalid regular expression '{pattern}': {e}")))?;

    Ok(expand(values)
        .into_iter()
        .any(|value| matches!(value, Bson::String(text) if regex.is_match(text))))
}

fn elem_match(values: &[&Bson], condition: &Document) -> StencilResult<bool> {
    let operators = condition.keys().next().is_some_and(|key| key.starts_with('$'))
        && !condition.keys().any(|key| matches!(key.as_str(), "$and" | "$or" | "$nor"));

    for value in values {
        let Bson::Array(items) = value else {
            continue;
        };
        for item in items {
            let matched = match item {
                _ if operators => matches_operators(&[item], condition)?,
                Bson::Document(element) => matches(element, condition)?,
                _ => false,
            };
            if matched {
                return Ok(true);
            }
        }
    }

    Ok(false)
}

pub(crate) fn truthy(value: &Bson) -> bool {
    match value {
        Bson::Boolean(value) => *value,
        Bson::Int32(value) => *value != 0,
        Bson::Int64(value) => *value != 0,
        Bson::Double(value) => *value != 0.0,
        Bson::Null | Bson::Undefined => false,
        _ => true,
    }
}

/// Reads a non-negative integral count such as a `$limit` or `$size` operand.
pub(crate) fn as_count(value: &Bson) -> Option<u64> {
    match value {
        Bson::Int32(value) => u64::try_from(*value).ok(),
        Bson::Int64(value) => u64::try_from(*value).ok(),
        Bson::Double(value) if value.fract() == 0.0 && *value >= 0.0 => Some(*value as u64),
        _ => None,
    }
}

pub(crate) fn unsupported(kind: &str, name: &str) -> StencilError {
    StencilError::Backend(format!("Unsupported {kind} '{name}'"))
}

fn invalid_operand(operator: &str, operand: &Bson) -> StencilError {
    StencilError::Backend(format!("Invalid operand {operand} for {operator}"))
}
