//! Aggregation pipelines.
//!
//! Supports the `$match`, `$sort`, `$skip`, `$limit`, `$project` and `$count` stages.

use bson::{Bson, Document};

use docstencil_core::error::{StencilError, StencilResult};

use crate::{
    cursor::{self, project},
    evaluator::{as_count, matches, unsupported},
};

/// Runs `pipeline` over `documents`, stage by stage.
///
/// # Errors
///
/// Returns [`StencilError::Backend`] for unsupported stages, malformed stages and any error
/// raised while evaluating one.
pub(crate) fn run(mut documents: Vec<Document>, pipeline: &[Document]) -> StencilResult<Vec<Document>> {
    for stage in pipeline {
        let mut entries = stage.iter();
        let (Some((name, operand)), None) = (entries.next(), entries.next()) else {
            return Err(StencilError::Backend(format!(
                "A pipeline stage must have exactly one field, got {stage}"
            )));
        };

        documents = match (name.as_str(), operand) {
            ("$match", Bson::Document(criteria)) => {
                let mut matched = Vec::with_capacity(documents.len());
                for document in documents {
                    if matches(&document, criteria)? {
                        matched.push(document);
                    }
                }
                matched
            }
            ("$sort", Bson::Document(sort)) => {
                cursor::sort(&mut documents, sort, |document| document)?;
                documents
            }
            ("$skip", operand) => {
                let skip = stage_count(name, operand)?;
                documents.into_iter().skip(skip).collect()
            }
            ("$limit", operand) => {
                let limit = stage_count(name, operand)?;
                documents.into_iter().take(limit).collect()
            }
            ("$project", Bson::Document(projection)) => documents
                .iter()
                .map(|document| project(document, projection))
                .collect::<StencilResult<_>>()?,
            ("$count", Bson::String(field)) => count(documents.len(), field),
            ("$match" | "$sort" | "$project" | "$count", operand) => {
                return Err(StencilError::Backend(format!("Invalid operand {operand} for {name}")));
            }
            (other, _) => return Err(unsupported("pipeline stage", other)),
        };
    }

    Ok(documents)
}

fn stage_count(name: &str, operand: &Bson) -> StencilResult<usize> {
    as_count(operand)
        .and_then(|n| usize::try_from(n).ok())
        .ok_or_else(|| StencilError::Backend(format!("{name} expects a non-negative integer, got {operand}")))
}

// an empty input counts to no document at all
fn count(total: usize, field: &str) -> Vec<Document> {
    if total == 0 {
        return Vec::new();
    }

    let value = i32::try_from(total).map_or_else(|_| Bson::Int64(total as i64), Bson::Int32);
    let mut counted = Document::new();
    counted.insert(field, value);

    vec![counted]
}
