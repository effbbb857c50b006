//! Safety grammar for decoded queries.
//!
//! This is the security boundary between model text and the record store.
//! `find` projections are strict: at least one literal `1`, and only `_id`
//! may be `0`. `$project` stages in pipelines additionally accept `$`-prefixed
//! field references, because joined fields cannot be named with a literal
//! `1`. Pipelines may not write (`$out`, `$merge`) and may only join the
//! three library collections.

use serde_json::Value;

use crate::error::{BridgeError, BridgeResult};
use crate::models::{Collection, Document};

/// Stages that write to the store.
const WRITE_STAGES: [&str; 2] = ["$out", "$merge"];

/// Stages that read another collection, with the key naming it.
const CROSS_COLLECTION_STAGES: [(&str, &str); 3] = [
    ("$lookup", "from"),
    ("$graphLookup", "from"),
    ("$unionWith", "coll"),
];

fn is_one(v: &Value) -> bool {
    v.as_f64() == Some(1.0)
}

fn is_zero(v: &Value) -> bool {
    v.as_f64() == Some(0.0)
}

fn is_field_reference(v: &Value) -> bool {
    v.as_str().is_some_and(|s| s.len() > 1 && s.starts_with('$'))
}

/// Check a decoded `find` projection.
pub fn validate_find_projection(projection: &Document) -> BridgeResult<()> {
    for (key, value) in projection {
        if is_zero(value) && key != "_id" {
            return Err(BridgeError::Validation(format!(
                "Projection must not include fields with value 0 except for _id (found `{}: 0`)",
                key
            )));
        }
        if !is_zero(value) && !is_one(value) {
            return Err(BridgeError::Validation(format!(
                "Projection values must be 1 (or 0 for _id), found `{}: {}`",
                key, value
            )));
        }
    }
    if !projection.values().any(is_one) {
        return Err(BridgeError::Validation(
            "Projection must include at least one field with value 1".to_string(),
        ));
    }
    Ok(())
}

/// Check one `$project` stage body.
pub fn validate_project_stage(project: &Document) -> BridgeResult<()> {
    if project.is_empty() {
        return Err(BridgeError::Validation(
            "Projection stage must include at least one field".to_string(),
        ));
    }
    for (key, value) in project {
        if is_zero(value) {
            if key == "_id" {
                continue;
            }
            return Err(BridgeError::Validation(format!(
                "Projection stage must not include fields with value 0 except for _id (found `{}: 0`)",
                key
            )));
        }
        if !is_one(value) && !is_field_reference(value) {
            return Err(BridgeError::Validation(format!(
                "Projection stage field `{}` must be 1 or a \"$field\" reference, found {}",
                key, value
            )));
        }
    }
    if project.iter().all(|(k, v)| k == "_id" && is_zero(v)) {
        return Err(BridgeError::Validation(
            "Projection stage must include at least one field besides `_id: 0`".to_string(),
        ));
    }
    Ok(())
}

/// Check every stage of a decoded pipeline. Stage shape (single `$` key) is
/// a parse concern and is checked by the caller before this runs.
pub fn validate_pipeline(pipeline: &[Document]) -> BridgeResult<()> {
    for (index, stage) in pipeline.iter().enumerate() {
        let Some((op, body)) = stage.iter().next() else {
            continue;
        };

        if WRITE_STAGES.contains(&op.as_str()) {
            return Err(BridgeError::Validation(format!(
                "Pipeline stage {} uses {}, which writes to the store",
                index + 1,
                op
            )));
        }

        if op == "$project" {
            let project = body.as_object().ok_or_else(|| {
                BridgeError::Validation(format!(
                    "Pipeline stage {}: $project must be a document",
                    index + 1
                ))
            })?;
            validate_project_stage(project)?;
        }

        let cross = CROSS_COLLECTION_STAGES
            .iter()
            .find(|(name, _)| *name == op.as_str());
        if let Some((_, key)) = cross {
            let target = body.get(*key).and_then(Value::as_str).unwrap_or_default();
            if target.parse::<Collection>().is_err() {
                return Err(BridgeError::Validation(format!(
                    "Pipeline stage {}: {} must target users, issueRequests, or favorites (found {:?})",
                    index + 1,
                    op,
                    target
                )));
            }
        }
    }
    Ok(())
}
