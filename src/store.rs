//! Record store: seed import and collection loading.
//!
//! Seed files are a JSON object keyed by collection name:
//!
//! ```json
//! { "users": [ { "name": "Asha", "email": "asha@example.edu", ... } ],
//!   "issueRequests": [], "favorites": [] }
//! ```
//!
//! Every record is normalised against the schema before anything is
//! written. A file with any invalid record is rejected as a whole.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::SqlitePool;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use uuid::Uuid;

use crate::config::Config;
use crate::db;
use crate::migrate;
use crate::models::{Collection, Document};
use crate::schema::{LibrarySchema, SchemaDescriptor};

/// Records accepted for one collection, ready to write.
#[derive(Debug, Clone)]
pub struct PreparedBatch {
    pub collection: Collection,
    pub records: Vec<(String, Document)>,
}

/// String form of a record's `_id`, accepting `{"$oid": …}`.
fn record_id(id: &Value) -> Option<String> {
    match id {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Object(o) => o.get("$oid").and_then(Value::as_str).map(str::to_string),
        _ => None,
    }
}

/// Validate and normalise a seed document without touching the database.
pub fn prepare_import(
    seed: &Value,
    descriptor: &SchemaDescriptor,
    now: DateTime<Utc>,
) -> Result<Vec<PreparedBatch>> {
    let root = seed
        .as_object()
        .context("Seed file must be a JSON object keyed by collection name")?;

    let mut problems = Vec::new();
    let mut invalid = 0usize;
    let mut batches = Vec::new();

    for (name, records) in root {
        let collection: Collection = name.parse().map_err(anyhow::Error::msg)?;
        let schema = descriptor
            .collection(collection)
            .with_context(|| format!("No schema for collection '{}'", collection))?;
        let records = records
            .as_array()
            .with_context(|| format!("'{}' must be an array of records", name))?;

        let mut batch = PreparedBatch {
            collection,
            records: Vec::with_capacity(records.len()),
        };
        let mut seen_ids = HashSet::new();
        let mut seen_unique: BTreeMap<&str, HashSet<String>> = BTreeMap::new();

        for (index, record) in records.iter().enumerate() {
            let reported = problems.len();
            let Some(record) = record.as_object() else {
                problems.push(format!("{}[{}]: record must be an object", name, index));
                invalid += 1;
                continue;
            };
            let mut doc = match schema.normalize_record(record, now) {
                Ok(doc) => doc,
                Err(errs) => {
                    for e in errs {
                        problems.push(format!("{}[{}]: {}", name, index, e));
                    }
                    invalid += 1;
                    continue;
                }
            };

            let id = match doc.get("_id") {
                None => Uuid::new_v4().to_string(),
                Some(v) => match record_id(v) {
                    Some(id) => id,
                    None => {
                        problems.push(format!("{}[{}]: unsupported _id {}", name, index, v));
                        invalid += 1;
                        continue;
                    }
                },
            };
            if !seen_ids.insert(id.clone()) {
                problems.push(format!("{}[{}]: duplicate _id '{}'", name, index, id));
                invalid += 1;
                continue;
            }
            doc.shift_remove("_id");
            let mut with_id = Document::new();
            with_id.insert("_id".to_string(), Value::String(id.clone()));
            with_id.extend(doc);

            for field in schema.fields.iter().filter(|f| f.unique) {
                if let Some(v) = with_id.get(&field.name) {
                    let seen = seen_unique.entry(field.name.as_str()).or_default();
                    if !seen.insert(v.to_string()) {
                        problems.push(format!(
                            "{}[{}]: duplicate value for unique field '{}': {}",
                            name, index, field.name, v
                        ));
                    }
                }
            }

            if problems.len() > reported {
                invalid += 1;
                continue;
            }
            batch.records.push((id, with_id));
        }
        batches.push(batch);
    }

    if !problems.is_empty() {
        bail!(
            "Seed file has {} invalid record(s):\n  {}",
            invalid,
            problems.join("\n  ")
        );
    }
    Ok(batches)
}

/// Write prepared batches in one transaction, replacing records with the
/// same `_id`. Returns the number of records written per collection.
pub async fn write_batches(
    pool: &SqlitePool,
    batches: &[PreparedBatch],
) -> Result<Vec<(Collection, usize)>> {
    let now = Utc::now().timestamp();
    let mut tx = pool.begin().await?;
    let mut written = Vec::new();

    for batch in batches {
        for (id, doc) in &batch.records {
            let body = serde_json::to_string(doc)?;
            sqlx::query(
                r#"
                INSERT INTO records (id, collection, body, created_at, updated_at)
                VALUES (?, ?, ?, ?, ?)
                ON CONFLICT(collection, id) DO UPDATE SET
                    body = excluded.body,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(id)
            .bind(batch.collection.as_str())
            .bind(&body)
            .bind(now)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }
        written.push((batch.collection, batch.records.len()));
    }

    tx.commit().await?;
    Ok(written)
}

/// Load every document of `collection`, in insertion order.
pub async fn load_collection(pool: &SqlitePool, collection: Collection) -> Result<Vec<Document>> {
    let bodies: Vec<String> =
        sqlx::query_scalar("SELECT body FROM records WHERE collection = ? ORDER BY rowid")
            .bind(collection.as_str())
            .fetch_all(pool)
            .await?;

    bodies
        .iter()
        .map(|b| {
            serde_json::from_str::<Document>(b)
                .with_context(|| format!("Corrupt record body in '{}'", collection))
        })
        .collect()
}

/// Check unique fields of new records against what is already stored.
async fn check_stored_unique(
    pool: &SqlitePool,
    descriptor: &SchemaDescriptor,
    batches: &[PreparedBatch],
) -> Result<()> {
    for batch in batches {
        let Some(schema) = descriptor.collection(batch.collection) else {
            continue;
        };
        let unique: Vec<&str> = schema
            .fields
            .iter()
            .filter(|f| f.unique)
            .map(|f| f.name.as_str())
            .collect();
        if unique.is_empty() {
            continue;
        }
        let stored = load_collection(pool, batch.collection).await?;
        for (id, doc) in &batch.records {
            for field in &unique {
                let Some(value) = doc.get(*field) else {
                    continue;
                };
                let clash = stored.iter().any(|s| {
                    s.get("_id").and_then(record_id).as_deref() != Some(id.as_str())
                        && s.get(*field) == Some(value)
                });
                if clash {
                    bail!(
                        "{} '{}': {} {} is already used by another record",
                        batch.collection,
                        id,
                        field,
                        value
                    );
                }
            }
        }
    }
    Ok(())
}

/// `shelf import <file>`.
pub async fn run_import(config: &Config, file: &Path) -> Result<()> {
    let text = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read seed file: {}", file.display()))?;
    let seed: Value = serde_json::from_str(&text)
        .with_context(|| format!("Seed file is not valid JSON: {}", file.display()))?;

    let descriptor = LibrarySchema::descriptor();
    let batches = prepare_import(&seed, &descriptor, Utc::now())?;

    let pool = db::connect(config).await?;
    migrate::migrate(&pool).await?;
    check_stored_unique(&pool, &descriptor, &batches).await?;
    let written = write_batches(&pool, &batches).await?;

    println!("import {}", file.display());
    for (collection, count) in &written {
        println!("  {:<14} {}", collection.as_str(), count);
    }
    println!("ok");

    tracing::info!(file = %file.display(), "seed import complete");
    pool.close().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 7, 19, 9, 0, 0).unwrap()
    }

    #[test]
    fn test_prepare_assigns_ids_and_defaults() {
        let seed = json!({
            "users": [
                {"name": "Asha", "email": "asha@x", "role": "Student", "rollNumber": "S1", "password": "h"}
            ]
        });
        let batches = prepare_import(&seed, &LibrarySchema::descriptor(), now()).unwrap();
        assert_eq!(batches.len(), 1);
        let (id, doc) = &batches[0].records[0];
        assert_eq!(doc.keys().next().map(String::as_str), Some("_id"));
        assert_eq!(doc["_id"], json!(id));
        assert_eq!(doc["booksCanRequest"], json!(3));
        assert_eq!(doc["isVerified"], json!(false));
        assert!(doc.contains_key("createdAt"));
    }

    #[test]
    fn test_prepare_keeps_given_ids() {
        let seed = json!({
            "favorites": [
                {"_id": {"$oid": "64b000000000000000000001"}, "bookId": "b1", "title": "Dune", "email": "a@x", "role": "Student"}
            ]
        });
        let batches = prepare_import(&seed, &LibrarySchema::descriptor(), now()).unwrap();
        assert_eq!(batches[0].records[0].0, "64b000000000000000000001");
    }

    #[test]
    fn test_prepare_collects_every_problem() {
        let seed = json!({
            "users": [
                {"name": "A", "email": "a@x", "role": "Student", "password": "h"},
                {"name": "B", "email": "b@x", "role": "Janitor", "password": "h"}
            ]
        });
        let err = prepare_import(&seed, &LibrarySchema::descriptor(), now())
            .unwrap_err()
            .to_string();
        assert!(err.contains("2 invalid record"));
        assert!(err.contains("users[0]"));
        assert!(err.contains("users[1]"));
    }

    #[test]
    fn test_prepare_rejects_duplicate_unique_values() {
        let user = json!({"name": "A", "email": "a@x", "role": "Faculty", "password": "h"});
        let seed = json!({ "users": [user.clone(), user] });
        let err = prepare_import(&seed, &LibrarySchema::descriptor(), now()).unwrap_err();
        assert!(err.to_string().contains("unique field 'email'"));
    }

    #[test]
    fn test_prepare_rejects_unknown_collection() {
        let seed = json!({ "books": [] });
        let err = prepare_import(&seed, &LibrarySchema::descriptor(), now()).unwrap_err();
        assert!(err.to_string().contains("books"));
    }

    #[tokio::test]
    async fn test_write_and_load_round_trip() {
        let dir = tempfile::TempDir::new().unwrap();
        let pool = db::connect_path(&dir.path().join("t.sqlite")).await.unwrap();
        migrate::migrate(&pool).await.unwrap();

        let seed = json!({
            "favorites": [
                {"_id": "f1", "bookId": "b1", "title": "Dune", "email": "a@x", "role": "Student"},
                {"_id": "f2", "bookId": "b2", "title": "Emma", "email": "a@x", "role": "Student"}
            ]
        });
        let batches = prepare_import(&seed, &LibrarySchema::descriptor(), now()).unwrap();
        write_batches(&pool, &batches).await.unwrap();
        // Re-import replaces rather than duplicates.
        write_batches(&pool, &batches).await.unwrap();

        let docs = load_collection(&pool, Collection::Favorites).await.unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0]["title"], "Dune");
        assert!(load_collection(&pool, Collection::Users).await.unwrap().is_empty());
    }
}
