//! Query execution against a record store.
//!
//! [`QueryExecutor`] is the seam between the bridge and whatever holds the
//! library records. Both implementations here evaluate queries with the
//! in-process [`engine`](crate::engine):
//!
//! - [`SqliteExecutor`]: documents stored by `shelf import`
//! - [`MemoryExecutor`]: documents held in memory (tests, embedding)
//!
//! Executors only receive queries that already passed validation.

use async_trait::async_trait;
use serde_json::Value;
use sqlx::SqlitePool;
use std::collections::HashMap;

use crate::engine;
use crate::error::{BridgeError, BridgeResult};
use crate::models::{Collection, Document, ParsedQuery};
use crate::store;

#[async_trait]
pub trait QueryExecutor: Send + Sync {
    /// Filtered, projected read of one collection.
    async fn find(
        &self,
        collection: Collection,
        filter: &Document,
        projection: &Document,
    ) -> BridgeResult<Vec<Value>>;

    /// Run an aggregation pipeline rooted at `collection`.
    async fn aggregate(
        &self,
        collection: Collection,
        pipeline: &[Document],
    ) -> BridgeResult<Vec<Value>>;
}

/// Dispatch a validated query to the matching executor operation.
///
/// Returned rows carry dates and ids as plain strings.
pub async fn execute(executor: &dyn QueryExecutor, query: &ParsedQuery) -> BridgeResult<Vec<Value>> {
    let rows = match query {
        ParsedQuery::Find {
            collection,
            filter,
            projection,
        } => executor.find(*collection, filter, projection).await?,
        ParsedQuery::Aggregate {
            collection,
            pipeline,
        } => executor.aggregate(*collection, pipeline).await?,
    };
    Ok(rows.into_iter().map(plain_value).collect())
}

/// Replace `{"$date": s}` and `{"$oid": s}` wrappers with `s`.
pub fn plain_value(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            if map.len() == 1 {
                if let Some(Value::String(s)) = map.get("$date").or_else(|| map.get("$oid")) {
                    return Value::String(s.clone());
                }
            }
            Value::Object(map.into_iter().map(|(k, v)| (k, plain_value(v))).collect())
        }
        Value::Array(items) => Value::Array(items.into_iter().map(plain_value).collect()),
        other => other,
    }
}

fn into_values(docs: Vec<Document>) -> Vec<Value> {
    docs.into_iter().map(Value::Object).collect()
}

fn engine_error(e: String) -> BridgeError {
    BridgeError::Execution(e)
}

/// In-memory collections.
#[derive(Debug, Clone, Default)]
pub struct MemoryExecutor {
    collections: HashMap<Collection, Vec<Document>>,
}

impl MemoryExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_collection(mut self, collection: Collection, docs: Vec<Document>) -> Self {
        self.collections.insert(collection, docs);
        self
    }

    /// Build from a JSON object keyed by collection name, the same layout
    /// `shelf import` reads. Non-object records are skipped.
    pub fn from_seed(seed: &Value) -> BridgeResult<Self> {
        let root = seed.as_object().ok_or_else(|| {
            BridgeError::Config("seed must be an object keyed by collection".to_string())
        })?;
        let mut out = Self::new();
        for (name, records) in root {
            let collection: Collection = name.parse().map_err(BridgeError::Config)?;
            let docs = records
                .as_array()
                .map(|a| a.iter().filter_map(|r| r.as_object().cloned()).collect())
                .unwrap_or_default();
            out.collections.insert(collection, docs);
        }
        Ok(out)
    }

    fn docs(&self, collection: Collection) -> &[Document] {
        self.collections
            .get(&collection)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

#[async_trait]
impl QueryExecutor for MemoryExecutor {
    async fn find(
        &self,
        collection: Collection,
        filter: &Document,
        projection: &Document,
    ) -> BridgeResult<Vec<Value>> {
        engine::run_find(self.docs(collection), filter, projection)
            .map(into_values)
            .map_err(engine_error)
    }

    async fn aggregate(
        &self,
        collection: Collection,
        pipeline: &[Document],
    ) -> BridgeResult<Vec<Value>> {
        let foreign: HashMap<_, _> = engine::lookup_targets(pipeline)
            .into_iter()
            .map(|c| (c, self.docs(c).to_vec()))
            .collect();
        engine::run_pipeline(self.docs(collection).to_vec(), pipeline, &foreign)
            .map(into_values)
            .map_err(engine_error)
    }
}

/// Executor over the SQLite record store.
#[derive(Clone)]
pub struct SqliteExecutor {
    pool: SqlitePool,
}

impl SqliteExecutor {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn load(&self, collection: Collection) -> BridgeResult<Vec<Document>> {
        store::load_collection(&self.pool, collection)
            .await
            .map_err(|e| BridgeError::Execution(format!("{:#}", e)))
    }
}

#[async_trait]
impl QueryExecutor for SqliteExecutor {
    async fn find(
        &self,
        collection: Collection,
        filter: &Document,
        projection: &Document,
    ) -> BridgeResult<Vec<Value>> {
        let docs = self.load(collection).await?;
        engine::run_find(&docs, filter, projection)
            .map(into_values)
            .map_err(engine_error)
    }

    async fn aggregate(
        &self,
        collection: Collection,
        pipeline: &[Document],
    ) -> BridgeResult<Vec<Value>> {
        let docs = self.load(collection).await?;
        let mut foreign = HashMap::new();
        for target in engine::lookup_targets(pipeline) {
            let loaded = if target == collection {
                docs.clone()
            } else {
                self.load(target).await?
            };
            foreign.insert(target, loaded);
        }
        tracing::debug!(
            collection = %collection,
            documents = docs.len(),
            joined = foreign.len(),
            "running pipeline"
        );
        engine::run_pipeline(docs, pipeline, &foreign)
            .map(into_values)
            .map_err(engine_error)
    }
}
