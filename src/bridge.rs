//! The admin query bridge.
//!
//! Turns one natural-language admin question into rows from the record
//! store:
//!
//! ```text
//! question ─▶ relevance ─▶ prompt ─▶ model ─▶ sanitize ─▶ parse+validate ─▶ execute
//! ```
//!
//! Each request is independent. The bridge holds only shared, read-only
//! capabilities, so one instance serves every concurrent request.

use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::error::{BridgeError, BridgeResult, Rejection};
use crate::executor::{self, QueryExecutor};
use crate::model::{CompletionRequest, ModelClient};
use crate::models::ParsedQuery;
use crate::prompt::{build_request, PromptInput};
use crate::query::parse_candidate;
use crate::relevance::{classify, Relevance};
use crate::sanitize::sanitize;
use crate::schema::SchemaProvider;

/// What the bridge would send the model for a question.
#[derive(Debug, Clone)]
pub struct Plan {
    pub relevance: Relevance,
    pub request: CompletionRequest,
}

#[derive(Clone)]
pub struct AdminQueryBridge {
    schema: Arc<dyn SchemaProvider>,
    model: Arc<dyn ModelClient>,
    executor: Arc<dyn QueryExecutor>,
    reference_date: String,
    max_tokens: u32,
    deadline: Option<Duration>,
}

impl AdminQueryBridge {
    pub fn new(
        schema: Arc<dyn SchemaProvider>,
        model: Arc<dyn ModelClient>,
        executor: Arc<dyn QueryExecutor>,
    ) -> Self {
        Self {
            schema,
            model,
            executor,
            reference_date: "2025-07-19".to_string(),
            max_tokens: 500,
            deadline: None,
        }
    }

    /// Take the reference date, token cap and deadline from `config`.
    pub fn configured(mut self, config: &Config) -> Self {
        self.reference_date = config.bridge.reference_date.clone();
        self.max_tokens = config.model.max_tokens;
        self.deadline = config.bridge.request_timeout_secs.map(Duration::from_secs);
        self
    }

    pub fn with_reference_date(mut self, date: &str) -> Self {
        self.reference_date = date.to_string();
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn model(&self) -> &Arc<dyn ModelClient> {
        &self.model
    }

    /// Classify the question and build the model request, without calling
    /// the model.
    pub async fn plan(&self, question: &str) -> BridgeResult<Plan> {
        let question = question.trim();
        if question.is_empty() {
            return Err(BridgeError::Input(
                "Question is required and must be a non-empty string".to_string(),
            ));
        }

        let relevance = classify(question);
        let schema = self.schema.describe().await?;
        let schema_text = schema.render_text();
        let request = build_request(
            &PromptInput {
                schema_text: &schema_text,
                is_multi_collection: relevance.is_multi_collection(),
                reference_date: &self.reference_date,
                question,
            },
            self.max_tokens,
        );
        Ok(Plan { relevance, request })
    }

    /// Answer one admin question with rows from the store.
    pub async fn answer(&self, question: &str) -> Result<Vec<Value>, Rejection> {
        match self.deadline {
            None => self.run(question).await,
            Some(limit) => tokio::time::timeout(limit, self.run(question))
                .await
                .unwrap_or_else(|_| {
                    tracing::warn!(question, ?limit, "admin query timed out");
                    Err(BridgeError::Upstream(format!(
                        "Request timed out after {}s",
                        limit.as_secs_f64()
                    ))
                    .into())
                }),
        }
    }

    async fn run(&self, question: &str) -> Result<Vec<Value>, Rejection> {
        let plan = self.plan(question).await.map_err(|e| {
            tracing::warn!(question, code = e.code(), error = %e, "admin query rejected");
            Rejection::from(e)
        })?;
        let collections = plan.relevance.names().join(",");

        let raw = self.model.complete(&plan.request).await.map_err(|e| {
            tracing::warn!(question, code = e.code(), error = %e, "model call failed");
            Rejection::from(e)
        })?;

        let candidate = sanitize(&raw);
        tracing::info!(
            question,
            collections = %collections,
            multi = plan.relevance.is_multi_collection(),
            candidate = %candidate,
            "generated query"
        );

        let reject = |e: BridgeError| {
            tracing::warn!(
                question,
                collections = %collections,
                candidate = %candidate,
                code = e.code(),
                error = %e,
                "admin query rejected"
            );
            Rejection::new(e, Some(candidate.clone()))
        };

        let query = parse_candidate(&candidate, plan.relevance.is_multi_collection())
            .map_err(reject)?;
        let rows = executor::execute(self.executor.as_ref(), &query)
            .await
            .map_err(reject)?;

        tracing::info!(
            collection = %query.collection(),
            shape = query.shape().method(),
            rows = rows.len(),
            "admin query answered"
        );
        Ok(rows)
    }
}

/// Sanitize, parse and validate candidate text offline.
pub fn check_candidate(raw: &str, is_multi_collection: bool) -> Result<ParsedQuery, Rejection> {
    let candidate = sanitize(raw);
    parse_candidate(&candidate, is_multi_collection)
        .map_err(|e| Rejection::new(e, Some(candidate)))
}
