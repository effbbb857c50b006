//! Runners for the inspection and query commands of the `shelf` binary.

use anyhow::{bail, Result};
use std::sync::Arc;

use crate::bridge::{check_candidate, AdminQueryBridge};
use crate::config::Config;
use crate::db;
use crate::error::Rejection;
use crate::executor::SqliteExecutor;
use crate::migrate;
use crate::model::ChatCompletionClient;
use crate::models::ParsedQuery;
use crate::schema::{LibrarySchema, SchemaProvider};

/// `shelf schema`: print the schema text the model sees.
pub async fn run_schema() -> Result<()> {
    let descriptor = LibrarySchema.describe().await?;
    println!("{}", descriptor.render_text());
    Ok(())
}

/// `shelf plan`: classify a question and print the prompt, without calling
/// the model or opening the database.
pub async fn run_plan(config: &Config, question: &str) -> Result<()> {
    let bridge = AdminQueryBridge::new(
        Arc::new(LibrarySchema),
        Arc::new(ChatCompletionClient::from_config(&config.model)?),
        Arc::new(crate::executor::MemoryExecutor::new()),
    )
    .configured(config);
    let plan = bridge.plan(question).await?;

    println!("collections: {}", plan.relevance.names().join(", "));
    println!("multi-collection: {}", plan.relevance.is_multi_collection());
    println!("max_tokens: {}", plan.request.max_tokens);
    println!();
    println!("--- system ---");
    println!("{}", plan.request.system);
    println!("--- user ---");
    println!("{}", plan.request.user);
    Ok(())
}

/// `shelf check`: sanitize, parse and validate candidate text offline.
pub fn run_check(candidate: &str, multi: bool) -> Result<()> {
    match check_candidate(candidate, multi) {
        Ok(query) => {
            print_query(&query)?;
            println!("ok");
            Ok(())
        }
        Err(rejection) => report(rejection),
    }
}

/// `shelf ask`: answer a question against the configured store and model.
pub async fn run_ask(config: &Config, question: &str) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate::migrate(&pool).await?;

    let bridge = AdminQueryBridge::new(
        Arc::new(LibrarySchema),
        Arc::new(ChatCompletionClient::from_config(&config.model)?),
        Arc::new(SqliteExecutor::new(pool.clone())),
    )
    .configured(config);

    let outcome = bridge.answer(question).await;
    pool.close().await;

    match outcome {
        Ok(rows) => {
            println!("{}", serde_json::to_string_pretty(&rows)?);
            println!("{} row(s)", rows.len());
            Ok(())
        }
        Err(rejection) => report(rejection),
    }
}

fn print_query(query: &ParsedQuery) -> Result<()> {
    println!(
        "{} on {}",
        query.shape().method(),
        query.collection().as_str()
    );
    println!("{}", serde_json::to_string_pretty(query)?);
    Ok(())
}

fn report(rejection: Rejection) -> Result<()> {
    if let Some(candidate) = &rejection.candidate {
        println!("generated query: {}", candidate);
    }
    bail!("{}: {}", rejection.error.code(), rejection.error)
}
