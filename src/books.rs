//! Book questions answered with Open Library context.
//!
//! Looks the title up on the Open Library search API, folds the first hit
//! into one context sentence and asks the model. Lookup failures never fail
//! the request; they become the context sentence instead.

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

use crate::error::{BridgeError, BridgeResult};
use crate::model::{CompletionRequest, ModelClient};

const SYSTEM_PROMPT: &str = "You are a helpful assistant with tools. Use the provided tool to gather information about the book before answering.";

/// Source of one-line book context.
#[async_trait]
pub trait BookContext: Send + Sync {
    async fn context_for(&self, title: &str) -> String;
}

/// Open Library search client.
pub struct OpenLibrary {
    http: reqwest::Client,
    search_url: String,
}

impl OpenLibrary {
    pub fn new(search_url: &str) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()?;
        Ok(Self {
            http,
            search_url: search_url.to_string(),
        })
    }

    async fn search(&self, title: &str) -> Result<Value, reqwest::Error> {
        self.http
            .get(&self.search_url)
            .query(&[("q", title)])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
    }
}

#[async_trait]
impl BookContext for OpenLibrary {
    async fn context_for(&self, title: &str) -> String {
        match self.search(title).await {
            Ok(body) => format_book_context(title, &body),
            Err(e) => {
                tracing::warn!(title, error = %e, "book context lookup failed");
                format!("Error fetching context for \"{}\": {}", title, e)
            }
        }
    }
}

/// Summarise the first search hit of an Open Library response.
pub fn format_book_context(title: &str, body: &Value) -> String {
    let Some(first) = body.pointer("/docs/0") else {
        return format!(
            "No context found for \"{}\". Please check the book title.",
            title
        );
    };
    let text = |ptr: &str, fallback: &str| -> String {
        match first.pointer(ptr) {
            Some(Value::String(s)) if !s.is_empty() => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => fallback.to_string(),
        }
    };
    format!(
        "Context for \"{}\": Title: {}, Author: {}, Published: {}, ISBN: {}.",
        title,
        text("/title", "Unknown Title"),
        text("/author_name/0", "Unknown Author"),
        text("/first_publish_year", "Unknown Year"),
        text("/isbn/0", "Unknown ISBN"),
    )
}

/// Answer a question about a book.
pub async fn ask_about_book(
    context: &dyn BookContext,
    model: &dyn ModelClient,
    book_title: &str,
    question: &str,
    max_tokens: u32,
) -> BridgeResult<String> {
    let (book_title, question) = (book_title.trim(), question.trim());
    if book_title.is_empty() || question.is_empty() {
        return Err(BridgeError::Input(
            "bookTitle and question are required".to_string(),
        ));
    }

    model.ensure_configured()?;

    let context = context.context_for(book_title).await;
    tracing::debug!(book_title, context = %context, "book context");

    let request = CompletionRequest {
        system: SYSTEM_PROMPT.to_string(),
        user: format!("Context from tool: {}\nUser question: {}", context, question),
        max_tokens,
    };
    model.complete(&request).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ChatCompletionClient;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[test]
    fn test_format_first_hit() {
        let body = json!({"docs": [
            {"title": "Dune", "author_name": ["Frank Herbert", "x"], "first_publish_year": 1965, "isbn": ["9780441013593"]},
            {"title": "Dune Messiah"}
        ]});
        assert_eq!(
            format_book_context("dune", &body),
            "Context for \"dune\": Title: Dune, Author: Frank Herbert, Published: 1965, ISBN: 9780441013593."
        );
    }

    #[test]
    fn test_format_fallbacks() {
        let body = json!({"docs": [{"title": "Obscure"}]});
        assert_eq!(
            format_book_context("o", &body),
            "Context for \"o\": Title: Obscure, Author: Unknown Author, Published: Unknown Year, ISBN: Unknown ISBN."
        );
        assert!(format_book_context("zz", &json!({"docs": []})).starts_with("No context found"));
    }

    struct FixedContext;

    #[async_trait]
    impl BookContext for FixedContext {
        async fn context_for(&self, title: &str) -> String {
            format!("ctx:{}", title)
        }
    }

    #[derive(Default)]
    struct Echo {
        seen: Mutex<Vec<CompletionRequest>>,
    }

    #[async_trait]
    impl ModelClient for Echo {
        fn model_name(&self) -> &str {
            "echo"
        }

        async fn complete(&self, request: &CompletionRequest) -> BridgeResult<String> {
            self.seen.lock().unwrap().push(request.clone());
            Ok("answer".to_string())
        }
    }

    #[tokio::test]
    async fn test_ask_builds_context_turn() {
        let model = Echo::default();
        let answer = ask_about_book(&FixedContext, &model, " Dune ", "Who wrote it?", 500)
            .await
            .unwrap();
        assert_eq!(answer, "answer");
        let seen = model.seen.lock().unwrap();
        assert_eq!(seen[0].user, "Context from tool: ctx:Dune\nUser question: Who wrote it?");
        assert_eq!(seen[0].system, SYSTEM_PROMPT);
    }

    #[tokio::test]
    async fn test_ask_requires_both_fields() {
        let model = Echo::default();
        let err = ask_about_book(&FixedContext, &model, "", "q", 500)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "input_error");
        assert!(model.seen.lock().unwrap().is_empty());
    }

    #[derive(Default)]
    struct CountingContext {
        lookups: AtomicUsize,
    }

    #[async_trait]
    impl BookContext for CountingContext {
        async fn context_for(&self, title: &str) -> String {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            format!("ctx:{}", title)
        }
    }

    #[tokio::test]
    async fn test_missing_key_skips_book_lookup() {
        let cfg = crate::config::ModelConfig::default();
        let model = ChatCompletionClient::new(&cfg, None).unwrap();
        let books = CountingContext::default();

        let err = ask_about_book(&books, &model, "Dune", "Who wrote it?", 500)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "config_error");
        assert_eq!(books.lookups.load(Ordering::SeqCst), 0);
    }
}
