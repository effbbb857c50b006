//! HTTP server for the library backend's assistant endpoints.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/` | Liveness message |
//! | `GET`  | `/health` | Health check (returns version) |
//! | `POST` | `/api/admin-query` | Natural-language admin question → rows |
//! | `POST` | `/api/ask` | Question about a book, with Open Library context |
//!
//! # Error Contract
//!
//! ```json
//! { "error": "Projection must include at least one field with value 1",
//!   "code": "validation_error",
//!   "generatedQuery": "db.users.find({}, {_id: 0})" }
//! ```
//!
//! `generatedQuery` is present only when the model had produced a candidate.
//! Status codes follow [`BridgeError::status`].
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted; the library frontend is
//! served from a different origin.

use axum::{
    extract::{rejection::JsonRejection, State},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::books::{ask_about_book, BookContext, OpenLibrary};
use crate::bridge::AdminQueryBridge;
use crate::config::Config;
use crate::db;
use crate::error::{BridgeError, Rejection};
use crate::executor::SqliteExecutor;
use crate::migrate;
use crate::model::ChatCompletionClient;
use crate::schema::LibrarySchema;

/// Capabilities the handlers call into.
#[derive(Clone)]
pub struct Services {
    pub bridge: AdminQueryBridge,
    pub books: Arc<dyn BookContext>,
}

#[derive(Clone)]
struct AppState {
    config: Arc<Config>,
    services: Services,
}

/// Start the server with the SQLite record store, the configured model
/// endpoint and Open Library.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let pool = db::connect(config).await?;
    migrate::migrate(&pool).await?;

    let model = Arc::new(ChatCompletionClient::from_config(&config.model)?);
    if std::env::var(&config.model.api_key_env).is_err() {
        tracing::warn!(
            var = %config.model.api_key_env,
            "model API key is not set; model-backed endpoints will answer config_error"
        );
    }

    let bridge = AdminQueryBridge::new(
        Arc::new(LibrarySchema),
        model,
        Arc::new(SqliteExecutor::new(pool)),
    )
    .configured(config);
    let books = Arc::new(OpenLibrary::new(&config.books.search_url)?);

    run_server_with_services(config, Services { bridge, books }).await
}

/// Start the server with caller-supplied services (custom stores or model
/// clients).
pub async fn run_server_with_services(config: &Config, services: Services) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let app = router(config, services);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    println!("Shelfwise server listening on http://{}", bind_addr);
    tracing::info!(bind = %bind_addr, "server started");
    axum::serve(listener, app).await?;

    Ok(())
}

/// Build the router without binding.
pub fn router(config: &Config, services: Services) -> Router {
    let state = AppState {
        config: Arc::new(config.clone()),
        services,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(handle_root))
        .route("/health", get(handle_health))
        .route("/api/admin-query", post(handle_admin_query))
        .route("/api/ask", post(handle_ask))
        .layer(cors)
        .with_state(state)
}

// ============ Error response ============

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    error: String,
    code: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    generated_query: Option<String>,
}

/// Pipeline failure rendered as an HTTP response.
struct AppError(Rejection);

impl From<BridgeError> for AppError {
    fn from(e: BridgeError) -> Self {
        AppError(e.into())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let Rejection { error, candidate } = self.0;
        let body = ErrorBody {
            error: error.to_string(),
            code: error.code(),
            generated_query: candidate,
        };
        (error.status(), Json(body)).into_response()
    }
}

/// Pull a required non-empty string field out of a JSON body.
fn string_field<'a>(body: &'a Value, name: &str) -> Option<&'a str> {
    body.get(name)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn json_body(payload: Result<Json<Value>, JsonRejection>) -> Result<Value, AppError> {
    payload
        .map(|Json(v)| v)
        .map_err(|e| BridgeError::Input(format!("Request body must be JSON: {}", e.body_text())).into())
}

// ============ GET / and /health ============

async fn handle_root() -> Json<Value> {
    Json(serde_json::json!({ "message": "Server is running" }))
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /api/admin-query ============

async fn handle_admin_query(
    State(state): State<AppState>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Value>, AppError> {
    let body = json_body(payload)?;
    let question = string_field(&body, "question").ok_or_else(|| {
        BridgeError::Input("Question is required and must be a non-empty string".to_string())
    })?;

    let rows = state
        .services
        .bridge
        .answer(question)
        .await
        .map_err(AppError)?;

    Ok(Json(serde_json::json!({ "data": rows })))
}

// ============ POST /api/ask ============

async fn handle_ask(
    State(state): State<AppState>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Value>, AppError> {
    let body = json_body(payload)?;
    let book_title = string_field(&body, "bookTitle").unwrap_or_default();
    let question = string_field(&body, "question").unwrap_or_default();

    let answer = ask_about_book(
        state.services.books.as_ref(),
        state.services.bridge.model().as_ref(),
        book_title,
        question,
        state.config.model.max_tokens,
    )
    .await?;

    Ok(Json(serde_json::json!({ "answer": answer })))
}
