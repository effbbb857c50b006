//! # Shelfwise
//!
//! Natural-language admin queries for a library-management backend.
//!
//! An administrator asks a question in plain English; a language model
//! drafts a `db.<collection>.find(...)` or `db.<collection>.aggregate(...)`
//! query; Shelfwise treats that draft as untrusted text, parses and
//! validates it against a strict grammar, and only then runs it against the
//! library's `users`, `issueRequests` and `favorites` records.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌───────────┐   ┌──────────┐   ┌──────────┐
//! │ Question │──▶│ Relevance │──▶│  Prompt  │──▶│  Model   │
//! └──────────┘   └───────────┘   └──────────┘   └────┬─────┘
//!                                                    ▼
//! ┌──────────┐   ┌───────────┐   ┌──────────┐   ┌──────────┐
//! │   Rows   │◀──│ Executor  │◀──│ Validate │◀──│ Sanitize │
//! └──────────┘   └───────────┘   └──────────┘   └──────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Error taxonomy, codes and HTTP statuses |
//! | [`models`] | Collections and the validated query AST |
//! | [`schema`] | Schema provider and record normalisation |
//! | [`relevance`] | Keyword collection classifier |
//! | [`prompt`] | Prompt synthesis |
//! | [`model`] | Chat-completion client with retry |
//! | [`sanitize`] | Completion cleanup |
//! | [`notation`] | Shell-notation document decoder |
//! | [`query`] | Candidate classification, splitting and decoding |
//! | [`validate`] | Projection and pipeline safety rules |
//! | [`engine`] | In-process document query engine |
//! | [`executor`] | Query executors (SQLite, memory) |
//! | [`bridge`] | End-to-end admin query pipeline |
//! | [`books`] | Book questions with Open Library context |
//! | [`server`] | HTTP server |
//! | [`store`] | Seed import and record loading |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`cli`] | Command runners for the `shelf` binary |

pub mod books;
pub mod bridge;
pub mod cli;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod executor;
pub mod migrate;
pub mod model;
pub mod models;
pub mod notation;
pub mod prompt;
pub mod query;
pub mod relevance;
pub mod sanitize;
pub mod schema;
pub mod server;
pub mod store;
pub mod validate;
