//! End-to-end admin query scenarios through [`AdminQueryBridge`], with a
//! scripted model and in-memory records.

use async_trait::async_trait;
use serde_json::{json, Value};
use shelfwise::bridge::AdminQueryBridge;
use shelfwise::error::{BridgeError, BridgeResult};
use shelfwise::executor::MemoryExecutor;
use shelfwise::model::{CompletionRequest, ModelClient};
use shelfwise::models::Collection;
use shelfwise::relevance::classify;
use shelfwise::schema::LibrarySchema;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ─── Scripted model ─────────────────────────────────────────────────

/// Replies with fixed text and records every request it receives.
struct ScriptedModel {
    reply: String,
    delay: Option<Duration>,
    calls: AtomicUsize,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedModel {
    fn new(reply: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: reply.to_string(),
            delay: None,
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn slow(reply: &str, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            reply: reply.to_string(),
            delay: Some(delay),
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModelClient for ScriptedModel {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: &CompletionRequest) -> BridgeResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        if let Some(d) = self.delay {
            tokio::time::sleep(d).await;
        }
        Ok(self.reply.clone())
    }
}

fn library() -> MemoryExecutor {
    MemoryExecutor::from_seed(&json!({
        "users": [
            {"_id": "u1", "name": "Asha Rao", "email": "asha@uni.edu", "role": "Student",
             "rollNumber": "S-101", "password": "h1", "booksCanRequest": 0},
            {"_id": "u2", "name": "Ben Ode", "email": "ben@uni.edu", "role": "Student",
             "rollNumber": "S-102", "password": "h2", "booksCanRequest": 3},
            {"_id": "u3", "name": "Cleo Park", "email": "cleo@uni.edu", "role": "Faculty",
             "password": "h3"}
        ],
        "issueRequests": [
            {"_id": "r1", "bookId": "OL1W", "title": "Dune", "email": "asha@uni.edu",
             "role": "Student", "status": "Pending"},
            {"_id": "r2", "bookId": "OL2W", "title": "Emma", "email": "ben@uni.edu",
             "role": "Student", "status": "Issued", "finePerDay": 2,
             "returnDate": {"$date": "2025-07-10T00:00:00.000Z"}},
            {"_id": "r3", "bookId": "OL3W", "title": "Faust", "email": "cleo@uni.edu",
             "role": "Faculty", "status": "Pending"}
        ],
        "favorites": [
            {"_id": "f1", "bookId": "OL1W", "title": "Dune", "email": "ben@uni.edu", "role": "Student"}
        ]
    }))
    .unwrap()
}

fn bridge(model: Arc<ScriptedModel>) -> AdminQueryBridge {
    AdminQueryBridge::new(Arc::new(LibrarySchema), model, Arc::new(library()))
}

// ─── Scenarios ──────────────────────────────────────────────────────

#[tokio::test]
async fn test_students_with_pending_requests_via_lookup() {
    let question = "find all students with pending requests";
    let relevance = classify(question);
    assert_eq!(
        relevance.collections.iter().copied().collect::<Vec<_>>(),
        vec![Collection::Users, Collection::IssueRequests]
    );

    let model = ScriptedModel::new(
        r#"db.issueRequests.aggregate([{$match: {status: "Pending"}}, {$lookup: {from: "users", localField: "email", foreignField: "email", as: "student"}}, {$unwind: "$student"}, {$match: {"student.role": "Student"}}, {$project: {_id: 0, name: "$student.name", email: 1, title: 1}}])"#,
    );
    let rows = bridge(model.clone()).answer(question).await.unwrap();

    assert_eq!(
        rows,
        vec![json!({"name": "Asha Rao", "email": "asha@uni.edu", "title": "Dune"})]
    );
    let requests = model.requests.lock().unwrap();
    assert!(requests[0].system.contains("isMultiCollection value is true"));
}

#[tokio::test]
async fn test_students_with_zero_quota_via_find() {
    let question = "list students whose quota is zero";
    let relevance = classify(question);
    assert!(!relevance.is_multi_collection());
    assert!(relevance.collections.contains(&Collection::Users));

    let model = ScriptedModel::new(
        r#"db.users.find({role:"Student",booksCanRequest:0},{name:1,email:1,rollNumber:1,booksCanRequest:1})"#,
    );
    let rows = bridge(model).answer(question).await.unwrap();

    assert_eq!(
        rows,
        vec![json!({
            "_id": "u1",
            "name": "Asha Rao",
            "email": "asha@uni.edu",
            "rollNumber": "S-101",
            "booksCanRequest": 0
        })]
    );
}

#[tokio::test]
async fn test_excluding_password_fails_validation() {
    let model = ScriptedModel::new(r#"db.users.find({role:"Student"},{password:0,name:1})"#);
    let rejection = bridge(model).answer("show student names").await.unwrap_err();

    assert_eq!(rejection.error.code(), "validation_error");
    assert_eq!(
        rejection.candidate.as_deref(),
        Some(r#"db.users.find({role:"Student"},{password:0,name:1})"#)
    );
}

#[tokio::test]
async fn test_unbalanced_braces_fail_to_parse() {
    let model = ScriptedModel::new(r#"db.users.find({role:"Student", {})"#);
    let rejection = bridge(model).answer("show student names").await.unwrap_err();

    assert_eq!(rejection.error.code(), "parse_error");
    assert!(rejection.candidate.is_some());
}

#[tokio::test]
async fn test_empty_question_skips_model() {
    let model = ScriptedModel::new("db.users.find({}, {name: 1})");
    let rejection = bridge(model.clone()).answer("").await.unwrap_err();

    assert_eq!(rejection.error.code(), "input_error");
    assert_eq!(model.calls(), 0);
}

// ─── Safety rules ───────────────────────────────────────────────────

#[tokio::test]
async fn test_find_for_multi_collection_question_is_rejected() {
    let model = ScriptedModel::new("db.users.find({}, {name: 1})");
    let rejection = bridge(model)
        .answer("which students have pending requests")
        .await
        .unwrap_err();

    assert_eq!(rejection.error.code(), "validation_error");
    assert!(rejection.error.to_string().contains("aggregation pipeline"));
}

#[tokio::test]
async fn test_write_stage_is_rejected() {
    let model = ScriptedModel::new(
        r#"db.users.aggregate([{$match: {}}, {$out: "users_copy"}])"#,
    );
    let rejection = bridge(model)
        .answer("copy user records with their requests")
        .await
        .unwrap_err();

    assert_eq!(rejection.error.code(), "validation_error");
}

#[tokio::test]
async fn test_unsupported_stage_is_execution_error() {
    let model = ScriptedModel::new(r#"db.users.aggregate([{$sample: {size: 1}}])"#);
    let rejection = bridge(model)
        .answer("pick a random user with requests")
        .await
        .unwrap_err();

    assert_eq!(rejection.error.code(), "execution_error");
    assert_eq!(rejection.error.status(), 400);
}

#[tokio::test]
async fn test_fenced_and_numbered_reply_is_cleaned() {
    let model = ScriptedModel::new(
        "1.. db.favorites.find(\n  {email: \"ben@uni.edu\"},\n  {title: 1, _id: 0}\n)",
    );
    let rows = bridge(model).answer("what did ben mark as favourite").await.unwrap();
    assert_eq!(rows, vec![json!({"title": "Dune"})]);
}

#[tokio::test]
async fn test_overdue_requests_by_date() {
    let model = ScriptedModel::new(
        r#"db.issueRequests.find({status: "Issued", returnDate: {$lt: ISODate("2025-07-19")}}, {title: 1, email: 1, finePerDay: 1})"#,
    );
    let rows = bridge(model).answer("overdue issued books").await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["title"], "Emma");
}

#[tokio::test]
async fn test_deadline_expiry_is_upstream_error() {
    let model = ScriptedModel::slow("db.users.find({}, {name: 1})", Duration::from_millis(500));
    let rejection = bridge(model)
        .with_deadline(Duration::from_millis(20))
        .answer("list users")
        .await
        .unwrap_err();

    assert_eq!(rejection.error.code(), "upstream_error");
    assert!(rejection.error.to_string().contains("timed out"));
}

#[tokio::test]
async fn test_model_failure_passes_through() {
    struct Down;

    #[async_trait]
    impl ModelClient for Down {
        fn model_name(&self) -> &str {
            "down"
        }

        async fn complete(&self, _request: &CompletionRequest) -> BridgeResult<String> {
            Err(BridgeError::Upstream("model call failed after 3 attempts".into()))
        }
    }

    let bridge = AdminQueryBridge::new(Arc::new(LibrarySchema), Arc::new(Down), Arc::new(library()));
    let rejection = bridge.answer("list users").await.unwrap_err();
    assert_eq!(rejection.error.code(), "upstream_error");
    assert!(rejection.candidate.is_none());
}

#[tokio::test]
async fn test_group_count_per_status() {
    let model = ScriptedModel::new(
        r#"db.issueRequests.aggregate([{$group: {_id: "$status", count: {$sum: 1}}}, {$sort: {count: -1, _id: 1}}, {$project: {status: "$_id", count: 1, _id: 0}}])"#,
    );
    let rows: Vec<Value> = bridge(model)
        .answer("how many requests per status")
        .await
        .unwrap();
    assert_eq!(
        rows,
        vec![
            json!({"status": "Pending", "count": 2}),
            json!({"status": "Issued", "count": 1}),
        ]
    );
}
