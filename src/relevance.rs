//! Keyword-based collection relevance classifier.
//!
//! A blunt heuristic: a collection is referenced when any of its keywords
//! occurs as a substring of the lower-cased question. False positives
//! ("username" matches `name`) are accepted behaviour.

use serde::Serialize;
use std::collections::BTreeSet;

use crate::models::Collection;

/// Keyword table, one entry per collection.
pub const COLLECTION_KEYWORDS: [(Collection, &[&str]); 3] = [
    (
        Collection::Users,
        &[
            "user",
            "users",
            "student",
            "students",
            "faculty",
            "admin",
            "name",
            "email",
            "rollnumber",
            "roll number",
            "role",
            "password",
            "verified",
        ],
    ),
    (
        Collection::IssueRequests,
        &[
            "issuerequest",
            "issuerequests",
            "issue",
            "request",
            "requests",
            "book",
            "title",
            "status",
            "pending",
            "issued",
            "rejected",
            "returned",
            "return date",
            "fine",
            "fineperday",
            "rejection",
            "reason",
            "requested",
        ],
    ),
    (
        Collection::Favorites,
        &[
            "favorite",
            "favorites",
            "favourite",
            "favourites",
            "liked",
            "saved",
        ],
    ),
];

/// Collections a question refers to.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct Relevance {
    pub collections: BTreeSet<Collection>,
}

impl Relevance {
    pub fn is_multi_collection(&self) -> bool {
        self.collections.len() > 1
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.collections.iter().map(Collection::as_str).collect()
    }
}

/// Classify a question against [`COLLECTION_KEYWORDS`].
pub fn classify(question: &str) -> Relevance {
    let lower = question.to_lowercase();
    let collections = COLLECTION_KEYWORDS
        .iter()
        .filter(|(_, keywords)| keywords.iter().any(|k| lower.contains(k)))
        .map(|(c, _)| *c)
        .collect();
    Relevance { collections }
}
