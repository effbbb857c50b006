//! Core data models used throughout Shelfwise.
//!
//! These types represent the collections, parsed queries, and result
//! documents that flow through the admin query pipeline.

use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// A record document. Key order is preserved (`serde_json/preserve_order`),
/// which `$sort` and `$project` rely on.
pub type Document = serde_json::Map<String, serde_json::Value>;

/// The three record collections the bridge is allowed to touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Collection {
    #[serde(rename = "users")]
    Users,
    #[serde(rename = "issueRequests")]
    IssueRequests,
    #[serde(rename = "favorites")]
    Favorites,
}

impl Collection {
    pub const ALL: [Collection; 3] = [
        Collection::Users,
        Collection::IssueRequests,
        Collection::Favorites,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Users => "users",
            Collection::IssueRequests => "issueRequests",
            Collection::Favorites => "favorites",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Collection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Collection::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| format!("unknown collection: {}", s))
    }
}

/// The two call shapes a candidate query may take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryShape {
    Find,
    Aggregate,
}

impl QueryShape {
    pub fn method(&self) -> &'static str {
        match self {
            QueryShape::Find => "find",
            QueryShape::Aggregate => "aggregate",
        }
    }
}

/// A candidate query that has been split, decoded and validated.
///
/// Only this type ever reaches a [`QueryExecutor`](crate::executor::QueryExecutor).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ParsedQuery {
    Find {
        collection: Collection,
        filter: Document,
        /// Field name to `1`, plus an optional `_id: 0`.
        projection: Document,
    },
    Aggregate {
        collection: Collection,
        pipeline: Vec<Document>,
    },
}

impl ParsedQuery {
    pub fn collection(&self) -> Collection {
        match self {
            ParsedQuery::Find { collection, .. } | ParsedQuery::Aggregate { collection, .. } => {
                *collection
            }
        }
    }

    pub fn shape(&self) -> QueryShape {
        match self {
            ParsedQuery::Find { .. } => QueryShape::Find,
            ParsedQuery::Aggregate { .. } => QueryShape::Aggregate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collection_names_roundtrip() {
        for c in Collection::ALL {
            assert_eq!(c.as_str().parse::<Collection>().unwrap(), c);
        }
        assert!("books".parse::<Collection>().is_err());
        assert!("Users".parse::<Collection>().is_err());
    }

    #[test]
    fn test_parsed_query_serializes_with_kind_tag() {
        let q = ParsedQuery::Aggregate {
            collection: Collection::IssueRequests,
            pipeline: vec![],
        };
        let v = serde_json::to_value(&q).unwrap();
        assert_eq!(v["kind"], "aggregate");
        assert_eq!(v["collection"], "issueRequests");
    }
}
