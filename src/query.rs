//! Candidate query classification, splitting and decoding.
//!
//! Turns one sanitized candidate line into a [`ParsedQuery`]:
//!
//! ```text
//! candidate ──classify──▶ (collection, shape)
//!    find:      split at the depth-zero comma ─▶ decode filter ─▶ decode projection ─▶ validate
//!    aggregate: decode pipeline array ─▶ check stage shape ─▶ validate
//! ```
//!
//! Nothing in the candidate is evaluated; the text only ever flows through
//! [`notation`](crate::notation) and the projection reader below.

use serde_json::Value;

use crate::error::{BridgeError, BridgeResult};
use crate::models::{Collection, Document, ParsedQuery, QueryShape};
use crate::notation::{decode_array, decode_document};
use crate::validate::{validate_find_projection, validate_pipeline};

fn call_prefix(collection: Collection, shape: QueryShape) -> String {
    format!("db.{}.{}(", collection.as_str(), shape.method())
}

/// Identify the collection and call shape from the candidate's prefix.
pub fn classify(candidate: &str) -> BridgeResult<(Collection, QueryShape)> {
    for collection in Collection::ALL {
        for shape in [QueryShape::Find, QueryShape::Aggregate] {
            if candidate.starts_with(&call_prefix(collection, shape)) {
                return Ok((collection, shape));
            }
        }
    }
    Err(BridgeError::Parse(
        "Query must be a find() or aggregate() query on users, issueRequests, or favorites collections."
            .to_string(),
    ))
}

/// Text between the call's opening parenthesis and the last `)`.
fn call_arguments(candidate: &str, collection: Collection, shape: QueryShape) -> BridgeResult<&str> {
    let start = call_prefix(collection, shape).len();
    match candidate.rfind(')') {
        Some(end) if end >= start => Ok(candidate[start..end].trim()),
        _ => Err(BridgeError::Parse(format!(
            "Invalid {} query: missing closing parenthesis",
            shape.method()
        ))),
    }
}

/// Tracks `{}`/`[]` nesting, quoted strings and `/regex/` literals during a
/// single scan.
#[derive(Default)]
struct Scanner {
    braces: i64,
    brackets: i64,
    quote: Option<char>,
    escaped: bool,
    /// Last non-whitespace character seen outside any literal.
    last: Option<char>,
}

impl Scanner {
    /// Feed one character; returns true when it sits outside any literal.
    fn feed(&mut self, ch: char) -> bool {
        if let Some(q) = self.quote {
            if self.escaped {
                self.escaped = false;
            } else if ch == '\\' {
                self.escaped = true;
            } else if ch == q {
                self.quote = None;
                self.last = Some(ch);
            }
            return false;
        }
        match ch {
            '"' | '\'' => {
                self.quote = Some(ch);
                return false;
            }
            // A slash only opens a regex where a value can start.
            '/' if matches!(self.last, None | Some(':' | ',' | '[')) => {
                self.quote = Some('/');
                return false;
            }
            '{' => self.braces += 1,
            '}' => self.braces -= 1,
            '[' => self.brackets += 1,
            ']' => self.brackets -= 1,
            _ => {}
        }
        if !ch.is_whitespace() {
            self.last = Some(ch);
        }
        true
    }
}

/// Split `find` arguments into `(filter, projection)` at the first comma
/// whose preceding `{` count minus `}` count is zero.
///
/// Braces inside quoted strings and regex literals do not count.
pub fn split_find_arguments(args: &str) -> BridgeResult<(&str, &str)> {
    let mut scanner = Scanner::default();
    for (i, ch) in args.char_indices() {
        if scanner.feed(ch) && ch == ',' && scanner.braces == 0 {
            return Ok((args[..i].trim(), args[i + 1..].trim()));
        }
    }
    Err(BridgeError::Parse(format!(
        "Invalid find query: cannot separate filter from projection in `{}`",
        args
    )))
}

/// Split on commas outside any braces, brackets or strings.
fn split_top_level(text: &str) -> Vec<&str> {
    let mut scanner = Scanner::default();
    let mut parts = Vec::new();
    let mut start = 0;
    for (i, ch) in text.char_indices() {
        if scanner.feed(ch) && ch == ',' && scanner.braces == 0 && scanner.brackets == 0 {
            parts.push(&text[start..i]);
            start = i + 1;
        }
    }
    parts.push(&text[start..]);
    parts
}

fn unquote(key: &str) -> &str {
    for q in ['"', '\''] {
        if let Some(inner) = key.strip_prefix(q).and_then(|k| k.strip_suffix(q)) {
            return inner;
        }
    }
    key
}

/// Read a `find` projection: `{key: int, ...}`.
///
/// Values must be integer literals. Their meaning (1 / `_id: 0`) is checked
/// by [`validate_find_projection`].
pub fn decode_projection(text: &str) -> BridgeResult<Document> {
    let inner = text
        .trim()
        .strip_prefix('{')
        .and_then(|t| t.strip_suffix('}'))
        .ok_or_else(|| {
            BridgeError::Parse(format!("Projection must be a document, found `{}`", text))
        })?;

    let mut projection = Document::new();
    for entry in split_top_level(inner) {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        let (key, value) = entry.split_once(':').ok_or_else(|| {
            BridgeError::Parse(format!("Projection entry `{}` is not `field: value`", entry))
        })?;
        let key = unquote(key.trim());
        let value = value.trim();
        let n: i64 = value.parse().map_err(|_| {
            BridgeError::Parse(format!(
                "Projection value for `{}` must be an integer, found `{}`",
                key, value
            ))
        })?;
        projection.insert(key.to_string(), Value::Number(n.into()));
    }
    Ok(projection)
}

fn stage_document(index: usize, stage: Value) -> BridgeResult<Document> {
    let bad_stage = || {
        BridgeError::Parse(format!(
            "Failed to parse aggregation pipeline: stage {} must be a single-key document starting with a $ operator",
            index + 1
        ))
    };
    let Value::Object(doc) = stage else {
        return Err(bad_stage());
    };
    if doc.len() != 1 || !doc.keys().all(|k| k.starts_with('$')) {
        return Err(bad_stage());
    }
    Ok(doc)
}

/// Classify, split, decode and validate a sanitized candidate.
///
/// A `find` under a multi-collection question is rejected before any of
/// its arguments are read.
pub fn parse_candidate(candidate: &str, is_multi_collection: bool) -> BridgeResult<ParsedQuery> {
    let (collection, shape) = classify(candidate)?;

    match shape {
        QueryShape::Find => {
            if is_multi_collection {
                return Err(BridgeError::Validation(
                    "Query involves multiple collections and requires an aggregation pipeline, not a find query"
                        .to_string(),
                ));
            }
            let args = call_arguments(candidate, collection, shape)?;
            let (filter_text, projection_text) = split_find_arguments(args)?;

            let filter = decode_document(filter_text).map_err(|e| {
                BridgeError::Parse(format!("Failed to parse filter `{}`: {}", filter_text, e))
            })?;
            let projection = decode_projection(projection_text)?;
            validate_find_projection(&projection)?;

            Ok(ParsedQuery::Find {
                collection,
                filter,
                projection,
            })
        }
        QueryShape::Aggregate => {
            let args = call_arguments(candidate, collection, shape)?;
            let stages = decode_array(args).map_err(|e| {
                BridgeError::Parse(format!("Failed to parse aggregation pipeline: {}", e))
            })?;
            let pipeline = stages
                .into_iter()
                .enumerate()
                .map(|(i, stage)| stage_document(i, stage))
                .collect::<BridgeResult<Vec<_>>>()?;
            validate_pipeline(&pipeline)?;

            Ok(ParsedQuery::Aggregate {
                collection,
                pipeline,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_classify_all_prefixes() {
        for c in Collection::ALL {
            let find = format!("db.{}.find({{}}, {{a: 1}})", c);
            assert_eq!(classify(&find).unwrap(), (c, QueryShape::Find));
            let agg = format!("db.{}.aggregate([])", c);
            assert_eq!(classify(&agg).unwrap(), (c, QueryShape::Aggregate));
        }
    }

    #[test]
    fn test_classify_rejects_other_shapes() {
        for bad in [
            "db.books.find({}, {a: 1})",
            "db.users.deleteMany({})",
            "db.users.findOne({}, {a: 1})",
            "db.getCollection('users').find({})",
            "SELECT * FROM users",
            "",
        ] {
            let err = classify(bad).unwrap_err();
            assert_eq!(err.code(), "parse_error", "{}", bad);
        }
    }

    #[test]
    fn test_split_picks_depth_zero_comma() {
        let (f, p) = split_find_arguments("{a: {$in: [1, 2]}, b: {c: 1}}, {a: 1, b: 1}").unwrap();
        assert_eq!(f, "{a: {$in: [1, 2]}, b: {c: 1}}");
        assert_eq!(p, "{a: 1, b: 1}");
    }

    #[test]
    fn test_split_without_zero_depth_comma_fails() {
        let err = split_find_arguments("{role:\"Student\", {}").unwrap_err();
        assert_eq!(err.code(), "parse_error");
        assert!(err.to_string().contains("cannot separate filter from projection"));
        assert!(split_find_arguments("{a: 1}").is_err());
    }

    #[test]
    fn test_split_ignores_braces_in_strings() {
        let (f, p) = split_find_arguments(r#"{title: "a}b, c"}, {title: 1}"#).unwrap();
        assert_eq!(f, r#"{title: "a}b, c"}"#);
        assert_eq!(p, "{title: 1}");
    }

    #[test]
    fn test_split_skips_regex_literals() {
        let (f, p) = split_find_arguments("{name: /O'Brien, J/i, email: /x}/}, {name: 1}").unwrap();
        assert_eq!(f, "{name: /O'Brien, J/i, email: /x}/}");
        assert_eq!(p, "{name: 1}");

        let (f, _) = split_find_arguments(r"{title: {$in: [/a\/b'/, 'c']}}, {title: 1}").unwrap();
        assert_eq!(f, r"{title: {$in: [/a\/b'/, 'c']}}");
    }

    #[test]
    fn test_find_with_apostrophe_regex() {
        let q = parse_candidate("db.users.find({name: /O'Brien/i}, {name: 1})", false).unwrap();
        match q {
            ParsedQuery::Find { filter, .. } => {
                assert_eq!(filter["name"], json!({"$regex": "O'Brien", "$options": "i"}));
            }
            other => panic!("expected find, got {:?}", other),
        }
    }

    #[test]
    fn test_deeply_nested_pipeline_is_parse_error() {
        let candidate = format!(
            "db.users.aggregate({}{})",
            "[".repeat(3000),
            "]".repeat(3000)
        );
        let err = parse_candidate(&candidate, true).unwrap_err();
        assert_eq!(err.code(), "parse_error");
        assert!(err.to_string().contains("nesting too deep"));

        let filter = format!("{}1{}", "{a: ".repeat(3000), "}".repeat(3000));
        let err = parse_candidate(&format!("db.users.find({}, {{a: 1}})", filter), false)
            .unwrap_err();
        assert_eq!(err.code(), "parse_error");
    }

    #[test]
    fn test_decode_projection() {
        let p = decode_projection("{ name: 1, 'email': 1, \"_id\": 0, }").unwrap();
        assert_eq!(p, json!({"name": 1, "email": 1, "_id": 0}).as_object().unwrap().clone());
    }

    #[test]
    fn test_decode_projection_errors() {
        assert!(decode_projection("name: 1").is_err());
        assert!(decode_projection("{name}").is_err());
        let err = decode_projection("{name: true}").unwrap_err();
        assert!(err.to_string().contains("must be an integer"));
    }

    #[test]
    fn test_parse_find() {
        let q = parse_candidate(
            r#"db.users.find({role:"Student",booksCanRequest:0},{name:1,email:1,rollNumber:1,booksCanRequest:1})"#,
            false,
        )
        .unwrap();
        match q {
            ParsedQuery::Find {
                collection,
                filter,
                projection,
            } => {
                assert_eq!(collection, Collection::Users);
                assert_eq!(filter["role"], "Student");
                assert_eq!(filter["booksCanRequest"], 0);
                assert_eq!(projection.len(), 4);
            }
            other => panic!("expected find, got {:?}", other),
        }
    }

    #[test]
    fn test_find_under_multi_rejected_before_decoding() {
        // The arguments are garbage; rejection must still be a validation error.
        let err = parse_candidate("db.users.find({{{", true).unwrap_err();
        assert_eq!(err.code(), "validation_error");
        assert!(err.to_string().contains("aggregation pipeline"));
    }

    #[test]
    fn test_find_excluding_field_fails_validation() {
        let err = parse_candidate(r#"db.users.find({role:"Student"},{password:0,name:1})"#, false)
            .unwrap_err();
        assert_eq!(err.code(), "validation_error");
    }

    #[test]
    fn test_find_unbalanced_braces_is_parse_error() {
        let err = parse_candidate(r#"db.users.find({role:"Student", {})"#, false).unwrap_err();
        assert_eq!(err.code(), "parse_error");
    }

    #[test]
    fn test_find_bad_filter_reports_fragment() {
        let err = parse_candidate("db.users.find({role: Student}, {name: 1})", false).unwrap_err();
        assert_eq!(err.code(), "parse_error");
        assert!(err.to_string().contains("{role: Student}"));
    }

    #[test]
    fn test_missing_closing_paren() {
        let err = parse_candidate("db.users.find(", false).unwrap_err();
        assert_eq!(err.code(), "parse_error");
    }

    #[test]
    fn test_parse_aggregate() {
        let q = parse_candidate(
            r#"db.issueRequests.aggregate([{$match: {status: "Pending"}}, {$lookup: {from: "users", localField: "email", foreignField: "email", as: "user"}}, {$unwind: "$user"}, {$project: {_id: 0, title: 1, name: "$user.name"}}])"#,
            true,
        )
        .unwrap();
        assert_eq!(q.collection(), Collection::IssueRequests);
        match q {
            ParsedQuery::Aggregate { pipeline, .. } => assert_eq!(pipeline.len(), 4),
            other => panic!("expected aggregate, got {:?}", other),
        }
    }

    #[test]
    fn test_aggregate_stage_shape() {
        for bad in [
            "db.users.aggregate([{match: {}}])",
            "db.users.aggregate([{$match: {}, $limit: 1}])",
            "db.users.aggregate([1])",
            "db.users.aggregate([{}])",
        ] {
            let err = parse_candidate(bad, true).unwrap_err();
            assert_eq!(err.code(), "parse_error", "{}", bad);
        }
    }

    #[test]
    fn test_aggregate_requires_array() {
        let err = parse_candidate("db.users.aggregate({$match: {}})", true).unwrap_err();
        assert_eq!(err.code(), "parse_error");
    }

    #[test]
    fn test_aggregate_all_zero_project_fails() {
        let err = parse_candidate("db.users.aggregate([{$project: {_id: 0}}])", true).unwrap_err();
        assert_eq!(err.code(), "validation_error");
        let err = parse_candidate("db.users.aggregate([{$project: {}}])", true).unwrap_err();
        assert_eq!(err.code(), "validation_error");
    }

    #[test]
    fn test_aggregate_allowed_single_collection() {
        // aggregate is not forbidden for single-collection questions.
        parse_candidate("db.favorites.aggregate([{$count: 'total'}])", false).unwrap();
    }

    fn field_name() -> impl Strategy<Value = String> {
        "[a-zA-Z_$][a-zA-Z0-9_.]{0,8}"
    }

    /// Documents with arbitrary string contents, rendered as JSON text.
    fn document_text() -> impl Strategy<Value = String> {
        let leaf = prop_oneof![
            any::<i64>().prop_map(Value::from),
            any::<bool>().prop_map(Value::from),
            ".*".prop_map(Value::from),
        ];
        let value = leaf.prop_recursive(4, 24, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(Value::from),
                prop::collection::btree_map(field_name(), inner, 0..4)
                    .prop_map(|m| Value::Object(m.into_iter().collect())),
            ]
        });
        prop::collection::btree_map(field_name(), value, 0..5)
            .prop_map(|m| Value::Object(m.into_iter().collect::<Document>()).to_string())
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(256))]

        #[test]
        fn split_returns_both_documents(filter in document_text(), projection in document_text()) {
            let args = format!("{}, {}", filter, projection);
            let (f, p) = split_find_arguments(&args).unwrap();
            prop_assert_eq!(f, filter.as_str());
            prop_assert_eq!(p, projection.as_str());
        }

        #[test]
        fn split_survives_regex_values(
            pattern in "[^/\\\\]{0,12}",
            flags in "[imsx]{0,3}",
        ) {
            let filter = format!("{{name: /{}/{}}}", pattern, flags);
            let args = format!("{}, {{name: 1}}", filter);
            let (f, p) = split_find_arguments(&args).unwrap();
            prop_assert_eq!(f, filter.as_str());
            prop_assert_eq!(p, "{name: 1}");
        }
    }
}
