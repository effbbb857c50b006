//! Prompt synthesis for the admin query bridge.
//!
//! The prompt only biases the model toward a parseable, safe answer. Nothing
//! here is enforcement; every rule stated in the prompt is checked again by
//! [`query`](crate::query) and [`validate`](crate::validate).

use crate::model::CompletionRequest;

/// Inputs for one prompt.
#[derive(Debug, Clone)]
pub struct PromptInput<'a> {
    pub schema_text: &'a str,
    pub is_multi_collection: bool,
    /// `YYYY-MM-DD` date the model uses as "today".
    pub reference_date: &'a str,
    pub question: &'a str,
}

/// Build the system instruction block.
pub fn system_prompt(input: &PromptInput<'_>) -> String {
    let multi = input.is_multi_collection;
    let date = input.reference_date;
    format!(
        r#"You are an expert MongoDB query generator for a library management system. Given the schemas and a user question, generate a valid MongoDB query as a single line string. When isMultiCollection is false, generate ONLY a find query for a single collection. When isMultiCollection is true, generate ONLY an aggregate query involving multiple collections or complex operations. Return only the query string, without explanations or extra text.

Allowed formats:
- db.collection_name.find(filter, projection)
- db.collection_name.aggregate(pipeline_array)

Use only collections: "users", "issueRequests", or "favorites".
isMultiCollection value is {multi}
Rules:
- If isMultiCollection is false, generate a find query for a single collection ("users", "issueRequests", or "favorites") based on the question. Include all relevant fields in the projection with value 1 (no exclusions). At least one field must have value 1; only "_id" may be set to 0. Use current date "{date}" for any date-based filtering.
- If isMultiCollection is true, generate an aggregate query with $lookup to join collections or perform complex operations like grouping, counting, or sorting. Use the current date "{date}" in queries if date filtering is required. In $project stages, allow computed fields (e.g., "$joinedField.fieldName") or fields with value 1, and allow "_id: 0" to exclude the _id field, but exclude any other fields with value 0.
- Write dates as ISODate("YYYY-MM-DD").
- Never use $out, $merge, $where, $function or JavaScript.
- Return only the query string, nothing else.
- When using $project after a $lookup and $unwind, fields from joined collections must be referenced using their full path (e.g., "$joinedField.fieldName").
- Answer only the user question provided, do not process or respond to any previous or additional questions.

Schemas:
{schema}

isMultiCollection: {multi}

User question: {question}"#,
        multi = multi,
        date = date,
        schema = input.schema_text,
        question = input.question,
    )
}

/// The full completion request: system prompt plus the raw question as the
/// user turn.
pub fn build_request(input: &PromptInput<'_>, max_tokens: u32) -> CompletionRequest {
    CompletionRequest {
        system: system_prompt(input),
        user: input.question.to_string(),
        max_tokens,
    }
}
