//! Schema provider for the three library collections.
//!
//! The bridge never reflects over a live store. It asks a [`SchemaProvider`]
//! for a structured [`SchemaDescriptor`] once per request and renders it into
//! the prompt with [`SchemaDescriptor::render_text`]. The same descriptor
//! validates and normalises records on `shelf import`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};

use crate::error::BridgeResult;
use crate::models::{Collection, Document};
use crate::notation::normalize_date;

/// Primitive type tag of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    String,
    Number,
    Boolean,
    Date,
}

impl FieldType {
    pub fn name(&self) -> &'static str {
        match self {
            FieldType::String => "String",
            FieldType::Number => "Number",
            FieldType::Boolean => "Boolean",
            FieldType::Date => "Date",
        }
    }
}

/// `field == value` test against a record's string field.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub field: String,
    pub equals: String,
}

impl Condition {
    pub fn new(field: &str, equals: &str) -> Self {
        Self {
            field: field.to_string(),
            equals: equals.to_string(),
        }
    }

    fn holds(&self, doc: &Document) -> bool {
        doc.get(&self.field).and_then(Value::as_str) == Some(self.equals.as_str())
    }
}

fn all_hold(conditions: &[Condition], doc: &Document) -> bool {
    conditions.iter().all(|c| c.holds(doc))
}

fn describe_conditions(conditions: &[Condition]) -> String {
    conditions
        .iter()
        .map(|c| format!("{} = {}", c.field, c.equals))
        .collect::<Vec<_>>()
        .join(" and ")
}

#[derive(Debug, Clone, PartialEq)]
pub enum Requirement {
    Optional,
    Always,
    /// Required only when every condition holds.
    When(Vec<Condition>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldDefault {
    Value(Value),
    /// Current timestamp at insertion.
    Now,
    When {
        conditions: Vec<Condition>,
        value: Value,
        otherwise: Value,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpec {
    pub name: String,
    pub field_type: FieldType,
    pub requirement: Requirement,
    pub enum_values: Vec<String>,
    pub default: Option<FieldDefault>,
    pub min: Option<f64>,
    pub unique: bool,
}

impl FieldSpec {
    pub fn new(name: &str, field_type: FieldType) -> Self {
        Self {
            name: name.to_string(),
            field_type,
            requirement: Requirement::Optional,
            enum_values: Vec::new(),
            default: None,
            min: None,
            unique: false,
        }
    }

    pub fn required(mut self) -> Self {
        self.requirement = Requirement::Always;
        self
    }

    pub fn required_when(mut self, conditions: Vec<Condition>) -> Self {
        self.requirement = Requirement::When(conditions);
        self
    }

    pub fn one_of(mut self, values: &[&str]) -> Self {
        self.enum_values = values.iter().map(|v| v.to_string()).collect();
        self
    }

    pub fn default(mut self, default: FieldDefault) -> Self {
        self.default = Some(default);
        self
    }

    pub fn min(mut self, min: f64) -> Self {
        self.min = Some(min);
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    fn describe(&self) -> Value {
        let mut out = Map::new();
        out.insert("type".into(), json!(self.field_type.name()));
        match &self.requirement {
            Requirement::Optional => {}
            Requirement::Always => {
                out.insert("required".into(), json!(true));
            }
            Requirement::When(conds) => {
                out.insert(
                    "required".into(),
                    json!(format!("when {}", describe_conditions(conds))),
                );
            }
        }
        if self.unique {
            out.insert("unique".into(), json!(true));
        }
        if !self.enum_values.is_empty() {
            out.insert("enum".into(), json!(self.enum_values));
        }
        if let Some(min) = self.min {
            out.insert("min".into(), json!(min));
        }
        match &self.default {
            None => {}
            Some(FieldDefault::Value(v)) => {
                out.insert("default".into(), v.clone());
            }
            Some(FieldDefault::Now) => {
                out.insert("default".into(), json!("now"));
            }
            Some(FieldDefault::When {
                conditions,
                value,
                otherwise,
            }) => {
                out.insert(
                    "default".into(),
                    json!(format!(
                        "{} when {}, otherwise {}",
                        value,
                        describe_conditions(conditions),
                        otherwise
                    )),
                );
            }
        }
        Value::Object(out)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CollectionSchema {
    pub collection: Collection,
    pub fields: Vec<FieldSpec>,
    /// Adds `createdAt` / `updatedAt` Date fields.
    pub timestamps: bool,
}

impl CollectionSchema {
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Apply defaults, coerce dates and check every field rule.
    ///
    /// Unknown fields are dropped. Returns every violation found, not only
    /// the first.
    pub fn normalize_record(
        &self,
        record: &Document,
        now: DateTime<Utc>,
    ) -> Result<Document, Vec<String>> {
        let now_date = json!({ "$date": now.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string() });
        let mut out = Document::new();
        let mut problems = Vec::new();

        if let Some(id) = record.get("_id") {
            out.insert("_id".into(), id.clone());
        }

        for spec in &self.fields {
            match record.get(&spec.name) {
                Some(v) if !v.is_null() => {
                    out.insert(spec.name.clone(), v.clone());
                }
                _ => {}
            }
        }

        // Defaults may depend on other fields, so they run after the copy.
        for spec in &self.fields {
            if out.contains_key(&spec.name) {
                continue;
            }
            let value = match &spec.default {
                None => continue,
                Some(FieldDefault::Value(v)) => v.clone(),
                Some(FieldDefault::Now) => now_date.clone(),
                Some(FieldDefault::When {
                    conditions,
                    value,
                    otherwise,
                }) => {
                    if all_hold(conditions, &out) {
                        value.clone()
                    } else {
                        otherwise.clone()
                    }
                }
            };
            out.insert(spec.name.clone(), value);
        }

        for spec in &self.fields {
            let present = out.get(&spec.name).is_some_and(|v| !v.is_null());
            let required = match &spec.requirement {
                Requirement::Optional => false,
                Requirement::Always => true,
                Requirement::When(conds) => all_hold(conds, &out),
            };
            if required && !present {
                problems.push(format!("{}: `{}` is required", self.collection, spec.name));
                continue;
            }
            if !present {
                continue;
            }
            if let Err(msg) = check_field(spec, &mut out) {
                problems.push(format!("{}: {}", self.collection, msg));
            }
        }

        if self.timestamps {
            for key in ["createdAt", "updatedAt"] {
                let value = match record.get(key).and_then(Value::as_str) {
                    Some(s) => match normalize_date(s) {
                        Some(d) => json!({ "$date": d }),
                        None => {
                            problems.push(format!(
                                "{}: `{}` is not a valid date: {}",
                                self.collection, key, s
                            ));
                            continue;
                        }
                    },
                    None => now_date.clone(),
                };
                out.insert(key.into(), value);
            }
        }

        if problems.is_empty() {
            Ok(out)
        } else {
            Err(problems)
        }
    }
}

fn check_field(spec: &FieldSpec, doc: &mut Document) -> Result<(), String> {
    let Some(value) = doc.get_mut(&spec.name) else {
        return Ok(());
    };
    match spec.field_type {
        FieldType::String => {
            let s = value
                .as_str()
                .ok_or_else(|| format!("`{}` must be a string", spec.name))?;
            if !spec.enum_values.is_empty() && !spec.enum_values.iter().any(|e| e == s) {
                return Err(format!(
                    "`{}` must be one of {}, got {:?}",
                    spec.name,
                    spec.enum_values.join("/"),
                    s
                ));
            }
        }
        FieldType::Number => {
            let n = value
                .as_f64()
                .ok_or_else(|| format!("`{}` must be a number", spec.name))?;
            if let Some(min) = spec.min {
                if n < min {
                    return Err(format!("`{}` cannot be less than {}", spec.name, min));
                }
            }
        }
        FieldType::Boolean => {
            if !value.is_boolean() {
                return Err(format!("`{}` must be a boolean", spec.name));
            }
        }
        FieldType::Date => {
            let raw = match value {
                Value::String(s) => s.clone(),
                Value::Object(o) => match o.get("$date").and_then(Value::as_str) {
                    Some(s) => s.to_string(),
                    None => return Err(format!("`{}` must be a date", spec.name)),
                },
                _ => return Err(format!("`{}` must be a date", spec.name)),
            };
            let normalized = normalize_date(&raw)
                .ok_or_else(|| format!("`{}` is not a valid date: {}", spec.name, raw))?;
            *value = json!({ "$date": normalized });
        }
    }
    Ok(())
}

/// Field definitions for all three collections.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaDescriptor {
    pub collections: Vec<CollectionSchema>,
}

impl SchemaDescriptor {
    pub fn collection(&self, collection: Collection) -> Option<&CollectionSchema> {
        self.collections.iter().find(|c| c.collection == collection)
    }

    /// Pretty JSON text of every collection's fields, as embedded in prompts.
    pub fn render_text(&self) -> String {
        let mut root = Map::new();
        for schema in &self.collections {
            let mut fields = Map::new();
            for spec in &schema.fields {
                fields.insert(spec.name.clone(), spec.describe());
            }
            if schema.timestamps {
                fields.insert("createdAt".into(), json!({ "type": "Date" }));
                fields.insert("updatedAt".into(), json!({ "type": "Date" }));
            }
            root.insert(schema.collection.as_str().into(), Value::Object(fields));
        }
        serde_json::to_string_pretty(&Value::Object(root)).unwrap_or_default()
    }
}

/// Capability that supplies collection schemas to the bridge.
#[async_trait]
pub trait SchemaProvider: Send + Sync {
    async fn describe(&self) -> BridgeResult<SchemaDescriptor>;
}

/// Built-in schemas of the library backend's three collections.
#[derive(Debug, Clone, Copy, Default)]
pub struct LibrarySchema;

impl LibrarySchema {
    pub fn descriptor() -> SchemaDescriptor {
        let issued_student = || {
            vec![
                Condition::new("status", "Issued"),
                Condition::new("role", "Student"),
            ]
        };

        let users = CollectionSchema {
            collection: Collection::Users,
            timestamps: true,
            fields: vec![
                FieldSpec::new("name", FieldType::String).required(),
                FieldSpec::new("email", FieldType::String).required().unique(),
                FieldSpec::new("role", FieldType::String)
                    .required()
                    .one_of(&["Admin", "Student", "Faculty"]),
                FieldSpec::new("rollNumber", FieldType::String)
                    .required_when(vec![Condition::new("role", "Student")]),
                FieldSpec::new("password", FieldType::String).required(),
                FieldSpec::new("verificationOtp", FieldType::String),
                FieldSpec::new("otpExpires", FieldType::Date),
                FieldSpec::new("isVerified", FieldType::Boolean)
                    .default(FieldDefault::Value(json!(false))),
                FieldSpec::new("booksCanRequest", FieldType::Number)
                    .min(0.0)
                    .default(FieldDefault::When {
                        conditions: vec![Condition::new("role", "Student")],
                        value: json!(3),
                        otherwise: Value::Null,
                    }),
            ],
        };

        let issue_requests = CollectionSchema {
            collection: Collection::IssueRequests,
            timestamps: true,
            fields: vec![
                FieldSpec::new("bookId", FieldType::String).required(),
                FieldSpec::new("title", FieldType::String).required(),
                FieldSpec::new("email", FieldType::String).required(),
                FieldSpec::new("role", FieldType::String)
                    .required()
                    .one_of(&["Student", "Faculty"]),
                FieldSpec::new("status", FieldType::String)
                    .one_of(&["Pending", "Issued", "Rejected", "Returned"])
                    .default(FieldDefault::Value(json!("Pending"))),
                FieldSpec::new("requestedAt", FieldType::Date).default(FieldDefault::Now),
                FieldSpec::new("returnDate", FieldType::Date).required_when(issued_student()),
                FieldSpec::new("finePerDay", FieldType::Number)
                    .min(0.0)
                    .required_when(issued_student()),
                FieldSpec::new("reasonForRejection", FieldType::String)
                    .required_when(vec![Condition::new("status", "Rejected")]),
            ],
        };

        let favorites = CollectionSchema {
            collection: Collection::Favorites,
            timestamps: true,
            fields: vec![
                FieldSpec::new("bookId", FieldType::String).required(),
                FieldSpec::new("title", FieldType::String).required(),
                FieldSpec::new("email", FieldType::String).required(),
                FieldSpec::new("role", FieldType::String)
                    .required()
                    .one_of(&["Student", "Faculty", "Admin"]),
            ],
        };

        SchemaDescriptor {
            collections: vec![users, issue_requests, favorites],
        }
    }
}

#[async_trait]
impl SchemaProvider for LibrarySchema {
    async fn describe(&self) -> BridgeResult<SchemaDescriptor> {
        Ok(Self::descriptor())
    }
}
