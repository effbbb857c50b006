//! Decoder for the shell-style query notation emitted by language models.
//!
//! Model output looks like JSON but is not: keys are often bare, strings may
//! be single-quoted, arrays carry trailing commas, and dates and ids appear as
//! constructor calls. [`decode`] turns that text into a [`serde_json::Value`]
//! without evaluating anything.
//!
//! | Notation | Decoded as |
//! |----------|------------|
//! | `{role: 'Student'}` | `{"role": "Student"}` |
//! | `ISODate("2025-07-19")`, `new Date("…")` | `{"$date": "2025-07-19T00:00:00.000Z"}` |
//! | `ObjectId("…")` | `{"$oid": "…"}` |
//! | `NumberInt(3)`, `NumberLong("3")` | `3` |
//! | `/^har/i` | `{"$regex": "^har", "$options": "i"}` |

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::{json, Map, Number, Value};
use std::fmt;

use crate::models::Document;

const DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

/// Deepest value nesting [`decode`] accepts. Each document, array and
/// constructor call opens a level.
pub const MAX_DEPTH: usize = 128;

/// Normalise a date string to `YYYY-MM-DDTHH:MM:SS.mmmZ` in UTC.
///
/// Accepts RFC 3339, naive `YYYY-MM-DDTHH:MM:SS[.fff]`,
/// `YYYY-MM-DD HH:MM:SS` and bare `YYYY-MM-DD`.
pub fn normalize_date(s: &str) -> Option<String> {
    let s = s.trim();
    let dt: DateTime<Utc> = if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        dt.with_timezone(&Utc)
    } else if let Ok(ndt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S") {
        ndt.and_utc()
    } else if let Ok(ndt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
        ndt.and_utc()
    } else if let Ok(ndt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        ndt.and_utc()
    } else if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        d.and_hms_opt(0, 0, 0)?.and_utc()
    } else {
        return None;
    };
    Some(dt.format(DATE_FORMAT).to_string())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeError {
    pub message: String,
    /// Character offset into the decoded text.
    pub position: usize,
    /// A short excerpt of the input starting at `position`.
    pub near: String,
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.near.is_empty() {
            write!(f, "{} at position {} (end of input)", self.message, self.position)
        } else {
            write!(
                f,
                "{} at position {} near `{}`",
                self.message, self.position, self.near
            )
        }
    }
}

impl std::error::Error for DecodeError {}

/// Decode a single value; anything but whitespace after it is an error.
pub fn decode(text: &str) -> Result<Value, DecodeError> {
    let mut p = Decoder::new(text);
    let value = p.value()?;
    p.skip_ws();
    if !p.at_end() {
        return Err(p.error("unexpected trailing characters"));
    }
    Ok(value)
}

/// Decode text that must be an object.
pub fn decode_document(text: &str) -> Result<Document, DecodeError> {
    match decode(text)? {
        Value::Object(map) => Ok(map),
        other => Err(DecodeError {
            message: format!("expected a document, found {}", kind_of(&other)),
            position: 0,
            near: excerpt(&text.chars().collect::<Vec<_>>(), 0),
        }),
    }
}

/// Decode text that must be an array.
pub fn decode_array(text: &str) -> Result<Vec<Value>, DecodeError> {
    match decode(text)? {
        Value::Array(items) => Ok(items),
        other => Err(DecodeError {
            message: format!("expected an array, found {}", kind_of(&other)),
            position: 0,
            near: excerpt(&text.chars().collect::<Vec<_>>(), 0),
        }),
    }
}

fn kind_of(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "a document",
    }
}

fn excerpt(chars: &[char], pos: usize) -> String {
    chars.iter().skip(pos).take(24).collect()
}

struct Decoder {
    chars: Vec<char>,
    pos: usize,
    depth: usize,
}

impl Decoder {
    fn new(text: &str) -> Self {
        Self {
            chars: text.chars().collect(),
            pos: 0,
            depth: 0,
        }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.chars.len()
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        Some(c)
    }

    fn error(&self, message: impl Into<String>) -> DecodeError {
        DecodeError {
            message: message.into(),
            position: self.pos,
            near: excerpt(&self.chars, self.pos),
        }
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn expect(&mut self, want: char) -> Result<(), DecodeError> {
        self.skip_ws();
        match self.peek() {
            Some(c) if c == want => {
                self.pos += 1;
                Ok(())
            }
            Some(c) => Err(self.error(format!("expected '{}', found '{}'", want, c))),
            None => Err(self.error(format!("expected '{}'", want))),
        }
    }

    fn value(&mut self) -> Result<Value, DecodeError> {
        self.skip_ws();
        if self.depth >= MAX_DEPTH {
            return Err(self.error("nesting too deep"));
        }
        self.depth += 1;
        let value = self.scalar_or_nested();
        self.depth -= 1;
        value
    }

    fn scalar_or_nested(&mut self) -> Result<Value, DecodeError> {
        match self.peek() {
            None => Err(self.error("unexpected end of input")),
            Some('{') => self.object(),
            Some('[') => self.array(),
            Some(q @ ('"' | '\'')) => self.string(q).map(Value::String),
            Some('/') => self.regex(),
            Some(c) if c == '-' || c == '+' || c == '.' || c.is_ascii_digit() => self.number(),
            Some(c) if is_ident_start(c) => self.word(),
            Some(c) => Err(self.error(format!("unexpected character '{}'", c))),
        }
    }

    fn object(&mut self) -> Result<Value, DecodeError> {
        self.expect('{')?;
        let mut map = Map::new();
        loop {
            self.skip_ws();
            match self.peek() {
                Some('}') => {
                    self.pos += 1;
                    return Ok(Value::Object(map));
                }
                None => return Err(self.error("unterminated document")),
                _ => {}
            }
            let key = self.key()?;
            self.expect(':')?;
            let value = self.value()?;
            map.insert(key, value);
            self.skip_ws();
            match self.bump() {
                Some(',') => continue,
                Some('}') => return Ok(Value::Object(map)),
                Some(c) => {
                    self.pos -= 1;
                    return Err(self.error(format!("expected ',' or '}}', found '{}'", c)));
                }
                None => return Err(self.error("unterminated document")),
            }
        }
    }

    fn key(&mut self) -> Result<String, DecodeError> {
        match self.peek() {
            Some(q @ ('"' | '\'')) => self.string(q),
            Some(c) if is_key_char(c) => {
                let start = self.pos;
                while self.peek().is_some_and(is_key_char) {
                    self.pos += 1;
                }
                Ok(self.chars[start..self.pos].iter().collect())
            }
            Some(c) => Err(self.error(format!("expected a field name, found '{}'", c))),
            None => Err(self.error("expected a field name")),
        }
    }

    fn array(&mut self) -> Result<Value, DecodeError> {
        self.expect('[')?;
        let mut items = Vec::new();
        loop {
            self.skip_ws();
            match self.peek() {
                Some(']') => {
                    self.pos += 1;
                    return Ok(Value::Array(items));
                }
                None => return Err(self.error("unterminated array")),
                _ => {}
            }
            items.push(self.value()?);
            self.skip_ws();
            match self.bump() {
                Some(',') => continue,
                Some(']') => return Ok(Value::Array(items)),
                Some(c) => {
                    self.pos -= 1;
                    return Err(self.error(format!("expected ',' or ']', found '{}'", c)));
                }
                None => return Err(self.error("unterminated array")),
            }
        }
    }

    fn string(&mut self, quote: char) -> Result<String, DecodeError> {
        let start = self.pos;
        self.pos += 1;
        let mut out = String::new();
        loop {
            match self.bump() {
                None => {
                    self.pos = start;
                    return Err(self.error("unterminated string"));
                }
                Some(c) if c == quote => return Ok(out),
                Some('\\') => match self.bump() {
                    Some('n') => out.push('\n'),
                    Some('t') => out.push('\t'),
                    Some('r') => out.push('\r'),
                    Some('b') => out.push('\u{8}'),
                    Some('f') => out.push('\u{c}'),
                    Some('u') => {
                        let hex: String = self.chars.iter().skip(self.pos).take(4).collect();
                        let code = u32::from_str_radix(&hex, 16)
                            .ok()
                            .filter(|_| hex.len() == 4)
                            .and_then(char::from_u32)
                            .ok_or_else(|| self.error("invalid unicode escape"))?;
                        self.pos += 4;
                        out.push(code);
                    }
                    Some(c) => out.push(c),
                    None => return Err(self.error("unterminated string")),
                },
                Some(c) => out.push(c),
            }
        }
    }

    fn number(&mut self) -> Result<Value, DecodeError> {
        let start = self.pos;
        if matches!(self.peek(), Some('-' | '+')) {
            self.pos += 1;
        }
        let mut is_float = false;
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                self.pos += 1;
            } else if c == '.' || c == 'e' || c == 'E' {
                is_float = true;
                self.pos += 1;
                if (c == 'e' || c == 'E') && matches!(self.peek(), Some('-' | '+')) {
                    self.pos += 1;
                }
            } else {
                break;
            }
        }
        let text: String = self.chars[start..self.pos].iter().collect();
        let text = text.strip_prefix('+').unwrap_or(&text);
        if !is_float {
            if let Ok(i) = text.parse::<i64>() {
                return Ok(Value::Number(i.into()));
            }
        }
        text.parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .ok_or_else(|| DecodeError {
                message: format!("invalid number '{}'", text),
                position: start,
                near: excerpt(&self.chars, start),
            })
    }

    fn regex(&mut self) -> Result<Value, DecodeError> {
        let start = self.pos;
        self.pos += 1;
        let mut pattern = String::new();
        loop {
            match self.bump() {
                None => {
                    self.pos = start;
                    return Err(self.error("unterminated regular expression"));
                }
                Some('/') => break,
                Some('\\') => match self.bump() {
                    Some('/') => pattern.push('/'),
                    Some(c) => {
                        pattern.push('\\');
                        pattern.push(c);
                    }
                    None => return Err(self.error("unterminated regular expression")),
                },
                Some(c) => pattern.push(c),
            }
        }
        let mut flags = String::new();
        while let Some(c) = self.peek().filter(char::is_ascii_alphabetic) {
            flags.push(c);
            self.pos += 1;
        }
        let mut out = Map::new();
        out.insert("$regex".into(), Value::String(pattern));
        if !flags.is_empty() {
            out.insert("$options".into(), Value::String(flags));
        }
        Ok(Value::Object(out))
    }

    fn identifier(&mut self) -> String {
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_ascii_alphanumeric() || c == '_') {
            self.pos += 1;
        }
        self.chars[start..self.pos].iter().collect()
    }

    fn word(&mut self) -> Result<Value, DecodeError> {
        let start = self.pos;
        let mut name = self.identifier();
        if name == "new" {
            self.skip_ws();
            name = self.identifier();
        }
        match name.as_str() {
            "true" => return Ok(Value::Bool(true)),
            "false" => return Ok(Value::Bool(false)),
            "null" | "undefined" => return Ok(Value::Null),
            _ => {}
        }
        self.skip_ws();
        if self.peek() != Some('(') {
            self.pos = start;
            return Err(self.error(format!("unexpected identifier '{}'", name)));
        }
        self.pos += 1;
        self.skip_ws();
        let arg = if self.peek() == Some(')') {
            None
        } else {
            Some(self.value()?)
        };
        self.expect(')')?;

        match name.as_str() {
            "ISODate" | "Date" => {
                let raw = match arg {
                    None => return Ok(json!({ "$date": Utc::now().format(DATE_FORMAT).to_string() })),
                    Some(Value::String(s)) => s,
                    Some(_) => {
                        self.pos = start;
                        return Err(self.error(format!("{}() expects a date string", name)));
                    }
                };
                match normalize_date(&raw) {
                    Some(d) => Ok(json!({ "$date": d })),
                    None => {
                        self.pos = start;
                        Err(self.error(format!("invalid date '{}'", raw)))
                    }
                }
            }
            "ObjectId" => match arg {
                Some(Value::String(s)) => Ok(json!({ "$oid": s })),
                _ => {
                    self.pos = start;
                    Err(self.error("ObjectId() expects a hex string"))
                }
            },
            "NumberInt" | "NumberLong" | "NumberDecimal" => {
                let n = match &arg {
                    Some(Value::Number(n)) => Some(Value::Number(n.clone())),
                    Some(Value::String(s)) => decode(s).ok().filter(Value::is_number),
                    _ => None,
                };
                n.ok_or_else(|| DecodeError {
                    message: format!("{}() expects a number", name),
                    position: start,
                    near: excerpt(&self.chars, start),
                })
            }
            other => {
                self.pos = start;
                Err(self.error(format!("unsupported function '{}'", other)))
            }
        }
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_key_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '$' | '.')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_keys_and_single_quotes() {
        let v = decode("{role: 'Student', \"booksCanRequest\": 0}").unwrap();
        assert_eq!(v, json!({"role": "Student", "booksCanRequest": 0}));
    }

    #[test]
    fn test_operators_and_nesting() {
        let v = decode(r#"{status: {$in: ["Pending", "Issued"]}, finePerDay: {$gte: 2.5}}"#).unwrap();
        assert_eq!(v["status"]["$in"][1], "Issued");
        assert_eq!(v["finePerDay"]["$gte"], json!(2.5));
    }

    #[test]
    fn test_key_order_preserved() {
        let v = decode_document("{b: 1, a: -1, c: 1}").unwrap();
        let keys: Vec<&str> = v.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["b", "a", "c"]);
    }

    #[test]
    fn test_trailing_commas() {
        let v = decode("[{$match: {a: 1,},}, ]").unwrap();
        assert_eq!(v, json!([{"$match": {"a": 1}}]));
    }

    #[test]
    fn test_dates_and_ids() {
        let v = decode(r#"{d: ISODate("2025-07-19"), e: new Date('2025-07-19T10:30:00Z'), o: ObjectId("abc")}"#)
            .unwrap();
        assert_eq!(v["d"], json!({"$date": "2025-07-19T00:00:00.000Z"}));
        assert_eq!(v["e"], json!({"$date": "2025-07-19T10:30:00.000Z"}));
        assert_eq!(v["o"], json!({"$oid": "abc"}));
    }

    #[test]
    fn test_regex_literal() {
        let v = decode(r"{name: /^har\/ry/i}").unwrap();
        assert_eq!(v["name"], json!({"$regex": "^har/ry", "$options": "i"}));
    }

    #[test]
    fn test_number_wrappers() {
        assert_eq!(decode("NumberInt(3)").unwrap(), json!(3));
        assert_eq!(decode("NumberLong(\"42\")").unwrap(), json!(42));
    }

    #[test]
    fn test_negative_and_exponent_numbers() {
        assert_eq!(decode("-3").unwrap(), json!(-3));
        assert_eq!(decode("1e3").unwrap(), json!(1000.0));
    }

    #[test]
    fn test_errors_carry_position() {
        let err = decode("{role: 'Student' name: 1}").unwrap_err();
        assert_eq!(err.position, 17);
        assert!(err.message.contains("expected ','"));
        assert!(err.to_string().contains("near `name: 1}`"));
    }

    #[test]
    fn test_rejects_code() {
        assert!(decode("{a: function() { return 1 }}").is_err());
        assert!(decode("{$where: sleep(1000)}").is_err());
    }

    #[test]
    fn test_unterminated_inputs() {
        assert!(decode("{a: 1").is_err());
        assert!(decode("[1, 2").is_err());
        assert!(decode("{a: 'x}").is_err());
        assert!(decode("{a: 1} extra").is_err());
    }

    #[test]
    fn test_decode_document_rejects_arrays() {
        let err = decode_document("[1]").unwrap_err();
        assert!(err.message.contains("expected a document"));
        assert!(decode_array("{}").is_err());
    }

    #[test]
    fn test_normalize_date_formats() {
        assert_eq!(
            normalize_date("2025-07-19").as_deref(),
            Some("2025-07-19T00:00:00.000Z")
        );
        assert_eq!(
            normalize_date("2025-07-19T08:00:00+02:00").as_deref(),
            Some("2025-07-19T06:00:00.000Z")
        );
        assert_eq!(
            normalize_date("2025-07-19T08:00:00.250").as_deref(),
            Some("2025-07-19T08:00:00.250Z")
        );
        assert!(normalize_date("yesterday").is_none());
    }

    #[test]
    fn test_nesting_limit() {
        let nested = |n: usize| format!("{}{}", "[".repeat(n), "]".repeat(n));
        assert!(decode(&nested(MAX_DEPTH)).is_ok());

        let err = decode(&nested(MAX_DEPTH + 1)).unwrap_err();
        assert_eq!(err.message, "nesting too deep");
        assert_eq!(err.position, MAX_DEPTH);

        let deep_doc = format!("{}1{}", "{a: ".repeat(5000), "}".repeat(5000));
        assert_eq!(decode(&deep_doc).unwrap_err().message, "nesting too deep");
        let deep_call = format!("{}'x'{}", "ObjectId(".repeat(5000), ")".repeat(5000));
        assert_eq!(decode(&deep_call).unwrap_err().message, "nesting too deep");
    }
}
