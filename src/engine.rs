//! In-process document query engine.
//!
//! Evaluates validated filters, projections and aggregation pipelines over
//! plain [`Document`]s. Both executors in [`executor`](crate::executor) load
//! documents from their backing store and hand them to this module.
//!
//! Supported surface:
//!
//! | Area | Operators |
//! |------|-----------|
//! | Filters | `$eq $ne $gt $gte $lt $lte $in $nin $exists $regex $options $not $size $and $or $nor` |
//! | Stages | `$match $project $addFields $set $lookup $unwind $sort $limit $skip $count $group` |
//! | Expressions | `$concat $toUpper $toLower $size $add $subtract $multiply $ifNull $literal` |
//! | Accumulators | `$sum $avg $min $max $first $last $push $addToSet` |
//!
//! Anything else is an error rather than a silent no-op. Values are compared
//! with type brackets (null < numbers < strings < documents < arrays <
//! booleans < dates); `{"$date": …}` documents compare as dates.

use regex::RegexBuilder;
use serde_json::{Map, Number, Value};
use std::cmp::Ordering;
use std::collections::HashMap;

use crate::models::{Collection, Document};

pub type EngineResult<T> = Result<T, String>;

// ============ Values ============

fn is_date(v: &Value) -> bool {
    matches!(v, Value::Object(o) if o.len() == 1 && o.get("$date").is_some_and(Value::is_string))
}

fn is_oid(v: &Value) -> bool {
    matches!(v, Value::Object(o) if o.len() == 1 && o.get("$oid").is_some_and(Value::is_string))
}

fn type_rank(v: &Value) -> u8 {
    match v {
        Value::Null => 0,
        Value::Number(_) => 1,
        Value::String(_) => 2,
        Value::Object(_) if is_oid(v) => 4,
        Value::Object(_) if is_date(v) => 7,
        Value::Object(_) => 3,
        Value::Array(_) => 5,
        Value::Bool(_) => 6,
    }
}

/// Total order over values, by type bracket first.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    let (ra, rb) = (type_rank(a), type_rank(b));
    if ra != rb {
        return ra.cmp(&rb);
    }
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => {
            for (l, r) in x.iter().zip(y.iter()) {
                let ord = compare_values(l, r);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        (Value::Object(x), Value::Object(y)) => {
            for ((lk, lv), (rk, rv)) in x.iter().zip(y.iter()) {
                let ord = lk.cmp(rk).then_with(|| compare_values(lv, rv));
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        _ => Ordering::Equal,
    }
}

fn same_value(a: &Value, b: &Value) -> bool {
    type_rank(a) == type_rank(b) && compare_values(a, b) == Ordering::Equal
}

fn number(f: f64, integral: bool) -> Value {
    if integral && f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
        Value::Number((f as i64).into())
    } else {
        Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)
    }
}

fn is_integral(v: &Value) -> bool {
    v.as_i64().is_some() || v.as_u64().is_some()
}

// ============ Paths ============

/// Resolve a dotted path. Walking through an array of documents collects
/// the field from each element, as `$lookup` results are usually read.
pub fn get_path(doc: &Document, path: &str) -> Option<Value> {
    let mut segments = path.split('.');
    let first = segments.next()?;
    let mut current = doc.get(first)?.clone();
    for seg in segments {
        current = step(&current, seg)?;
    }
    Some(current)
}

fn step(value: &Value, seg: &str) -> Option<Value> {
    match value {
        Value::Object(o) => o.get(seg).cloned(),
        Value::Array(items) => {
            if let Ok(i) = seg.parse::<usize>() {
                return items.get(i).cloned();
            }
            let collected: Vec<Value> = items.iter().filter_map(|v| step(v, seg)).collect();
            Some(Value::Array(collected))
        }
        _ => None,
    }
}

/// Set a dotted path, creating intermediate documents.
pub fn set_path(doc: &mut Document, path: &str, value: Value) {
    match path.split_once('.') {
        None => {
            doc.insert(path.to_string(), value);
        }
        Some((head, rest)) => {
            let entry = doc
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !entry.is_object() {
                *entry = Value::Object(Map::new());
            }
            if let Value::Object(inner) = entry {
                set_path(inner, rest, value);
            }
        }
    }
}

fn remove_path(doc: &mut Document, path: &str) {
    match path.split_once('.') {
        None => {
            doc.shift_remove(path);
        }
        Some((head, rest)) => {
            if let Some(Value::Object(inner)) = doc.get_mut(head) {
                remove_path(inner, rest);
            }
        }
    }
}

// ============ Filters ============

/// Whether `doc` satisfies `filter`.
pub fn matches(doc: &Document, filter: &Document) -> EngineResult<bool> {
    for (key, cond) in filter {
        let ok = match key.as_str() {
            "$and" => logical(doc, cond, key)?.iter().all(|b| *b),
            "$or" => logical(doc, cond, key)?.iter().any(|b| *b),
            "$nor" => !logical(doc, cond, key)?.iter().any(|b| *b),
            k if k.starts_with('$') => {
                return Err(format!("unsupported top-level operator {}", k));
            }
            path => match_field(get_path(doc, path).as_ref(), cond)?,
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}

fn logical(doc: &Document, cond: &Value, op: &str) -> EngineResult<Vec<bool>> {
    let clauses = cond
        .as_array()
        .filter(|a| !a.is_empty())
        .ok_or_else(|| format!("{} expects a non-empty array", op))?;
    clauses
        .iter()
        .map(|c| {
            let sub = c
                .as_object()
                .ok_or_else(|| format!("{} clauses must be documents", op))?;
            matches(doc, sub)
        })
        .collect()
}

fn is_operator_doc(v: &Value) -> bool {
    match v {
        Value::Object(o) => {
            !o.is_empty() && !is_date(v) && !is_oid(v) && o.keys().all(|k| k.starts_with('$'))
        }
        _ => false,
    }
}

fn match_field(value: Option<&Value>, cond: &Value) -> EngineResult<bool> {
    let ops = match cond {
        Value::Object(ops) if is_operator_doc(cond) => ops,
        _ => return Ok(equals(value, cond)),
    };
    let options = cond.get("$options").and_then(Value::as_str).unwrap_or("");
    for (op, arg) in ops {
        let ok = match op.as_str() {
            "$eq" => equals(value, arg),
            "$ne" => !equals(value, arg),
            "$gt" => compares(value, arg, |o| o == Ordering::Greater),
            "$gte" => compares(value, arg, |o| o != Ordering::Less),
            "$lt" => compares(value, arg, |o| o == Ordering::Less),
            "$lte" => compares(value, arg, |o| o != Ordering::Greater),
            "$in" => in_list(value, arg, "$in")?,
            "$nin" => !in_list(value, arg, "$nin")?,
            "$exists" => {
                let want = arg.as_bool().unwrap_or_else(|| arg.as_f64() != Some(0.0));
                value.is_some() == want
            }
            "$regex" => {
                let pattern = arg
                    .as_str()
                    .ok_or_else(|| "$regex expects a string".to_string())?;
                regex_matches(value, pattern, options)?
            }
            "$options" => true,
            "$not" => !match_field(value, arg)?,
            "$size" => {
                let n = arg
                    .as_u64()
                    .ok_or_else(|| "$size expects a non-negative integer".to_string())?;
                matches!(value, Some(Value::Array(a)) if a.len() as u64 == n)
            }
            other => return Err(format!("unsupported query operator {}", other)),
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}

fn equals(value: Option<&Value>, target: &Value) -> bool {
    match value {
        None => target.is_null(),
        Some(v) => {
            if same_value(v, target) {
                return true;
            }
            match v {
                Value::Array(items) => items.iter().any(|i| same_value(i, target)),
                _ => false,
            }
        }
    }
}

fn compares(value: Option<&Value>, target: &Value, pred: impl Fn(Ordering) -> bool) -> bool {
    let check = |v: &Value| type_rank(v) == type_rank(target) && pred(compare_values(v, target));
    match value {
        None => false,
        Some(Value::Array(items)) if !matches!(target, Value::Array(_)) => items.iter().any(check),
        Some(v) => check(v),
    }
}

fn in_list(value: Option<&Value>, arg: &Value, op: &str) -> EngineResult<bool> {
    let list = arg
        .as_array()
        .ok_or_else(|| format!("{} expects an array", op))?;
    for candidate in list {
        if let Some(pattern) = candidate.get("$regex").and_then(Value::as_str) {
            let options = candidate.get("$options").and_then(Value::as_str).unwrap_or("");
            if regex_matches(value, pattern, options)? {
                return Ok(true);
            }
        } else if equals(value, candidate) {
            return Ok(true);
        }
    }
    Ok(false)
}

fn regex_matches(value: Option<&Value>, pattern: &str, options: &str) -> EngineResult<bool> {
    let re = RegexBuilder::new(pattern)
        .case_insensitive(options.contains('i'))
        .multi_line(options.contains('m'))
        .dot_matches_new_line(options.contains('s'))
        .ignore_whitespace(options.contains('x'))
        .build()
        .map_err(|e| format!("invalid $regex: {}", e))?;
    Ok(match value {
        Some(Value::String(s)) => re.is_match(s),
        Some(Value::Array(items)) => items
            .iter()
            .any(|i| i.as_str().is_some_and(|s| re.is_match(s))),
        _ => false,
    })
}

// ============ Expressions ============

fn is_truthy_flag(v: &Value) -> bool {
    v.as_bool() == Some(true) || v.as_f64() == Some(1.0)
}

fn is_false_flag(v: &Value) -> bool {
    v.as_bool() == Some(false) || v.as_f64() == Some(0.0)
}

/// Evaluate an aggregation expression against `doc`.
pub fn eval_expr(doc: &Document, expr: &Value) -> EngineResult<Value> {
    match expr {
        Value::String(s) if s.starts_with("$$") => {
            Err(format!("aggregation variables are not supported ({})", s))
        }
        Value::String(s) if s.len() > 1 && s.starts_with('$') => {
            Ok(get_path(doc, &s[1..]).unwrap_or(Value::Null))
        }
        Value::Array(items) => items
            .iter()
            .map(|i| eval_expr(doc, i))
            .collect::<EngineResult<Vec<_>>>()
            .map(Value::Array),
        Value::Object(o) if is_date(expr) || is_oid(expr) => Ok(Value::Object(o.clone())),
        Value::Object(o) if o.len() == 1 && o.keys().all(|k| k.starts_with('$')) => {
            let (op, arg) = o.iter().next().ok_or("empty expression")?;
            eval_operator(doc, op, arg)
        }
        Value::Object(o) => {
            let mut out = Map::new();
            for (k, v) in o {
                out.insert(k.clone(), eval_expr(doc, v)?);
            }
            Ok(Value::Object(out))
        }
        other => Ok(other.clone()),
    }
}

fn eval_args(doc: &Document, arg: &Value) -> EngineResult<Vec<Value>> {
    match arg {
        Value::Array(items) => items.iter().map(|i| eval_expr(doc, i)).collect(),
        single => Ok(vec![eval_expr(doc, single)?]),
    }
}

fn eval_operator(doc: &Document, op: &str, arg: &Value) -> EngineResult<Value> {
    match op {
        "$literal" => Ok(arg.clone()),
        "$concat" => {
            let mut out = String::new();
            for v in eval_args(doc, arg)? {
                match v {
                    Value::Null => return Ok(Value::Null),
                    Value::String(s) => out.push_str(&s),
                    other => return Err(format!("$concat only supports strings, found {}", other)),
                }
            }
            Ok(Value::String(out))
        }
        "$toUpper" | "$toLower" => {
            let v = eval_args(doc, arg)?.into_iter().next().unwrap_or(Value::Null);
            let s = match v {
                Value::Null => String::new(),
                Value::String(s) => s,
                other => other.to_string(),
            };
            Ok(Value::String(if op == "$toUpper" {
                s.to_uppercase()
            } else {
                s.to_lowercase()
            }))
        }
        "$size" => match eval_args(doc, arg)?.into_iter().next() {
            Some(Value::Array(a)) => Ok(Value::Number((a.len() as i64).into())),
            other => Err(format!(
                "$size requires an array, found {}",
                other.unwrap_or(Value::Null)
            )),
        },
        "$add" | "$multiply" => {
            let values = eval_args(doc, arg)?;
            if values.iter().any(Value::is_null) {
                return Ok(Value::Null);
            }
            let integral = values.iter().all(is_integral);
            let mut acc = if op == "$add" { 0.0 } else { 1.0 };
            for v in &values {
                let n = v
                    .as_f64()
                    .ok_or_else(|| format!("{} only supports numbers, found {}", op, v))?;
                if op == "$add" {
                    acc += n;
                } else {
                    acc *= n;
                }
            }
            Ok(number(acc, integral))
        }
        "$subtract" => {
            let values = eval_args(doc, arg)?;
            let [a, b] = values.as_slice() else {
                return Err("$subtract expects two arguments".to_string());
            };
            if a.is_null() || b.is_null() {
                return Ok(Value::Null);
            }
            match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => Ok(number(x - y, is_integral(a) && is_integral(b))),
                _ => Err("$subtract only supports numbers".to_string()),
            }
        }
        "$ifNull" => {
            let values = eval_args(doc, arg)?;
            Ok(values
                .into_iter()
                .find(|v| !v.is_null())
                .unwrap_or(Value::Null))
        }
        other => Err(format!("unsupported expression operator {}", other)),
    }
}

// ============ Projection ============

/// Apply a `find` projection (`field: 1`, optional `_id: 0`).
pub fn project_find(doc: &Document, projection: &Document) -> EngineResult<Document> {
    let mut out = Document::new();
    let keep_id = projection.get("_id").map(is_truthy_flag).unwrap_or(true);
    if keep_id {
        if let Some(id) = doc.get("_id") {
            out.insert("_id".to_string(), id.clone());
        }
    }
    for (key, flag) in projection {
        if key == "_id" {
            continue;
        }
        if !is_truthy_flag(flag) {
            return Err(format!("unsupported projection value for {}: {}", key, flag));
        }
        if let Some(v) = get_path(doc, key) {
            set_path(&mut out, key, v);
        }
    }
    Ok(out)
}

fn project_stage(doc: &Document, spec: &Document) -> EngineResult<Document> {
    let mut out = Document::new();
    let keep_id = spec.get("_id").map(|v| !is_false_flag(v)).unwrap_or(true);
    if keep_id && !spec.contains_key("_id") {
        if let Some(id) = doc.get("_id") {
            out.insert("_id".to_string(), id.clone());
        }
    }
    for (key, value) in spec {
        if is_false_flag(value) {
            if key == "_id" {
                continue;
            }
            return Err(format!("exclusion of {} is not supported in $project", key));
        }
        if is_truthy_flag(value) {
            if let Some(v) = get_path(doc, key) {
                set_path(&mut out, key, v);
            }
        } else {
            set_path(&mut out, key, eval_expr(doc, value)?);
        }
    }
    Ok(out)
}

// ============ Stages ============

fn stage_int(arg: &Value, op: &str) -> EngineResult<usize> {
    arg.as_u64()
        .map(|n| n as usize)
        .ok_or_else(|| format!("{} expects a non-negative integer", op))
}

fn unwind(docs: Vec<Document>, arg: &Value) -> EngineResult<Vec<Document>> {
    let (path, preserve) = match arg {
        Value::String(s) => (s.as_str(), false),
        Value::Object(o) => (
            o.get("path")
                .and_then(Value::as_str)
                .ok_or("$unwind requires a path")?,
            o.get("preserveNullAndEmptyArrays")
                .and_then(Value::as_bool)
                .unwrap_or(false),
        ),
        _ => return Err("$unwind expects a field path".to_string()),
    };
    let path = path
        .strip_prefix('$')
        .ok_or_else(|| format!("$unwind path must start with $, found {}", path))?;

    let mut out = Vec::new();
    for doc in docs {
        match get_path(&doc, path) {
            Some(Value::Array(items)) if !items.is_empty() => {
                for item in items {
                    let mut copy = doc.clone();
                    set_path(&mut copy, path, item);
                    out.push(copy);
                }
            }
            Some(Value::Array(_)) | Some(Value::Null) | None => {
                if preserve {
                    let mut copy = doc;
                    remove_path(&mut copy, path);
                    out.push(copy);
                }
            }
            Some(_) => out.push(doc),
        }
    }
    Ok(out)
}

fn lookup(
    docs: Vec<Document>,
    arg: &Value,
    foreign: &HashMap<Collection, Vec<Document>>,
) -> EngineResult<Vec<Document>> {
    let spec = arg.as_object().ok_or("$lookup expects a document")?;
    if spec.contains_key("pipeline") {
        return Err("$lookup with a sub-pipeline is not supported".to_string());
    }
    let from: Collection = lookup_field(spec, "from")?.parse()?;
    let local_field = lookup_field(spec, "localField")?;
    let foreign_field = lookup_field(spec, "foreignField")?;
    let as_field = lookup_field(spec, "as")?;
    let candidates = foreign.get(&from).map(Vec::as_slice).unwrap_or(&[]);

    Ok(docs
        .into_iter()
        .map(|mut doc| {
            let local = get_path(&doc, local_field).unwrap_or(Value::Null);
            let joined: Vec<Value> = candidates
                .iter()
                .filter(|f| {
                    let remote = get_path(f, foreign_field).unwrap_or(Value::Null);
                    join_matches(&local, &remote)
                })
                .map(|f| Value::Object(f.clone()))
                .collect();
            set_path(&mut doc, as_field, Value::Array(joined));
            doc
        })
        .collect())
}

fn lookup_field<'a>(spec: &'a Document, name: &str) -> EngineResult<&'a str> {
    spec.get(name)
        .and_then(Value::as_str)
        .ok_or_else(|| format!("$lookup requires `{}`", name))
}

fn join_matches(local: &Value, remote: &Value) -> bool {
    match (local, remote) {
        (Value::Array(l), _) => l.iter().any(|v| join_matches(v, remote)),
        (_, Value::Array(r)) => r.iter().any(|v| same_value(local, v)),
        _ => same_value(local, remote),
    }
}

fn sort(mut docs: Vec<Document>, arg: &Value) -> EngineResult<Vec<Document>> {
    let spec = arg.as_object().ok_or("$sort expects a document")?;
    let mut keys = Vec::with_capacity(spec.len());
    for (field, dir) in spec {
        let descending = match dir.as_i64() {
            Some(1) => false,
            Some(-1) => true,
            _ => return Err(format!("$sort direction for {} must be 1 or -1", field)),
        };
        keys.push((field.as_str(), descending));
    }
    docs.sort_by(|a, b| {
        for (field, descending) in &keys {
            let va = get_path(a, field).unwrap_or(Value::Null);
            let vb = get_path(b, field).unwrap_or(Value::Null);
            let ord = compare_values(&va, &vb);
            let ord = if *descending { ord.reverse() } else { ord };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    });
    Ok(docs)
}

enum Accumulator {
    Sum { total: f64, integral: bool },
    Avg { total: f64, count: usize },
    Min(Option<Value>),
    Max(Option<Value>),
    First(Option<Value>),
    Last(Value),
    Push(Vec<Value>),
    AddToSet(Vec<Value>),
}

impl Accumulator {
    fn new(op: &str) -> EngineResult<Self> {
        Ok(match op {
            "$sum" => Accumulator::Sum {
                total: 0.0,
                integral: true,
            },
            "$avg" => Accumulator::Avg {
                total: 0.0,
                count: 0,
            },
            "$min" => Accumulator::Min(None),
            "$max" => Accumulator::Max(None),
            "$first" => Accumulator::First(None),
            "$last" => Accumulator::Last(Value::Null),
            "$push" => Accumulator::Push(Vec::new()),
            "$addToSet" => Accumulator::AddToSet(Vec::new()),
            other => return Err(format!("unsupported accumulator {}", other)),
        })
    }

    fn add(&mut self, v: Value) {
        match self {
            Accumulator::Sum { total, integral } => {
                if let Some(n) = v.as_f64() {
                    *total += n;
                    *integral &= is_integral(&v);
                }
            }
            Accumulator::Avg { total, count } => {
                if let Some(n) = v.as_f64() {
                    *total += n;
                    *count += 1;
                }
            }
            Accumulator::Min(cur) => {
                if !v.is_null()
                    && cur
                        .as_ref()
                        .map_or(true, |c| compare_values(&v, c) == Ordering::Less)
                {
                    *cur = Some(v);
                }
            }
            Accumulator::Max(cur) => {
                if !v.is_null()
                    && cur
                        .as_ref()
                        .map_or(true, |c| compare_values(&v, c) == Ordering::Greater)
                {
                    *cur = Some(v);
                }
            }
            Accumulator::First(cur) => {
                if cur.is_none() {
                    *cur = Some(v);
                }
            }
            Accumulator::Last(cur) => *cur = v,
            Accumulator::Push(items) => items.push(v),
            Accumulator::AddToSet(items) => {
                if !items.iter().any(|i| same_value(i, &v)) {
                    items.push(v);
                }
            }
        }
    }

    fn finish(self) -> Value {
        match self {
            Accumulator::Sum { total, integral } => number(total, integral),
            Accumulator::Avg { total, count } => {
                if count == 0 {
                    Value::Null
                } else {
                    number(total / count as f64, false)
                }
            }
            Accumulator::Min(v) | Accumulator::Max(v) | Accumulator::First(v) => {
                v.unwrap_or(Value::Null)
            }
            Accumulator::Last(v) => v,
            Accumulator::Push(items) | Accumulator::AddToSet(items) => Value::Array(items),
        }
    }
}

fn group(docs: Vec<Document>, arg: &Value) -> EngineResult<Vec<Document>> {
    let spec = arg.as_object().ok_or("$group expects a document")?;
    let id_expr = spec.get("_id").ok_or("$group requires an _id")?;

    let mut fields = Vec::new();
    for (name, acc) in spec.iter().filter(|(k, _)| k.as_str() != "_id") {
        let acc = acc
            .as_object()
            .filter(|o| o.len() == 1)
            .ok_or_else(|| format!("$group field {} must be a single accumulator", name))?;
        let (op, expr) = acc.iter().next().ok_or("empty accumulator")?;
        Accumulator::new(op)?;
        fields.push((name.clone(), op.clone(), expr.clone()));
    }

    let mut order: Vec<Value> = Vec::new();
    let mut groups: Vec<Vec<Accumulator>> = Vec::new();
    for doc in &docs {
        let key = eval_expr(doc, id_expr)?;
        let idx = match order.iter().position(|k| same_value(k, &key)) {
            Some(i) => i,
            None => {
                order.push(key);
                groups.push(
                    fields
                        .iter()
                        .map(|(_, op, _)| Accumulator::new(op))
                        .collect::<EngineResult<Vec<_>>>()?,
                );
                groups.len() - 1
            }
        };
        for (acc, (_, _, expr)) in groups[idx].iter_mut().zip(fields.iter()) {
            acc.add(eval_expr(doc, expr)?);
        }
    }

    Ok(order
        .into_iter()
        .zip(groups)
        .map(|(key, accs)| {
            let mut out = Document::new();
            out.insert("_id".to_string(), key);
            for ((name, _, _), acc) in fields.iter().zip(accs) {
                out.insert(name.clone(), acc.finish());
            }
            out
        })
        .collect())
}

/// Collections read by `$lookup` stages, so callers can preload them.
pub fn lookup_targets(pipeline: &[Document]) -> Vec<Collection> {
    let mut out = Vec::new();
    for stage in pipeline {
        if let Some(from) = stage
            .get("$lookup")
            .and_then(|l| l.get("from"))
            .and_then(Value::as_str)
            .and_then(|s| s.parse::<Collection>().ok())
        {
            if !out.contains(&from) {
                out.push(from);
            }
        }
    }
    out
}

// ============ Entry points ============

/// Run a point lookup.
pub fn run_find(
    docs: &[Document],
    filter: &Document,
    projection: &Document,
) -> EngineResult<Vec<Document>> {
    let mut out = Vec::new();
    for doc in docs {
        if matches(doc, filter)? {
            out.push(project_find(doc, projection)?);
        }
    }
    Ok(out)
}

/// Run an aggregation pipeline. `foreign` holds the documents of every
/// collection named by a `$lookup` stage.
pub fn run_pipeline(
    mut docs: Vec<Document>,
    pipeline: &[Document],
    foreign: &HashMap<Collection, Vec<Document>>,
) -> EngineResult<Vec<Document>> {
    for stage in pipeline {
        let (op, arg) = stage
            .iter()
            .next()
            .ok_or("pipeline stage must not be empty")?;
        docs = match op.as_str() {
            "$match" => {
                let filter = arg.as_object().ok_or("$match expects a document")?;
                let mut kept = Vec::new();
                for doc in docs {
                    if matches(&doc, filter)? {
                        kept.push(doc);
                    }
                }
                kept
            }
            "$project" => {
                let spec = arg.as_object().ok_or("$project expects a document")?;
                docs.iter()
                    .map(|d| project_stage(d, spec))
                    .collect::<EngineResult<Vec<_>>>()?
            }
            "$addFields" | "$set" => {
                let spec = arg
                    .as_object()
                    .ok_or_else(|| format!("{} expects a document", op))?;
                let mut out = Vec::with_capacity(docs.len());
                for mut doc in docs {
                    for (k, expr) in spec {
                        let v = eval_expr(&doc, expr)?;
                        set_path(&mut doc, k, v);
                    }
                    out.push(doc);
                }
                out
            }
            "$lookup" => lookup(docs, arg, foreign)?,
            "$unwind" => unwind(docs, arg)?,
            "$sort" => sort(docs, arg)?,
            "$limit" => {
                let n = stage_int(arg, op)?;
                docs.into_iter().take(n).collect()
            }
            "$skip" => {
                let n = stage_int(arg, op)?;
                docs.into_iter().skip(n).collect()
            }
            "$count" => {
                let name = arg
                    .as_str()
                    .filter(|s| !s.is_empty() && !s.starts_with('$'))
                    .ok_or("$count expects a field name")?;
                if docs.is_empty() {
                    Vec::new()
                } else {
                    let mut out = Document::new();
                    out.insert(name.to_string(), Value::Number((docs.len() as i64).into()));
                    vec![out]
                }
            }
            "$group" => group(docs, arg)?,
            other => return Err(format!("unsupported pipeline stage {}", other)),
        };
    }
    Ok(docs)
}
