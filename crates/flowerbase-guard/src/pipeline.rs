//! Query matching and aggregation for the in-memory backend
//!
//! Covers the subset of MongoDB the guard relies on: filter documents,
//! the `$match`, `$limit`, `$skip`, `$set`/`$addFields`, `$unset` and
//! `$project` stages, and the expression operators produced by
//! [`update_to_pipeline`](crate::update::update_to_pipeline).

use bson::{Bson, Document};

use flowerbase_common::error::{Error, Result};
use flowerbase_rules::operators::Operator;
use flowerbase_rules::value::{as_f64, get_path, strict_eq, truthy};

/// Whether `document` satisfies a MongoDB filter
pub fn matches(filter: &Document, document: &Document) -> Result<bool> {
    for (key, spec) in filter {
        let passed = match key.as_str() {
            "$and" => {
                let mut all = true;
                for child in filter_list(key, spec)? {
                    if !matches(child, document)? {
                        all = false;
                        break;
                    }
                }
                all
            }
            "$or" => {
                let mut any = false;
                for child in filter_list(key, spec)? {
                    if matches(child, document)? {
                        any = true;
                        break;
                    }
                }
                any
            }
            "$nor" => {
                let mut none = true;
                for child in filter_list(key, spec)? {
                    if matches(child, document)? {
                        none = false;
                        break;
                    }
                }
                none
            }
            path => match_field(get_path(document, path), spec)?,
        };
        if !passed {
            return Ok(false);
        }
    }
    Ok(true)
}

fn filter_list<'a>(key: &str, spec: &'a Bson) -> Result<Vec<&'a Document>> {
    let Bson::Array(items) = spec else {
        return Err(Error::DatabaseError(format!("{key} must be an array")));
    };
    items
        .iter()
        .map(|item| {
            item.as_document()
                .ok_or_else(|| Error::DatabaseError(format!("{key} entries must be documents")))
        })
        .collect()
}

fn as_operator_document(spec: &Bson) -> Option<&Document> {
    match spec {
        Bson::Document(doc) if doc.keys().next().is_some_and(|k| k.starts_with('$')) => Some(doc),
        _ => None,
    }
}

fn match_field(actual: Option<&Bson>, spec: &Bson) -> Result<bool> {
    let Some(operators) = as_operator_document(spec) else {
        if let Bson::RegularExpression(_) = spec {
            return Operator::Regex.apply(actual, Some(spec), None);
        }
        return Ok(equals_or_contains(actual, spec));
    };

    let options = operators.get("$options");
    for (op, expected) in operators {
        let passed = match op.as_str() {
            "$options" => continue,
            "$exists" => actual.is_some() == truthy(Some(expected)),
            "$eq" => equals_or_contains(actual, expected),
            "$ne" => !equals_or_contains(actual, expected),
            "$not" => !match_field(actual, expected)?,
            other => other.parse::<Operator>()?.apply(actual, Some(expected), options)?,
        };
        if !passed {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Equality, where an array field also matches any of its elements
fn equals_or_contains(actual: Option<&Bson>, expected: &Bson) -> bool {
    if strict_eq(actual, Some(expected)) {
        return true;
    }
    if expected == &Bson::Null && actual.is_none() {
        return true;
    }
    match actual {
        Some(Bson::Array(items)) => items.iter().any(|item| strict_eq(Some(item), Some(expected))),
        _ => false,
    }
}

/// Run aggregation stages over `documents`
pub fn run_pipeline(mut documents: Vec<Document>, pipeline: &[Document]) -> Result<Vec<Document>> {
    for stage in pipeline {
        documents = apply_stage(documents, stage)?;
    }
    Ok(documents)
}

fn apply_stage(documents: Vec<Document>, stage: &Document) -> Result<Vec<Document>> {
    let mut entries = stage.iter();
    let (Some((name, spec)), None) = (entries.next(), entries.next()) else {
        return Err(Error::DatabaseError(
            "a pipeline stage must have exactly one field".to_string(),
        ));
    };

    match name.as_str() {
        "$match" => {
            let filter = stage_document(name, spec)?;
            let mut kept = Vec::with_capacity(documents.len());
            for document in documents {
                if matches(filter, &document)? {
                    kept.push(document);
                }
            }
            Ok(kept)
        }
        "$limit" => Ok(documents.into_iter().take(stage_count(name, spec)?).collect()),
        "$skip" => Ok(documents.into_iter().skip(stage_count(name, spec)?).collect()),
        "$set" | "$addFields" => {
            let fields = stage_document(name, spec)?;
            documents
                .into_iter()
                .map(|document| add_fields(document, fields))
                .collect()
        }
        "$unset" => {
            let paths = unset_paths(spec)?;
            Ok(documents
                .into_iter()
                .map(|mut document| {
                    for path in &paths {
                        remove_path(&mut document, path);
                    }
                    document
                })
                .collect())
        }
        "$project" => {
            let projection = stage_document(name, spec)?;
            Ok(documents
                .into_iter()
                .map(|document| project(document, projection))
                .collect())
        }
        other => Err(Error::DatabaseError(format!(
            "unsupported pipeline stage {other}"
        ))),
    }
}

fn stage_document<'a>(name: &str, spec: &'a Bson) -> Result<&'a Document> {
    spec.as_document()
        .ok_or_else(|| Error::DatabaseError(format!("{name} expects a document")))
}

fn stage_count(name: &str, spec: &Bson) -> Result<usize> {
    match as_f64(spec) {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        Some(n) if n >= 0.0 && n.fract() == 0.0 => Ok(n as usize),
        _ => Err(Error::DatabaseError(format!(
            "{name} expects a non-negative integer"
        ))),
    }
}

fn unset_paths(spec: &Bson) -> Result<Vec<String>> {
    match spec {
        Bson::String(path) => Ok(vec![path.clone()]),
        Bson::Array(items) => items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(ToString::to_string)
                    .ok_or_else(|| Error::DatabaseError("$unset expects field names".to_string()))
            })
            .collect(),
        _ => Err(Error::DatabaseError(
            "$unset expects a field name or a list of field names".to_string(),
        )),
    }
}

/// Every expression sees the input document, not earlier assignments
fn add_fields(mut document: Document, fields: &Document) -> Result<Document> {
    let mut values = Vec::with_capacity(fields.len());
    for (path, expression) in fields {
        values.push((path, evaluate(expression, &document, None)?));
    }
    for (path, value) in values {
        match value {
            Some(value) => set_path(&mut document, path, value),
            None => remove_path(&mut document, path),
        }
    }
    Ok(document)
}

fn project(document: Document, projection: &Document) -> Document {
    let include_id = projection.get("_id").map_or(true, |v| truthy(Some(v)));
    let inclusion = projection
        .iter()
        .filter(|(key, _)| key.as_str() != "_id")
        .any(|(_, value)| truthy(Some(value)));

    if inclusion {
        let mut projected = Document::new();
        for (key, value) in &document {
            let keep = if key == "_id" {
                include_id
            } else {
                projection.get(key).is_some_and(|v| truthy(Some(v)))
            };
            if keep {
                projected.insert(key.clone(), value.clone());
            }
        }
        projected
    } else {
        let mut projected = document;
        for (key, _) in projection {
            if key != "_id" || !include_id {
                projected.remove(key);
            }
        }
        projected
    }
}

/// Evaluate an aggregation expression
///
/// Returns `None` for a reference to a missing field.
pub fn evaluate(expression: &Bson, root: &Document, this: Option<&Bson>) -> Result<Option<Bson>> {
    match expression {
        Bson::String(reference) if reference.starts_with("$$this") => {
            let Some(this) = this else {
                return Err(Error::DatabaseError("$$this used outside $filter".to_string()));
            };
            match reference.strip_prefix("$$this.") {
                Some(path) => Ok(this.as_document().and_then(|d| get_path(d, path)).cloned()),
                None => Ok(Some(this.clone())),
            }
        }
        Bson::String(reference) if reference.starts_with('$') => {
            Ok(get_path(root, &reference[1..]).cloned())
        }
        Bson::Document(doc) => {
            if let Some((name, args)) = single_operator(doc) {
                return evaluate_operator(name, args, root, this);
            }
            let mut evaluated = Document::new();
            for (key, value) in doc {
                if let Some(value) = evaluate(value, root, this)? {
                    evaluated.insert(key.clone(), value);
                }
            }
            Ok(Some(Bson::Document(evaluated)))
        }
        Bson::Array(items) => {
            let mut evaluated = Vec::with_capacity(items.len());
            for item in items {
                evaluated.push(evaluate(item, root, this)?.unwrap_or(Bson::Null));
            }
            Ok(Some(Bson::Array(evaluated)))
        }
        other => Ok(Some(other.clone())),
    }
}

fn single_operator(doc: &Document) -> Option<(&str, &Bson)> {
    let mut entries = doc.iter();
    match (entries.next(), entries.next()) {
        (Some((name, args)), None) if name.starts_with('$') => Some((name.as_str(), args)),
        _ => None,
    }
}

fn evaluate_operator(
    name: &str,
    args: &Bson,
    root: &Document,
    this: Option<&Bson>,
) -> Result<Option<Bson>> {
    match name {
        "$literal" => Ok(Some(args.clone())),
        "$ifNull" => {
            let [value, fallback] = argument_pair(name, args)?;
            match evaluate(value, root, this)? {
                None | Some(Bson::Null) => evaluate(fallback, root, this),
                value => Ok(value),
            }
        }
        "$eq" | "$ne" => {
            let [left, right] = argument_pair(name, args)?;
            let left = evaluate(left, root, this)?;
            let right = evaluate(right, root, this)?;
            let equal = strict_eq(left.as_ref(), right.as_ref());
            Ok(Some(Bson::Boolean(if name == "$eq" { equal } else { !equal })))
        }
        "$add" => {
            let values = evaluate_list(name, args, root, this)?;
            add(&values).map(Some)
        }
        "$concatArrays" => {
            let values = evaluate_list(name, args, root, this)?;
            let mut concatenated = Vec::new();
            for value in values {
                match value {
                    Bson::Array(items) => concatenated.extend(items),
                    Bson::Null => return Ok(Some(Bson::Null)),
                    other => {
                        return Err(Error::DatabaseError(format!(
                            "$concatArrays only supports arrays, got {other}"
                        )))
                    }
                }
            }
            Ok(Some(Bson::Array(concatenated)))
        }
        "$setUnion" => {
            let values = evaluate_list(name, args, root, this)?;
            let mut union: Vec<Bson> = Vec::new();
            for value in values {
                let Bson::Array(items) = value else {
                    return Err(Error::DatabaseError(
                        "$setUnion only supports arrays".to_string(),
                    ));
                };
                for item in items {
                    if !union.iter().any(|u| strict_eq(Some(u), Some(&item))) {
                        union.push(item);
                    }
                }
            }
            Ok(Some(Bson::Array(union)))
        }
        "$filter" => {
            let spec = args
                .as_document()
                .ok_or_else(|| Error::DatabaseError("$filter expects a document".to_string()))?;
            let input = spec
                .get("input")
                .ok_or_else(|| Error::DatabaseError("$filter requires input".to_string()))?;
            let cond = spec
                .get("cond")
                .ok_or_else(|| Error::DatabaseError("$filter requires cond".to_string()))?;

            let items = match evaluate(input, root, this)? {
                Some(Bson::Array(items)) => items,
                None | Some(Bson::Null) => return Ok(Some(Bson::Null)),
                Some(other) => {
                    return Err(Error::DatabaseError(format!(
                        "$filter input must be an array, got {other}"
                    )))
                }
            };

            let mut kept = Vec::with_capacity(items.len());
            for item in items {
                if truthy(evaluate(cond, root, Some(&item))?.as_ref()) {
                    kept.push(item);
                }
            }
            Ok(Some(Bson::Array(kept)))
        }
        other => Err(Error::DatabaseError(format!(
            "unsupported expression operator {other}"
        ))),
    }
}

fn argument_pair<'a>(name: &str, args: &'a Bson) -> Result<[&'a Bson; 2]> {
    match args {
        Bson::Array(items) if items.len() == 2 => Ok([&items[0], &items[1]]),
        _ => Err(Error::DatabaseError(format!("{name} expects two arguments"))),
    }
}

fn evaluate_list(
    name: &str,
    args: &Bson,
    root: &Document,
    this: Option<&Bson>,
) -> Result<Vec<Bson>> {
    let Bson::Array(items) = args else {
        return Err(Error::DatabaseError(format!("{name} expects an array")));
    };
    items
        .iter()
        .map(|item| Ok(evaluate(item, root, this)?.unwrap_or(Bson::Null)))
        .collect()
}

fn add(values: &[Bson]) -> Result<Bson> {
    let mut int_sum: i64 = 0;
    let mut float_sum = 0.0;
    let mut all_int32 = true;
    let mut all_int = true;

    for value in values {
        match value {
            Bson::Int32(n) => {
                int_sum = int_sum.saturating_add(i64::from(*n));
                float_sum += f64::from(*n);
            }
            Bson::Int64(n) => {
                all_int32 = false;
                int_sum = int_sum.saturating_add(*n);
                #[allow(clippy::cast_precision_loss)]
                {
                    float_sum += *n as f64;
                }
            }
            Bson::Double(n) => {
                all_int32 = false;
                all_int = false;
                float_sum += n;
            }
            Bson::Null => return Ok(Bson::Null),
            other => {
                return Err(Error::DatabaseError(format!(
                    "$add only supports numbers, got {other}"
                )))
            }
        }
    }

    if all_int32 {
        if let Ok(n) = i32::try_from(int_sum) {
            return Ok(Bson::Int32(n));
        }
    }
    if all_int {
        return Ok(Bson::Int64(int_sum));
    }
    Ok(Bson::Double(float_sum))
}

/// Set a dotted path, creating intermediate documents
pub fn set_path(document: &mut Document, path: &str, value: Bson) {
    match path.split_once('.') {
        None => {
            document.insert(path, value);
        }
        Some((head, rest)) => {
            if !matches!(document.get(head), Some(Bson::Document(_))) {
                document.insert(head, Document::new());
            }
            if let Some(Bson::Document(child)) = document.get_mut(head) {
                set_path(child, rest, value);
            }
        }
    }
}

/// Remove a dotted path if present
pub fn remove_path(document: &mut Document, path: &str) {
    match path.split_once('.') {
        None => {
            document.remove(path);
        }
        Some((head, rest)) => {
            if let Some(Bson::Document(child)) = document.get_mut(head) {
                remove_path(child, rest);
            }
        }
    }
}
