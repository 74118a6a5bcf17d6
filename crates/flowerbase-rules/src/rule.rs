//! Condition DSL evaluation
//!
//! A condition is a document whose keys are either the combinators `$and` /
//! `$or` or field paths. A path maps to an operator spec: either an explicit
//! operator document (`{"$gt": 3}`, `{"op": "$in", "value": [...]}`) or a bare
//! value from which the operator is inferred.

use bson::{Bson, Document};

use flowerbase_common::error::{Error, Result};

use crate::operators::Operator;
use crate::value::get_path;

const REF_PREFIX: &str = "$ref:";

/// Options for [`check_rule`] and [`get_keys`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleOptions {
    /// Prepended to every plain path as `<prefix>.<path>`
    pub prefix: Option<String>,
}

impl RuleOptions {
    pub fn with_prefix(prefix: &str) -> Self {
        Self {
            prefix: Some(prefix.to_string()),
        }
    }
}

/// An operator together with its expected value and flags
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct LeafRule<'a> {
    pub op: Operator,
    pub expected: ExpectedValue<'a>,
    pub options: Option<&'a Bson>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ExpectedValue<'a> {
    Literal(&'a Bson),
    Owned(Bson),
    Missing,
}

impl ExpectedValue<'_> {
    fn value(&self) -> Option<&Bson> {
        match self {
            ExpectedValue::Literal(value) => Some(value),
            ExpectedValue::Owned(value) => Some(value),
            ExpectedValue::Missing => None,
        }
    }
}

/// Evaluate a condition against `data`
///
/// `$and` / `$or` with an empty list are true. A document with several
/// field keys must satisfy all of them; the empty document always matches.
pub fn check_rule(condition: &Document, data: &Document, options: &RuleOptions) -> Result<bool> {
    for (key, spec) in condition {
        let matched = match key.as_str() {
            "$and" => {
                let mut all = true;
                for child in sub_conditions(key, spec)? {
                    if !check_rule(child, data, options)? {
                        all = false;
                        break;
                    }
                }
                all
            }
            "$or" => {
                let children = sub_conditions(key, spec)?;
                let mut any = children.is_empty();
                for child in children {
                    if check_rule(child, data, options)? {
                        any = true;
                        break;
                    }
                }
                any
            }
            path => check_leaf(path, spec, data, options)?,
        };

        if !matched {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Collect the resolved field paths a condition reads
///
/// Returns `None` when the condition is not a document.
pub fn get_keys(condition: &Bson, options: &RuleOptions) -> Option<Vec<String>> {
    let Bson::Document(condition) = condition else {
        return None;
    };

    let mut keys = Vec::new();
    for (key, spec) in condition {
        match key.as_str() {
            "$and" | "$or" => {
                if let Bson::Array(children) = spec {
                    for child in children {
                        keys.extend(get_keys(child, options).unwrap_or_default());
                    }
                }
            }
            path => keys.push(resolve_path(path, options)),
        }
    }
    Some(keys)
}

fn sub_conditions<'a>(key: &str, spec: &'a Bson) -> Result<Vec<&'a Document>> {
    let Bson::Array(children) = spec else {
        return Err(Error::InvalidRule(format!("{key} expects an array")));
    };
    children
        .iter()
        .map(|child| match child {
            Bson::Document(doc) => Ok(doc),
            other => Err(Error::InvalidRule(format!(
                "{key} entries must be documents, got {other}"
            ))),
        })
        .collect()
}

/// Resolve a rule path: `^path` ignores the prefix, `$path` is a verbatim
/// meta token, anything else is prefixed when a prefix is configured
pub(crate) fn resolve_path(path: &str, options: &RuleOptions) -> String {
    if let Some(stripped) = path.strip_prefix('^') {
        return stripped.to_string();
    }
    if path.starts_with('$') {
        return path.to_string();
    }
    match &options.prefix {
        Some(prefix) if !prefix.is_empty() => format!("{prefix}.{path}"),
        _ => path.to_string(),
    }
}

fn check_leaf(path: &str, spec: &Bson, data: &Document, options: &RuleOptions) -> Result<bool> {
    let resolved = resolve_path(path, options);
    let actual = get_path(data, &resolved);
    let leaf = default_rule(spec, data, options)?;
    leaf.op.apply(actual, leaf.expected.value(), leaf.options)
}

/// Infer the operator for a rule spec from its kind
pub(crate) fn default_rule<'a>(
    spec: &'a Bson,
    data: &Document,
    options: &RuleOptions,
) -> Result<LeafRule<'a>> {
    let (op, expected, flags) = match spec {
        Bson::Null | Bson::Undefined => (Operator::Eq, Some(spec), None),
        Bson::Boolean(_) => (Operator::Exists, Some(spec), None),
        Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) | Bson::Decimal128(_) => {
            (Operator::Eq, Some(spec), None)
        }
        Bson::String(s) if s == "$required" || s == "$exists" => {
            return Ok(LeafRule {
                op: Operator::Exists,
                expected: ExpectedValue::Owned(Bson::Boolean(true)),
                options: None,
            });
        }
        Bson::String(_) => (Operator::Eq, Some(spec), None),
        Bson::Array(_) => (Operator::In, Some(spec), None),
        Bson::RegularExpression(_) => (Operator::Regex, Some(spec), None),
        Bson::Document(doc) => operator_document(doc)?,
        _ => (Operator::Eq, Some(spec), None),
    };

    Ok(LeafRule {
        op,
        expected: resolve_expected(expected, data, options),
        options: flags,
    })
}

type OperatorParts<'a> = (Operator, Option<&'a Bson>, Option<&'a Bson>);

/// `{"op": "$gt", "value": 3, "opt": "i"}` or `{"$gt": 3, "$options": "i"}`
fn operator_document(doc: &Document) -> Result<OperatorParts<'_>> {
    if let Some(op) = doc.get("op") {
        let Bson::String(name) = op else {
            return Err(Error::InvalidRule(format!("op must be a string, got {op}")));
        };
        return Ok((name.parse()?, doc.get("value"), doc.get("opt")));
    }

    let Some((name, expected)) = doc.iter().next() else {
        return Err(Error::OperatorNotFound("<empty>".to_string()));
    };
    let flags = doc.get("$options").or_else(|| doc.get("opt"));
    Ok((name.parse()?, Some(expected), flags))
}

fn resolve_expected<'a>(
    expected: Option<&'a Bson>,
    data: &Document,
    options: &RuleOptions,
) -> ExpectedValue<'a> {
    match expected {
        Some(Bson::String(s)) if s.starts_with(REF_PREFIX) => {
            let path = resolve_path(&s[REF_PREFIX.len()..], options);
            get_path(data, &path).map_or(ExpectedValue::Missing, |v| ExpectedValue::Owned(v.clone()))
        }
        Some(value) => ExpectedValue::Literal(value),
        None => ExpectedValue::Missing,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::{bson, doc, DateTime};

    fn check(condition: Document, data: Document) -> bool {
        check_rule(&condition, &data, &RuleOptions::default()).unwrap()
    }

    #[test]
    fn test_empty_combinators_are_true() {
        assert!(check(doc! { "$and": [] }, doc! {}));
        assert!(check(doc! { "$or": [] }, doc! {}));
        assert!(check(doc! {}, doc! { "a": 1 }));
    }

    #[test]
    fn test_single_element_combinators() {
        let data = doc! { "status": "open", "count": 3 };
        for condition in [
            doc! { "status": "open" },
            doc! { "status": "closed" },
            doc! { "count": { "$gt": 2 } },
            doc! { "missing": "$exists" },
        ] {
            let direct = check(condition.clone(), data.clone());
            assert_eq!(check(doc! { "$and": [condition.clone()] }, data.clone()), direct);
            assert_eq!(check(doc! { "$or": [condition] }, data.clone()), direct);
        }
    }

    #[test]
    fn test_and_or() {
        let data = doc! { "a": 1, "b": 2 };
        assert!(check(doc! { "$and": [{ "a": 1 }, { "b": 2 }] }, data.clone()));
        assert!(!check(doc! { "$and": [{ "a": 1 }, { "b": 3 }] }, data.clone()));
        assert!(check(doc! { "$or": [{ "a": 9 }, { "b": 2 }] }, data.clone()));
        assert!(!check(doc! { "$or": [{ "a": 9 }, { "b": 9 }] }, data));
    }

    #[test]
    fn test_multi_key_condition_is_conjunction() {
        let data = doc! { "a": 1, "b": 2 };
        assert!(check(doc! { "a": 1, "b": 2 }, data.clone()));
        assert!(!check(doc! { "a": 1, "b": 5 }, data));
    }

    #[test]
    fn test_implicit_operators() {
        let data = doc! { "n": 5, "s": "x", "tags": ["a", "b"], "blank": "  " };
        // number -> $eq
        assert!(check(doc! { "n": 5 }, data.clone()));
        // string -> $eq, "$required" -> $exists
        assert!(check(doc! { "s": "x" }, data.clone()));
        assert!(check(doc! { "s": "$required" }, data.clone()));
        assert!(!check(doc! { "blank": "$exists" }, data.clone()));
        // boolean -> $exists
        assert!(check(doc! { "s": true }, data.clone()));
        assert!(check(doc! { "missing": false }, data.clone()));
        // array -> $in
        assert!(check(doc! { "tags": ["b", "z"] }, data.clone()));
        assert!(check(doc! { "s": ["x", "y"] }, data.clone()));
        // explicit op document
        assert!(check(doc! { "n": { "op": "$gte", "value": 5 } }, data.clone()));
        assert!(check(doc! { "s": { "op": "$regex", "value": "X", "opt": "i" } }, data));
    }

    #[test]
    fn test_unknown_operator() {
        let err = check_rule(&doc! { "n": { "$near": 1 } }, &doc! {}, &RuleOptions::default())
            .unwrap_err();
        assert!(matches!(err, Error::OperatorNotFound(op) if op == "$near"));
    }

    #[test]
    fn test_ref_values() {
        let data = doc! { "owner": "u1", "editor": "u1", "other": "u2", "limit": 3, "used": 2 };
        assert!(check(doc! { "owner": "$ref:editor" }, data.clone()));
        assert!(!check(doc! { "owner": "$ref:other" }, data.clone()));
        assert!(check(doc! { "used": { "$lt": "$ref:limit" } }, data.clone()));
        assert!(!check(doc! { "owner": "$ref:nobody" }, data));
    }

    #[test]
    fn test_prefix_resolution() {
        let data = doc! {
            "%%root": { "owner": "u1" },
            "%%user": { "id": "u1" },
            "$meta": 1,
        };
        let options = RuleOptions::with_prefix("%%root");

        assert!(check_rule(&doc! { "owner": "$ref:^%%user.id" }, &data, &options).unwrap());
        assert!(check_rule(&doc! { "^%%user.id": "u1" }, &data, &options).unwrap());
        assert!(check_rule(&doc! { "$meta": 1 }, &data, &options).unwrap());
        assert!(!check_rule(&doc! { "owner": "u2" }, &data, &options).unwrap());
    }

    #[test]
    fn test_exists_matches_emptiness() {
        let values = vec![
            None,
            Some(Bson::Null),
            Some(bson!("")),
            Some(bson!("  ")),
            Some(bson!("x")),
            Some(bson!(0)),
            Some(bson!([])),
            Some(bson!([1])),
            Some(bson!({})),
            Some(bson!({ "a": 1 })),
            Some(Bson::DateTime(DateTime::now())),
            Some(Bson::JavaScriptCode("() => 1".to_string())),
        ];

        for value in values {
            let mut data = Document::new();
            if let Some(v) = value.clone() {
                data.insert("v", v);
            }
            let exists = check(doc! { "v": { "$exists": true } }, data);
            assert_eq!(exists, !crate::value::is_empty(value.as_ref()));
        }
    }

    #[test]
    fn test_in_nin_complement() {
        let data = doc! { "tags": ["a", "b"], "one": 1 };
        for expected in [bson!(["a"]), bson!(["z"]), bson!([]), bson!(1)] {
            for path in ["tags", "one", "missing"] {
                let mut is_in = Document::new();
                is_in.insert(path, doc! { "$in": expected.clone() });
                let mut not_in = Document::new();
                not_in.insert(path, doc! { "$nin": expected.clone() });
                let is_in = check(is_in, data.clone());
                let not_in = check(not_in, data.clone());
                assert_ne!(is_in, not_in);
            }
        }
    }

    #[test]
    fn test_get_keys() {
        let condition = bson!({
            "$and": [{ "a": 1 }, { "$or": [{ "b.c": 2 }, { "^%%user.id": "x" }] }],
            "d": true,
        });
        let keys = get_keys(&condition, &RuleOptions::with_prefix("%%root")).unwrap();
        assert_eq!(keys, vec!["%%root.a", "%%root.b.c", "%%user.id", "%%root.d"]);
        assert_eq!(get_keys(&bson!("nope"), &RuleOptions::default()), None);
    }
}
