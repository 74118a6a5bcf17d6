//! Rule loading and static validation

use std::fs;
use std::path::Path;

use bson::{Bson, Document};
use tracing::{info, warn};

use flowerbase_common::error::{Error, Result};
use flowerbase_functions::FunctionRegistry;

use crate::expression::function_name;
use crate::model::{CollectionRules, PermissionExpression, RulesMap};
use crate::rule::{default_rule, RuleOptions};

const RULES_FILE: &str = "rules.json";

/// Load `<dir>/<collection>/rules.json` for every collection directory
///
/// A missing directory yields no rules, which leaves every collection
/// unguarded.
pub fn load_rules(dir: &Path) -> Result<RulesMap> {
    let mut rules = RulesMap::new();
    if !dir.is_dir() {
        warn!(path = %dir.display(), "Rules directory not found, collections are unguarded");
        return Ok(rules);
    }

    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let file = path.join(RULES_FILE);
        if !path.is_dir() || !file.is_file() {
            continue;
        }
        let Some(collection) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };

        let content = fs::read_to_string(&file)?;
        let parsed: CollectionRules = serde_json::from_str(&content).map_err(|e| {
            Error::InvalidRule(format!("{}: {e}", file.display()))
        })?;
        rules.insert(collection.to_string(), parsed);
    }

    info!(collections = rules.len(), path = %dir.display(), "Rules loaded");
    Ok(rules)
}

/// A problem found by [`validate_rules`]
#[derive(Debug)]
pub struct RuleIssue {
    pub collection: String,
    /// Role or filter name and the property holding the problem
    pub location: String,
    pub error: Error,
}

/// Report unknown operators and, when a registry is given, unknown functions
pub fn validate_rules(rules: &RulesMap, functions: Option<&FunctionRegistry>) -> Vec<RuleIssue> {
    let mut issues = Vec::new();
    let mut collections: Vec<_> = rules.keys().collect();
    collections.sort();

    for collection in collections {
        let rules = &rules[collection];
        let mut report = |location: String, errors: Vec<Error>| {
            issues.extend(errors.into_iter().map(|error| RuleIssue {
                collection: collection.clone(),
                location: location.clone(),
                error,
            }));
        };

        for filter in &rules.filters {
            report(
                format!("filter {}: apply_when", filter.name),
                condition_errors(&filter.apply_when),
            );
        }

        for role in &rules.roles {
            report(
                format!("role {}: apply_when", role.name),
                condition_errors(&role.apply_when),
            );
            for expression in role.expressions() {
                report(
                    format!("role {}", role.name),
                    expression_errors(expression, functions),
                );
            }
        }
    }

    issues
}

fn expression_errors(
    expression: &PermissionExpression,
    functions: Option<&FunctionRegistry>,
) -> Vec<Error> {
    let PermissionExpression::Condition(condition) = expression else {
        return Vec::new();
    };

    let reference = condition
        .get("%%true")
        .or_else(|| condition.get("%%false"));
    let Some(reference) = reference else {
        return condition_errors(condition);
    };

    match function_name(reference) {
        Ok(name) => match functions {
            Some(registry) if !registry.contains(name) => {
                vec![Error::FunctionNotFound(name.to_string())]
            }
            _ => Vec::new(),
        },
        Err(e) => vec![e],
    }
}

fn condition_errors(condition: &Document) -> Vec<Error> {
    let mut errors = Vec::new();
    walk_condition(condition, &mut errors);
    errors
}

fn walk_condition(condition: &Document, errors: &mut Vec<Error>) {
    let empty = Document::new();
    for (key, spec) in condition {
        match (key.as_str(), spec) {
            ("$and" | "$or", Bson::Array(children)) => {
                for child in children {
                    match child {
                        Bson::Document(child) => walk_condition(child, errors),
                        other => errors.push(Error::InvalidRule(format!(
                            "{key} entries must be documents, got {other}"
                        ))),
                    }
                }
            }
            ("$and" | "$or", other) => {
                errors.push(Error::InvalidRule(format!("{key} expects an array, got {other}")));
            }
            _ => {
                if let Err(e) = default_rule(spec, &empty, &RuleOptions::default()) {
                    errors.push(e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;
    use flowerbase_functions::StoredFunction;

    fn write_rules(dir: &Path, collection: &str, json: &str) {
        let coll_dir = dir.join(collection);
        fs::create_dir_all(&coll_dir).unwrap();
        fs::write(coll_dir.join(RULES_FILE), json).unwrap();
    }

    #[test]
    fn test_load_rules() {
        let dir = tempfile::tempdir().unwrap();
        write_rules(
            dir.path(),
            "todos",
            r#"{
                "roles": [
                    { "name": "owner", "apply_when": { "owner_id": "%%user.id" }, "read": true, "write": true },
                    { "name": "reader", "apply_when": {}, "fields": { "title": { "read": true } } }
                ],
                "filters": [
                    { "name": "own", "apply_when": {}, "query": { "owner_id": "%%user.id" } }
                ]
            }"#,
        );
        write_rules(dir.path(), "empty", "{}");
        fs::create_dir_all(dir.path().join("no_rules_file")).unwrap();

        let rules = load_rules(dir.path()).unwrap();
        assert_eq!(rules.len(), 2);
        let todos = &rules["todos"];
        assert_eq!(todos.roles.len(), 2);
        assert_eq!(todos.roles[0].name, "owner");
        assert_eq!(todos.filters[0].query, Some(doc! { "owner_id": "%%user.id" }));
        assert!(rules["empty"].roles.is_empty());
    }

    #[test]
    fn test_missing_dir_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let rules = load_rules(&dir.path().join("missing")).unwrap();
        assert!(rules.is_empty());
    }

    #[test]
    fn test_malformed_rules_file() {
        let dir = tempfile::tempdir().unwrap();
        write_rules(dir.path(), "bad", r#"{ "roles": "nope" }"#);
        let err = load_rules(dir.path()).unwrap_err();
        assert_eq!(err.error_code(), "invalid_rule");
    }

    #[test]
    fn test_validate_rules() {
        let dir = tempfile::tempdir().unwrap();
        write_rules(
            dir.path(),
            "posts",
            r#"{
                "roles": [
                    {
                        "name": "editor",
                        "apply_when": { "$or": [{ "%%user.role": { "$near": 1 } }] },
                        "write": { "%%true": { "%function": { "name": "canEdit" } } },
                        "read": { "%%root.published": { "$eq": true } },
                        "delete": { "%%false": { "%function": { "name": "isLocked" } } }
                    }
                ],
                "filters": [
                    { "name": "f", "apply_when": { "a": { "op": "$bogus", "value": 1 } } }
                ]
            }"#,
        );
        let rules = load_rules(dir.path()).unwrap();

        let mut registry = FunctionRegistry::new();
        registry.insert(StoredFunction::new("isLocked", ""));

        let issues = validate_rules(&rules, Some(&registry));
        let errors: Vec<_> = issues.iter().map(|i| i.error.to_string()).collect();
        assert_eq!(issues.len(), 3, "{errors:?}");
        assert!(issues.iter().all(|i| i.collection == "posts"));
        assert!(matches!(&issues[0].error, Error::OperatorNotFound(op) if op == "$bogus"));
        assert!(matches!(&issues[1].error, Error::OperatorNotFound(op) if op == "$near"));
        assert!(matches!(&issues[2].error, Error::FunctionNotFound(name) if name == "canEdit"));

        assert_eq!(validate_rules(&rules, None).len(), 2);
    }
}
