//! Rule definitions and per-call validation types

use std::collections::{BTreeMap, HashMap};

use bson::{Bson, Document};
use serde::{Deserialize, Serialize};

use flowerbase_common::types::ValidationType;

use crate::machine::Step;

/// Boolean, condition document or function reference
///
/// Function references are condition documents with a single `%%true` or
/// `%%false` key wrapping `{"%function": {"name": ...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PermissionExpression {
    Bool(bool),
    Condition(Document),
}

impl PermissionExpression {
    /// Reference a named function; `expected` selects `%%true` or `%%false`
    pub fn function(name: &str, expected: bool) -> Self {
        let key = if expected { "%%true" } else { "%%false" };
        let mut reference = Document::new();
        reference.insert(key, bson::doc! { "%function": { "name": name } });
        Self::Condition(reference)
    }

    pub fn as_bson(&self) -> Bson {
        match self {
            Self::Bool(b) => Bson::Boolean(*b),
            Self::Condition(doc) => Bson::Document(doc.clone()),
        }
    }
}

impl From<bool> for PermissionExpression {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<Document> for PermissionExpression {
    fn from(value: Document) -> Self {
        Self::Condition(value)
    }
}

/// Per-field grant used for redaction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldPermission {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub write: Option<bool>,
}

impl FieldPermission {
    pub fn read_only() -> Self {
        Self {
            read: Some(true),
            write: None,
        }
    }

    pub fn read_write() -> Self {
        Self {
            read: Some(true),
            write: Some(true),
        }
    }

    /// Whether the grant covers the given access kind
    ///
    /// Writable fields are readable; every non read-like kind needs `write`.
    pub fn permits(&self, validation_type: ValidationType) -> bool {
        let write = self.write.unwrap_or(false);
        if validation_type.is_read_like() {
            self.read.unwrap_or(false) || write
        } else {
            write
        }
    }
}

/// Whole-document gates evaluated before field checks
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentFilters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read: Option<PermissionExpression>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub write: Option<PermissionExpression>,
}

/// Declarative per-collection access policy
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Role {
    #[serde(default)]
    pub name: String,
    /// Condition selecting the role; `{}` always applies
    #[serde(default)]
    pub apply_when: Document,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search: Option<PermissionExpression>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_filters: Option<DocumentFilters>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read: Option<PermissionExpression>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub write: Option<PermissionExpression>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub insert: Option<PermissionExpression>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete: Option<PermissionExpression>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: BTreeMap<String, FieldPermission>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub additional_fields: BTreeMap<String, FieldPermission>,
}

impl Role {
    /// Create a new role that always applies
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    pub fn with_apply_when(mut self, condition: Document) -> Self {
        self.apply_when = condition;
        self
    }

    pub fn with_read(mut self, expression: impl Into<PermissionExpression>) -> Self {
        self.read = Some(expression.into());
        self
    }

    pub fn with_write(mut self, expression: impl Into<PermissionExpression>) -> Self {
        self.write = Some(expression.into());
        self
    }

    pub fn with_insert(mut self, expression: impl Into<PermissionExpression>) -> Self {
        self.insert = Some(expression.into());
        self
    }

    pub fn with_delete(mut self, expression: impl Into<PermissionExpression>) -> Self {
        self.delete = Some(expression.into());
        self
    }

    pub fn with_search(mut self, expression: impl Into<PermissionExpression>) -> Self {
        self.search = Some(expression.into());
        self
    }

    pub fn with_document_filters(mut self, filters: DocumentFilters) -> Self {
        self.document_filters = Some(filters);
        self
    }

    pub fn with_field(mut self, name: &str, permission: FieldPermission) -> Self {
        self.fields.insert(name.to_string(), permission);
        self
    }

    pub fn with_additional_field(mut self, name: &str, permission: FieldPermission) -> Self {
        self.additional_fields.insert(name.to_string(), permission);
        self
    }

    /// Grant for a field, looking at `fields` before `additional_fields`
    pub fn field_permission(&self, field: &str) -> Option<&FieldPermission> {
        self.fields
            .get(field)
            .or_else(|| self.additional_fields.get(field))
    }

    /// Every permission expression the role carries
    pub fn expressions(&self) -> impl Iterator<Item = &PermissionExpression> {
        let filters = self
            .document_filters
            .iter()
            .flat_map(|f| f.read.iter().chain(f.write.iter()));
        self.search
            .iter()
            .chain(self.read.iter())
            .chain(self.write.iter())
            .chain(self.insert.iter())
            .chain(self.delete.iter())
            .chain(filters)
    }
}

/// Row-level pre-filter merged into queries before execution
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub apply_when: Document,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<Document>,
}

impl Filter {
    /// Create a new filter
    pub fn new(name: &str, apply_when: Document, query: Document) -> Self {
        Self {
            name: name.to_string(),
            apply_when,
            query: Some(query),
        }
    }
}

/// Roles and filters of one collection
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CollectionRules {
    #[serde(default)]
    pub roles: Vec<Role>,
    #[serde(default)]
    pub filters: Vec<Filter>,
}

/// Rules keyed by collection name, loaded once at startup
pub type RulesMap = HashMap<String, CollectionRules>;

/// Inputs of a single validation
#[derive(Debug, Clone)]
pub struct ValidationParams<'a> {
    pub roles: &'a [Role],
    /// Candidate document or post-update shape
    pub cursor: &'a Document,
    /// Substitution map handed to expression expansion
    pub expansions: Document,
    pub validation_type: ValidationType,
}

impl<'a> ValidationParams<'a> {
    /// Build params with the standard `%%user` / `%%root` expansions
    pub fn new(
        roles: &'a [Role],
        cursor: &'a Document,
        user: &Document,
        validation_type: ValidationType,
    ) -> Self {
        let expansions = bson::doc! {
            "%%user": user.clone(),
            "%%root": cursor.clone(),
        };
        Self {
            roles,
            cursor,
            expansions,
            validation_type,
        }
    }
}

/// Outcome of a validation run
///
/// `status` is `None` when no stage reached a verdict.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepResult {
    pub status: Option<bool>,
    pub document: Option<Document>,
    pub next_initial_step: Option<Step>,
}

impl StepResult {
    pub fn is_allowed(&self) -> bool {
        self.status == Some(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn test_role_from_json() {
        let role: Role = serde_json::from_value(serde_json::json!({
            "name": "owner",
            "apply_when": { "owner_id": "%%user.id" },
            "read": true,
            "write": { "%%true": { "%function": { "name": "canWrite" } } },
            "fields": { "title": { "read": true } },
            "document_filters": { "read": false },
        }))
        .unwrap();

        assert_eq!(role.name, "owner");
        assert_eq!(role.apply_when, doc! { "owner_id": "%%user.id" });
        assert_eq!(role.read, Some(PermissionExpression::Bool(true)));
        assert_eq!(role.write, Some(PermissionExpression::function("canWrite", true)));
        assert_eq!(role.fields["title"], FieldPermission::read_only());
        assert_eq!(
            role.document_filters.unwrap().read,
            Some(PermissionExpression::Bool(false))
        );
        assert!(role.delete.is_none());
    }

    #[test]
    fn test_field_permission_permits() {
        let read_only = FieldPermission::read_only();
        assert!(read_only.permits(ValidationType::Read));
        assert!(read_only.permits(ValidationType::Search));
        assert!(!read_only.permits(ValidationType::Write));

        let write_only = FieldPermission {
            read: None,
            write: Some(true),
        };
        assert!(write_only.permits(ValidationType::Read));
        assert!(write_only.permits(ValidationType::Insert));
        assert!(!FieldPermission::default().permits(ValidationType::Read));
    }

    #[test]
    fn test_field_permission_lookup_order() {
        let role = Role::new("r")
            .with_field("a", FieldPermission::read_only())
            .with_additional_field("a", FieldPermission::read_write())
            .with_additional_field("b", FieldPermission::read_write());
        assert_eq!(role.field_permission("a"), Some(&FieldPermission::read_only()));
        assert_eq!(role.field_permission("b"), Some(&FieldPermission::read_write()));
        assert_eq!(role.field_permission("c"), None);
    }

    #[test]
    fn test_collection_rules_defaults() {
        let rules: CollectionRules = serde_json::from_str("{}").unwrap();
        assert!(rules.roles.is_empty());
        assert!(rules.filters.is_empty());
    }
}
