//! Change stream events

use bson::{doc, Bson, Document};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationType {
    Insert,
    Update,
    Delete,
}

impl OperationType {
    pub fn as_str(self) -> &'static str {
        match self {
            OperationType::Insert => "insert",
            OperationType::Update => "update",
            OperationType::Delete => "delete",
        }
    }
}

/// Fields touched by an update
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateDescription {
    pub updated_fields: Document,
    pub removed_fields: Vec<String>,
}

/// A collection change event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEvent {
    /// Unique event ID
    pub id: Uuid,
    pub operation_type: OperationType,
    /// Collection name
    pub coll: String,
    /// `{_id: ...}` of the changed document
    pub document_key: Document,
    /// Post-change document (inserts and updates)
    pub full_document: Option<Document>,
    pub update_description: Option<UpdateDescription>,
    pub cluster_time: DateTime<Utc>,
}

impl ChangeEvent {
    fn new(operation_type: OperationType, coll: &str, document: &Document) -> Self {
        let document_key = match document.get("_id") {
            Some(id) => doc! { "_id": id.clone() },
            None => Document::new(),
        };
        Self {
            id: Uuid::new_v4(),
            operation_type,
            coll: coll.to_string(),
            document_key,
            full_document: None,
            update_description: None,
            cluster_time: Utc::now(),
        }
    }

    /// Create an insert event
    pub fn insert(coll: &str, document: &Document) -> Self {
        Self {
            full_document: Some(document.clone()),
            ..Self::new(OperationType::Insert, coll, document)
        }
    }

    /// Create an update event from the documents before and after the change
    pub fn update(coll: &str, before: &Document, after: &Document) -> Self {
        let updated_fields: Document = after
            .iter()
            .filter(|(key, value)| before.get(key.as_str()) != Some(*value))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        let removed_fields = before
            .keys()
            .filter(|key| !after.contains_key(key.as_str()))
            .cloned()
            .collect();

        Self {
            full_document: Some(after.clone()),
            update_description: Some(UpdateDescription {
                updated_fields,
                removed_fields,
            }),
            ..Self::new(OperationType::Update, coll, after)
        }
    }

    /// Create a delete event
    pub fn delete(coll: &str, document: &Document) -> Self {
        Self::new(OperationType::Delete, coll, document)
    }

    /// Event in the shape change stream pipelines match against
    pub fn to_document(&self) -> Document {
        let mut document = doc! {
            "operationType": self.operation_type.as_str(),
            "ns": { "coll": self.coll.clone() },
            "documentKey": self.document_key.clone(),
        };
        if let Some(full_document) = &self.full_document {
            document.insert("fullDocument", full_document.clone());
        }
        if let Some(description) = &self.update_description {
            let removed: Vec<Bson> = description
                .removed_fields
                .iter()
                .map(|f| Bson::String(f.clone()))
                .collect();
            document.insert(
                "updateDescription",
                doc! {
                    "updatedFields": description.updated_fields.clone(),
                    "removedFields": removed,
                },
            );
        }
        document
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_description() {
        let before = doc! { "_id": 1, "a": 1, "b": 2, "gone": true };
        let after = doc! { "_id": 1, "a": 1, "b": 3, "new": "x" };
        let event = ChangeEvent::update("todos", &before, &after);

        assert_eq!(event.operation_type, OperationType::Update);
        assert_eq!(event.document_key, doc! { "_id": 1 });
        let description = event.update_description.unwrap();
        assert_eq!(description.updated_fields, doc! { "b": 3, "new": "x" });
        assert_eq!(description.removed_fields, vec!["gone".to_string()]);
    }

    #[test]
    fn test_to_document() {
        let event = ChangeEvent::insert("todos", &doc! { "_id": 7, "owner": "u1" });
        let document = event.to_document();
        assert_eq!(document.get_str("operationType").unwrap(), "insert");
        assert_eq!(
            document.get_document("fullDocument").unwrap(),
            &doc! { "_id": 7, "owner": "u1" }
        );
        assert!(!document.contains_key("updateDescription"));

        let delete = ChangeEvent::delete("todos", &doc! { "_id": 7 }).to_document();
        assert!(!delete.contains_key("fullDocument"));
        assert_eq!(delete.get_document("documentKey").unwrap(), &doc! { "_id": 7 });
    }
}
