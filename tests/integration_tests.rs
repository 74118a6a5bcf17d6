//! Integration tests for Flowerbase
//!
//! Rules and functions are loaded from an app directory on disk and enforced
//! through guarded in-memory collections.

use std::fs;
use std::sync::Arc;

use bson::{doc, Bson, Document};
use futures::StreamExt;
use tempfile::TempDir;

use flowerbase::AppState;
use flowerbase_common::config::FlowerbaseConfig;
use flowerbase_common::types::ValidationType;
use flowerbase_functions::NativeRuntime;
use flowerbase_guard::{CollectionGuard, FindOptions, InMemoryCollection};
use flowerbase_rules::{
    AuthorizationStateMachine, FieldPermission, Role, ValidationParams,
};

const TODOS_RULES: &str = r#"{
    "roles": [
        {
            "name": "owner",
            "apply_when": { "owner": "%%user.id" },
            "read": true,
            "write": true,
            "insert": true,
            "delete": true
        },
        {
            "name": "published",
            "apply_when": {},
            "document_filters": {
                "read": { "%%true": { "%function": { "name": "isPublished" } } }
            },
            "fields": {
                "_id": { "read": true },
                "title": { "read": true }
            },
            "delete": false
        }
    ],
    "filters": [
        {
            "name": "hide_archived",
            "apply_when": {},
            "query": { "archived": { "$ne": true } }
        }
    ]
}"#;

/// Test helper to lay out an app directory with one guarded collection
fn create_app_dir() -> TempDir {
    let dir = TempDir::new().expect("Failed to create temp dir");

    let todos = dir.path().join("rules/todos");
    fs::create_dir_all(&todos).unwrap();
    fs::write(todos.join("rules.json"), TODOS_RULES).unwrap();

    let functions = dir.path().join("functions");
    fs::create_dir_all(&functions).unwrap();
    fs::write(functions.join("config.json"), r#"[{ "name": "isPublished" }]"#).unwrap();
    fs::write(functions.join("isPublished.js"), "exports = (doc) => doc.published").unwrap();

    dir
}

/// Test helper to load the app with an in-process `isPublished`
fn create_app(dir: &TempDir) -> AppState {
    let mut config = FlowerbaseConfig::default();
    config.app.rules_path = dir.path().join("rules");
    config.app.functions_path = dir.path().join("functions");

    let runtime = NativeRuntime::new();
    runtime.register_fn("isPublished", |args, _ctx| {
        let published = args
            .first()
            .and_then(Bson::as_document)
            .and_then(|d| d.get_bool("published").ok())
            .unwrap_or(false);
        Ok(Bson::Boolean(published))
    });

    AppState::with_runtime(config, Arc::new(runtime)).expect("Failed to load app")
}

fn todos() -> Arc<InMemoryCollection> {
    Arc::new(InMemoryCollection::new("todos").with_documents(vec![
        doc! { "_id": 1, "owner": "alice", "title": "draft", "published": false },
        doc! { "_id": 2, "owner": "bob", "title": "post", "published": true },
        doc! { "_id": 3, "owner": "bob", "title": "private", "published": false },
        doc! { "_id": 4, "owner": "alice", "title": "old", "archived": true },
    ]))
}

fn guard_for(app: &AppState, collection: &Arc<InMemoryCollection>, user: &str) -> CollectionGuard {
    app.guard(collection.clone(), doc! { "id": user }, false)
}

// ============================================================================
// Loading
// ============================================================================

#[test]
fn test_app_loads_rules_and_functions() {
    let dir = create_app_dir();
    let app = create_app(&dir);

    assert_eq!(app.rules().len(), 1);
    assert!(app.functions().registry().contains("isPublished"));
    assert!(app.issues().is_empty());
}

#[test]
fn test_unknown_function_is_reported() {
    let dir = create_app_dir();
    fs::write(dir.path().join("functions/config.json"), "[]").unwrap();
    let app = create_app(&dir);

    let issues = app.issues();
    assert_eq!(issues.len(), 1);
    assert_eq!(issues[0].collection, "todos");
}

// ============================================================================
// Reads
// ============================================================================

#[tokio::test]
async fn test_find_applies_filters_roles_and_redaction() {
    let dir = create_app_dir();
    let app = create_app(&dir);
    let collection = todos();

    let documents = guard_for(&app, &collection, "alice")
        .find(doc! {}, FindOptions::default())
        .await
        .unwrap()
        .to_array()
        .await
        .unwrap();

    // archived rows are filtered out, bob's private row is dropped and his
    // published row is redacted to the readable fields
    assert_eq!(
        documents,
        vec![
            doc! { "_id": 1, "owner": "alice", "title": "draft", "published": false },
            doc! { "_id": 2, "title": "post" },
        ]
    );
}

#[tokio::test]
async fn test_find_one_hides_forbidden_documents() {
    let dir = create_app_dir();
    let app = create_app(&dir);
    let collection = todos();
    let guard = guard_for(&app, &collection, "alice");

    assert_eq!(guard.find_one(doc! { "_id": 3 }).await.unwrap(), Some(Document::new()));
    // pre-filtered and absent rows answer exactly like forbidden ones
    assert_eq!(guard.find_one(doc! { "_id": 4 }).await.unwrap(), Some(Document::new()));
    assert_eq!(guard.find_one(doc! { "_id": 99 }).await.unwrap(), Some(Document::new()));
}

#[tokio::test]
async fn test_system_sees_everything() {
    let dir = create_app_dir();
    let app = create_app(&dir);
    let collection = todos();

    let documents = app
        .guard(collection.clone(), doc! {}, true)
        .find(doc! {}, FindOptions::default())
        .await
        .unwrap()
        .to_array()
        .await
        .unwrap();
    assert_eq!(documents, collection.documents());
}

// ============================================================================
// Writes
// ============================================================================

#[tokio::test]
async fn test_insert_rejected_without_write() {
    let dir = create_app_dir();
    let app = create_app(&dir);
    let collection = todos();
    let guard = guard_for(&app, &collection, "alice");

    let err = guard
        .insert_one(doc! { "_id": 9, "owner": "bob", "title": "forged" })
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "Insert not permitted");
    assert_eq!(collection.documents().len(), 4);

    guard
        .insert_one(doc! { "_id": 9, "owner": "alice", "title": "mine" })
        .await
        .unwrap();
    assert_eq!(collection.documents().len(), 5);
}

#[tokio::test]
async fn test_update_cannot_change_ownership() {
    let dir = create_app_dir();
    let app = create_app(&dir);
    let collection = todos();
    let guard = guard_for(&app, &collection, "alice");

    let err = guard
        .update_one(doc! { "_id": 1 }, doc! { "$set": { "owner": "bob" } })
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "Update not permitted");

    let result = guard
        .update_one(doc! { "_id": 1 }, doc! { "$set": { "title": "final" } })
        .await
        .unwrap();
    assert_eq!(result.modified_count, 1);
    assert_eq!(collection.documents()[0].get_str("title").unwrap(), "final");
}

#[tokio::test]
async fn test_delete_only_touches_permitted_rows() {
    let dir = create_app_dir();
    let app = create_app(&dir);
    let collection = todos();
    let guard = guard_for(&app, &collection, "bob");

    let result = guard.delete_one(doc! { "_id": 1 }).await.unwrap();
    assert_eq!(result.deleted_count, 0);

    let err = guard.delete_many(doc! {}).await.unwrap_err();
    assert_eq!(err.to_string(), "Delete not permitted");

    let result = guard.delete_many(doc! { "owner": "bob" }).await.unwrap();
    assert_eq!(result.deleted_count, 2);
    assert_eq!(collection.documents().len(), 2);
}

// ============================================================================
// Change streams
// ============================================================================

#[tokio::test]
async fn test_watch_suppresses_unreadable_events() {
    let dir = create_app_dir();
    let app = create_app(&dir);
    let collection = todos();
    let mut stream = guard_for(&app, &collection, "alice").watch(vec![]).await.unwrap();

    let system = app.guard(collection.clone(), doc! {}, true);
    system
        .insert_one(doc! { "_id": 10, "owner": "bob", "title": "secret", "published": false })
        .await
        .unwrap();
    system
        .insert_one(doc! { "_id": 11, "owner": "bob", "title": "news", "published": true })
        .await
        .unwrap();

    let event = stream.next().await.unwrap().unwrap();
    assert_eq!(event.document_key, doc! { "_id": 11 });
    assert_eq!(event.full_document, Some(doc! { "_id": 11, "title": "news" }));
}

#[tokio::test]
async fn test_watch_blanks_unreadable_updated_fields() {
    let dir = create_app_dir();
    let app = create_app(&dir);
    let collection = todos();
    let mut stream = guard_for(&app, &collection, "alice").watch(vec![]).await.unwrap();

    // updatedFields alone carry no `published` flag, so the role's document
    // filter rejects them while the full document still passes
    app.guard(collection.clone(), doc! {}, true)
        .update_one(doc! { "_id": 2 }, doc! { "$set": { "title": "edited" } })
        .await
        .unwrap();

    let event = stream.next().await.unwrap().unwrap();
    assert_eq!(event.full_document, Some(doc! { "_id": 2, "title": "edited" }));
    assert_eq!(event.update_description.unwrap().updated_fields, Document::new());
}

// ============================================================================
// State machine
// ============================================================================

#[tokio::test]
async fn test_fresh_machines_agree() {
    let dir = create_app_dir();
    let app = create_app(&dir);

    let role = Role::new("partial").with_field("name", FieldPermission::read_only());
    let roles = std::slice::from_ref(&role);
    let cursor = doc! { "name": "a", "secret": "b" };
    let user = doc! { "id": "alice" };

    let mut results = Vec::new();
    for _ in 0..2 {
        let params = ValidationParams::new(roles, &cursor, &user, ValidationType::Read);
        let result = AuthorizationStateMachine::new(&role, params, &user, app.functions())
            .run_validation()
            .await
            .unwrap();
        results.push((result.status, result.document));
    }

    assert_eq!(results[0], (Some(true), Some(doc! { "name": "a" })));
    assert_eq!(results[0], results[1]);
}
