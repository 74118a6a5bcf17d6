//! MongoDB collection boundary
//!
//! The guard talks to storage only through [`CollectionBackend`], which
//! mirrors the call shapes of the native driver's collection handle.

use async_trait::async_trait;
use bson::{Bson, Document};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use flowerbase_common::error::Result;

use crate::watch::ChangeEvent;

/// Live change events of a collection
pub type ChangeStream = BoxStream<'static, Result<ChangeEvent>>;

/// Options for `find`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FindOptions {
    pub skip: Option<usize>,
    pub limit: Option<usize>,
}

impl FindOptions {
    pub fn limit(limit: usize) -> Self {
        Self {
            skip: None,
            limit: Some(limit),
        }
    }
}

/// Update operators document or aggregation pipeline
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateModifications {
    Document(Document),
    Pipeline(Vec<Document>),
}

impl From<Document> for UpdateModifications {
    fn from(update: Document) -> Self {
        Self::Document(update)
    }
}

impl From<Vec<Document>> for UpdateModifications {
    fn from(pipeline: Vec<Document>) -> Self {
        Self::Pipeline(pipeline)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsertOneResult {
    pub inserted_id: Bson,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsertManyResult {
    pub inserted_ids: Vec<Bson>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateResult {
    pub matched_count: u64,
    pub modified_count: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteResult {
    pub deleted_count: u64,
}

/// A MongoDB collection
///
/// Implementations must keep `find` results in storage order so callers can
/// rely on stable ordering.
#[async_trait]
pub trait CollectionBackend: Send + Sync {
    /// Collection name
    fn name(&self) -> &str;

    async fn find_one(&self, filter: Document) -> Result<Option<Document>>;

    async fn find(&self, filter: Document, options: FindOptions) -> Result<Vec<Document>>;

    async fn insert_one(&self, document: Document) -> Result<InsertOneResult>;

    async fn insert_many(&self, documents: Vec<Document>) -> Result<InsertManyResult>;

    async fn update_one(
        &self,
        filter: Document,
        update: UpdateModifications,
    ) -> Result<UpdateResult>;

    async fn update_many(
        &self,
        filter: Document,
        update: UpdateModifications,
    ) -> Result<UpdateResult>;

    async fn delete_one(&self, filter: Document) -> Result<DeleteResult>;

    async fn delete_many(&self, filter: Document) -> Result<DeleteResult>;

    async fn aggregate(&self, pipeline: Vec<Document>) -> Result<Vec<Document>>;

    /// Open a change stream filtered by `pipeline`
    async fn watch(&self, pipeline: Vec<Document>) -> Result<ChangeStream>;
}
