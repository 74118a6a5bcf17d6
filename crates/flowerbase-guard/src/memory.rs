//! In-memory collection for development and tests

use async_trait::async_trait;
use bson::oid::ObjectId;
use bson::{Bson, Document};
use futures::StreamExt;
use parking_lot::RwLock;
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tracing::debug;

use flowerbase_common::error::{Error, Result};

use crate::backend::{
    ChangeStream, CollectionBackend, DeleteResult, FindOptions, InsertManyResult, InsertOneResult,
    UpdateModifications, UpdateResult,
};
use crate::pipeline::{matches, run_pipeline};
use crate::update::update_to_pipeline;
use crate::watch::ChangeEvent;

const EVENT_CAPACITY: usize = 1024;

/// A collection kept in memory, publishing change events to watchers
pub struct InMemoryCollection {
    name: String,
    documents: RwLock<Vec<Document>>,
    events: broadcast::Sender<ChangeEvent>,
}

impl InMemoryCollection {
    /// Create a new empty collection
    pub fn new(name: &str) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            name: name.to_string(),
            documents: RwLock::new(Vec::new()),
            events,
        }
    }

    /// Seed documents without publishing events
    pub fn with_documents(self, documents: Vec<Document>) -> Self {
        self.documents.write().extend(documents);
        self
    }

    /// Snapshot of the stored documents
    pub fn documents(&self) -> Vec<Document> {
        self.documents.read().clone()
    }

    fn publish(&self, events: Vec<ChangeEvent>) {
        for event in events {
            // no subscribers is fine
            let _ = self.events.send(event);
        }
    }

    fn prepare_insert(&self, stored: &[Document], mut document: Document) -> Result<Document> {
        if !document.contains_key("_id") {
            document.insert("_id", ObjectId::new());
        }
        let id = document.get("_id").cloned().unwrap_or(Bson::Null);
        if stored.iter().any(|d| d.get("_id") == Some(&id)) {
            return Err(Error::DatabaseError(format!(
                "duplicate key in {}: _id {id}",
                self.name
            )));
        }
        Ok(document)
    }

    fn update(&self, filter: &Document, update: UpdateModifications, many: bool) -> Result<UpdateResult> {
        let stages = match update {
            UpdateModifications::Document(update) => update_to_pipeline(&update)?,
            UpdateModifications::Pipeline(stages) => stages,
        };

        let mut result = UpdateResult::default();
        let mut events = Vec::new();
        {
            let mut documents = self.documents.write();
            for document in documents.iter_mut() {
                if !matches(filter, document)? {
                    continue;
                }
                result.matched_count += 1;

                let updated = run_pipeline(vec![document.clone()], &stages)?
                    .pop()
                    .ok_or_else(|| {
                        Error::DatabaseError("update pipeline removed the document".to_string())
                    })?;
                if updated != *document {
                    result.modified_count += 1;
                    events.push(ChangeEvent::update(&self.name, document, &updated));
                    *document = updated;
                }
                if !many {
                    break;
                }
            }
        }

        self.publish(events);
        Ok(result)
    }

    fn delete(&self, filter: &Document, many: bool) -> Result<DeleteResult> {
        let mut removed = Vec::new();
        {
            let mut documents = self.documents.write();
            let mut kept = Vec::with_capacity(documents.len());
            for document in documents.drain(..) {
                let remove = (many || removed.is_empty()) && matches(filter, &document)?;
                if remove {
                    removed.push(document);
                } else {
                    kept.push(document);
                }
            }
            *documents = kept;
        }

        let deleted_count = removed.len() as u64;
        self.publish(
            removed
                .iter()
                .map(|document| ChangeEvent::delete(&self.name, document))
                .collect(),
        );
        Ok(DeleteResult { deleted_count })
    }
}

#[async_trait]
impl CollectionBackend for InMemoryCollection {
    fn name(&self) -> &str {
        &self.name
    }

    async fn find_one(&self, filter: Document) -> Result<Option<Document>> {
        for document in self.documents.read().iter() {
            if matches(&filter, document)? {
                return Ok(Some(document.clone()));
            }
        }
        Ok(None)
    }

    async fn find(&self, filter: Document, options: FindOptions) -> Result<Vec<Document>> {
        let mut found = Vec::new();
        for document in self.documents.read().iter() {
            if matches(&filter, document)? {
                found.push(document.clone());
            }
        }
        Ok(found
            .into_iter()
            .skip(options.skip.unwrap_or(0))
            .take(options.limit.unwrap_or(usize::MAX))
            .collect())
    }

    async fn insert_one(&self, document: Document) -> Result<InsertOneResult> {
        let document = {
            let mut documents = self.documents.write();
            let document = self.prepare_insert(&documents, document)?;
            documents.push(document.clone());
            document
        };

        let inserted_id = document.get("_id").cloned().unwrap_or(Bson::Null);
        self.publish(vec![ChangeEvent::insert(&self.name, &document)]);
        Ok(InsertOneResult { inserted_id })
    }

    async fn insert_many(&self, documents: Vec<Document>) -> Result<InsertManyResult> {
        let inserted = {
            let mut stored = self.documents.write();
            let mut prepared: Vec<Document> = Vec::with_capacity(documents.len());
            for document in documents {
                let document = self.prepare_insert(&stored, document)?;
                if prepared.iter().any(|d| d.get("_id") == document.get("_id")) {
                    return Err(Error::DatabaseError(format!(
                        "duplicate key in {}: batch repeats an _id",
                        self.name
                    )));
                }
                prepared.push(document);
            }
            stored.extend(prepared.iter().cloned());
            prepared
        };

        let inserted_ids = inserted
            .iter()
            .map(|d| d.get("_id").cloned().unwrap_or(Bson::Null))
            .collect();
        self.publish(
            inserted
                .iter()
                .map(|d| ChangeEvent::insert(&self.name, d))
                .collect(),
        );
        Ok(InsertManyResult { inserted_ids })
    }

    async fn update_one(&self, filter: Document, update: UpdateModifications) -> Result<UpdateResult> {
        self.update(&filter, update, false)
    }

    async fn update_many(&self, filter: Document, update: UpdateModifications) -> Result<UpdateResult> {
        self.update(&filter, update, true)
    }

    async fn delete_one(&self, filter: Document) -> Result<DeleteResult> {
        self.delete(&filter, false)
    }

    async fn delete_many(&self, filter: Document) -> Result<DeleteResult> {
        self.delete(&filter, true)
    }

    async fn aggregate(&self, pipeline: Vec<Document>) -> Result<Vec<Document>> {
        let documents = self.documents();
        run_pipeline(documents, &pipeline)
    }

    async fn watch(&self, pipeline: Vec<Document>) -> Result<ChangeStream> {
        let mut filters = Vec::with_capacity(pipeline.len());
        for stage in pipeline {
            match stage.get("$match") {
                Some(Bson::Document(filter)) if stage.len() == 1 => filters.push(filter.clone()),
                _ => {
                    return Err(Error::DatabaseError(
                        "change streams only support $match stages".to_string(),
                    ))
                }
            }
        }

        debug!(collection = %self.name, stages = filters.len(), "Opening change stream");
        let stream = BroadcastStream::new(self.events.subscribe()).filter_map(move |event| {
            let item = match event {
                Ok(event) => {
                    let document = event.to_document();
                    let mut passed = Ok(true);
                    for filter in &filters {
                        match matches(filter, &document) {
                            Ok(true) => continue,
                            other => {
                                passed = other;
                                break;
                            }
                        }
                    }
                    match passed {
                        Ok(true) => Some(Ok(event)),
                        Ok(false) => None,
                        Err(e) => Some(Err(e)),
                    }
                }
                Err(BroadcastStreamRecvError::Lagged(skipped)) => Some(Err(Error::DatabaseError(
                    format!("change stream lagged, {skipped} events skipped"),
                ))),
            };
            futures::future::ready(item)
        });

        Ok(stream.boxed())
    }
}
