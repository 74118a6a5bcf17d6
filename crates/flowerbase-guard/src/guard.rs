//! Rule-enforcing collection wrapper
//!
//! [`get_operators`] wraps a collection so every CRUD and watch call is
//! pre-filtered with the collection's row-level filters and every document
//! read or written is validated against the winning role.
//!
//! Two behaviours are intentional and must not be "fixed" silently:
//! - a denied `find_one` yields an empty document and denied `find` results
//!   are dropped, so a forbidden document looks like a missing one;
//! - `aggregate` is passed through without any rule enforcement.

use std::sync::Arc;

use bson::{doc, Bson, Document};
use futures::future::{join_all, try_join_all};
use futures::StreamExt;
use tracing::debug;

use flowerbase_common::error::{Error, Result};
use flowerbase_common::types::ValidationType;
use flowerbase_functions::FunctionCaller;
use flowerbase_rules::{
    and_query, get_formatted_query, get_winning_role, AuthorizationStateMachine, CollectionRules,
    Filter, Role, RulesMap, ValidationParams,
};

use crate::backend::{
    ChangeStream, CollectionBackend, DeleteResult, FindOptions, InsertManyResult, InsertOneResult,
    UpdateModifications, UpdateResult,
};
use crate::update::update_to_pipeline;
use crate::watch::ChangeEvent;

/// Who is calling and under which rules
pub struct GuardOptions {
    pub rules: Arc<RulesMap>,
    pub coll_name: String,
    pub user: Document,
    /// Bypass every rule
    pub run_as_system: bool,
    pub functions: Arc<dyn FunctionCaller>,
    /// Log every state machine step
    pub enable_log: bool,
}

/// Wrap `collection` with rule enforcement for one caller
pub fn get_operators(collection: Arc<dyn CollectionBackend>, options: GuardOptions) -> CollectionGuard {
    CollectionGuard {
        collection,
        rules: options.rules,
        coll_name: options.coll_name,
        user: options.user,
        run_as_system: options.run_as_system,
        functions: options.functions,
        enable_log: options.enable_log,
    }
}

/// Guarded view of a collection with the native driver's call shapes
#[derive(Clone)]
pub struct CollectionGuard {
    collection: Arc<dyn CollectionBackend>,
    rules: Arc<RulesMap>,
    coll_name: String,
    user: Document,
    run_as_system: bool,
    functions: Arc<dyn FunctionCaller>,
    enable_log: bool,
}

impl CollectionGuard {
    pub fn coll_name(&self) -> &str {
        &self.coll_name
    }

    pub fn is_system(&self) -> bool {
        self.run_as_system
    }

    fn collection_rules(&self) -> Option<&CollectionRules> {
        self.rules.get(&self.coll_name)
    }

    fn roles(&self) -> &[Role] {
        self.collection_rules().map_or(&[], |rules| rules.roles.as_slice())
    }

    fn filters(&self) -> &[Filter] {
        self.collection_rules()
            .map_or(&[], |rules| rules.filters.as_slice())
    }

    /// Caller filter combined with the first applicable row-level filter
    fn guarded_query(&self, filter: &Document) -> Result<Document> {
        Ok(and_query(get_formatted_query(
            self.filters(),
            filter,
            &self.user,
        )?))
    }

    /// Validate one document
    ///
    /// Returns the permitted (possibly redacted) document, or `None` when
    /// access is denied. Without a winning role the document passes
    /// unchanged.
    pub async fn validate(
        &self,
        document: &Document,
        validation_type: ValidationType,
    ) -> Result<Option<Document>> {
        let roles = self.roles();
        let Some(role) = get_winning_role(document, &self.user, roles)? else {
            return Ok(Some(document.clone()));
        };

        let params = ValidationParams::new(roles, document, &self.user, validation_type);
        let result = AuthorizationStateMachine::new(role, params, &self.user, self.functions.as_ref())
            .with_log(self.enable_log)
            .run_validation()
            .await?;

        debug!(
            collection = %self.coll_name,
            role = %role.name,
            validation_type = %validation_type,
            status = ?result.status,
            "Document validated"
        );
        Ok(if result.is_allowed() {
            result.document
        } else {
            None
        })
    }

    /// Require the validated document to equal the submitted one
    async fn check_unchanged(&self, document: &Document, validation_type: ValidationType) -> Result<()> {
        match self.validate(document, validation_type).await? {
            Some(validated) if validated == *document => Ok(()),
            _ => Err(denied(validation_type)),
        }
    }

    pub async fn find_one(&self, filter: Document) -> Result<Option<Document>> {
        if self.run_as_system {
            return self.collection.find_one(filter).await;
        }

        let query = self.guarded_query(&filter)?;
        let Some(document) = self.collection.find_one(query).await? else {
            // with rules in place a miss looks the same as a denial
            return Ok(if self.roles().is_empty() {
                None
            } else {
                Some(Document::new())
            });
        };
        let validated = self.validate(&document, ValidationType::Read).await?;
        Ok(Some(validated.unwrap_or_default()))
    }

    pub async fn find(&self, filter: Document, options: FindOptions) -> Result<FindCursor> {
        if self.run_as_system {
            let documents = self.collection.find(filter, options).await?;
            return Ok(FindCursor {
                documents,
                guard: None,
            });
        }

        let query = self.guarded_query(&filter)?;
        let documents = self.collection.find(query, options).await?;
        Ok(FindCursor {
            documents,
            guard: Some(self.clone()),
        })
    }

    pub async fn insert_one(&self, document: Document) -> Result<InsertOneResult> {
        if !self.run_as_system {
            self.check_unchanged(&document, ValidationType::Insert).await?;
        }
        self.collection.insert_one(document).await
    }

    /// All documents must pass or nothing is written
    pub async fn insert_many(&self, documents: Vec<Document>) -> Result<InsertManyResult> {
        if !self.run_as_system {
            try_join_all(
                documents
                    .iter()
                    .map(|document| self.check_unchanged(document, ValidationType::Insert)),
            )
            .await?;
        }
        self.collection.insert_many(documents).await
    }

    pub async fn update_one(
        &self,
        filter: Document,
        update: impl Into<UpdateModifications>,
    ) -> Result<UpdateResult> {
        self.update(filter, update.into(), false).await
    }

    pub async fn update_many(
        &self,
        filter: Document,
        update: impl Into<UpdateModifications>,
    ) -> Result<UpdateResult> {
        self.update(filter, update.into(), true).await
    }

    /// Validate the post-update shape of every targeted document, then write
    async fn update(
        &self,
        filter: Document,
        update: UpdateModifications,
        many: bool,
    ) -> Result<UpdateResult> {
        if self.run_as_system {
            return self.write_update(filter, update, many).await;
        }

        let query = self.guarded_query(&filter)?;
        let stages = match &update {
            UpdateModifications::Document(operators) => update_to_pipeline(operators)?,
            UpdateModifications::Pipeline(stages) => stages.clone(),
        };

        let mut pipeline = vec![doc! { "$match": query.clone() }];
        if !many {
            pipeline.push(doc! { "$limit": 1 });
        }
        pipeline.extend(stages);

        let updated = self.collection.aggregate(pipeline).await?;
        try_join_all(
            updated
                .iter()
                .map(|document| self.check_unchanged(document, ValidationType::Write)),
        )
        .await?;

        self.write_update(query, update, many).await
    }

    async fn write_update(
        &self,
        filter: Document,
        update: UpdateModifications,
        many: bool,
    ) -> Result<UpdateResult> {
        if many {
            self.collection.update_many(filter, update).await
        } else {
            self.collection.update_one(filter, update).await
        }
    }

    /// Delete the first matching document the caller may delete
    pub async fn delete_one(&self, filter: Document) -> Result<DeleteResult> {
        if self.run_as_system {
            return self.collection.delete_one(filter).await;
        }

        let query = self.guarded_query(&filter)?;
        let candidates = self.collection.find(query.clone(), FindOptions::default()).await?;
        let results = join_all(
            candidates
                .iter()
                .map(|document| self.validate(document, ValidationType::Delete)),
        )
        .await;

        let mut permitted = Vec::new();
        for (document, result) in candidates.iter().zip(results) {
            if result?.is_some() {
                permitted.push(document_id(document));
            }
        }
        if permitted.is_empty() {
            return Ok(DeleteResult::default());
        }

        self.collection.delete_one(narrow_to_ids(query, permitted)).await
    }

    /// Delete every matching document; one denial rejects the whole call
    pub async fn delete_many(&self, filter: Document) -> Result<DeleteResult> {
        if self.run_as_system {
            return self.collection.delete_many(filter).await;
        }

        let query = self.guarded_query(&filter)?;
        let candidates = self.collection.find(query.clone(), FindOptions::default()).await?;
        if candidates.is_empty() {
            return Ok(DeleteResult::default());
        }

        try_join_all(candidates.iter().map(|document| async move {
            match self.validate(document, ValidationType::Delete).await? {
                Some(_) => Ok(document_id(document)),
                None => Err(Error::DeleteNotPermitted),
            }
        }))
        .await?;

        let ids = candidates.iter().map(document_id).collect();
        self.collection.delete_many(narrow_to_ids(query, ids)).await
    }

    /// Pass-through aggregation; no rules are applied
    pub async fn aggregate(&self, pipeline: Vec<Document>) -> Result<Vec<Document>> {
        if !self.run_as_system && !self.roles().is_empty() {
            debug!(collection = %self.coll_name, "Aggregation bypasses collection rules");
        }
        self.collection.aggregate(pipeline).await
    }

    /// Change stream limited by row-level filters, with every event
    /// revalidated for reading
    pub async fn watch(&self, pipeline: Vec<Document>) -> Result<ChangeStream> {
        if self.run_as_system {
            return self.collection.watch(pipeline).await;
        }

        let filters: Vec<Document> = get_formatted_query(self.filters(), &Document::new(), &self.user)?
            .into_iter()
            .filter(|part| !part.is_empty())
            .map(|part| prefix_fields(&part, "fullDocument"))
            .collect();

        let mut guarded = Vec::with_capacity(pipeline.len() + 1);
        if !filters.is_empty() {
            guarded.push(doc! { "$match": and_query(filters) });
        }
        guarded.extend(pipeline);

        let stream = self.collection.watch(guarded).await?;
        let guard = self.clone();
        let events = stream.filter_map(move |item| {
            let guard = guard.clone();
            async move {
                match item {
                    Ok(event) => guard.filter_event(event).await.transpose(),
                    Err(e) => Some(Err(e)),
                }
            }
        });
        Ok(events.boxed())
    }

    /// Drop events whose document fails the read check; blank out
    /// `updatedFields` that fail on their own
    async fn filter_event(&self, mut event: ChangeEvent) -> Result<Option<ChangeEvent>> {
        if let Some(full_document) = event.full_document.take() {
            match self.validate(&full_document, ValidationType::Read).await? {
                Some(validated) => event.full_document = Some(validated),
                None => {
                    debug!(collection = %self.coll_name, "Change event suppressed");
                    return Ok(None);
                }
            }
        }

        if let Some(description) = event.update_description.as_mut() {
            if !description.updated_fields.is_empty() {
                description.updated_fields = self
                    .validate(&description.updated_fields, ValidationType::Read)
                    .await?
                    .unwrap_or_default();
            }
        }

        Ok(Some(event))
    }
}

/// Results of a guarded `find`, validated when collected
pub struct FindCursor {
    documents: Vec<Document>,
    guard: Option<CollectionGuard>,
}

impl FindCursor {
    /// Collect permitted documents in result order; denied ones are dropped
    pub async fn to_array(self) -> Result<Vec<Document>> {
        let Some(guard) = self.guard else {
            return Ok(self.documents);
        };

        let results = join_all(
            self.documents
                .iter()
                .map(|document| guard.validate(document, ValidationType::Read)),
        )
        .await;

        let mut permitted = Vec::with_capacity(results.len());
        for result in results {
            if let Some(document) = result? {
                permitted.push(document);
            }
        }
        Ok(permitted)
    }
}

fn denied(validation_type: ValidationType) -> Error {
    match validation_type {
        ValidationType::Insert => Error::InsertNotPermitted,
        ValidationType::Delete => Error::DeleteNotPermitted,
        _ => Error::UpdateNotPermitted,
    }
}

fn document_id(document: &Document) -> Bson {
    document.get("_id").cloned().unwrap_or(Bson::Null)
}

fn narrow_to_ids(query: Document, ids: Vec<Bson>) -> Document {
    and_query(vec![query, doc! { "_id": { "$in": ids } }])
}

/// Prefix every field path of a filter, descending into logical operators
fn prefix_fields(query: &Document, prefix: &str) -> Document {
    query
        .iter()
        .map(|(key, value)| match (key.as_str(), value) {
            ("$and" | "$or" | "$nor", Bson::Array(children)) => {
                let children = children
                    .iter()
                    .map(|child| match child {
                        Bson::Document(child) => Bson::Document(prefix_fields(child, prefix)),
                        other => other.clone(),
                    })
                    .collect();
                (key.clone(), Bson::Array(children))
            }
            (operator, _) if operator.starts_with('$') => (key.clone(), value.clone()),
            (path, _) => (format!("{prefix}.{path}"), value.clone()),
        })
        .collect()
}
