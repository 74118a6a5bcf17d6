//! Flowerbase
//!
//! Declarative, per-collection authorization for MongoDB access. Rules are
//! loaded from the app directory, user functions back function-based
//! expressions, and every collection is reached through a guard that
//! enforces those rules.

#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub use flowerbase_common as common;
pub use flowerbase_functions as functions;
pub use flowerbase_guard as guard;
pub use flowerbase_rules as rules;

use std::sync::Arc;

use bson::Document;
use tracing::{info, warn};

use flowerbase_common::config::{FlowerbaseConfig, RuntimeKind};
use flowerbase_common::error::{Error, Result};
use flowerbase_common::types::ValidationType;
use flowerbase_functions::{
    FunctionCaller, FunctionExecutor, FunctionRegistry, FunctionRuntime, NativeRuntime,
    SubprocessRuntime,
};
use flowerbase_guard::{get_operators, CollectionBackend, CollectionGuard, GuardOptions, InMemoryCollection};
use flowerbase_rules::{load_rules, validate_rules, RuleIssue, RulesMap};

/// Loaded application: rules plus the functions they may call
pub struct AppState {
    config: FlowerbaseConfig,
    rules: Arc<RulesMap>,
    functions: Arc<FunctionExecutor>,
}

impl AppState {
    /// Load rules and functions with the runtime named in the configuration
    ///
    /// # Errors
    /// Returns an error if a rules or functions file cannot be parsed, or the
    /// subprocess runtime is misconfigured.
    pub fn new(config: FlowerbaseConfig) -> Result<Self> {
        let runtime: Arc<dyn FunctionRuntime> = match config.functions.runtime {
            RuntimeKind::Native => Arc::new(NativeRuntime::new()),
            RuntimeKind::Subprocess => Arc::new(SubprocessRuntime::from_config(&config.functions)?),
        };
        Self::with_runtime(config, runtime)
    }

    /// Load rules and functions, executing functions on `runtime`
    ///
    /// # Errors
    /// Returns an error if a rules or functions file cannot be parsed.
    pub fn with_runtime(config: FlowerbaseConfig, runtime: Arc<dyn FunctionRuntime>) -> Result<Self> {
        info!("Loading app '{}'", config.app.name);

        let rules = load_rules(&config.app.rules_path)?;
        let registry = FunctionRegistry::load(&config.app.functions_path)?;

        for issue in validate_rules(&rules, Some(&registry)) {
            warn!(
                collection = %issue.collection,
                location = %issue.location,
                "Invalid rule: {}",
                issue.error
            );
        }

        info!(
            collections = rules.len(),
            functions = registry.len(),
            "App loaded"
        );

        Ok(Self {
            config,
            rules: Arc::new(rules),
            functions: Arc::new(FunctionExecutor::new(registry, runtime)),
        })
    }

    #[must_use]
    pub fn config(&self) -> &FlowerbaseConfig {
        &self.config
    }

    #[must_use]
    pub fn rules(&self) -> &RulesMap {
        &self.rules
    }

    #[must_use]
    pub fn functions(&self) -> &FunctionExecutor {
        &self.functions
    }

    /// Problems found in the loaded rules
    #[must_use]
    pub fn issues(&self) -> Vec<RuleIssue> {
        validate_rules(&self.rules, Some(self.functions.registry()))
    }

    /// Guard `collection` for `user`
    #[must_use]
    pub fn guard(
        &self,
        collection: Arc<dyn CollectionBackend>,
        user: Document,
        run_as_system: bool,
    ) -> CollectionGuard {
        let functions: Arc<dyn FunctionCaller> = self.functions.clone();
        get_operators(
            collection.clone(),
            GuardOptions {
                rules: self.rules.clone(),
                coll_name: collection.name().to_string(),
                user,
                run_as_system,
                functions,
                enable_log: self.config.rules.enable_log,
            },
        )
    }

    /// Validate a single document against a collection's rules
    ///
    /// Returns the permitted (possibly redacted) document, or `None` when
    /// access is denied.
    ///
    /// # Errors
    /// Returns an error if the collection has no rules, a rule is malformed
    /// or a function call fails.
    pub async fn evaluate(
        &self,
        collection: &str,
        validation_type: ValidationType,
        user: Document,
        document: &Document,
    ) -> Result<Option<Document>> {
        if !self.rules.contains_key(collection) {
            return Err(Error::CollectionNotFound(collection.to_string()));
        }
        let backend: Arc<dyn CollectionBackend> = Arc::new(InMemoryCollection::new(collection));
        self.guard(backend, user, false)
            .validate(document, validation_type)
            .await
    }
}
