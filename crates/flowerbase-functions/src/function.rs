//! Function definitions and the startup-loaded registry

use std::collections::HashMap;
use std::path::Path;

use bson::Document;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use flowerbase_common::error::Result;

/// A user function as declared in the app's `functions/` directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredFunction {
    /// Function name, used by `%function` references
    pub name: String,
    /// Source code handed to the runtime
    #[serde(default)]
    pub source: String,
    /// Private functions cannot be called directly by clients
    #[serde(default)]
    pub private: bool,
    /// Execute with system privileges regardless of the caller
    #[serde(default)]
    pub run_as_system: bool,
}

impl StoredFunction {
    /// Create a new function
    pub fn new(name: &str, source: &str) -> Self {
        Self {
            name: name.to_string(),
            source: source.to_string(),
            private: false,
            run_as_system: false,
        }
    }

    /// Mark the function private
    pub fn private(mut self) -> Self {
        self.private = true;
        self
    }

    /// Run the function as system
    pub fn as_system(mut self) -> Self {
        self.run_as_system = true;
        self
    }
}

/// Context handed to every function invocation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FunctionContext {
    /// Caller, empty for system invocations
    pub user: Document,
    /// Whether the invocation bypasses rules
    pub run_as_system: bool,
}

impl FunctionContext {
    /// Context for a function invoked on behalf of a user
    pub fn for_user(user: &Document) -> Self {
        Self {
            user: user.clone(),
            run_as_system: false,
        }
    }

    /// Context for a trusted internal invocation
    pub fn system() -> Self {
        Self {
            user: Document::new(),
            run_as_system: true,
        }
    }
}

/// Functions loaded at startup, keyed by name
#[derive(Debug, Clone, Default)]
pub struct FunctionRegistry {
    functions: HashMap<String, StoredFunction>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace a function
    pub fn insert(&mut self, function: StoredFunction) {
        self.functions.insert(function.name.clone(), function);
    }

    pub fn get(&self, name: &str) -> Option<&StoredFunction> {
        self.functions.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.functions.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    /// Load functions from `<dir>/config.json` and `<dir>/<name>.js`
    ///
    /// A missing directory yields an empty registry.
    pub fn load(dir: &Path) -> Result<Self> {
        let mut registry = Self::new();

        let config_path = dir.join("config.json");
        if !config_path.exists() {
            warn!("No functions config at {}", config_path.display());
            return Ok(registry);
        }

        let content = std::fs::read_to_string(&config_path)?;
        let declared: Vec<StoredFunction> = serde_json::from_str(&content)?;

        for mut function in declared {
            let source_path = dir.join(format!("{}.js", function.name));
            if source_path.exists() {
                function.source = std::fs::read_to_string(&source_path)?;
            } else if function.source.is_empty() {
                warn!("Function '{}' has no source file", function.name);
            }
            registry.insert(function);
        }

        info!("Loaded {} functions from {}", registry.len(), dir.display());
        Ok(registry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_function_builder() {
        let func = StoredFunction::new("isOwner", "exports = () => true").private();
        assert!(func.private);
        assert!(!func.run_as_system);
    }

    #[test]
    fn test_load_registry() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("config.json"),
            r#"[{"name": "isOwner", "private": true}, {"name": "audit", "run_as_system": true}]"#,
        )
        .unwrap();
        std::fs::write(dir.path().join("isOwner.js"), "exports = (doc) => true").unwrap();

        let registry = FunctionRegistry::load(dir.path()).unwrap();
        assert_eq!(registry.names(), vec!["audit", "isOwner"]);

        let is_owner = registry.get("isOwner").unwrap();
        assert!(is_owner.private);
        assert_eq!(is_owner.source, "exports = (doc) => true");
        assert!(registry.get("audit").unwrap().run_as_system);
    }

    #[test]
    fn test_load_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        let registry = FunctionRegistry::load(&dir.path().join("nope")).unwrap();
        assert!(registry.is_empty());
    }
}
