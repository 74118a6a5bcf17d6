//! Named function invocation

use std::sync::Arc;

use async_trait::async_trait;
use bson::Bson;
use tracing::debug;

use flowerbase_common::error::{Error, Result};

use crate::function::{FunctionContext, FunctionRegistry};
use crate::runtime::FunctionRuntime;

/// Capability to invoke a function by name
///
/// This is the only view of user functions the rule engine has.
#[async_trait]
pub trait FunctionCaller: Send + Sync {
    async fn call_function(
        &self,
        name: &str,
        args: Vec<Bson>,
        context: FunctionContext,
    ) -> Result<Bson>;
}

/// Resolves names against the registry and delegates to a runtime
#[derive(Clone)]
pub struct FunctionExecutor {
    registry: Arc<FunctionRegistry>,
    runtime: Arc<dyn FunctionRuntime>,
}

impl FunctionExecutor {
    pub fn new(registry: FunctionRegistry, runtime: Arc<dyn FunctionRuntime>) -> Self {
        Self {
            registry: Arc::new(registry),
            runtime,
        }
    }

    pub fn registry(&self) -> &FunctionRegistry {
        &self.registry
    }
}

#[async_trait]
impl FunctionCaller for FunctionExecutor {
    async fn call_function(
        &self,
        name: &str,
        args: Vec<Bson>,
        mut context: FunctionContext,
    ) -> Result<Bson> {
        let function = self
            .registry
            .get(name)
            .ok_or_else(|| Error::FunctionNotFound(name.to_string()))?;

        if function.run_as_system {
            context.run_as_system = true;
        }

        debug!(function = name, args = args.len(), "Invoking function");
        self.runtime.execute(function, args, context).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::function::StoredFunction;
    use crate::runtime::NativeRuntime;

    fn executor() -> FunctionExecutor {
        let runtime = NativeRuntime::new();
        runtime.register_fn("isSystem", |_args, ctx| Ok(Bson::Boolean(ctx.run_as_system)));

        let mut registry = FunctionRegistry::new();
        registry.insert(StoredFunction::new("isSystem", "").as_system());
        registry.insert(StoredFunction::new("unbound", ""));

        FunctionExecutor::new(registry, Arc::new(runtime))
    }

    #[tokio::test]
    async fn test_call_registered_function() {
        let result = executor()
            .call_function("isSystem", vec![], FunctionContext::default())
            .await
            .unwrap();
        assert_eq!(result, Bson::Boolean(true));
    }

    #[tokio::test]
    async fn test_unknown_function() {
        let err = executor()
            .call_function("nope", vec![], FunctionContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::FunctionNotFound(_)));
    }

    #[tokio::test]
    async fn test_registered_without_handler() {
        let err = executor()
            .call_function("unbound", vec![], FunctionContext::default())
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "function_not_found");
    }
}
