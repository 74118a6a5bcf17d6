//! Function execution runtimes

use std::collections::HashMap;
use std::future::Future;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bson::Bson;
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::RwLock;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use flowerbase_common::config::FunctionsConfig;
use flowerbase_common::error::{Error, Result};

use crate::function::{FunctionContext, StoredFunction};

/// Executes a user function: `execute(code, args, ctx) -> value`
///
/// The rule engine depends only on this capability; isolation is the
/// implementation's concern.
#[async_trait]
pub trait FunctionRuntime: Send + Sync {
    async fn execute(
        &self,
        function: &StoredFunction,
        args: Vec<Bson>,
        context: FunctionContext,
    ) -> Result<Bson>;
}

type NativeHandler =
    Arc<dyn Fn(Vec<Bson>, FunctionContext) -> BoxFuture<'static, Result<Bson>> + Send + Sync>;

/// Runtime backed by Rust handlers registered under the function name
#[derive(Default)]
pub struct NativeRuntime {
    handlers: RwLock<HashMap<String, NativeHandler>>,
}

impl NativeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an async handler
    pub fn register<F, Fut>(&self, name: &str, handler: F)
    where
        F: Fn(Vec<Bson>, FunctionContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Bson>> + Send + 'static,
    {
        let handler: NativeHandler = Arc::new(move |args, ctx| handler(args, ctx).boxed());
        self.handlers.write().insert(name.to_string(), handler);
    }

    /// Register a synchronous handler
    pub fn register_fn<F>(&self, name: &str, handler: F)
    where
        F: Fn(&[Bson], &FunctionContext) -> Result<Bson> + Send + Sync + 'static,
    {
        let handler = Arc::new(handler);
        self.register(name, move |args, ctx| {
            let handler = Arc::clone(&handler);
            async move { handler(&args, &ctx) }
        });
    }

    pub fn has(&self, name: &str) -> bool {
        self.handlers.read().contains_key(name)
    }
}

#[async_trait]
impl FunctionRuntime for NativeRuntime {
    async fn execute(
        &self,
        function: &StoredFunction,
        args: Vec<Bson>,
        context: FunctionContext,
    ) -> Result<Bson> {
        let handler = self
            .handlers
            .read()
            .get(&function.name)
            .cloned()
            .ok_or_else(|| Error::FunctionNotFound(function.name.clone()))?;

        handler(args, context).await
    }
}

/// Runtime that hands each invocation to an external interpreter
///
/// The request is written to stdin as one JSON object
/// (`{"name", "source", "args", "context"}`) and the function result is read
/// back from stdout as a single JSON value.
pub struct SubprocessRuntime {
    command: Vec<String>,
    timeout: Duration,
}

impl SubprocessRuntime {
    pub fn new(command: Vec<String>, timeout: Duration) -> Result<Self> {
        if command.is_empty() {
            return Err(Error::ConfigError(
                "subprocess runtime requires a command".to_string(),
            ));
        }
        Ok(Self { command, timeout })
    }

    pub fn from_config(config: &FunctionsConfig) -> Result<Self> {
        Self::new(
            config.command.clone(),
            Duration::from_secs(config.timeout_seconds),
        )
    }

    fn request_payload(
        function: &StoredFunction,
        args: Vec<Bson>,
        context: &FunctionContext,
    ) -> serde_json::Value {
        let args: Vec<serde_json::Value> = args.into_iter().map(Bson::into_relaxed_extjson).collect();
        serde_json::json!({
            "name": function.name,
            "source": function.source,
            "args": args,
            "context": {
                "user": Bson::Document(context.user.clone()).into_relaxed_extjson(),
                "run_as_system": context.run_as_system,
            },
        })
    }

    async fn run(&self, payload: Vec<u8>) -> Result<Vec<u8>> {
        let mut child = Command::new(&self.command[0])
            .args(&self.command[1..])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            // the interpreter may exit without draining stdin
            if let Err(e) = stdin.write_all(&payload).await {
                if e.kind() != std::io::ErrorKind::BrokenPipe {
                    return Err(e.into());
                }
            }
        }

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            return Err(Error::FunctionError(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        Ok(output.stdout)
    }
}

#[async_trait]
impl FunctionRuntime for SubprocessRuntime {
    async fn execute(
        &self,
        function: &StoredFunction,
        args: Vec<Bson>,
        context: FunctionContext,
    ) -> Result<Bson> {
        let payload = serde_json::to_vec(&Self::request_payload(function, args, &context))?;
        debug!(function = %function.name, "Spawning function subprocess");

        let stdout = tokio::time::timeout(self.timeout, self.run(payload))
            .await
            .map_err(|_| Error::FunctionTimeout(function.name.clone()))??;

        let text = String::from_utf8_lossy(&stdout);
        if text.trim().is_empty() {
            return Ok(Bson::Null);
        }

        let value: serde_json::Value = serde_json::from_str(text.trim())?;
        Bson::try_from(value).map_err(|e| Error::FunctionError(e.to_string()))
    }
}
