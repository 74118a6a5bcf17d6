//! Flowerbase Functions
//!
//! User functions are opaque to the rest of the system: the rule engine only
//! sees the [`FunctionCaller`] seam, and execution is delegated to a
//! [`FunctionRuntime`]:
//! - In-process Rust handlers ([`NativeRuntime`])
//! - An external interpreter speaking JSON over stdio ([`SubprocessRuntime`])

#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod executor;
pub mod function;
pub mod runtime;

pub use executor::{FunctionCaller, FunctionExecutor};
pub use function::{FunctionContext, FunctionRegistry, StoredFunction};
pub use runtime::{FunctionRuntime, NativeRuntime, SubprocessRuntime};
