//! Flowerbase Collection Guard
//!
//! Wraps MongoDB collections so every call honours the collection's rules:
//! - Driver-shaped storage boundary ([`CollectionBackend`])
//! - Rule enforcement per operation ([`get_operators`], [`CollectionGuard`])
//! - In-memory collection with change streams ([`InMemoryCollection`])
//! - Update operators evaluated as aggregation stages ([`update_to_pipeline`])

#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod backend;
pub mod guard;
pub mod memory;
pub mod pipeline;
pub mod update;
pub mod watch;

pub use backend::{
    ChangeStream, CollectionBackend, DeleteResult, FindOptions, InsertManyResult, InsertOneResult,
    UpdateModifications, UpdateResult,
};
pub use guard::{get_operators, CollectionGuard, FindCursor, GuardOptions};
pub use memory::InMemoryCollection;
pub use update::update_to_pipeline;
pub use watch::{ChangeEvent, OperationType, UpdateDescription};
