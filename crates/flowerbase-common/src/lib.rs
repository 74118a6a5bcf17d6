//! Flowerbase Common Types and Utilities
//!
//! Shared configuration, error taxonomy and request-scoped types used by the
//! rule engine, the function runtime and the collection guard.

#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod types;

pub use config::FlowerbaseConfig;
pub use error::{Error, Result};
pub use types::{User, ValidationType};
