//! Persistent suffix-recombination text generation library.
//!
//! This crate provides:
//! - An ordered, transactional byte store that grows on demand
//! - Persistent nested arrays and maps on top of it
//! - Token interning and sentence indexes stored in those containers
//! - A generator recombining sentence suffixes without copying the corpus
//! - A model tying ingestion, statements and responses together

/// Configuration of stores, generation and ingestion.
pub mod config;

/// Crate-wide error type.
pub mod error;

/// File and directory helpers.
pub mod io;

/// Tokens, indexes, generation and the model.
pub mod model;

/// Store, codec and persistent containers.
pub mod storage;

pub use config::Config;
pub use error::{Error, Result};
