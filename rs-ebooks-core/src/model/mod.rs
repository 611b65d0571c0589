//! Top-level module of the suffix-recombination text model.
//!
//! This module provides:
//! - Persistent token interning (`TokenTable`)
//! - Persistent sentence indexes (`MarkovIndex`)
//! - Suffix recombination with stuck detection (`Generator`)
//! - Statement configuration (`StatementInput`)
//! - The language collaborator (`Nlp`)
//! - Corpus ingestion, statements and responses (`Model`)

/// Suffix-recombination generator and the `subseq` overlap test.
pub mod generator;

/// Sentence array plus unigram and bigram position indexes.
pub mod markov_index;

/// Tokenization, reconstruction and keyword ranking.
pub mod nlp;

/// Per-call statement parameters.
pub mod statement_input;

/// Orchestration of one persistent model directory.
pub mod text_model;

/// Token ⇄ tiki mapping with a case-folded reverse index.
pub mod token_table;

pub use generator::{Generator, Mode, Outcome};
pub use markov_index::{MarkovIndex, Position, Reference, SENTINEL, Tiki};
pub use nlp::{Nlp, SimpleNlp};
pub use statement_input::StatementInput;
pub use text_model::{ConsumeReport, Model, Relevance};
pub use token_table::TokenTable;
