//! # docqa core
//!
//! Runtime-agnostic logic for docqa: data models, the error taxonomy,
//! chunking, the embedding and language-model provider traits, the vector
//! index with its persistence format, retrieval, and answer generation.
//!
//! This crate contains no tokio, filesystem I/O, or network code. Concrete
//! providers, document loading, and on-disk index storage live in the
//! `docqa` app crate.

pub mod chunk;
pub mod embedding;
pub mod error;
pub mod generate;
pub mod index;
pub mod llm;
pub mod models;
pub mod retrieve;

pub use error::{ProviderError, RagError, Result};
