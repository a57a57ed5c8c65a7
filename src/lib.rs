//! # docqa
//!
//! Grounded question answering over a private document corpus.
//!
//! PDF and plain-text documents are loaded from a directory, split into
//! overlapping chunks, embedded, and kept in an in-memory vector index
//! that is persisted to disk. Questions are answered by retrieving the
//! most similar chunks and asking a language model to answer from them,
//! with citations back to the source documents.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌──────────────┐   ┌──────────────┐
//! │  Loader    │──▶│ Chunk+Embed  │──▶│ VectorIndex  │──▶ index.json
//! │ PDF / text │   │              │   │ (snapshots)  │
//! └────────────┘   └──────────────┘   └──────┬───────┘
//!                                            │ retrieve
//!                      ┌──────────┐   ┌──────▼───────┐
//!                      │   CLI    │──▶│   Pipeline   │──▶ LLM
//!                      │  (docqa) │   │  ask / init  │
//!                      └──────────┘   └──────▲───────┘
//!                                            │
//!                                     ┌──────┴───────┐
//!                                     │  HTTP (axum) │
//!                                     └──────────────┘
//! ```
//!
//! The pure data model, chunking, index, retrieval, and prompt/answer
//! logic live in the `docqa-core` crate. This crate adds everything that
//! touches the outside world: configuration files, the filesystem, HTTP
//! providers, and the HTTP API.
//!
//! ## Quick Start
//!
//! ```bash
//! docqa init                        # index ./documents
//! docqa ask "What is the refund policy?"
//! docqa ingest new-contract.pdf     # add a file without rebuilding
//! docqa serve                       # start the HTTP API
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`loader`] | PDF and text loading, directory scan |
//! | [`index_file`] | On-disk index store |
//! | [`embedding`] | Embedding providers (OpenAI, Ollama, local) |
//! | [`llm`] | Chat-completions language model |
//! | [`http`] | Shared blocking HTTP plumbing for providers |
//! | [`pipeline`] | Initialize / ingest / ask orchestration |
//! | [`server`] | JSON HTTP API |

pub mod config;
pub mod embedding;
pub mod http;
pub mod index_file;
pub mod llm;
pub mod loader;
pub mod pipeline;
pub mod server;

pub use docqa_core;
