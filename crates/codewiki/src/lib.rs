//! # Code Wiki
//!
//! **Turn a source repository into a citation-backed wiki you can search
//! and question in natural language.**
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────────────┐   ┌──────────┐
//! │   GitHub    │──▶│       Pipeline       │──▶│  SQLite  │
//! │ tree + raw  │   │ topics → pages →     │   │ units    │
//! └─────────────┘   │ overview → embed     │   │ topics   │
//!                   └──────────┬───────────┘   │ passages │
//!                              │               └────┬─────┘
//!                   ┌──────────┴───────┐            │
//!                   │ Chat completions │            ▼
//!                   │   + embeddings   │   search / ask (CLI)
//!                   └──────────────────┘
//! ```
//!
//! ## Data Flow
//!
//! 1. The [`github`] source supplies metadata, the file tree and file
//!    contents; [`repo_context`] trims the tree for the prompt.
//! 2. The [`pipeline`] asks the [`generation`] backend for topics, generates
//!    one page per topic with bounded concurrency, then an overview.
//! 3. Pages, overview and fetched source are chunked by
//!    [`codewiki_core::chunk`] and embedded through [`embed_batch`].
//! 4. [`search`] answers `wiki search` and `wiki ask` from the stored
//!    passages via [`codewiki_core::retrieval`].
//!
//! ## Quick Start
//!
//! ```bash
//! wiki init
//! wiki analyze rust-lang/rustlings
//! wiki topics rust-lang/rustlings
//! wiki search rust-lang/rustlings "how are exercises verified"
//! wiki ask rust-lang/rustlings "where is the watch mode implemented?"
//! ```
//!
//! ## Configuration
//!
//! See [`config`] and `config/wiki.example.toml`.

pub mod analyze;
pub mod config;
pub mod db;
pub mod embed_batch;
pub mod embedding;
pub mod error;
pub mod generation;
pub mod github;
pub mod migrate;
pub mod pages;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod repo_context;
pub mod search;
pub mod sqlite_store;
pub mod traits;
