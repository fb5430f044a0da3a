//! # Code Wiki Core
//!
//! Runtime-independent logic for Code Wiki: data models, the tokenizer seam
//! and contextual chunker, the order-preserving batch runner, validation of
//! generator output, the store abstraction, and retrieval post-processing.
//!
//! This crate contains no tokio, sqlx, HTTP, or filesystem I/O. Everything
//! that talks to the outside world lives in the `codewiki` app crate.

pub mod batch;
pub mod chunk;
pub mod embedding;
pub mod models;
pub mod retrieval;
pub mod schema;
pub mod store;
pub mod tokenize;
