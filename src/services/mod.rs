//! Pipeline services
//!
//! Storage-agnostic workflows composed from the ingest, threading and
//! adapter layers. The CLI is a thin wrapper over these.

pub mod ingest;
pub mod summarize;

pub use ingest::{ingest_bytes, ingest_path, IngestReport};
