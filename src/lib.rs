//! listdigest - mailing-list threading and summarization pipeline
//!
//! Ingests public development-list archives, reconstructs conversations,
//! stores them in SQLite and produces structured summaries through a
//! cached, rate-limited summarization gateway.
//!
//! ## Module Organization
//!
//! - `ingest/`: archive splitting and message normalization
//! - `threading/`: order-independent thread reconstruction
//! - `adapters/sqlite/`: entity store and read queries
//! - `adapters/llm/`: chat-completions summarization backend
//! - `services/`: ingestion and summarization workflows
//! - `config/`: TOML configuration
//! - `types/`: shared data structures

pub mod adapters;
pub mod config;
pub mod error;
pub mod ingest;
pub mod services;
pub mod threading;
pub mod types;

use tracing_subscriber::EnvFilter;

pub use error::{DigestError, Result};

/// Install the global `tracing` subscriber.
///
/// `RUST_LOG` overrides the default filter.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cfg!(debug_assertions) {
            // Debug build: our crate at debug, everything else at info
            EnvFilter::new("listdigest=debug,info")
        } else {
            EnvFilter::new("info")
        }
    });

    tracing_subscriber::fmt().with_env_filter(filter).init();
}
