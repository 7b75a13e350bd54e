//! Feed fetching and parsing.
//!
//! The pipeline for one feed runs bottom-up through three submodules:
//!
//! - [`document`] — tolerant XML element tree with resolved namespaces
//! - [`parser`] — dialect detection (RSS vs Atom) and article extraction
//!   with field-fallback chains
//! - [`fetcher`] — conditional HTTP fetch (ETag / Last-Modified) and the
//!   bounded-concurrency orchestrator that merges per-feed results
//!
//! Raw bytes are sanitized before they ever reach [`document::parse`]; see
//! [`crate::util::text::sanitize_xml`].

pub mod document;
pub mod fetcher;
pub mod parser;

pub use fetcher::{fetch_one, run_all, FetchResult};
pub use parser::Article;
