//! feedrake — concurrent RSS/Atom feed aggregation.
//!
//! Fetches a configured set of syndication feeds in parallel, normalizes each
//! into article records, and aggregates everything into a single JSON document
//! alongside per-feed conditional-request cache state (ETag / Last-Modified)
//! that lets the next run skip unchanged feeds with an HTTP 304.

pub mod config;
pub mod feed;
pub mod output;
pub mod util;
