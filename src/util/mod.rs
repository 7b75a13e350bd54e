//! Text and date helpers shared by the feed pipeline.

pub mod dates;
pub mod text;

pub use text::{sanitize_xml, strip_html, truncate_chars};
