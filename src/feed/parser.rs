use serde::{Deserialize, Serialize};

use crate::feed::document::Element;
use crate::util::{dates, text};

/// Dublin Core metadata namespace, used by RSS feeds for dates and creators.
const DC_NS: &str = "http://purl.org/dc/elements/1.1/";
/// RSS 1.0 content module namespace (`content:encoded` full-body payloads).
const CONTENT_NS: &str = "http://purl.org/rss/1.0/modules/content/";

/// One normalized feed item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Article {
    pub feed: String,
    pub title: String,
    pub link: String,
    pub date: Option<String>,
    pub excerpt: String,
    pub author: String,
}

/// The two syndication dialects we extract from. Detected once per document,
/// then routed to the matching extraction path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Rss,
    Atom,
}

impl Dialect {
    /// An Atom document is identified by its root local name; everything
    /// else — including documents with no recognizable structure at all —
    /// takes the RSS path, whose `item` search tolerates missing structure.
    pub fn detect(root: &Element) -> Self {
        if root.name == "feed" {
            Dialect::Atom
        } else {
            Dialect::Rss
        }
    }

    pub fn extract(self, root: &Element, feed_name: &str, excerpt_cap: usize) -> Vec<Article> {
        match self {
            Dialect::Rss => extract_rss(root, feed_name, excerpt_cap),
            Dialect::Atom => extract_atom(root, feed_name, excerpt_cap),
        }
    }
}

/// Detects the document's dialect and extracts its articles in document
/// order. The per-field fallback orders below are deliberate: real-world
/// feeds rely on partial field presence, and reordering a chain changes
/// which field wins.
pub fn extract_articles(root: &Element, feed_name: &str, excerpt_cap: usize) -> Vec<Article> {
    Dialect::detect(root).extract(root, feed_name, excerpt_cap)
}

fn excerpt_of(body: &str, cap: usize) -> String {
    text::truncate_chars(text::strip_html(body), cap)
}

fn extract_rss(root: &Element, feed_name: &str, excerpt_cap: usize) -> Vec<Article> {
    // Items are matched anywhere in the tree, not just under <channel> —
    // some feeds nest them — and regardless of namespace.
    root.descendants()
        .filter(|el| el.name == "item")
        .map(|item| {
            let title = item
                .child_text(None, "title")
                .unwrap_or_else(|| "Untitled".to_string());
            let link = item
                .child_text(None, "link")
                .unwrap_or_else(|| "#".to_string());
            let date = item
                .child_text(None, "pubDate")
                .or_else(|| item.child_text(Some(DC_NS), "date"));
            let body = item
                .child_text(Some(CONTENT_NS), "encoded")
                .or_else(|| item.child_text(None, "description"))
                .unwrap_or_default();
            let author = item
                .child_text(None, "author")
                .or_else(|| item.child_text(Some(DC_NS), "creator"))
                .unwrap_or_default();

            Article {
                feed: feed_name.to_string(),
                title,
                link,
                date: dates::normalize(date.as_deref()),
                excerpt: excerpt_of(&body, excerpt_cap),
                author,
            }
        })
        .collect()
}

fn extract_atom(root: &Element, feed_name: &str, excerpt_cap: usize) -> Vec<Article> {
    // Entries live in whatever namespace the root declared. Usually that is
    // the Atom namespace, but some feeds omit it entirely.
    let ns = root.ns.as_deref();

    root.descendants()
        .filter(|el| el.name == "entry" && el.ns.as_deref() == ns)
        .map(|entry| {
            let title = entry
                .child_text(ns, "title")
                .unwrap_or_else(|| "Untitled".to_string());
            let link = resolve_atom_link(entry, ns);
            let date = entry
                .child_text(ns, "updated")
                .or_else(|| entry.child_text(ns, "published"));
            let body = entry
                .child_text(ns, "content")
                .or_else(|| entry.child_text(ns, "summary"))
                .unwrap_or_default();
            let author = entry
                .find_child(ns, "author")
                .and_then(|author| author.child_text(ns, "name"))
                .unwrap_or_default();

            Article {
                feed: feed_name.to_string(),
                title,
                link,
                date: dates::normalize(date.as_deref()),
                excerpt: excerpt_of(&body, excerpt_cap),
                author,
            }
        })
        .collect()
}

/// Atom link resolution: the first link whose `rel` is absent or `alternate`
/// wins; failing that, the first link with any non-empty `href`; failing
/// that, `#`.
fn resolve_atom_link(entry: &Element, ns: Option<&str>) -> String {
    let mut fallback: Option<&str> = None;
    for link in entry
        .descendants()
        .filter(|el| el.name == "link" && el.ns.as_deref() == ns)
    {
        let href = link.attr("href").unwrap_or("");
        if href.is_empty() {
            continue;
        }
        match link.attr("rel") {
            None | Some("alternate") => return href.to_string(),
            _ => {
                if fallback.is_none() {
                    fallback = Some(href);
                }
            }
        }
    }
    fallback.map(str::to_string).unwrap_or_else(|| "#".to_string())
}
