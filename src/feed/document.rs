use quick_xml::events::{BytesStart, Event};
use quick_xml::name::ResolveResult;
use quick_xml::reader::NsReader;
use thiserror::Error;

/// Nesting depth guard against pathological documents. Real feeds sit well
/// under ten levels; anything past this is not a feed.
const MAX_DEPTH: usize = 100;

/// Errors from building the element tree.
#[derive(Debug, Error)]
pub enum DocumentError {
    /// The underlying XML reader rejected the input.
    #[error("{0}")]
    Syntax(String),
    /// Input contained no element at all.
    #[error("no root element")]
    NoRoot,
    /// A second top-level element (or one after the root closed).
    #[error("junk after document element")]
    TrailingContent,
    /// Nesting exceeded [`MAX_DEPTH`].
    #[error("element nesting exceeds {0} levels")]
    TooDeep(usize),
}

/// One element of a parsed feed document, with its namespace resolved.
///
/// `text` is the concatenation of the element's direct text and CDATA nodes.
/// Attribute names are stored by local name; namespace declarations are
/// dropped (the resolved `ns` on each element is what lookups use).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Element {
    pub ns: Option<String>,
    pub name: String,
    pub attrs: Vec<(String, String)>,
    pub text: String,
    pub children: Vec<Element>,
}

impl Element {
    /// Value of the named attribute, if present.
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(key, _)| key.as_str() == name)
            .map(|(_, value)| value.as_str())
    }

    /// First direct child matching the namespace and local name.
    pub fn find_child(&self, ns: Option<&str>, name: &str) -> Option<&Element> {
        self.children
            .iter()
            .find(|child| child.name == name && child.ns.as_deref() == ns)
    }

    /// Trimmed text of the first matching direct child. `None` when the child
    /// is absent or its text is empty — empty text falls through fallback
    /// chains exactly like a missing element.
    pub fn child_text(&self, ns: Option<&str>, name: &str) -> Option<String> {
        let text = self.find_child(ns, name)?.text.trim();
        if text.is_empty() {
            None
        } else {
            Some(text.to_string())
        }
    }

    /// All elements beneath this one, in document order.
    pub fn descendants(&self) -> Descendants<'_> {
        Descendants {
            stack: self.children.iter().rev().collect(),
        }
    }
}

/// Pre-order iterator over an element's subtree.
pub struct Descendants<'a> {
    stack: Vec<&'a Element>,
}

impl<'a> Iterator for Descendants<'a> {
    type Item = &'a Element;

    fn next(&mut self) -> Option<&'a Element> {
        let element = self.stack.pop()?;
        self.stack.extend(element.children.iter().rev());
        Some(element)
    }
}

/// Parses sanitized feed text into an element tree.
///
/// Namespaces are resolved as the tree is built, so lookups compare against
/// full namespace URIs rather than whatever prefixes the feed happened to
/// declare. Comments, processing instructions, and the doctype are skipped.
pub fn parse(text: &str) -> Result<Element, DocumentError> {
    let mut reader = NsReader::from_str(text);
    let decoder = reader.decoder();
    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;

    loop {
        match reader.read_resolved_event() {
            Ok((ns, Event::Start(start))) => {
                let ns = owned_namespace(ns);
                if root.is_some() && stack.is_empty() {
                    return Err(DocumentError::TrailingContent);
                }
                if stack.len() >= MAX_DEPTH {
                    return Err(DocumentError::TooDeep(MAX_DEPTH));
                }
                let element = element_from_start(ns, &start, decoder)?;
                stack.push(element);
            }
            Ok((ns, Event::Empty(start))) => {
                let ns = owned_namespace(ns);
                if root.is_some() && stack.is_empty() {
                    return Err(DocumentError::TrailingContent);
                }
                let element = element_from_start(ns, &start, decoder)?;
                attach(&mut stack, &mut root, element);
            }
            Ok((_, Event::End(_))) => {
                let element = stack
                    .pop()
                    .ok_or_else(|| DocumentError::Syntax("unexpected closing tag".into()))?;
                attach(&mut stack, &mut root, element);
            }
            Ok((_, Event::Text(t))) => {
                if let Some(top) = stack.last_mut() {
                    let unescaped = t
                        .unescape()
                        .map_err(|e| DocumentError::Syntax(e.to_string()))?;
                    top.text.push_str(&unescaped);
                }
            }
            Ok((_, Event::CData(c))) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&String::from_utf8_lossy(&c));
                }
            }
            Ok((_, Event::Eof)) => break,
            Ok(_) => {}
            Err(e) => return Err(DocumentError::Syntax(e.to_string())),
        }
    }

    if !stack.is_empty() {
        return Err(DocumentError::Syntax("unclosed element".into()));
    }
    root.ok_or(DocumentError::NoRoot)
}

fn attach(stack: &mut Vec<Element>, root: &mut Option<Element>, element: Element) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(element),
        None => *root = Some(element),
    }
}

fn owned_namespace(ns: ResolveResult<'_>) -> Option<String> {
    match ns {
        ResolveResult::Bound(namespace) => {
            Some(String::from_utf8_lossy(namespace.as_ref()).into_owned())
        }
        _ => None,
    }
}

fn element_from_start(
    ns: Option<String>,
    start: &BytesStart<'_>,
    decoder: quick_xml::encoding::Decoder,
) -> Result<Element, DocumentError> {
    let mut attrs = Vec::new();
    for attr in start.attributes() {
        let attr = attr.map_err(|e| DocumentError::Syntax(e.to_string()))?;
        let key = attr.key.as_ref();
        if key == b"xmlns" || key.starts_with(b"xmlns:") {
            continue;
        }
        let name = String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned();
        let value = attr
            .decode_and_unescape_value(decoder)
            .map_err(|e| DocumentError::Syntax(e.to_string()))?
            .into_owned();
        attrs.push((name, value));
    }

    Ok(Element {
        ns,
        name: String::from_utf8_lossy(start.local_name().as_ref()).into_owned(),
        attrs,
        text: String::new(),
        children: Vec::new(),
    })
}
