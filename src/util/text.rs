use std::borrow::Cow;

/// Decodes raw feed bytes into text and repairs the damage that most often
/// aborts XML parsing in the wild.
///
/// Decoding prefers UTF-8 and falls back to Latin-1 (every byte maps to the
/// code point of the same value), so it never fails. The repaired text has:
///
/// - any leading byte-order mark removed
/// - the control characters illegal in XML stripped
///   (0x00–0x08, 0x0B, 0x0C, 0x0E–0x1F)
/// - every `&` that does not start a recognized entity reference
///   (`amp`, `lt`, `gt`, `apos`, `quot`, `#digits`, `#xhex`) escaped to
///   `&amp;`
///
/// This is a best-effort repair layer, not a validator: output can still fail
/// to parse as XML, and that failure is reported by the parse step, not here.
pub fn sanitize_xml(raw: &[u8]) -> String {
    let decoded: Cow<'_, str> = match std::str::from_utf8(raw) {
        Ok(s) => Cow::Borrowed(s),
        Err(_) => Cow::Owned(raw.iter().map(|&b| b as char).collect()),
    };
    let text = decoded.strip_prefix('\u{feff}').unwrap_or(&decoded);

    let mut out = String::with_capacity(text.len());
    for (i, c) in text.char_indices() {
        match c {
            '\u{00}'..='\u{08}' | '\u{0B}' | '\u{0C}' | '\u{0E}'..='\u{1F}' => {}
            '&' if !is_recognized_entity(&text[i + 1..]) => out.push_str("&amp;"),
            _ => out.push(c),
        }
    }
    out
}

/// True when `rest` (the text immediately after a `&`) begins with an entity
/// reference the XML parser will accept: one of the five named builtins or a
/// numeric character reference with at least one digit.
fn is_recognized_entity(rest: &str) -> bool {
    const NAMED: [&str; 5] = ["amp;", "lt;", "gt;", "apos;", "quot;"];
    if NAMED.iter().any(|name| rest.starts_with(name)) {
        return true;
    }
    if let Some(digits) = rest.strip_prefix("#x") {
        match digits.find(';') {
            Some(n) => n > 0 && digits[..n].bytes().all(|b| b.is_ascii_hexdigit()),
            None => false,
        }
    } else if let Some(digits) = rest.strip_prefix('#') {
        match digits.find(';') {
            Some(n) => n > 0 && digits[..n].bytes().all(|b| b.is_ascii_digit()),
            None => false,
        }
    } else {
        false
    }
}

/// Reduces HTML markup to plain text: tag spans become spaces, entities are
/// decoded after tag removal, whitespace runs collapse to a single space, and
/// the edges are trimmed. Never fails; empty input yields empty output.
pub fn strip_html(markup: &str) -> String {
    let mut no_tags = String::with_capacity(markup.len());
    let mut in_tag = false;
    for c in markup.chars() {
        match c {
            '<' if !in_tag => {
                in_tag = true;
                no_tags.push(' ');
            }
            '>' if in_tag => in_tag = false,
            _ if !in_tag => no_tags.push(c),
            _ => {}
        }
    }
    let decoded = html_escape::decode_html_entities(&no_tags);
    decoded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Truncates a string to at most `cap` characters, cutting on a char boundary.
pub fn truncate_chars(s: String, cap: usize) -> String {
    match s.char_indices().nth(cap) {
        Some((idx, _)) => {
            let mut s = s;
            s.truncate(idx);
            s
        }
        None => s,
    }
}
