//! Element scanning for the small XML documents the crate touches: storage
//! container listings and the reference documents rewritten around uploads.
//!
//! Elements are located by name only. Nested elements sharing a name are not
//! supported, and neither are CDATA sections.

use std::borrow::Cow;
use std::ops::Range;

/// Byte ranges of the raw text inside every `<tag>` element, in document order.
///
/// Attributes on the opening tag are allowed; self-closing elements are skipped.
pub(crate) fn element_spans(xml: &str, tag: &str) -> Vec<Range<usize>> {
    let open = format!("<{tag}");
    let close = format!("</{tag}>");
    let mut spans = Vec::new();
    let mut pos = 0;

    while let Some(found) = xml[pos..].find(&open) {
        let after_name = pos + found + open.len();
        let Some(tag_len) = xml[after_name..].find('>') else {
            break;
        };
        let attributes = &xml[after_name..after_name + tag_len];
        let content_start = after_name + tag_len + 1;

        // `<Blob` also prefixes `<Blobs>`.
        if !(attributes.is_empty() || attributes.starts_with(char::is_whitespace)) {
            pos = after_name;
            continue;
        }
        if attributes.ends_with('/') {
            pos = content_start;
            continue;
        }

        let Some(content_len) = xml[content_start..].find(&close) else {
            break;
        };
        spans.push(content_start..content_start + content_len);
        pos = content_start + content_len + close.len();
    }

    spans
}

/// Raw text of every `<tag>` element, still escaped.
pub(crate) fn elements<'a>(xml: &'a str, tag: &str) -> Vec<&'a str> {
    element_spans(xml, tag)
        .into_iter()
        .map(|span| &xml[span])
        .collect()
}

/// Decodes the predefined entities and numeric character references.
///
/// An `&` that does not start a valid reference is kept as is.
pub(crate) fn unescape(text: &str) -> Cow<'_, str> {
    if !text.contains('&') {
        return Cow::Borrowed(text);
    }

    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp..];
        let decoded = tail
            .find(';')
            .and_then(|semi| decode_reference(&tail[1..semi]).map(|c| (c, semi)));
        match decoded {
            Some((c, semi)) => {
                out.push(c);
                rest = &tail[semi + 1..];
            }
            None => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    Cow::Owned(out)
}

fn decode_reference(reference: &str) -> Option<char> {
    match reference {
        "lt" => Some('<'),
        "gt" => Some('>'),
        "amp" => Some('&'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        _ => {
            let number = reference.strip_prefix('#')?;
            let code = match number.strip_prefix(['x', 'X']) {
                Some(hex) if hex.chars().all(|c| c.is_ascii_hexdigit()) => {
                    u32::from_str_radix(hex, 16).ok()?
                }
                None if number.chars().all(|c| c.is_ascii_digit()) => number.parse().ok()?,
                _ => return None,
            };
            char::from_u32(code)
        }
    }
}

pub(crate) fn escape(text: &str) -> Cow<'_, str> {
    if !text.contains(['<', '>', '&', '"', '\'']) {
        return Cow::Borrowed(text);
    }
    let mut out = String::with_capacity(text.len() + 8);
    for c in text.chars() {
        match c {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    Cow::Owned(out)
}

/// Replaces the text of the named elements and leaves every other byte of
/// the document untouched.
///
/// `replace` gets the decoded, trimmed text and returns the new text, or
/// `None` to keep the element as it is.
pub(crate) fn rewrite_elements<E>(
    xml: &str,
    tags: &[&str],
    mut replace: impl FnMut(&str) -> Result<Option<String>, E>,
) -> Result<String, E> {
    let mut spans: Vec<_> = tags
        .iter()
        .flat_map(|tag| element_spans(xml, tag))
        .collect();
    spans.sort_by_key(|span| span.start);

    let mut out = String::with_capacity(xml.len());
    let mut copied = 0;
    for span in spans {
        if span.start < copied {
            continue;
        }
        let text = unescape(&xml[span.clone()]);
        if let Some(new_text) = replace(text.trim())? {
            out.push_str(&xml[copied..span.start]);
            out.push_str(&escape(&new_text));
            copied = span.end;
        }
    }
    out.push_str(&xml[copied..]);
    Ok(out)
}
