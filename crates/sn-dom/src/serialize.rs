//! HTML serialization of arena subtrees.

use crate::Document;
use crate::NodeId;
use crate::NodeKind;

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track", "wbr",
];

pub fn is_void_element(tag: &str) -> bool {
    VOID_ELEMENTS.contains(&tag)
}

/// Markup of `id` including its own tags.
pub fn outer_html(document: &Document, id: NodeId) -> String {
    let mut out = String::new();
    write_node(document, id, false, &mut out);
    out
}

/// Markup of the children of `id`.
pub fn inner_html(document: &Document, id: NodeId) -> String {
    let raw = document
        .tag_name(id)
        .is_some_and(|tag| matches!(tag, "script" | "style"));
    let mut out = String::new();
    for child in document.children(id) {
        write_node(document, *child, raw, &mut out);
    }
    out
}

fn write_node(document: &Document, id: NodeId, raw_text: bool, out: &mut String) {
    match document.kind(id) {
        None => {}
        Some(NodeKind::Document) => {
            for child in document.children(id) {
                write_node(document, *child, false, out);
            }
        }
        Some(NodeKind::Text(text)) => {
            if raw_text {
                out.push_str(text);
            } else {
                escape_into(text, false, out);
            }
        }
        Some(NodeKind::Comment(text)) => {
            out.push_str("<!--");
            out.push_str(text);
            out.push_str("-->");
        }
        Some(NodeKind::Element(element)) => {
            out.push('<');
            out.push_str(&element.tag);
            for (name, value) in &element.attrs {
                out.push(' ');
                out.push_str(name);
                out.push_str("=\"");
                escape_into(value, true, out);
                out.push('"');
            }
            out.push('>');
            if is_void_element(&element.tag) {
                return;
            }
            let raw = matches!(element.tag.as_str(), "script" | "style");
            for child in document.children(id) {
                write_node(document, *child, raw, out);
            }
            out.push_str("</");
            out.push_str(&element.tag);
            out.push('>');
        }
    }
}

fn escape_into(value: &str, attribute: bool, out: &mut String) {
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '"' if attribute => out.push_str("&quot;"),
            '<' if !attribute => out.push_str("&lt;"),
            '>' if !attribute => out.push_str("&gt;"),
            '\u{a0}' => out.push_str("&nbsp;"),
            _ => out.push(ch),
        }
    }
}
