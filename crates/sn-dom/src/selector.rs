//! CSS selector parsing and matching against the arena.
//!
//! Supported: type and `*`, `#id`, `.class`, attribute selectors
//! (`[a]`, `[a=v]`, `[a~=v]`, `[a^=v]`, `[a$=v]`, `[a*=v]`, `[a|=v]`),
//! descendant and child combinators, and comma-separated groups.
//! Sibling combinators and pseudo-classes are rejected.

use crate::Document;
use crate::NodeId;
use sn_core::NavError;
use sn_core::NavResult;
use std::fmt;
use std::str::FromStr;

/// Parsed, comma-separated selector group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectorList {
    source: String,
    selectors: Vec<Selector>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Selector {
    /// Right-to-left: `segments[0]` is the subject.
    segments: Vec<SelectorSegment>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct SelectorSegment {
    compound: CompoundSelector,
    combinator_to_next: Option<Combinator>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct CompoundSelector {
    tag: Option<String>,
    id: Option<String>,
    classes: Vec<String>,
    attributes: Vec<AttributeSelector>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct AttributeSelector {
    name: String,
    condition: Option<(AttributeOperator, String)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AttributeOperator {
    Equals,
    Includes,
    DashMatch,
    Prefix,
    Suffix,
    Substring,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Combinator {
    Descendant,
    Child,
}

impl SelectorList {
    pub fn parse(input: &str) -> NavResult<Self> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(invalid(input, "selector is empty"));
        }

        let mut selectors = Vec::new();
        for group in split_top_level(trimmed, b',') {
            selectors.push(parse_selector(input, group)?);
        }

        Ok(Self {
            source: trimmed.to_owned(),
            selectors,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub(crate) fn matches(&self, document: &Document, id: NodeId) -> bool {
        document.is_element(id)
            && self
                .selectors
                .iter()
                .any(|selector| matches_from(document, &selector.segments, 0, id))
    }
}

impl FromStr for SelectorList {
    type Err = NavError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        Self::parse(input)
    }
}

impl fmt::Display for SelectorList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

fn invalid(source: &str, reason: impl fmt::Display) -> NavError {
    NavError::new(
        "dom.selector.invalid",
        format!("invalid selector `{source}`: {reason}"),
    )
}

fn split_top_level(input: &str, delimiter: u8) -> Vec<&str> {
    let bytes = input.as_bytes();
    let mut parts = Vec::new();
    let mut quote: Option<u8> = None;
    let mut bracket_depth = 0_u32;
    let mut start = 0_usize;
    let mut idx = 0_usize;

    while idx < bytes.len() {
        let byte = bytes[idx];
        if let Some(open) = quote {
            if byte == b'\\' {
                idx = idx.saturating_add(2);
                continue;
            }
            if byte == open {
                quote = None;
            }
        } else {
            match byte {
                b'\'' | b'"' => quote = Some(byte),
                b'[' => bracket_depth = bracket_depth.saturating_add(1),
                b']' => bracket_depth = bracket_depth.saturating_sub(1),
                _ if byte == delimiter && bracket_depth == 0 => {
                    parts.push(&input[start..idx]);
                    start = idx.saturating_add(1);
                }
                _ => {}
            }
        }
        idx = idx.saturating_add(1);
    }

    parts.push(&input[start.min(input.len())..]);
    parts
}

fn parse_selector(source: &str, input: &str) -> NavResult<Selector> {
    let input = input.trim();
    let bytes = input.as_bytes();
    if bytes.is_empty() {
        return Err(invalid(source, "empty selector in group"));
    }

    let mut idx = 0_usize;
    let mut quote: Option<u8> = None;
    let mut bracket_depth = 0_u32;
    let mut pending_descendant = false;
    let mut compound_start: Option<usize> = None;
    let mut compounds: Vec<&str> = Vec::new();
    let mut combinators: Vec<Combinator> = Vec::new();

    while idx < bytes.len() {
        let byte = bytes[idx];

        if let Some(open) = quote {
            if byte == b'\\' {
                idx = idx.saturating_add(2);
                continue;
            }
            if byte == open {
                quote = None;
            }
            idx = idx.saturating_add(1);
            continue;
        }

        if bracket_depth > 0 {
            match byte {
                b'\'' | b'"' => quote = Some(byte),
                b']' => bracket_depth = bracket_depth.saturating_sub(1),
                _ => {}
            }
            idx = idx.saturating_add(1);
            continue;
        }

        match byte {
            b'>' => {
                close_compound(input, &mut compound_start, idx, &mut compounds);
                if compounds.len() != combinators.len() + 1 {
                    return Err(invalid(source, "child combinator without a left-hand side"));
                }
                pending_descendant = false;
                combinators.push(Combinator::Child);
            }
            b'+' | b'~' => {
                return Err(invalid(source, "sibling combinators are not supported"));
            }
            b':' => {
                return Err(invalid(source, "pseudo-classes are not supported"));
            }
            _ if byte.is_ascii_whitespace() => {
                if compound_start.is_some() {
                    close_compound(input, &mut compound_start, idx, &mut compounds);
                    pending_descendant = true;
                }
            }
            _ => {
                if compound_start.is_none() {
                    if pending_descendant && compounds.len() == combinators.len() + 1 {
                        combinators.push(Combinator::Descendant);
                    }
                    pending_descendant = false;
                    compound_start = Some(idx);
                }
                if byte == b'[' {
                    bracket_depth = bracket_depth.saturating_add(1);
                }
            }
        }

        idx = idx.saturating_add(1);
    }

    if quote.is_some() || bracket_depth > 0 {
        return Err(invalid(source, "unterminated attribute selector"));
    }
    close_compound(input, &mut compound_start, bytes.len(), &mut compounds);

    if compounds.is_empty() || compounds.len() != combinators.len() + 1 {
        return Err(invalid(source, "dangling combinator"));
    }

    let mut left_to_right = Vec::with_capacity(compounds.len());
    for raw in compounds {
        left_to_right.push(parse_compound(source, raw)?);
    }

    let mut segments = Vec::with_capacity(left_to_right.len());
    for index in (0..left_to_right.len()).rev() {
        let combinator_to_next = if index == 0 {
            None
        } else {
            combinators.get(index - 1).copied()
        };
        segments.push(SelectorSegment {
            compound: left_to_right[index].clone(),
            combinator_to_next,
        });
    }

    Ok(Selector { segments })
}

fn close_compound<'a>(
    input: &'a str,
    start: &mut Option<usize>,
    end: usize,
    out: &mut Vec<&'a str>,
) {
    if let Some(begin) = start.take() {
        out.push(&input[begin..end]);
    }
}

fn parse_compound(source: &str, input: &str) -> NavResult<CompoundSelector> {
    let bytes = input.as_bytes();
    let mut selector = CompoundSelector::default();
    let mut idx = 0_usize;
    let mut universal = false;

    if bytes.first() == Some(&b'*') {
        universal = true;
        idx = 1;
    } else if bytes.first().is_some_and(u8::is_ascii_alphabetic) {
        let end = scan_ident(bytes, idx);
        selector.tag = Some(input[idx..end].to_ascii_lowercase());
        idx = end;
    }

    while idx < bytes.len() {
        match bytes[idx] {
            b'#' | b'.' => {
                let marker = bytes[idx];
                let start = idx.saturating_add(1);
                let end = scan_ident(bytes, start);
                if start == end {
                    return Err(invalid(source, format!("missing name after `{}`", marker as char)));
                }
                let value = input[start..end].to_owned();
                if marker == b'#' {
                    if selector.id.is_some() {
                        return Err(invalid(source, "compound has two ids"));
                    }
                    selector.id = Some(value);
                } else {
                    selector.classes.push(value);
                }
                idx = end;
            }
            b'[' => {
                let (attribute, next) = parse_attribute(source, input, idx)?;
                selector.attributes.push(attribute);
                idx = next;
            }
            other => {
                return Err(invalid(
                    source,
                    format!("unexpected `{}` in `{input}`", other as char),
                ));
            }
        }
    }

    if !universal
        && selector.tag.is_none()
        && selector.id.is_none()
        && selector.classes.is_empty()
        && selector.attributes.is_empty()
    {
        return Err(invalid(source, format!("empty compound `{input}`")));
    }

    Ok(selector)
}

/// Parses `[...]` starting at `open`; returns the selector and the index after `]`.
fn parse_attribute(
    source: &str,
    input: &str,
    open: usize,
) -> NavResult<(AttributeSelector, usize)> {
    let bytes = input.as_bytes();
    let mut idx = skip_spaces(bytes, open.saturating_add(1));
    let name_end = scan_ident(bytes, idx);
    if name_end == idx {
        return Err(invalid(source, "attribute selector without a name"));
    }
    let name = input[idx..name_end].to_ascii_lowercase();
    idx = skip_spaces(bytes, name_end);

    if bytes.get(idx) == Some(&b']') {
        return Ok((
            AttributeSelector {
                name,
                condition: None,
            },
            idx.saturating_add(1),
        ));
    }

    let (operator, op_len) = match (bytes.get(idx), bytes.get(idx.saturating_add(1))) {
        (Some(b'='), _) => (AttributeOperator::Equals, 1),
        (Some(b'~'), Some(b'=')) => (AttributeOperator::Includes, 2),
        (Some(b'|'), Some(b'=')) => (AttributeOperator::DashMatch, 2),
        (Some(b'^'), Some(b'=')) => (AttributeOperator::Prefix, 2),
        (Some(b'$'), Some(b'=')) => (AttributeOperator::Suffix, 2),
        (Some(b'*'), Some(b'=')) => (AttributeOperator::Substring, 2),
        _ => return Err(invalid(source, "unknown attribute operator")),
    };
    idx = skip_spaces(bytes, idx.saturating_add(op_len));

    let value = match bytes.get(idx) {
        Some(&quote) if quote == b'"' || quote == b'\'' => {
            let mut value = String::new();
            idx = idx.saturating_add(1);
            loop {
                match bytes.get(idx) {
                    None => return Err(invalid(source, "unterminated quoted value")),
                    Some(&byte) if byte == quote => {
                        idx = idx.saturating_add(1);
                        break;
                    }
                    Some(b'\\') => {
                        let Some(escaped) = input[idx.saturating_add(1)..].chars().next() else {
                            return Err(invalid(source, "dangling escape"));
                        };
                        value.push(escaped);
                        idx = idx.saturating_add(1 + escaped.len_utf8());
                    }
                    Some(_) => {
                        let Some(ch) = input[idx..].chars().next() else {
                            return Err(invalid(source, "unterminated quoted value"));
                        };
                        value.push(ch);
                        idx = idx.saturating_add(ch.len_utf8());
                    }
                }
            }
            value
        }
        _ => {
            let end = scan_ident(bytes, idx);
            if end == idx {
                return Err(invalid(source, "attribute value missing"));
            }
            let value = input[idx..end].to_owned();
            idx = end;
            value
        }
    };

    idx = skip_spaces(bytes, idx);
    if bytes.get(idx) != Some(&b']') {
        return Err(invalid(source, "expected `]` after attribute value"));
    }

    Ok((
        AttributeSelector {
            name,
            condition: Some((operator, value)),
        },
        idx.saturating_add(1),
    ))
}

fn scan_ident(bytes: &[u8], mut idx: usize) -> usize {
    while idx < bytes.len() && is_ident_byte(bytes[idx]) {
        idx = idx.saturating_add(1);
    }
    idx
}

fn is_ident_byte(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_') || byte >= 0x80
}

fn skip_spaces(bytes: &[u8], mut idx: usize) -> usize {
    while idx < bytes.len() && bytes[idx].is_ascii_whitespace() {
        idx = idx.saturating_add(1);
    }
    idx
}

fn matches_from(
    document: &Document,
    segments: &[SelectorSegment],
    index: usize,
    node: NodeId,
) -> bool {
    let Some(segment) = segments.get(index) else {
        return true;
    };
    if !matches_compound(&segment.compound, document, node) {
        return false;
    }
    let Some(combinator) = segment.combinator_to_next else {
        return true;
    };

    let next = index.saturating_add(1);
    match combinator {
        Combinator::Child => document
            .parent(node)
            .is_some_and(|parent| matches_from(document, segments, next, parent)),
        Combinator::Descendant => document
            .ancestors(node)
            .any(|ancestor| matches_from(document, segments, next, ancestor)),
    }
}

fn matches_compound(compound: &CompoundSelector, document: &Document, node: NodeId) -> bool {
    let Some(element) = document.element(node) else {
        return false;
    };

    if compound.tag.as_ref().is_some_and(|tag| &element.tag != tag) {
        return false;
    }

    if let Some(id) = &compound.id {
        if document.attr(node, "id") != Some(id.as_str()) {
            return false;
        }
    }

    if !compound.classes.is_empty() {
        let classes = document.attr(node, "class").unwrap_or_default();
        let all_present = compound.classes.iter().all(|wanted| {
            classes
                .split_ascii_whitespace()
                .any(|candidate| candidate == wanted.as_str())
        });
        if !all_present {
            return false;
        }
    }

    compound.attributes.iter().all(|attribute| {
        let Some(actual) = document.attr(node, &attribute.name) else {
            return false;
        };
        let Some((operator, expected)) = &attribute.condition else {
            return true;
        };
        match operator {
            AttributeOperator::Equals => actual == expected.as_str(),
            AttributeOperator::Includes => actual
                .split_ascii_whitespace()
                .any(|token| token == expected.as_str()),
            AttributeOperator::DashMatch => {
                actual == expected.as_str()
                    || actual
                        .strip_prefix(expected.as_str())
                        .is_some_and(|rest| rest.starts_with('-'))
            }
            AttributeOperator::Prefix => !expected.is_empty() && actual.starts_with(expected.as_str()),
            AttributeOperator::Suffix => !expected.is_empty() && actual.ends_with(expected.as_str()),
            AttributeOperator::Substring => !expected.is_empty() && actual.contains(expected.as_str()),
        }
    })
}
