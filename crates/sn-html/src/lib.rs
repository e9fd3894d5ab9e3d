//! HTML parsing into the `sn-dom` arena.

mod tokenizer;

use sn_dom::Document;
use sn_dom::NodeId;
use tokenizer::Token;
use tokenizer::tokenize;

/// Parses raw HTML into a DOM document.
///
/// The tree builder is forgiving: unknown end tags are ignored, unclosed
/// elements are closed at end of input, and `script`/`style` bodies are kept
/// verbatim.
#[derive(Debug, Default)]
pub struct HtmlParser;

impl HtmlParser {
    pub fn parse(&self, input: &str) -> Document {
        let tokens = tokenize(input);
        let token_count = tokens.len();
        let document = build_tree(tokens);
        tracing::debug!(
            input_bytes = input.len(),
            token_count,
            node_count = document.node_count(),
            "parsed html document"
        );
        document
    }
}

fn build_tree(tokens: Vec<Token>) -> Document {
    let mut document = Document::new();
    let mut stack: Vec<NodeId> = vec![document.root()];

    for token in tokens {
        let Some(current) = stack.last().copied() else {
            break;
        };
        match token {
            Token::Text(text) => {
                let node = document.create_text(text);
                attach(&mut document, current, node);
            }
            Token::Comment(text) => {
                let node = document.create_comment(text);
                attach(&mut document, current, node);
            }
            Token::Start {
                name,
                attrs,
                self_closing,
            } => {
                let void = is_void(&name);
                let node = document.create_element_with_attrs(&name, attrs);
                attach(&mut document, current, node);
                if !self_closing && !void {
                    stack.push(node);
                }
            }
            Token::End { name } => {
                let open = stack
                    .iter()
                    .skip(1)
                    .rposition(|id| document.tag_name(*id) == Some(name.as_str()));
                if let Some(position) = open {
                    stack.truncate(position + 1);
                }
            }
        }
    }

    document
}

fn attach(document: &mut Document, parent: NodeId, child: NodeId) {
    // Freshly created nodes always attach cleanly; a failure means a builder bug.
    if let Err(error) = document.append_child(parent, child) {
        tracing::warn!(%error, "dropping node during html tree construction");
    }
}

fn is_void(tag: &str) -> bool {
    sn_dom::serialize::is_void_element(tag)
}

#[cfg(test)]
mod tests {
    use super::HtmlParser;
    use sn_dom::NodeKind;
    use sn_dom::serialize::inner_html;

    #[test]
    fn parses_title_and_structure() {
        let doc = HtmlParser.parse(
            "<!doctype html><html><head><title> Swap  Nav </title></head>\
             <body><main id=\"swap\"><p>Hi</p></main></body></html>",
        );
        assert_eq!(doc.title(), "Swap Nav");
        assert!(doc.head().is_some());
        let main = match doc.select("#swap") {
            Ok(found) => found,
            Err(error) => panic!("{error}"),
        };
        assert_eq!(main.len(), 1);
        assert_eq!(inner_html(&doc, main[0]), "<p>Hi</p>");
    }

    #[test]
    fn void_and_self_closing_elements_take_no_children() {
        let doc = HtmlParser.parse("<div><img src=a.png><br/>text</div>");
        let div = match doc.first_element_by_tag("div") {
            Some(id) => id,
            None => panic!("missing div"),
        };
        assert_eq!(doc.children(div).len(), 3);
        assert_eq!(doc.text_content(div), "text");
    }

    #[test]
    fn stray_end_tags_are_ignored() {
        let doc = HtmlParser.parse("<main><p>one</span>two</p></main>");
        let p = match doc.first_element_by_tag("p") {
            Some(id) => id,
            None => panic!("missing p"),
        };
        assert_eq!(doc.text_content(p), "onetwo");
    }

    #[test]
    fn unclosed_elements_close_at_end_of_input() {
        let doc = HtmlParser.parse("<main><section><p>deep");
        let p = match doc.first_element_by_tag("p") {
            Some(id) => id,
            None => panic!("missing p"),
        };
        assert_eq!(doc.text_content(p), "deep");
        assert!(doc.is_connected(p));
    }

    #[test]
    fn keeps_script_source_and_comments() {
        let doc = HtmlParser.parse("<script>window.__x = 1 < 2;</script><!-- note -->");
        let script = match doc.first_element_by_tag("script") {
            Some(id) => id,
            None => panic!("missing script"),
        };
        assert_eq!(doc.text_content(script), "window.__x = 1 < 2;");
        let comment = doc.children(doc.root())[1];
        assert!(matches!(doc.kind(comment), Some(NodeKind::Comment(text)) if text == " note "));
    }

    #[test]
    fn closing_outer_element_closes_inner_ones() {
        let doc = HtmlParser.parse("<main><div><span>a</main><footer>b</footer>");
        let footer = match doc.first_element_by_tag("footer") {
            Some(id) => id,
            None => panic!("missing footer"),
        };
        assert_eq!(doc.parent(footer), Some(doc.root()));
    }
}
