//! Tracks which anchors are intercepted and decides what a click on them does.

use sn_dom::Document;
use sn_dom::NodeId;
use sn_net::NavUrl;
use std::collections::HashSet;

/// What a click on a node should turn into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkDecision {
    /// Suppress default navigation and fetch `NavUrl` in place.
    Navigate(NavUrl),
    /// Let the host navigate normally. `href` is the raw attribute, if any.
    PassThrough { href: Option<String> },
}

/// Set of wired anchor nodes. Wiring the same node twice is a no-op.
#[derive(Debug, Clone, Default)]
pub struct LinkInterceptor {
    wired: HashSet<NodeId>,
}

impl LinkInterceptor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wires every node in `anchors` and returns how many were new.
    pub fn attach(&mut self, anchors: impl IntoIterator<Item = NodeId>) -> usize {
        anchors
            .into_iter()
            .filter(|anchor| self.wired.insert(*anchor))
            .count()
    }

    pub fn is_wired(&self, node: NodeId) -> bool {
        self.wired.contains(&node)
    }

    /// Forgets nodes that are no longer part of the live tree.
    pub fn prune(&mut self, document: &Document) -> usize {
        let before = self.wired.len();
        self.wired.retain(|node| document.is_connected(*node));
        before - self.wired.len()
    }

    pub fn len(&self) -> usize {
        self.wired.len()
    }

    pub fn is_empty(&self) -> bool {
        self.wired.is_empty()
    }

    /// Resolves a click on `node` (or anything inside a wired anchor).
    pub fn resolve_click(&self, document: &Document, node: NodeId, base: &NavUrl) -> LinkDecision {
        let anchor = std::iter::once(node)
            .chain(document.ancestors(node))
            .find(|candidate| self.is_wired(*candidate));
        let Some(anchor) = anchor else {
            return LinkDecision::PassThrough { href: None };
        };

        let href = document.attr(anchor, "href").map(str::to_owned);
        let Some(raw) = href.as_deref() else {
            return LinkDecision::PassThrough { href };
        };

        if let Some(target) = document.attr(anchor, "target") {
            let target = target.trim();
            if !target.is_empty() && !target.eq_ignore_ascii_case("_self") {
                tracing::debug!(%target, "link opens another browsing context");
                return LinkDecision::PassThrough { href };
            }
        }
        if document.attr(anchor, "download").is_some() {
            return LinkDecision::PassThrough { href };
        }

        let url = match base.join(raw.trim()) {
            Ok(url) => url,
            Err(error) => {
                tracing::debug!(href = raw, %error, "link not navigable in place");
                return LinkDecision::PassThrough { href };
            }
        };
        if !url.same_origin(base) {
            return LinkDecision::PassThrough { href };
        }
        // Fragment-only moves within the current page scroll, they do not fetch.
        if url.same_document(base) && url.fragment().is_some() {
            return LinkDecision::PassThrough { href };
        }

        LinkDecision::Navigate(url)
    }
}
