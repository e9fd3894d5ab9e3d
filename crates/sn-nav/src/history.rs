//! In-memory session history: URL entries plus a current index.

use sn_net::NavUrl;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionHistory {
    entries: Vec<NavUrl>,
    index: usize,
}

impl SessionHistory {
    pub fn new(initial: NavUrl) -> Self {
        Self {
            entries: vec![initial],
            index: 0,
        }
    }

    pub fn current(&self) -> &NavUrl {
        // `entries` is never empty and `index` always points inside it.
        &self.entries[self.index]
    }

    /// Adds an entry after the current one and drops any forward entries.
    ///
    /// Pushing the current URL again still creates an entry, the same way
    /// `history.pushState` does.
    pub fn push(&mut self, url: NavUrl) {
        self.entries.truncate(self.index + 1);
        self.entries.push(url);
        self.index = self.entries.len() - 1;
    }

    /// Rewrites the current entry in place, used when a redirect changed the URL.
    pub fn replace_current(&mut self, url: NavUrl) {
        self.entries[self.index] = url;
    }

    pub fn can_go_back(&self) -> bool {
        self.index > 0
    }

    pub fn can_go_forward(&self) -> bool {
        self.index + 1 < self.entries.len()
    }

    /// Moves the pointer back one entry and returns the new current URL.
    pub fn back(&mut self) -> Option<&NavUrl> {
        if !self.can_go_back() {
            return None;
        }
        self.index -= 1;
        Some(self.current())
    }

    pub fn forward(&mut self) -> Option<&NavUrl> {
        if !self.can_go_forward() {
            return None;
        }
        self.index += 1;
        Some(self.current())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn entries(&self) -> &[NavUrl] {
        &self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::SessionHistory;
    use sn_net::NavUrl;

    fn url(input: &str) -> NavUrl {
        match NavUrl::parse(input) {
            Ok(value) => value,
            Err(error) => panic!("{error}"),
        }
    }

    #[test]
    fn push_truncates_forward_entries() {
        let mut history = SessionHistory::new(url("https://site.test/"));
        history.push(url("https://site.test/a"));
        history.push(url("https://site.test/b"));
        assert_eq!(history.back().map(NavUrl::as_str), Some("https://site.test/a"));

        history.push(url("https://site.test/c"));
        assert_eq!(history.len(), 3);
        assert!(!history.can_go_forward());
        assert_eq!(history.current().as_str(), "https://site.test/c");
    }

    #[test]
    fn back_and_forward_stop_at_the_ends() {
        let mut history = SessionHistory::new(url("https://site.test/"));
        assert!(history.back().is_none());
        history.push(url("https://site.test/a"));
        assert!(history.forward().is_none());
        assert_eq!(history.back().map(NavUrl::as_str), Some("https://site.test/"));
        assert_eq!(history.forward().map(NavUrl::as_str), Some("https://site.test/a"));
        assert_eq!(history.index(), 1);
    }

    #[test]
    fn pushing_the_same_url_twice_keeps_both_entries() {
        let mut history = SessionHistory::new(url("https://site.test/"));
        history.push(url("https://site.test/a"));
        history.push(url("https://site.test/a"));
        assert_eq!(history.len(), 3);
    }

    #[test]
    fn replace_current_keeps_length() {
        let mut history = SessionHistory::new(url("https://site.test/"));
        history.push(url("https://site.test/old"));
        history.replace_current(url("https://site.test/new"));
        assert_eq!(history.len(), 2);
        assert_eq!(history.current().as_str(), "https://site.test/new");
    }
}
