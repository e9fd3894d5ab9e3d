//! Asynchronous document retrieval on named worker threads.

use crate::load_queue::panic_message;
use sn_core::NavError;
use sn_core::NavResult;
use sn_dom::Document;
use sn_html::HtmlParser;
use sn_net::ClientConfig;
use sn_net::HttpClient;
use sn_net::NavUrl;
use sn_net::decode_text_response;
use sn_net::is_html_content_type;
use std::collections::HashMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::panic::catch_unwind;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

const FETCH_THREAD_STACK_SIZE: usize = 8 * 1024 * 1024;

/// Monotonically increasing id handed out per navigation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NavigationId(u64);

impl NavigationId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for NavigationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "nav#{}", self.0)
    }
}

/// Raw response for one document request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedBody {
    /// URL after redirects.
    pub final_url: NavUrl,
    pub status: u16,
    pub content_type: String,
    pub body: Vec<u8>,
}

/// Where documents come from. Called on fetch worker threads.
pub trait DocumentSource: Send + Sync {
    fn fetch(&self, url: &NavUrl) -> NavResult<FetchedBody>;
}

/// Fetches over HTTP(S), following redirects.
#[derive(Debug)]
pub struct HttpDocumentSource {
    client: HttpClient,
}

impl HttpDocumentSource {
    pub fn new(config: ClientConfig) -> NavResult<Self> {
        Ok(Self {
            client: HttpClient::new(config)?,
        })
    }
}

impl DocumentSource for HttpDocumentSource {
    fn fetch(&self, url: &NavUrl) -> NavResult<FetchedBody> {
        let fetched = self.client.get_following_redirects(url)?;
        Ok(FetchedBody {
            content_type: fetched.response.content_type().to_owned(),
            status: fetched.response.status.as_u16(),
            body: fetched.response.body,
            final_url: fetched.final_url,
        })
    }
}

/// Pre-rendered pages served from memory, keyed by URL without fragment.
#[derive(Debug, Clone, Default)]
pub struct StaticDocumentSource {
    pages: HashMap<String, (u16, String, Vec<u8>)>,
}

impl StaticDocumentSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        &mut self,
        url: &NavUrl,
        status: u16,
        content_type: impl Into<String>,
        body: impl Into<Vec<u8>>,
    ) {
        self.pages.insert(
            document_key(url).to_owned(),
            (status, content_type.into(), body.into()),
        );
    }

    /// Adds a `200 text/html` page.
    pub fn with_page(mut self, url: &str, html: &str) -> NavResult<Self> {
        let url = NavUrl::parse(url)?;
        self.insert(&url, 200, "text/html; charset=utf-8", html);
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }
}

impl DocumentSource for StaticDocumentSource {
    fn fetch(&self, url: &NavUrl) -> NavResult<FetchedBody> {
        let Some((status, content_type, body)) = self.pages.get(document_key(url)) else {
            return Err(NavError::new(
                "nav.fetch.static_missing",
                format!("no static page for {url}"),
            ));
        };
        Ok(FetchedBody {
            final_url: url.clone(),
            status: *status,
            content_type: content_type.clone(),
            body: body.clone(),
        })
    }
}

fn document_key(url: &NavUrl) -> &str {
    let raw = url.as_str();
    raw.split_once('#').map_or(raw, |(document, _)| document)
}

/// A parsed response, detached from the live document.
#[derive(Debug, Clone)]
pub struct FetchedDocument {
    pub url: NavUrl,
    pub status: u16,
    pub document: Document,
}

/// Message a fetch worker sends back to the host thread.
#[derive(Debug)]
pub struct FetchCompletion {
    pub id: NavigationId,
    /// The URL that was requested.
    pub url: NavUrl,
    pub outcome: NavResult<FetchedDocument>,
}

/// Starts fetches and collects their completions.
///
/// Every `begin` supersedes earlier navigations. Workers for superseded ids
/// skip parsing and report `nav.fetch.superseded`.
pub struct DocumentFetcher {
    source: Arc<dyn DocumentSource>,
    sender: mpsc::Sender<FetchCompletion>,
    receiver: mpsc::Receiver<FetchCompletion>,
    latest: Arc<AtomicU64>,
    next_id: u64,
    in_flight: usize,
}

impl fmt::Debug for DocumentFetcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocumentFetcher")
            .field("latest", &self.latest.load(Ordering::SeqCst))
            .field("next_id", &self.next_id)
            .field("in_flight", &self.in_flight)
            .finish_non_exhaustive()
    }
}

impl DocumentFetcher {
    pub fn new(source: Arc<dyn DocumentSource>) -> Self {
        let (sender, receiver) = mpsc::channel();
        Self {
            source,
            sender,
            receiver,
            latest: Arc::new(AtomicU64::new(0)),
            next_id: 1,
            in_flight: 0,
        }
    }

    /// Spawns a worker for `url` and returns its navigation id.
    pub fn begin(&mut self, url: NavUrl) -> NavResult<NavigationId> {
        let id = NavigationId(self.next_id);
        self.next_id = self.next_id.saturating_add(1);
        self.latest.store(id.0, Ordering::SeqCst);

        let source = Arc::clone(&self.source);
        let latest = Arc::clone(&self.latest);
        let sender = self.sender.clone();
        let job = move || {
            let outcome = catch_unwind(AssertUnwindSafe(|| {
                fetch_document(source.as_ref(), &url, id, &latest)
            }))
            .unwrap_or_else(|payload| {
                let message = panic_message(&*payload, "fetch worker panicked");
                tracing::error!(navigation = %id, url = %url, %message, "fetch worker panicked");
                Err(NavError::new(
                    "nav.fetch.worker_panicked",
                    format!("fetch worker for {url} panicked: {message}"),
                ))
            });
            let _ = sender.send(FetchCompletion { id, url, outcome });
        };

        thread::Builder::new()
            .name("swapnav-fetch".to_owned())
            .stack_size(FETCH_THREAD_STACK_SIZE)
            .spawn(job)
            .map_err(|error| {
                NavError::new(
                    "nav.fetch.spawn_failed",
                    format!("failed to spawn fetch worker: {error}"),
                )
            })?;

        self.in_flight = self.in_flight.saturating_add(1);
        tracing::debug!(navigation = %id, "started fetch worker");
        Ok(id)
    }

    /// Non-blocking.
    pub fn try_next(&mut self) -> Option<FetchCompletion> {
        let completion = self.receiver.try_recv().ok()?;
        self.in_flight = self.in_flight.saturating_sub(1);
        Some(completion)
    }

    pub fn next_timeout(&mut self, timeout: Duration) -> Option<FetchCompletion> {
        let completion = self.receiver.recv_timeout(timeout).ok()?;
        self.in_flight = self.in_flight.saturating_sub(1);
        Some(completion)
    }

    pub fn is_latest(&self, id: NavigationId) -> bool {
        self.latest.load(Ordering::SeqCst) == id.0
    }

    /// The most recently issued id, if any fetch started.
    pub fn latest(&self) -> Option<NavigationId> {
        match self.latest.load(Ordering::SeqCst) {
            0 => None,
            id => Some(NavigationId(id)),
        }
    }

    /// Workers that have not reported back yet.
    pub fn in_flight(&self) -> usize {
        self.in_flight
    }
}

fn fetch_document(
    source: &dyn DocumentSource,
    url: &NavUrl,
    id: NavigationId,
    latest: &AtomicU64,
) -> NavResult<FetchedDocument> {
    let fetched = source.fetch(url)?;

    if latest.load(Ordering::SeqCst) != id.0 {
        return Err(NavError::new(
            "nav.fetch.superseded",
            format!("{id} was superseded before its response was parsed"),
        ));
    }

    if !fetched.content_type.trim().is_empty() && !is_html_content_type(&fetched.content_type) {
        return Err(NavError::new(
            "nav.fetch.not_html",
            format!(
                "{} returned `{}`, expected an HTML document",
                fetched.final_url, fetched.content_type
            ),
        ));
    }

    let text = decode_text_response(&fetched.body, &fetched.content_type);
    let document = HtmlParser.parse(&text);
    tracing::debug!(
        navigation = %id,
        url = %fetched.final_url,
        status = fetched.status,
        bytes = fetched.body.len(),
        "fetched document"
    );

    Ok(FetchedDocument {
        url: fetched.final_url,
        status: fetched.status,
        document,
    })
}

#[cfg(test)]
mod tests {
    use super::DocumentFetcher;
    use super::DocumentSource;
    use super::FetchCompletion;
    use super::FetchedBody;
    use super::StaticDocumentSource;
    use sn_core::NavResult;
    use sn_net::NavUrl;
    use std::sync::Arc;
    use std::time::Duration;

    fn url(input: &str) -> NavUrl {
        match NavUrl::parse(input) {
            Ok(value) => value,
            Err(error) => panic!("{error}"),
        }
    }

    fn wait(fetcher: &mut DocumentFetcher) -> FetchCompletion {
        match fetcher.next_timeout(Duration::from_secs(5)) {
            Some(value) => value,
            None => panic!("fetch worker did not report back"),
        }
    }

    fn source() -> StaticDocumentSource {
        let mut source = match StaticDocumentSource::new()
            .with_page("https://site.test/a", "<title>A</title><main>a</main>")
        {
            Ok(value) => value,
            Err(error) => panic!("{error}"),
        };
        source.insert(&url("https://site.test/feed"), 200, "application/json", "{}");
        source
    }

    #[test]
    fn static_source_ignores_fragments() {
        let source = source();
        let fetched = source.fetch(&url("https://site.test/a#intro"));
        assert!(matches!(fetched, Ok(body) if body.status == 200));
        let missing = source.fetch(&url("https://site.test/b"));
        assert!(matches!(missing, Err(error) if error.code == "nav.fetch.static_missing"));
    }

    #[test]
    fn completes_with_parsed_document() {
        let mut fetcher = DocumentFetcher::new(Arc::new(source()));
        let id = match fetcher.begin(url("https://site.test/a")) {
            Ok(value) => value,
            Err(error) => panic!("{error}"),
        };
        assert!(fetcher.is_latest(id));

        let completion = wait(&mut fetcher);
        assert_eq!(completion.id, id);
        let fetched = match completion.outcome {
            Ok(value) => value,
            Err(error) => panic!("{error}"),
        };
        assert_eq!(fetched.document.title(), "A");
        assert_eq!(fetcher.in_flight(), 0);
    }

    #[test]
    fn rejects_non_html_responses() {
        let mut fetcher = DocumentFetcher::new(Arc::new(source()));
        if let Err(error) = fetcher.begin(url("https://site.test/feed")) {
            panic!("{error}");
        }
        let completion = wait(&mut fetcher);
        assert!(matches!(completion.outcome, Err(error) if error.code == "nav.fetch.not_html"));
    }

    struct PanickingSource;

    impl DocumentSource for PanickingSource {
        fn fetch(&self, _url: &NavUrl) -> NavResult<FetchedBody> {
            panic!("source exploded")
        }
    }

    #[test]
    fn panicking_source_still_reports_completion() {
        let mut fetcher = DocumentFetcher::new(Arc::new(PanickingSource));
        let id = match fetcher.begin(url("https://site.test/a")) {
            Ok(value) => value,
            Err(error) => panic!("{error}"),
        };
        let completion = wait(&mut fetcher);
        assert_eq!(completion.id, id);
        assert!(matches!(
            completion.outcome,
            Err(error) if error.code == "nav.fetch.worker_panicked"
                && error.message.contains("source exploded")
        ));
        assert_eq!(fetcher.in_flight(), 0);
    }

    #[test]
    fn ids_increase_and_only_the_newest_is_latest() {
        let mut fetcher = DocumentFetcher::new(Arc::new(source()));
        assert!(fetcher.latest().is_none());
        let first = match fetcher.begin(url("https://site.test/a")) {
            Ok(value) => value,
            Err(error) => panic!("{error}"),
        };
        let second = match fetcher.begin(url("https://site.test/a")) {
            Ok(value) => value,
            Err(error) => panic!("{error}"),
        };
        assert!(second > first);
        assert!(!fetcher.is_latest(first));
        assert_eq!(fetcher.latest(), Some(second));
        let _ = wait(&mut fetcher);
        let _ = wait(&mut fetcher);
    }
}
