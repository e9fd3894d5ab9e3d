//! The navigation engine: owns the live document and drives every partial navigation.

use crate::config::CompiledConfig;
use crate::config::FailurePolicy;
use crate::config::NavConfig;
use crate::fetcher::DocumentFetcher;
use crate::fetcher::DocumentSource;
use crate::fetcher::FetchCompletion;
use crate::fetcher::HttpDocumentSource;
use crate::fetcher::NavigationId;
use crate::history::SessionHistory;
use crate::interceptor::LinkDecision;
use crate::interceptor::LinkInterceptor;
use crate::load_queue::LoadContext;
use crate::load_queue::LoadQueue;
use crate::load_queue::ReplayReport;
use crate::patcher::PatchReport;
use crate::patcher::patch;
use crate::patcher::unique_container;
use sn_core::NavError;
use sn_core::NavResult;
use sn_dom::Document;
use sn_dom::NodeId;
use sn_js::BoaScriptHost;
use sn_js::JsRuntimeConfig;
use sn_js::ScriptHost;
use sn_net::NavUrl;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

type ScriptHostFactory<S> = Box<dyn FnOnce() -> NavResult<S>>;
type FailureObserver = Box<dyn FnMut(&NavUrl, &NavError)>;

/// What the host should do with a click.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClickOutcome {
    /// Default navigation suppressed; a fetch is running.
    Intercepted(NavigationId),
    /// Not ours. The host navigates normally.
    PassThrough { href: Option<String> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetupReport {
    pub links_wired: usize,
    pub replay: ReplayReport,
}

/// Result of handling one fetch completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NavigationEvent {
    /// The live document now shows `url`.
    Patched {
        id: NavigationId,
        url: NavUrl,
        report: PatchReport,
        /// `None` when the navigation finished before `setup()`.
        replay: Option<ReplayReport>,
    },
    /// A newer navigation was issued; this completion was discarded.
    Stale { id: NavigationId, url: NavUrl },
    /// Failed under `FailurePolicy::Ignore`. The page is unchanged.
    Failed {
        id: NavigationId,
        url: NavUrl,
        error: NavError,
    },
    /// Failed under `FailurePolicy::Reload`. The host should load `url` in full.
    FullReload {
        id: NavigationId,
        url: NavUrl,
        error: NavError,
    },
}

impl NavigationEvent {
    pub fn id(&self) -> NavigationId {
        match self {
            Self::Patched { id, .. }
            | Self::Stale { id, .. }
            | Self::Failed { id, .. }
            | Self::FullReload { id, .. } => *id,
        }
    }
}

pub struct NavigationEngineBuilder<S: ScriptHost> {
    config: NavConfig,
    document: Option<Document>,
    location: Option<String>,
    source: Option<Arc<dyn DocumentSource>>,
    script_host: ScriptHostFactory<S>,
    failure_observer: Option<FailureObserver>,
}

impl<S: ScriptHost> NavigationEngineBuilder<S> {
    /// The live document the engine takes ownership of.
    pub fn with_document(mut self, document: Document) -> Self {
        self.document = Some(document);
        self
    }

    /// Absolute URL of the live document.
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    /// Replaces the default HTTP source.
    pub fn with_source(mut self, source: impl DocumentSource + 'static) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    pub fn with_script_host<T: ScriptHost + 'static>(self, host: T) -> NavigationEngineBuilder<T> {
        NavigationEngineBuilder {
            config: self.config,
            document: self.document,
            location: self.location,
            source: self.source,
            script_host: Box::new(move || Ok(host)),
            failure_observer: self.failure_observer,
        }
    }

    /// Called for every failed navigation, before the failure policy applies.
    pub fn with_failure_observer(
        mut self,
        observer: impl FnMut(&NavUrl, &NavError) + 'static,
    ) -> Self {
        self.failure_observer = Some(Box::new(observer));
        self
    }

    pub fn build(self) -> NavResult<NavigationEngine<S>> {
        let config = self.config.compile()?;
        let document = self.document.ok_or_else(|| {
            NavError::new("nav.build.document_missing", "no live document was provided")
        })?;
        let location = self.location.ok_or_else(|| {
            NavError::new("nav.build.location_missing", "no document location was provided")
        })?;
        let location = NavUrl::parse(&location)?;
        let source = match self.source {
            Some(source) => source,
            None => Arc::new(HttpDocumentSource::new(config.fetch.client_config())?),
        };
        let scripts = (self.script_host)()?;

        tracing::debug!(
            container = %config.container,
            links = %config.links,
            location = %location,
            "built navigation engine"
        );

        Ok(NavigationEngine {
            config,
            document,
            history: SessionHistory::new(location),
            fetcher: DocumentFetcher::new(source),
            interceptor: LinkInterceptor::new(),
            load_queue: LoadQueue::new(),
            scripts,
            failure_observer: self.failure_observer,
            set_up: false,
        })
    }
}

impl NavigationEngineBuilder<BoaScriptHost> {
    pub fn with_js_config(mut self, config: JsRuntimeConfig) -> Self {
        self.script_host = Box::new(move || BoaScriptHost::new(config));
        self
    }
}

/// Partial-navigation engine for one page.
///
/// All methods run on the host thread. Fetches run on worker threads and
/// are applied when the host calls [`NavigationEngine::poll`] or
/// [`NavigationEngine::wait_for_completion`].
pub struct NavigationEngine<S: ScriptHost = BoaScriptHost> {
    config: CompiledConfig,
    document: Document,
    history: SessionHistory,
    fetcher: DocumentFetcher,
    interceptor: LinkInterceptor,
    load_queue: LoadQueue,
    scripts: S,
    failure_observer: Option<FailureObserver>,
    set_up: bool,
}

impl<S: ScriptHost> fmt::Debug for NavigationEngine<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NavigationEngine")
            .field("location", self.history.current())
            .field("history_len", &self.history.len())
            .field("wired_links", &self.interceptor.len())
            .field("load_queue", &self.load_queue)
            .field("fetcher", &self.fetcher)
            .field("set_up", &self.set_up)
            .finish_non_exhaustive()
    }
}

impl NavigationEngine<BoaScriptHost> {
    pub fn builder(config: NavConfig) -> NavigationEngineBuilder<BoaScriptHost> {
        NavigationEngineBuilder {
            config,
            document: None,
            location: None,
            source: None,
            script_host: Box::new(|| BoaScriptHost::new(JsRuntimeConfig::default())),
            failure_observer: None,
        }
    }
}

impl<S: ScriptHost> NavigationEngine<S> {
    /// Wires the current links, installs the replay hook and replays the load
    /// queue once.
    ///
    /// Fails when the container selector does not match exactly one element.
    pub fn setup(&mut self) -> NavResult<SetupReport> {
        if self.set_up {
            return Err(NavError::new(
                "nav.setup.repeated",
                "setup() was already called for this page",
            ));
        }
        unique_container(&self.document, &self.config.container, "live").map_err(|error| {
            let code = if error.code == "nav.patch.container_ambiguous" {
                "nav.setup.container_ambiguous"
            } else {
                "nav.setup.container_missing"
            };
            NavError::new(code, error.message)
        })?;

        let anchors = self.document.query_selector_all(&self.config.links);
        let links_wired = self.interceptor.attach(anchors);

        let location = self.history.current().clone();
        self.sync_script_host(&location);
        self.set_up = true;
        let replay = self.replay(None);
        tracing::info!(
            location = %self.history.current(),
            links_wired,
            callbacks = replay.invoked,
            "navigation engine ready"
        );
        Ok(SetupReport {
            links_wired,
            replay,
        })
    }

    /// Registers a callback that runs at setup and after every successful navigation.
    pub fn onload<F>(&mut self, callback: F)
    where
        F: FnMut(&mut LoadContext<'_>) -> NavResult<()> + 'static,
    {
        self.load_queue.register(callback);
    }

    pub fn onload_named<F>(&mut self, label: impl Into<String>, callback: F)
    where
        F: FnMut(&mut LoadContext<'_>) -> NavResult<()> + 'static,
    {
        self.load_queue.register_named(label, callback);
    }

    /// Handles a click on `node` or on something inside a wired anchor.
    pub fn click(&mut self, node: NodeId) -> NavResult<ClickOutcome> {
        match self
            .interceptor
            .resolve_click(&self.document, node, self.history.current())
        {
            LinkDecision::Navigate(url) => self.start(url, true).map(ClickOutcome::Intercepted),
            LinkDecision::PassThrough { href } => Ok(ClickOutcome::PassThrough { href }),
        }
    }

    /// Navigates to `href` (resolved against the current location) and pushes a history entry.
    pub fn navigate(&mut self, href: &str) -> NavResult<NavigationId> {
        let url = self.history.current().join(href)?;
        self.start(url, true)
    }

    /// Re-fetches the current history entry without pushing a new one.
    ///
    /// Hosts call this after moving the history pointer themselves.
    pub fn popstate(&mut self) -> NavResult<NavigationId> {
        let url = self.history.current().clone();
        self.start(url, false)
    }

    /// Moves back one entry and re-fetches it. `None` at the start of history.
    pub fn back(&mut self) -> NavResult<Option<NavigationId>> {
        if self.history.back().is_none() {
            return Ok(None);
        }
        self.popstate().map(Some)
    }

    pub fn forward(&mut self) -> NavResult<Option<NavigationId>> {
        if self.history.forward().is_none() {
            return Ok(None);
        }
        self.popstate().map(Some)
    }

    /// Applies every completion that has already arrived. Never blocks.
    pub fn poll(&mut self) -> Vec<NavigationEvent> {
        let mut events = Vec::new();
        while let Some(completion) = self.fetcher.try_next() {
            events.push(self.complete(completion));
        }
        events
    }

    /// Blocks up to `timeout` for the next completion and applies it.
    pub fn wait_for_completion(&mut self, timeout: Duration) -> Option<NavigationEvent> {
        let completion = self.fetcher.next_timeout(timeout)?;
        Some(self.complete(completion))
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn document_mut(&mut self) -> &mut Document {
        &mut self.document
    }

    pub fn location(&self) -> &NavUrl {
        self.history.current()
    }

    pub fn history(&self) -> &SessionHistory {
        &self.history
    }

    pub fn interceptor(&self) -> &LinkInterceptor {
        &self.interceptor
    }

    pub fn config(&self) -> &CompiledConfig {
        &self.config
    }

    pub fn script_host(&self) -> &S {
        &self.scripts
    }

    pub fn script_host_mut(&mut self) -> &mut S {
        &mut self.scripts
    }

    pub fn is_set_up(&self) -> bool {
        self.set_up
    }

    /// Fetches started but not yet applied.
    pub fn in_flight(&self) -> usize {
        self.fetcher.in_flight()
    }

    /// The live container element.
    pub fn container(&self) -> NavResult<NodeId> {
        unique_container(&self.document, &self.config.container, "live")
    }

    fn start(&mut self, url: NavUrl, push: bool) -> NavResult<NavigationId> {
        let id = self.fetcher.begin(url.clone())?;
        tracing::debug!(navigation = %id, %url, push, "navigation started");
        if push {
            self.history.push(url);
        }
        Ok(id)
    }

    fn complete(&mut self, completion: FetchCompletion) -> NavigationEvent {
        let FetchCompletion { id, url, outcome } = completion;
        if !self.fetcher.is_latest(id) {
            tracing::warn!(navigation = %id, %url, "discarding stale navigation");
            return NavigationEvent::Stale { id, url };
        }

        let fetched = match outcome {
            Ok(fetched) => fetched,
            Err(error) => return self.fail(id, url, error),
        };
        let redirected = !fetched.url.same_document(&url);

        // Scripts in the new content see the final URL.
        let target = if redirected { &fetched.url } else { &url };
        self.sync_script_host(target);
        let report = match patch(
            &self.config,
            &mut self.document,
            &fetched,
            &mut self.interceptor,
            &mut self.scripts,
        ) {
            Ok(report) => report,
            Err(error) => {
                let current = self.history.current().clone();
                self.sync_script_host(&current);
                return self.fail(id, url, error);
            }
        };
        if redirected {
            tracing::debug!(navigation = %id, from = %url, to = %fetched.url, "redirected");
            self.history.replace_current(fetched.url.clone());
        }

        let replay = if self.set_up {
            Some(self.replay(Some(id)))
        } else {
            None
        };
        let location = self.history.current().clone();
        tracing::info!(
            navigation = %id,
            url = %location,
            status = fetched.status,
            scripts_run = report.scripts_run,
            "navigation patched"
        );
        NavigationEvent::Patched {
            id,
            url: location,
            report,
            replay,
        }
    }

    fn fail(&mut self, id: NavigationId, url: NavUrl, error: NavError) -> NavigationEvent {
        if let Some(observer) = self.failure_observer.as_mut() {
            observer(&url, &error);
        }
        match self.config.on_failure {
            FailurePolicy::Reload => {
                tracing::warn!(navigation = %id, %url, %error, "navigation failed, requesting full reload");
                NavigationEvent::FullReload { id, url, error }
            }
            FailurePolicy::Ignore => {
                tracing::warn!(navigation = %id, %url, %error, "navigation failed, keeping current page");
                NavigationEvent::Failed { id, url, error }
            }
        }
    }

    fn replay(&mut self, navigation: Option<NavigationId>) -> ReplayReport {
        let mut context = LoadContext {
            document: &mut self.document,
            location: self.history.current(),
            navigation,
        };
        self.load_queue.replay(&mut context)
    }

    fn sync_script_host(&mut self, location: &NavUrl) {
        if let Err(error) = self.scripts.set_location(location.as_str()) {
            tracing::warn!(%error, "failed to mirror location into script host");
        }
        if let Err(error) = self.scripts.set_document_title(&self.document.title()) {
            tracing::warn!(%error, "failed to mirror document title into script host");
        }
    }
}
