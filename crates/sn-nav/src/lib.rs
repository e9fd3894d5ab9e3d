//! Partial page navigation.
//!
//! A [`NavigationEngine`] owns the live document. Clicks on configured links
//! fetch the target page on a worker thread; once the host drains the
//! completion, the configured title/metadata is copied, the container element
//! is swapped for the fetched one, the incoming inline scripts run, and the
//! registered load callbacks are replayed.

pub mod config;
pub mod engine;
pub mod fetcher;
pub mod history;
pub mod interceptor;
pub mod load_queue;
pub mod patcher;

pub use config::FailurePolicy;
pub use config::FetchConfig;
pub use config::NavConfig;
pub use config::ReplaceConfig;
pub use engine::ClickOutcome;
pub use engine::NavigationEngine;
pub use engine::NavigationEngineBuilder;
pub use engine::NavigationEvent;
pub use engine::SetupReport;
pub use fetcher::DocumentSource;
pub use fetcher::FetchedBody;
pub use fetcher::FetchedDocument;
pub use fetcher::HttpDocumentSource;
pub use fetcher::NavigationId;
pub use fetcher::StaticDocumentSource;
pub use history::SessionHistory;
pub use interceptor::LinkInterceptor;
pub use load_queue::LoadContext;
pub use load_queue::LoadQueue;
pub use load_queue::ReplayReport;
pub use patcher::PatchReport;

include!("tests.rs");
