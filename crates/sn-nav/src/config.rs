//! Engine configuration: selectors, replace rules, failure policy and fetch settings.

use serde::Deserialize;
use sn_core::NavError;
use sn_core::NavResult;
use sn_dom::SelectorList;
use sn_net::ClientConfig;
use sn_net::TrustStoreMode;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_CONTAINER: &str = "main";
pub const DEFAULT_LINKS: &str = "a[data-nav]";

/// `<meta>` and `<link>` attributes copied on every navigation by default.
const DEFAULT_ATTRIBUTES: &[(&str, &str)] = &[
    ("meta[name=\"description\"]", "content"),
    ("meta[property=\"og:title\"]", "content"),
    ("meta[property=\"og:description\"]", "content"),
    ("meta[property=\"og:url\"]", "content"),
    ("meta[property=\"og:image\"]", "content"),
    ("meta[property=\"og:type\"]", "content"),
    ("meta[property=\"article:published_time\"]", "content"),
    ("meta[property=\"article:modified_time\"]", "content"),
    ("meta[property=\"article:tag\"]", "content"),
    ("link[rel=\"canonical\"]", "href"),
];

/// Top-level engine configuration.
///
/// Every field is optional in TOML:
///
/// ```toml
/// container = "main"
/// links = "a[data-nav]"
/// on_failure = "reload"
///
/// [replace]
/// text_content = ["title"]
/// attribute = [{ selector = "link[rel=canonical]", attribute = "href" }]
///
/// [fetch]
/// timeout_secs = 10
/// max_redirects = 5
/// trust_store = "webpki"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NavConfig {
    /// Selector of the region replaced wholesale.
    pub container: String,
    /// Selector of anchors eligible for interception.
    pub links: String,
    pub replace: ReplaceConfig,
    pub on_failure: FailurePolicy,
    pub fetch: FetchConfig,
}

impl Default for NavConfig {
    fn default() -> Self {
        Self {
            container: DEFAULT_CONTAINER.to_owned(),
            links: DEFAULT_LINKS.to_owned(),
            replace: ReplaceConfig::default(),
            on_failure: FailurePolicy::default(),
            fetch: FetchConfig::default(),
        }
    }
}

impl NavConfig {
    pub fn from_toml_str(input: &str) -> NavResult<Self> {
        toml::from_str(input).map_err(|error| {
            NavError::new(
                "nav.config.parse_failed",
                format!("invalid navigation config: {error}"),
            )
        })
    }

    pub fn load(path: impl AsRef<Path>) -> NavResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|error| {
            NavError::new(
                "nav.config.read_failed",
                format!("failed to read config at {}: {error}", path.display()),
            )
        })?;
        let config = Self::from_toml_str(&content)?;
        tracing::debug!(path = %path.display(), "loaded navigation config");
        Ok(config)
    }

    pub fn with_container(mut self, selector: impl Into<String>) -> Self {
        self.container = selector.into();
        self
    }

    pub fn with_links(mut self, selector: impl Into<String>) -> Self {
        self.links = selector.into();
        self
    }

    pub fn with_replace(mut self, replace: ReplaceConfig) -> Self {
        self.replace = replace;
        self
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.on_failure = policy;
        self
    }

    pub fn with_fetch(mut self, fetch: FetchConfig) -> Self {
        self.fetch = fetch;
        self
    }

    /// Parses every selector once. Any invalid selector fails the whole config.
    pub fn compile(&self) -> NavResult<CompiledConfig> {
        let container = compile_selector("container", &self.container)?;
        let links = compile_selector("links", &self.links)?;

        let mut text_content = Vec::with_capacity(self.replace.text_content.len());
        for selector in &self.replace.text_content {
            text_content.push(compile_selector("replace.text_content", selector)?);
        }

        let mut attributes = Vec::with_capacity(self.replace.attribute.len());
        for rule in &self.replace.attribute {
            let name = rule.attribute.trim();
            if name.is_empty() || name.contains(char::is_whitespace) {
                return Err(NavError::new(
                    "nav.config.attribute_invalid",
                    format!("invalid attribute name `{}` for `{}`", rule.attribute, rule.selector),
                ));
            }
            attributes.push((
                compile_selector("replace.attribute", &rule.selector)?,
                name.to_ascii_lowercase(),
            ));
        }

        Ok(CompiledConfig {
            container,
            links,
            text_content,
            attributes,
            on_failure: self.on_failure,
            fetch: self.fetch.clone(),
        })
    }
}

fn compile_selector(field: &str, selector: &str) -> NavResult<SelectorList> {
    SelectorList::parse(selector).map_err(|error| {
        NavError::new(
            "nav.config.selector_invalid",
            format!("`{field}`: {}", error.message),
        )
    })
}

/// What gets copied from a fetched document into the live one, besides the container.
///
/// Fixed once the engine is built.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReplaceConfig {
    text_content: Vec<String>,
    attribute: Vec<AttributeReplace>,
}

/// Copy rule for one attribute of the elements matching `selector`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AttributeReplace {
    pub selector: String,
    pub attribute: String,
}

impl Default for ReplaceConfig {
    fn default() -> Self {
        Self {
            text_content: vec!["title".to_owned()],
            attribute: DEFAULT_ATTRIBUTES
                .iter()
                .map(|(selector, attribute)| AttributeReplace {
                    selector: (*selector).to_owned(),
                    attribute: (*attribute).to_owned(),
                })
                .collect(),
        }
    }
}

impl ReplaceConfig {
    /// A config that copies nothing.
    pub fn empty() -> Self {
        Self {
            text_content: Vec::new(),
            attribute: Vec::new(),
        }
    }

    pub fn with_text_content(mut self, selector: impl Into<String>) -> Self {
        self.text_content.push(selector.into());
        self
    }

    pub fn with_attribute(
        mut self,
        selector: impl Into<String>,
        attribute: impl Into<String>,
    ) -> Self {
        self.attribute.push(AttributeReplace {
            selector: selector.into(),
            attribute: attribute.into(),
        });
        self
    }

    pub fn text_content(&self) -> &[String] {
        &self.text_content
    }

    pub fn attributes(&self) -> &[AttributeReplace] {
        &self.attribute
    }
}

/// What the engine does when a navigation cannot be completed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Ask the host to perform a full page load of the target.
    #[default]
    Reload,
    /// Log and keep the current page.
    Ignore,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TrustStore {
    #[default]
    Webpki,
    WebpkiAndOs,
}

impl From<TrustStore> for TrustStoreMode {
    fn from(value: TrustStore) -> Self {
        match value {
            TrustStore::Webpki => Self::WebPkiOnly,
            TrustStore::WebpkiAndOs => Self::WebPkiAndOs,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FetchConfig {
    pub timeout_secs: u64,
    pub max_redirects: usize,
    pub trust_store: TrustStore,
}

impl Default for FetchConfig {
    fn default() -> Self {
        let client = ClientConfig::default();
        Self {
            timeout_secs: client.timeout.as_secs(),
            max_redirects: client.max_redirects,
            trust_store: TrustStore::default(),
        }
    }
}

impl FetchConfig {
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            timeout: Duration::from_secs(self.timeout_secs.max(1)),
            max_redirects: self.max_redirects,
            trust_store: self.trust_store.into(),
        }
    }
}

/// `NavConfig` with every selector parsed.
#[derive(Debug, Clone)]
pub struct CompiledConfig {
    pub container: SelectorList,
    pub links: SelectorList,
    pub text_content: Vec<SelectorList>,
    /// `(selector, lowercased attribute name)` pairs.
    pub attributes: Vec<(SelectorList, String)>,
    pub on_failure: FailurePolicy,
    pub fetch: FetchConfig,
}

#[cfg(test)]
mod tests {
    use super::FailurePolicy;
    use super::NavConfig;
    use super::ReplaceConfig;
    use super::TrustStore;

    #[test]
    fn defaults_cover_title_and_metadata() {
        let config = NavConfig::default();
        assert_eq!(config.container, "main");
        assert_eq!(config.links, "a[data-nav]");
        assert_eq!(config.replace.text_content(), ["title".to_owned()]);
        assert_eq!(config.replace.attributes().len(), 10);
        assert_eq!(config.on_failure, FailurePolicy::Reload);

        let compiled = match config.compile() {
            Ok(value) => value,
            Err(error) => panic!("{error}"),
        };
        assert_eq!(compiled.attributes.len(), 10);
        assert!(compiled.attributes.iter().any(|(_, name)| name == "href"));
    }

    #[test]
    fn parses_partial_toml_over_defaults() {
        let config = NavConfig::from_toml_str(
            r##"
container = "#swup"
on_failure = "ignore"

[replace]
text_content = ["title", "h1.page-title"]
attribute = [{ selector = "html", attribute = "lang" }]

[fetch]
trust_store = "webpki-and-os"
"##,
        );
        let config = match config {
            Ok(value) => value,
            Err(error) => panic!("{error}"),
        };

        assert_eq!(config.container, "#swup");
        assert_eq!(config.links, "a[data-nav]");
        assert_eq!(config.on_failure, FailurePolicy::Ignore);
        assert_eq!(config.replace.text_content().len(), 2);
        assert_eq!(config.replace.attributes()[0].attribute, "lang");
        assert_eq!(config.fetch.trust_store, TrustStore::WebpkiAndOs);
        assert_eq!(config.fetch.max_redirects, 5);
    }

    #[test]
    fn rejects_unknown_keys_and_bad_selectors() {
        let unknown = NavConfig::from_toml_str("containr = \"main\"");
        assert!(matches!(unknown, Err(error) if error.code == "nav.config.parse_failed"));

        let bad = NavConfig::default().with_links("a + b").compile();
        assert!(matches!(bad, Err(error) if error.code == "nav.config.selector_invalid"));

        let bad_attr = NavConfig::default()
            .with_replace(ReplaceConfig::empty().with_attribute("meta", " "))
            .compile();
        assert!(matches!(bad_attr, Err(error) if error.code == "nav.config.attribute_invalid"));
    }

    #[test]
    fn builder_setters_replace_fields() {
        let config = NavConfig::default()
            .with_container(".body")
            .with_links("a")
            .with_replace(ReplaceConfig::empty().with_text_content("title"))
            .with_failure_policy(FailurePolicy::Ignore);
        assert_eq!(config.container, ".body");
        assert_eq!(config.links, "a");
        assert!(config.replace.attributes().is_empty());
        assert_eq!(config.on_failure, FailurePolicy::Ignore);
    }

    #[test]
    fn load_reports_missing_files() {
        let result = NavConfig::load("/nonexistent/swapnav.toml");
        assert!(matches!(result, Err(error) if error.code == "nav.config.read_failed"));
    }
}
