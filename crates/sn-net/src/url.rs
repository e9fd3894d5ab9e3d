//! Navigation URL parsing, resolution, and origin checks.

use sn_core::NavError;
use sn_core::NavResult;
use std::fmt;
use url::Url;

/// Supported application-level URL schemes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Https => "https",
        }
    }

    pub fn is_secure(self) -> bool {
        matches!(self, Self::Https)
    }

    fn default_port(self) -> u16 {
        match self {
            Self::Http => 80,
            Self::Https => 443,
        }
    }
}

/// Absolute http(s) URL used as a navigation target and history entry.
///
/// The fragment is kept so history entries round-trip exactly; it is never
/// sent on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavUrl {
    parsed: Url,
    scheme: Scheme,
    host: String,
    port: u16,
}

impl NavUrl {
    pub fn parse(input: &str) -> NavResult<Self> {
        let parsed = Url::parse(input.trim()).map_err(|error| {
            NavError::new(
                "net.url.invalid",
                format!("failed to parse URL `{input}`: {error}"),
            )
        })?;
        Self::from_url(parsed)
    }

    /// Resolves `reference` (an href) against this URL.
    pub fn join(&self, reference: &str) -> NavResult<Self> {
        let joined = self.parsed.join(reference.trim()).map_err(|error| {
            NavError::new(
                "net.url.join_failed",
                format!("failed to resolve `{reference}` against `{}`: {error}", self.parsed),
            )
        })?;
        Self::from_url(joined)
    }

    fn from_url(parsed: Url) -> NavResult<Self> {
        if parsed.cannot_be_a_base() {
            return Err(NavError::new(
                "net.url.invalid_base",
                "URL cannot be used for network navigation",
            ));
        }

        if !parsed.username().is_empty() || parsed.password().is_some() {
            return Err(NavError::new(
                "net.url.credentials_disallowed",
                "URL userinfo (`username:password@`) is not allowed",
            ));
        }

        let scheme = match parsed.scheme() {
            "http" => Scheme::Http,
            "https" => Scheme::Https,
            other => {
                return Err(NavError::new(
                    "net.url.scheme_unsupported",
                    format!("unsupported scheme `{other}`"),
                ));
            }
        };

        let host = parsed
            .host_str()
            .ok_or_else(|| NavError::new("net.url.host_missing", "URL must include a host"))?
            .to_ascii_lowercase();

        let port = parsed.port_or_known_default().ok_or_else(|| {
            NavError::new(
                "net.url.port_missing",
                "unable to determine effective port for URL",
            )
        })?;

        Ok(Self {
            parsed,
            scheme,
            host,
            port,
        })
    }

    pub fn as_str(&self) -> &str {
        self.parsed.as_str()
    }

    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn is_secure(&self) -> bool {
        self.scheme.is_secure()
    }

    pub fn fragment(&self) -> Option<&str> {
        self.parsed.fragment()
    }

    pub fn authority(&self) -> String {
        if self.port == self.scheme.default_port() {
            self.host.clone()
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    pub fn origin(&self) -> String {
        format!("{}://{}", self.scheme.as_str(), self.authority())
    }

    pub fn same_origin(&self, other: &NavUrl) -> bool {
        self.scheme == other.scheme && self.host == other.host && self.port == other.port
    }

    /// True when both URLs name the same document and differ at most by fragment.
    pub fn same_document(&self, other: &NavUrl) -> bool {
        let mut left = self.parsed.clone();
        let mut right = other.parsed.clone();
        left.set_fragment(None);
        right.set_fragment(None);
        left == right
    }

    pub fn path_and_query(&self) -> String {
        let path = if self.parsed.path().is_empty() {
            "/"
        } else {
            self.parsed.path()
        };

        match self.parsed.query() {
            Some(query) => format!("{path}?{query}"),
            None => path.to_owned(),
        }
    }
}

impl fmt::Display for NavUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
