//! Shared primitives used across swapnav crates.

/// Result alias used across the workspace.
pub type NavResult<T> = Result<T, NavError>;

/// Workspace error: a dotted machine-readable code plus a human message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{code}: {message}")]
pub struct NavError {
    pub code: &'static str,
    pub message: String,
}

impl NavError {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// True when the code sits under `prefix` (e.g. `"net.http"`).
    pub fn is_in(&self, prefix: &str) -> bool {
        self.code == prefix
            || self
                .code
                .strip_prefix(prefix)
                .is_some_and(|rest| rest.starts_with('.'))
    }
}
