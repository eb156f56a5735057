//! Error taxonomy for per-item scrape failures
//!
//! Parse failures never appear here: count/price parsers return
//! `Option`/zero and the handlers degrade gracefully. Persistence
//! failures are logged and swallowed inside the gateway. What remains
//! is the set of errors that abort the current work item - and only
//! the current work item; `safe_scrape` is the sole boundary that
//! converts them into structured failure results.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScrapeError {
    #[error("navigation timed out after {timeout_ms}ms: {url}")]
    NavigationTimeout { url: String, timeout_ms: u64 },

    #[error("timed out waiting for element '{selector}'")]
    ElementTimeout { selector: String },

    #[error("location setup failed at step '{step}': {reason}")]
    LocationSetup { step: String, reason: String },

    #[error("browser error: {0}")]
    Browser(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ScrapeError {
    pub fn browser(err: impl std::fmt::Display) -> Self {
        Self::Browser(err.to_string())
    }

    pub fn element_timeout(selector: impl Into<String>) -> Self {
        Self::ElementTimeout {
            selector: selector.into(),
        }
    }

    pub fn location_setup(step: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::LocationSetup {
            step: step.into(),
            reason: reason.into(),
        }
    }
}

pub type HandlerResult<T> = Result<T, ScrapeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn location_setup_message_names_the_step() {
        let err = ScrapeError::location_setup("area", "dropdown never became enabled");
        assert!(err.to_string().contains("area"));
        assert!(err.to_string().contains("dropdown never became enabled"));
    }

    #[test]
    fn navigation_timeout_message_carries_url() {
        let err = ScrapeError::NavigationTimeout {
            url: "https://example.com/a".into(),
            timeout_ms: 30_000,
        };
        assert!(err.to_string().contains("https://example.com/a"));
        assert!(err.to_string().contains("30000"));
    }
}
