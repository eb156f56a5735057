//! Work items and scrape outcomes
//!
//! A `WorkItem` is one URL-to-scrape task pulled from the work source.
//! Every item produces exactly one `ScrapeResult` and one terminal
//! `ScrapeLog` event, regardless of how the handler failed internally.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum length of an error message persisted to the log store.
pub const MAX_ERROR_MESSAGE_LEN: usize = 1000;

/// One URL-to-scrape task with site/category metadata.
///
/// Immutable once read from the work source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: i64,
    /// Business serial; defaults to `id` when the source row omits it.
    pub serial: Option<i64>,
    pub website: String,
    pub category: String,
    pub url: String,
}

impl WorkItem {
    /// Serial used in log events: the explicit serial, or the row id.
    pub fn effective_serial(&self) -> i64 {
        self.serial.unwrap_or(self.id)
    }
}

/// Terminal status of a scrape attempt as persisted to the log store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ScrapeStatus {
    Pending,
    Success,
    Fail,
}

impl ScrapeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Success => "SUCCESS",
            Self::Fail => "FAIL",
        }
    }
}

/// Outcome of one handler invocation for one `WorkItem`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeResult {
    pub success: bool,
    pub products_found: u32,
    pub pages_scraped: u32,
    pub error_message: Option<String>,
    /// Handler-specific payload, opaque to the orchestrator.
    pub data: serde_json::Value,
}

impl ScrapeResult {
    /// Failure result carrying a human-readable message.
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            products_found: 0,
            pages_scraped: 0,
            error_message: Some(message.into()),
            data: serde_json::Value::Null,
        }
    }
}

/// One scrape-log row written to the external log store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeLog {
    pub serial: i64,
    pub website: String,
    pub category: String,
    pub url: String,
    pub scrape_status: ScrapeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub products_found: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pages_scraped: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub scraped_at: DateTime<Utc>,
}

impl ScrapeLog {
    /// PENDING row emitted when a scrape starts.
    pub fn started(item: &WorkItem) -> Self {
        Self {
            serial: item.effective_serial(),
            website: item.website.clone(),
            category: item.category.clone(),
            url: item.url.clone(),
            scrape_status: ScrapeStatus::Pending,
            products_found: None,
            pages_scraped: None,
            error_message: None,
            scraped_at: Utc::now(),
        }
    }
}

/// Truncate an error message to the log store's column limit.
pub fn truncate_error_message(message: &str) -> String {
    if message.len() <= MAX_ERROR_MESSAGE_LEN {
        return message.to_string();
    }
    // Cut on a char boundary at or below the limit.
    let mut end = MAX_ERROR_MESSAGE_LEN;
    while !message.is_char_boundary(end) {
        end -= 1;
    }
    message[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serial_defaults_to_id_when_absent() {
        let item = WorkItem {
            id: 42,
            serial: None,
            website: "oscarstores.com".into(),
            category: "dairy".into(),
            url: "https://www.oscarstores.com/category/dairy".into(),
        };
        assert_eq!(item.effective_serial(), 42);

        let item = WorkItem { serial: Some(7), ..item };
        assert_eq!(item.effective_serial(), 7);
    }

    #[test]
    fn error_message_is_truncated_to_limit() {
        let long = "x".repeat(MAX_ERROR_MESSAGE_LEN + 500);
        assert_eq!(truncate_error_message(&long).len(), MAX_ERROR_MESSAGE_LEN);

        let short = "navigation timed out";
        assert_eq!(truncate_error_message(short), short);
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        // Multi-byte characters straddling the limit must not split.
        let s = "é".repeat(MAX_ERROR_MESSAGE_LEN);
        let truncated = truncate_error_message(&s);
        assert!(truncated.len() <= MAX_ERROR_MESSAGE_LEN);
        assert!(truncated.chars().all(|c| c == 'é'));
    }

    #[test]
    fn scrape_status_serializes_uppercase() {
        assert_eq!(
            serde_json::to_string(&ScrapeStatus::Success).unwrap(),
            "\"SUCCESS\""
        );
        assert_eq!(ScrapeStatus::Fail.as_str(), "FAIL");
    }
}
