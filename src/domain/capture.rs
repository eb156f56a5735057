//! Network-capture records and category-uid deduplication state
//!
//! Seoudi pages answer product queries over a GraphQL endpoint; each
//! query carries a category uid in its URL variables. `CategoryUidState`
//! pins the first uid seen for a work item and refuses everything else,
//! so cross-talk from a previous category (still settling in the same
//! tab) never leaks into the current item's record stream.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One accepted network response, retained for the duration of a single
/// work item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapturedResponse {
    pub url: String,
    pub method: String,
    pub status: i64,
    pub request_headers: serde_json::Value,
    pub response_headers: serde_json::Value,
    pub timestamp_ms: i64,
    pub payload: serde_json::Value,
    pub category_uid: String,
}

/// Category-uid bookkeeping.
///
/// `seen_uids` is carried across work items within a run; `current_uid`
/// is reset at the start of every item. Once `current_uid` is set, no
/// response bearing a different uid is accepted for that item. At item
/// completion the current uid (if any) moves into `seen_uids`.
#[derive(Debug, Default)]
pub struct CategoryUidState {
    seen_uids: HashSet<String>,
    current_uid: Option<String>,
}

impl CategoryUidState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset the per-item portion of the state. Run-scoped `seen_uids`
    /// is untouched.
    pub fn begin_item(&mut self) {
        self.current_uid = None;
    }

    /// Promote the current uid into the seen set and clear it.
    /// Returns the promoted uid, if one was pinned during the item.
    pub fn finish_item(&mut self) -> Option<String> {
        let uid = self.current_uid.take();
        if let Some(ref u) = uid {
            self.seen_uids.insert(u.clone());
        }
        uid
    }

    pub fn is_seen(&self, uid: &str) -> bool {
        self.seen_uids.contains(uid)
    }

    pub fn current_uid(&self) -> Option<&str> {
        self.current_uid.as_deref()
    }

    /// Pin the item's uid if none is pinned yet. Returns whether `uid`
    /// is (now) the accepted uid for this item.
    pub fn adopt_or_match(&mut self, uid: &str) -> bool {
        match self.current_uid {
            None => {
                self.current_uid = Some(uid.to_string());
                true
            }
            Some(ref current) => current == uid,
        }
    }
}

/// Build the raw-capture artifact name for an accepted response:
/// `{HHMMSS}_{DDMMYY}_page{n}_{category}_{uid}_seoudi.json`.
///
/// Idempotent-ish by construction (time-of-day keyed), not a
/// transactional guarantee.
pub fn capture_file_name(
    at: DateTime<Utc>,
    page_number: u32,
    category_label: &str,
    category_uid: &str,
) -> String {
    format!(
        "{}_{}_page{}_{}_{}_seoudi.json",
        at.format("%H%M%S"),
        at.format("%d%m%y"),
        page_number,
        sanitize_label(category_label),
        category_uid,
    )
}

/// Reduce a rendered category title to a filename-safe token:
/// alphanumerics kept, runs of whitespace/dashes collapsed to `_`,
/// lowercased, capped at 30 chars.
pub fn sanitize_label(label: &str) -> String {
    let cleaned: String = label
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace() || *c == '-' || *c == '_')
        .collect();
    let mut out = String::new();
    let mut last_sep = true;
    for c in cleaned.trim().chars() {
        if c.is_whitespace() || c == '-' {
            if !last_sep {
                out.push('_');
                last_sep = true;
            }
        } else {
            out.push(c.to_ascii_lowercase());
            last_sep = false;
        }
    }
    out.chars().take(30).collect()
}
