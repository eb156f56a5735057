//! Pure filter/dedup pipeline for intercepted product-query responses
//!
//! The CDP listener task forwards raw candidates over a channel; the
//! main flow drains that channel after page expansion and runs each
//! candidate through this pipeline. Keeping the rules in a pure
//! function over `(&mut CategoryUidState, &candidate)` means the whole
//! acceptance lifecycle is testable without a browser.

use serde_json::Value;
use tracing::{debug, warn};

use crate::domain::capture::{CapturedResponse, CategoryUidState};

/// Substring that marks a product-listing GraphQL query URL.
pub const PRODUCT_QUERY_MARKER: &str = "Products";

/// Minimum pretty-serialized payload size, in lines. Anything smaller
/// is an empty page or an error envelope, not a product listing.
pub const MIN_PAYLOAD_LINES: usize = 100;

/// One intercepted response as the listener task saw it. The
/// navigation flag is sampled at capture time, not at drain time.
#[derive(Debug, Clone)]
pub struct ResponseCandidate {
    pub url: String,
    pub method: String,
    pub status: i64,
    pub request_headers: Value,
    pub response_headers: Value,
    pub body: String,
    pub timestamp_ms: i64,
    pub navigation_completed: bool,
    /// Initiator URL when the protocol reported one. Advisory only.
    pub initiator: Option<String>,
}

/// Why a candidate was dropped, in pipeline order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    PreNavigation,
    UrlMismatch,
    HttpStatus(i64),
    PayloadTooSmall(usize),
    MissingUid,
    SeenUid(String),
    ForeignUid { current: String, offered: String },
}

#[derive(Debug)]
pub enum Verdict {
    Accepted(Box<CapturedResponse>),
    Rejected(Rejection),
}

impl Verdict {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted(_))
    }
}

/// Run one candidate through the ordered rules, short-circuiting on
/// the first failure. Mutates `state` only on rule 7 (uid adoption).
pub fn evaluate(state: &mut CategoryUidState, candidate: &ResponseCandidate) -> Verdict {
    if !candidate.navigation_completed {
        return Verdict::Rejected(Rejection::PreNavigation);
    }

    if !candidate.url.contains(PRODUCT_QUERY_MARKER) {
        return Verdict::Rejected(Rejection::UrlMismatch);
    }

    if candidate.status != 200 {
        return Verdict::Rejected(Rejection::HttpStatus(candidate.status));
    }

    let payload = parse_payload(&candidate.body);
    let lines = serialized_line_count(&payload);
    if lines < MIN_PAYLOAD_LINES {
        return Verdict::Rejected(Rejection::PayloadTooSmall(lines));
    }

    let uid = match extract_category_uid(&candidate.url) {
        Some(uid) => uid,
        None => {
            warn!(url = %candidate.url, "product query carries no category uid, dropping");
            return Verdict::Rejected(Rejection::MissingUid);
        }
    };

    if state.is_seen(&uid) {
        debug!(%uid, "category already captured in this run");
        return Verdict::Rejected(Rejection::SeenUid(uid));
    }

    if !state.adopt_or_match(&uid) {
        let current = state.current_uid().unwrap_or_default().to_string();
        debug!(%uid, %current, "uid belongs to a different category, dropping");
        return Verdict::Rejected(Rejection::ForeignUid {
            current,
            offered: uid,
        });
    }

    if let Some(initiator) = candidate.initiator.as_deref() {
        if !initiator.contains("seoudi") {
            warn!(%initiator, url = %candidate.url, "unexpected response initiator");
        }
    }

    Verdict::Accepted(Box::new(CapturedResponse {
        url: candidate.url.clone(),
        method: candidate.method.clone(),
        status: candidate.status,
        request_headers: candidate.request_headers.clone(),
        response_headers: candidate.response_headers.clone(),
        timestamp_ms: candidate.timestamp_ms,
        payload,
        category_uid: uid,
    }))
}

/// Pull the category uid out of the query's `variables` JSON:
/// `variables.filter.category_uid.eq`.
pub fn extract_category_uid(url: &str) -> Option<String> {
    let variables = query_variables(url)?;
    variables
        .pointer("/filter/category_uid/eq")
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Page number the query asked for, from `variables.page`. Defaults to
/// 1 when absent so artifact names stay well formed.
pub fn extract_page_number(url: &str) -> u32 {
    query_variables(url)
        .and_then(|v| v.get("page").and_then(Value::as_u64))
        .map(|p| p as u32)
        .unwrap_or(1)
}

fn query_variables(url: &str) -> Option<Value> {
    let parsed = url::Url::parse(url).ok()?;
    let raw = parsed
        .query_pairs()
        .find(|(k, _)| k == "variables")
        .map(|(_, v)| v.into_owned())?;
    serde_json::from_str(&raw).ok()
}

fn parse_payload(body: &str) -> Value {
    serde_json::from_str(body).unwrap_or_else(|_| Value::String(body.to_string()))
}

fn serialized_line_count(payload: &Value) -> usize {
    match serde_json::to_string_pretty(payload) {
        Ok(text) => text.lines().count(),
        Err(_) => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn product_url(uid: &str, page: u32) -> String {
        let variables = serde_json::json!({
            "filter": { "category_uid": { "eq": uid } },
            "page": page,
            "pageSize": 20,
        })
        .to_string();
        url::Url::parse_with_params(
            "https://seoudisupermarket.com/graphql",
            &[("query", "Products"), ("variables", variables.as_str())],
        )
        .unwrap()
        .to_string()
    }

    fn big_body() -> String {
        // 120 array elements pretty-print to well over 100 lines.
        let items: Vec<u32> = (0..120).collect();
        serde_json::to_string(&serde_json::json!({ "data": { "products": items } })).unwrap()
    }

    fn candidate(url: &str, body: &str) -> ResponseCandidate {
        ResponseCandidate {
            url: url.to_string(),
            method: "GET".into(),
            status: 200,
            request_headers: Value::Null,
            response_headers: Value::Null,
            body: body.to_string(),
            timestamp_ms: 0,
            navigation_completed: true,
            initiator: None,
        }
    }

    #[test]
    fn accepts_a_well_formed_product_response() {
        let mut state = CategoryUidState::new();
        state.begin_item();
        let verdict = evaluate(&mut state, &candidate(&product_url("Mjk4", 1), &big_body()));
        match verdict {
            Verdict::Accepted(captured) => {
                assert_eq!(captured.category_uid, "Mjk4");
                assert_eq!(captured.status, 200);
            }
            Verdict::Rejected(r) => panic!("unexpected rejection: {r:?}"),
        }
        assert_eq!(state.current_uid(), Some("Mjk4"));
    }

    #[test]
    fn rejects_before_navigation_completes() {
        let mut state = CategoryUidState::new();
        let mut c = candidate(&product_url("Mjk4", 1), &big_body());
        c.navigation_completed = false;
        let verdict = evaluate(&mut state, &c);
        assert!(matches!(verdict, Verdict::Rejected(Rejection::PreNavigation)));
        // Short-circuit: nothing was adopted.
        assert_eq!(state.current_uid(), None);
    }

    #[test]
    fn rejects_non_product_urls_and_bad_status() {
        let mut state = CategoryUidState::new();
        let verdict = evaluate(
            &mut state,
            &candidate("https://seoudisupermarket.com/graphql?query=Cart", &big_body()),
        );
        assert!(matches!(verdict, Verdict::Rejected(Rejection::UrlMismatch)));

        let mut c = candidate(&product_url("Mjk4", 1), &big_body());
        c.status = 403;
        let verdict = evaluate(&mut state, &c);
        assert!(matches!(verdict, Verdict::Rejected(Rejection::HttpStatus(403))));
    }

    #[test]
    fn rejects_small_payloads() {
        let mut state = CategoryUidState::new();
        let verdict = evaluate(
            &mut state,
            &candidate(&product_url("Mjk4", 1), r#"{"data":{"products":[]}}"#),
        );
        assert!(matches!(
            verdict,
            Verdict::Rejected(Rejection::PayloadTooSmall(_))
        ));
    }

    #[test]
    fn rejects_missing_uid_with_warning() {
        let mut state = CategoryUidState::new();
        let url = "https://seoudisupermarket.com/graphql?query=Products&variables=%7B%22page%22%3A1%7D";
        let verdict = evaluate(&mut state, &candidate(url, &big_body()));
        assert!(matches!(verdict, Verdict::Rejected(Rejection::MissingUid)));
    }

    #[test]
    fn dedups_seen_and_foreign_uids() {
        let mut state = CategoryUidState::new();
        state.begin_item();
        assert!(evaluate(&mut state, &candidate(&product_url("A", 1), &big_body())).is_accepted());
        // Same uid again within the item: still accepted.
        assert!(evaluate(&mut state, &candidate(&product_url("A", 2), &big_body())).is_accepted());
        // Cross-talk from another category is dropped.
        let verdict = evaluate(&mut state, &candidate(&product_url("B", 1), &big_body()));
        assert!(matches!(
            verdict,
            Verdict::Rejected(Rejection::ForeignUid { .. })
        ));

        state.finish_item();
        state.begin_item();
        // A finished category stays excluded for the rest of the run.
        let verdict = evaluate(&mut state, &candidate(&product_url("A", 1), &big_body()));
        assert!(matches!(verdict, Verdict::Rejected(Rejection::SeenUid(_))));
    }

    #[test]
    fn page_number_extraction() {
        assert_eq!(extract_page_number(&product_url("A", 7)), 7);
        assert_eq!(
            extract_page_number("https://seoudisupermarket.com/graphql?query=Products"),
            1
        );
    }
}
