//! Seoudi Supermarket interception handler
//!
//! Seoudi renders listings client side and answers product queries over
//! GraphQL, so the handler drives the page (location setup, load-more
//! expansion) while a CDP listener task captures matching network
//! responses. Candidates flow over a channel and are filtered/deduped
//! by the pure pipeline in `response_filter` once expansion finishes;
//! the listener never touches shared scrape state beyond sampling the
//! navigation flag.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::network::{
    EnableParams, EventRequestWillBeSent, EventResponseReceived, GetResponseBodyParams, RequestId,
};
use chromiumoxide::Page;
use chrono::Utc;
use futures::StreamExt;
use serde_json::{json, Value};
use tokio::fs;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::application::response_filter::{
    evaluate, extract_page_number, ResponseCandidate, Verdict, PRODUCT_QUERY_MARKER,
};
use crate::application::SiteHandler;
use crate::domain::capture::{capture_file_name, CapturedResponse, CategoryUidState};
use crate::domain::work_item::{ScrapeResult, WorkItem};
use crate::infrastructure::config::CaptureConfig;
use crate::infrastructure::errors::{HandlerResult, ScrapeError};
use crate::infrastructure::persistence::PersistenceGateway;
use crate::infrastructure::retry::poll_until;
use crate::infrastructure::session::SessionManager;

/// Loop guard for load-more expansion.
const MAX_LOAD_MORE_CLICKS: u32 = 50;

const LOCATION_POLL_ATTEMPTS: u32 = 10;
const LOCATION_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Element rendered only when the store asks for a delivery location.
const LOCATION_INDICATOR_SELECTOR: &str = "p[data-v-513ef701].my-4.font-light.text-grey-700.text-lg";
const LOCATION_INDICATOR_TEXT: &str = "We'll show you the products accordingly";

const CONFIRM_ICON_SELECTOR: &str =
    "svg.w-6.h-6.fill-current.text-primary-100.float-right.icon.sprite-icons";

const TITLE_SELECTOR: &str = "h1.mt-3.lg\\:mt-6.text-4xl.font-semibold.text-primary-700.antialiased.tracking-wide[data-v-489a62ee]";
const TITLE_FALLBACK_SELECTOR: &str = "h1[data-v-489a62ee]";

const OUT_OF_STOCK_SELECTOR: &str = "div[data-v-33be66a4].OutOfStock";
const OUT_OF_STOCK_TEXT: &str = "Out of stock";

const LOAD_MORE_SELECTOR: &str = "button[data-v-aa6a7d66][type=\"button\"].mt-8.text-primary-700.border.border-primary-700.rounded-full.px-12.py-4.text-lg.font-bold.flex.items-center.justify-center.w-48.h-16.whitespace-nowrap";

const PRODUCT_MARKER_SELECTOR: &str = "[data-product], .product-item, .product-card";

/// Label used when the page title never resolves; artifacts are not
/// written under it.
const UNKNOWN_CATEGORY: &str = "unknown";

const DISMISS_POPUP_JS: &str = r#"(() => {
    const el = document.elementFromPoint(50, window.innerHeight - 50);
    if (el) { el.click(); }
    return true;
})()"#;

// The location form is Vue-driven; selectedIndex alone is not seen by
// the framework, so each select also dispatches input+change.
const SELECT_CITY_JS: &str = r#"(() => {
    const select = document.querySelector('select[name="city"]:not([disabled])');
    if (select && select.options.length > 1) {
        select.selectedIndex = 1;
        select.dispatchEvent(new Event('input', { bubbles: true }));
        select.dispatchEvent(new Event('change', { bubbles: true }));
        return true;
    }
    return false;
})()"#;

const SELECT_AREA_JS: &str = r#"(() => {
    const select = document.querySelector('select[name="area"]');
    if (select && !select.disabled && select.options.length > 7) {
        select.selectedIndex = 7;
        select.dispatchEvent(new Event('input', { bubbles: true }));
        select.dispatchEvent(new Event('change', { bubbles: true }));
        return true;
    }
    return false;
})()"#;

const SELECT_DISTRICT_JS: &str = r#"(() => {
    const select = document.querySelector('select[name="district"]');
    if (select && !select.disabled && select.options.length > 1) {
        select.selectedIndex = 1;
        select.dispatchEvent(new Event('input', { bubbles: true }));
        select.dispatchEvent(new Event('change', { bubbles: true }));
        return true;
    }
    return false;
})()"#;

const SCROLL_TO_BOTTOM_JS: &str = "window.scrollTo(0, document.body.scrollHeight)";

/// Aborts the wrapped task when dropped. The capture listener must
/// never outlive its work item, including when the scrape errors out
/// mid-flow.
struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

pub struct SeoudiHandler {
    session: Arc<SessionManager>,
    gateway: Arc<dyn PersistenceGateway>,
    uid_state: CategoryUidState,
    raw_response_dir: PathBuf,
}

impl SeoudiHandler {
    pub fn new(
        session: Arc<SessionManager>,
        gateway: Arc<dyn PersistenceGateway>,
        capture: &CaptureConfig,
    ) -> Self {
        Self {
            session,
            gateway,
            uid_state: CategoryUidState::new(),
            raw_response_dir: capture.raw_response_dir.clone(),
        }
    }

    /// Run one JS-driven location step under the poll budget.
    async fn location_step(&self, page: &Page, step: &str, js: &'static str) -> HandlerResult<()> {
        info!(step, "location setup step");
        let outcome = poll_until(LOCATION_POLL_ATTEMPTS, LOCATION_POLL_INTERVAL, || async {
            match page.evaluate(js).await {
                Ok(result) => result.into_value::<bool>().ok().filter(|done| *done),
                Err(e) => {
                    debug!(step, error = %e, "location step probe failed");
                    None
                }
            }
        })
        .await;

        match outcome.into_option() {
            Some(_) => Ok(()),
            None => Err(ScrapeError::location_setup(
                step,
                "element never became selectable",
            )),
        }
    }

    /// The ordered location UI sequence: dismiss the popup, select
    /// city, area and district, then click the confirmation icon.
    async fn setup_location(&self, page: &Page) -> HandlerResult<()> {
        info!("setting up delivery location");

        page.evaluate(DISMISS_POPUP_JS)
            .await
            .map_err(ScrapeError::browser)?;
        self.session.interaction_delay().await;

        self.location_step(page, "city", SELECT_CITY_JS).await?;
        tokio::time::sleep(Duration::from_secs(3)).await;

        self.location_step(page, "area", SELECT_AREA_JS).await?;
        tokio::time::sleep(Duration::from_secs(3)).await;

        self.location_step(page, "district", SELECT_DISTRICT_JS).await?;
        tokio::time::sleep(Duration::from_secs(2)).await;

        let confirm = poll_until(LOCATION_POLL_ATTEMPTS, LOCATION_POLL_INTERVAL, || async {
            page.find_element(CONFIRM_ICON_SELECTOR).await.ok()
        })
        .await;
        match confirm.into_option() {
            Some(icon) => {
                self.session.interaction_delay().await;
                icon.click().await.map_err(ScrapeError::browser)?;
            }
            None => {
                return Err(ScrapeError::location_setup(
                    "confirm",
                    "confirmation icon never appeared",
                ))
            }
        }
        tokio::time::sleep(Duration::from_secs(2)).await;

        info!("location setup completed");
        Ok(())
    }

    /// Does the page show the fixed location-needed indicator?
    async fn location_setup_required(&self, page: &Page) -> bool {
        match page.find_element(LOCATION_INDICATOR_SELECTOR).await {
            Ok(element) => matches!(
                element.inner_text().await,
                Ok(Some(text)) if text.contains(LOCATION_INDICATOR_TEXT)
            ),
            Err(_) => false,
        }
    }

    /// Expand the listing by clicking load-more until the button goes
    /// away, an out-of-stock marker appears, or the click budget runs
    /// out. Returns the number of product markers in the settled DOM.
    async fn load_all_products(&self, page: &Page) -> HandlerResult<u32> {
        info!("waiting for initial page content");
        tokio::time::sleep(Duration::from_secs(5)).await;

        let mut clicks = 0u32;
        loop {
            page.evaluate(SCROLL_TO_BOTTOM_JS)
                .await
                .map_err(ScrapeError::browser)?;

            if self.out_of_stock_visible(page).await {
                info!("out-of-stock marker reached, expansion complete");
                break;
            }

            let button = match page.find_element(LOAD_MORE_SELECTOR).await {
                Ok(button) => button,
                Err(_) => {
                    info!("load-more button gone, all products loaded");
                    break;
                }
            };

            if !element_visible(page, LOAD_MORE_SELECTOR).await {
                info!("load-more button hidden, all products loaded");
                break;
            }

            clicks += 1;
            info!(click = clicks, "clicking load-more");
            self.session.interaction_delay().await;
            button.click().await.map_err(ScrapeError::browser)?;
            tokio::time::sleep(Duration::from_secs(1)).await;

            if clicks >= MAX_LOAD_MORE_CLICKS {
                warn!(limit = MAX_LOAD_MORE_CLICKS, "reached load-more click limit");
                break;
            }
        }

        let products = page
            .find_elements(PRODUCT_MARKER_SELECTOR)
            .await
            .map(|elements| elements.len() as u32)
            .unwrap_or(0);
        info!(clicks, products, "product expansion finished");
        Ok(products)
    }

    async fn out_of_stock_visible(&self, page: &Page) -> bool {
        match page.find_element(OUT_OF_STOCK_SELECTOR).await {
            Ok(element) => matches!(
                element.inner_text().await,
                Ok(Some(text)) if text.contains(OUT_OF_STOCK_TEXT)
            ),
            Err(_) => false,
        }
    }

    /// Resolve the rendered category title, already sanitized for use
    /// in artifact names. Falls back to the placeholder when the page
    /// never rendered a title.
    async fn resolve_category_title(&self, page: &Page) -> String {
        for selector in [TITLE_SELECTOR, TITLE_FALLBACK_SELECTOR] {
            if let Ok(element) = page.find_element(selector).await {
                if let Ok(Some(text)) = element.inner_text().await {
                    let label = crate::domain::capture::sanitize_label(&text);
                    if !label.is_empty() {
                        return label;
                    }
                }
            }
        }
        UNKNOWN_CATEGORY.to_string()
    }

    async fn persist_artifacts(&self, captured: &[CapturedResponse], title: &str) -> usize {
        if title == UNKNOWN_CATEGORY {
            info!("category title unresolved, skipping raw artifacts");
            return 0;
        }
        if let Err(e) = fs::create_dir_all(&self.raw_response_dir).await {
            warn!(dir = %self.raw_response_dir.display(), error = %e, "cannot create capture directory");
            return 0;
        }

        let mut written = 0;
        for response in captured {
            match write_artifact(&self.raw_response_dir, response, title).await {
                Ok(path) => {
                    info!(path = %path.display(), "saved raw response");
                    written += 1;
                }
                Err(e) => warn!(error = %e, url = %response.url, "failed to save raw response"),
            }
        }
        written
    }
}

#[async_trait]
impl SiteHandler for SeoudiHandler {
    fn supported_domains(&self) -> &'static [&'static str] {
        &["seoudisupermarket.com"]
    }

    fn gateway(&self) -> &Arc<dyn PersistenceGateway> {
        &self.gateway
    }

    async fn scrape_url(&mut self, item: &WorkItem) -> HandlerResult<ScrapeResult> {
        self.uid_state.begin_item();
        let navigation_completed = Arc::new(AtomicBool::new(false));

        let page = self.session.page_for_url(&item.url).await?;
        page.execute(EnableParams::default())
            .await
            .map_err(ScrapeError::browser)?;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let listener = AbortOnDrop(tokio::spawn(capture_loop(
            page.clone(),
            navigation_completed.clone(),
            tx,
        )));

        // Fallible drive section; the listener guard above stops the
        // capture task no matter which branch exits.
        let driven = async {
            self.session.navigate_with_pacing(&page, &item.url).await?;
            // Only responses observed after this point are eligible.
            navigation_completed.store(true, Ordering::SeqCst);

            if self.location_setup_required(&page).await {
                info!("location setup required");
                self.setup_location(&page).await?;
                info!("re-navigating after location setup");
                self.session.navigate_with_pacing(&page, &item.url).await?;
            } else {
                info!("location already configured");
            }

            self.load_all_products(&page).await
        }
        .await;

        // Expansion is over: stop capturing, then drain what arrived.
        drop(listener);
        rx.close();
        let products_loaded = driven?;

        let mut drained = Vec::new();
        while let Some(candidate) = rx.recv().await {
            drained.push(candidate);
        }
        let (candidates, accepted) = select_captures(&mut self.uid_state, drained);
        info!(candidates, accepted = accepted.len(), "drained captured responses");

        let title = self.resolve_category_title(&page).await;
        let artifacts_saved = self.persist_artifacts(&accepted, &title).await;

        if let Some(uid) = self.uid_state.finish_item() {
            info!(%uid, "category uid retired for this run");
        }

        let success = !accepted.is_empty();
        Ok(ScrapeResult {
            success,
            products_found: products_loaded,
            pages_scraped: if success { 1 } else { 0 },
            error_message: if success {
                None
            } else {
                Some("no valid product responses captured".into())
            },
            data: json!({
                "captured_requests": candidates,
                "valid_requests": accepted.len(),
                "products_loaded": products_loaded,
                "artifacts_saved": artifacts_saved,
                "category": title,
            }),
        })
    }
}

/// Run drained candidates through the filter pipeline, keeping only
/// the first capture per query URL: the page=1 query fires again after
/// the location re-navigation, and a repeat would silently overwrite
/// its artifact (same uid and page in the name).
fn select_captures(
    state: &mut CategoryUidState,
    candidates: impl IntoIterator<Item = ResponseCandidate>,
) -> (usize, Vec<CapturedResponse>) {
    let mut total = 0usize;
    let mut seen_urls = HashSet::new();
    let mut accepted = Vec::new();
    for candidate in candidates {
        total += 1;
        match evaluate(state, &candidate) {
            Verdict::Accepted(captured) => {
                if seen_urls.insert(captured.url.clone()) {
                    accepted.push(*captured);
                } else {
                    debug!(url = %captured.url, "duplicate capture for query url, dropping");
                }
            }
            Verdict::Rejected(reason) => {
                debug!(url = %candidate.url, ?reason, "candidate rejected")
            }
        }
    }
    (total, accepted)
}

/// CDP listener task. Correlates request metadata with response events,
/// fetches matching bodies and forwards raw candidates. The navigation
/// flag is sampled here, at capture time.
async fn capture_loop(
    page: Page,
    navigation_completed: Arc<AtomicBool>,
    tx: mpsc::UnboundedSender<ResponseCandidate>,
) {
    let mut requests = match page.event_listener::<EventRequestWillBeSent>().await {
        Ok(stream) => stream,
        Err(e) => {
            warn!(error = %e, "cannot listen for request events");
            return;
        }
    };
    let mut responses = match page.event_listener::<EventResponseReceived>().await {
        Ok(stream) => stream,
        Err(e) => {
            warn!(error = %e, "cannot listen for response events");
            return;
        }
    };
    info!("network interception active");

    let mut request_meta: HashMap<RequestId, (String, Option<String>)> = HashMap::new();

    loop {
        tokio::select! {
            event = requests.next() => {
                let Some(event) = event else { break };
                if event.request.url.contains(PRODUCT_QUERY_MARKER) {
                    request_meta.insert(
                        event.request_id.clone(),
                        (event.request.method.clone(), event.initiator.url.clone()),
                    );
                }
            }
            event = responses.next() => {
                let Some(event) = event else { break };
                if !event.response.url.contains(PRODUCT_QUERY_MARKER) {
                    continue;
                }
                // Sampled now so a late drain cannot launder a
                // pre-navigation response.
                let nav_done = navigation_completed.load(Ordering::SeqCst);

                let body = match page
                    .execute(GetResponseBodyParams::new(event.request_id.clone()))
                    .await
                {
                    Ok(response) if !response.result.base64_encoded => {
                        response.result.body.clone()
                    }
                    Ok(_) => {
                        debug!(url = %event.response.url, "skipping base64 response body");
                        continue;
                    }
                    Err(e) => {
                        debug!(url = %event.response.url, error = %e, "response body unavailable");
                        continue;
                    }
                };

                let (method, initiator) = request_meta
                    .remove(&event.request_id)
                    .unwrap_or_else(|| ("GET".to_string(), None));

                let candidate = ResponseCandidate {
                    url: event.response.url.clone(),
                    method,
                    status: event.response.status,
                    request_headers: Value::Null,
                    response_headers: serde_json::to_value(&event.response.headers)
                        .unwrap_or(Value::Null),
                    body,
                    timestamp_ms: Utc::now().timestamp_millis(),
                    navigation_completed: nav_done,
                    initiator,
                };
                if tx.send(candidate).is_err() {
                    break;
                }
            }
        }
    }
}

async fn element_visible(page: &Page, selector: &str) -> bool {
    let js = format!(
        "(() => {{ const el = document.querySelector('{}'); return !!(el && el.offsetParent !== null); }})()",
        selector.replace('\'', "\\'")
    );
    match page.evaluate(js).await {
        Ok(result) => result.into_value::<bool>().unwrap_or(false),
        Err(_) => false,
    }
}

async fn write_artifact(
    dir: &Path,
    response: &CapturedResponse,
    title: &str,
) -> anyhow::Result<PathBuf> {
    let name = capture_file_name(
        Utc::now(),
        extract_page_number(&response.url),
        title,
        &response.category_uid,
    );
    let path = dir.join(name);
    let text = serde_json::to_string_pretty(&response.payload)?;
    fs::write(&path, text).await?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn captured(url: &str, uid: &str) -> CapturedResponse {
        CapturedResponse {
            url: url.to_string(),
            method: "GET".into(),
            status: 200,
            request_headers: Value::Null,
            response_headers: Value::Null,
            timestamp_ms: 0,
            payload: json!({ "data": { "connection": { "products": { "items": [] } } } }),
            category_uid: uid.to_string(),
        }
    }

    #[tokio::test]
    async fn artifact_lands_under_capture_dir_with_expected_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let response = captured(
            "https://seoudisupermarket.com/graphql?query=Products&variables=%7B%22page%22%3A3%7D",
            "Mjk4",
        );

        let path = write_artifact(dir.path(), &response, "fresh_fruits")
            .await
            .unwrap();

        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.contains("_page3_fresh_fruits_Mjk4_seoudi.json"), "{name}");

        let text = std::fs::read_to_string(&path).unwrap();
        let round_trip: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(round_trip, response.payload);
    }

    fn product_query_url(uid: &str, page: u32) -> String {
        let variables = serde_json::json!({
            "filter": { "category_uid": { "eq": uid } },
            "page": page,
        })
        .to_string();
        url::Url::parse_with_params(
            "https://seoudisupermarket.com/graphql",
            &[("query", "Products"), ("variables", variables.as_str())],
        )
        .unwrap()
        .to_string()
    }

    fn candidate(url: &str) -> ResponseCandidate {
        // 120 array elements pretty-print past the payload size gate.
        let items: Vec<u32> = (0..120).collect();
        ResponseCandidate {
            url: url.to_string(),
            method: "GET".into(),
            status: 200,
            request_headers: Value::Null,
            response_headers: Value::Null,
            body: serde_json::to_string(&json!({ "data": { "products": items } })).unwrap(),
            timestamp_ms: 0,
            navigation_completed: true,
            initiator: None,
        }
    }

    #[test]
    fn repeated_query_url_is_captured_once() {
        let mut state = CategoryUidState::new();
        state.begin_item();

        // The page=1 query fires again after the location re-navigation.
        let first_page = product_query_url("Mjk4", 1);
        let (total, accepted) = select_captures(
            &mut state,
            vec![
                candidate(&first_page),
                candidate(&first_page),
                candidate(&product_query_url("Mjk4", 2)),
            ],
        );

        assert_eq!(total, 3);
        assert_eq!(accepted.len(), 2);
        assert_eq!(accepted[0].url, first_page);
        assert_ne!(accepted[0].url, accepted[1].url);
    }

    #[tokio::test]
    async fn listener_guard_aborts_task_on_drop() {
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let guard = AbortOnDrop(tokio::spawn(async move {
            let _keep = tx;
            std::future::pending::<()>().await;
        }));

        // An early return drops the guard; the task must die with it.
        drop(guard);
        assert!(rx.await.is_err());
    }

    #[test]
    fn fixed_selectors_are_valid_css() {
        // A typo in one of these silently disables a whole sub-flow.
        for selector in [
            LOCATION_INDICATOR_SELECTOR,
            CONFIRM_ICON_SELECTOR,
            TITLE_SELECTOR,
            TITLE_FALLBACK_SELECTOR,
            OUT_OF_STOCK_SELECTOR,
            LOAD_MORE_SELECTOR,
            PRODUCT_MARKER_SELECTOR,
        ] {
            assert!(
                scraper::Selector::parse(selector).is_ok(),
                "selector does not parse: {selector}"
            );
        }
    }
}
