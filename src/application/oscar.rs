//! Oscar Stores pagination handler
//!
//! Oscar renders full product listings server side, so extraction is
//! plain DOM work: walk `?page=N` URLs, parse each page's HTML, pull
//! one record per product card, and flush the page batch before
//! advancing. Pagination ends when a page renders no cards.
//!
//! All DOM parsing happens in sync helpers over the fetched HTML text.
//! The parsed document never crosses an await point.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde_json::json;
use tracing::{info, warn};

use crate::application::SiteHandler;
use crate::domain::product::{parse_leading_count, parse_price_text, ProductRecord};
use crate::domain::work_item::{ScrapeResult, WorkItem};
use crate::infrastructure::errors::{HandlerResult, ScrapeError};
use crate::infrastructure::persistence::PersistenceGateway;
use crate::infrastructure::session::SessionManager;

/// Loop guard against a site that paginates forever.
pub const MAX_PAGES: u32 = 100;

/// Found-vs-expected ratio below which the run logs a count mismatch.
const EXPECTED_RATIO: f64 = 0.8;

static PAGE_PARAM_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"page=(\d+)").expect("valid page param regex"));

/// CSS selectors for the Oscar listing layout, overridable when the
/// site ships a redesign.
#[derive(Debug, Clone)]
pub struct OscarSelectors {
    pub product_count: String,
    pub product_card: String,
    pub name: String,
    pub final_price: String,
    pub old_price: String,
    pub discount: String,
    pub link: String,
    pub image: String,
    pub category_path: String,
}

impl Default for OscarSelectors {
    fn default() -> Self {
        Self {
            product_count: "span.c_gray3.f-12.f-w_500.mx-1".into(),
            product_card: "div.col-md-3.col-sm-4.col-6.p-1".into(),
            name: "h6, .product-name".into(),
            final_price: ".price, span.f-w_700".into(),
            old_price: "del, .old-price".into(),
            discount: ".discount, .badge".into(),
            link: "a".into(),
            image: "img".into(),
            category_path: ".breadcrumb, .category-path".into(),
        }
    }
}

struct CompiledSelectors {
    product_count: Selector,
    product_card: Selector,
    name: Selector,
    final_price: Selector,
    old_price: Selector,
    discount: Selector,
    link: Selector,
    image: Selector,
    category_path: Selector,
}

impl CompiledSelectors {
    fn compile(selectors: &OscarSelectors) -> anyhow::Result<Self> {
        let parse = |s: &str| {
            Selector::parse(s).map_err(|e| anyhow::anyhow!("invalid selector '{s}': {e}"))
        };
        Ok(Self {
            product_count: parse(&selectors.product_count)?,
            product_card: parse(&selectors.product_card)?,
            name: parse(&selectors.name)?,
            final_price: parse(&selectors.final_price)?,
            old_price: parse(&selectors.old_price)?,
            discount: parse(&selectors.discount)?,
            link: parse(&selectors.link)?,
            image: parse(&selectors.image)?,
            category_path: parse(&selectors.category_path)?,
        })
    }
}

/// What one listing page parsed into.
struct ParsedPage {
    records: Vec<ProductRecord>,
    expected_total: u32,
}

pub struct OscarHandler {
    session: Arc<SessionManager>,
    gateway: Arc<dyn PersistenceGateway>,
    selectors: CompiledSelectors,
}

impl OscarHandler {
    pub fn new(
        session: Arc<SessionManager>,
        gateway: Arc<dyn PersistenceGateway>,
    ) -> anyhow::Result<Self> {
        Self::with_selectors(session, gateway, OscarSelectors::default())
    }

    pub fn with_selectors(
        session: Arc<SessionManager>,
        gateway: Arc<dyn PersistenceGateway>,
        selectors: OscarSelectors,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            session,
            gateway,
            selectors: CompiledSelectors::compile(&selectors)?,
        })
    }
}

/// Parse one listing page's HTML into records. Extraction is tolerant:
/// a card missing any field still yields a record with empty/None
/// fields.
fn parse_listing_page(
    selectors: &CompiledSelectors,
    html: &str,
    item: &WorkItem,
    page_url: &str,
    page_number: u32,
) -> ParsedPage {
    let document = Html::parse_document(html);

    let expected_total = document
        .select(&selectors.product_count)
        .next()
        .map(|e| parse_leading_count(&element_text(e)))
        .unwrap_or(0);

    let category_path = document
        .select(&selectors.category_path)
        .next()
        .map(element_text)
        .unwrap_or_default();

    let scraped_at = Utc::now();
    let records = document
        .select(&selectors.product_card)
        .map(|card| ProductRecord {
            product_name: card
                .select(&selectors.name)
                .next()
                .map(element_text)
                .unwrap_or_default(),
            final_price: card
                .select(&selectors.final_price)
                .next()
                .and_then(|e| parse_price_text(&element_text(e))),
            price_before_discount: card
                .select(&selectors.old_price)
                .next()
                .and_then(|e| parse_price_text(&element_text(e))),
            discount_rate: card
                .select(&selectors.discount)
                .next()
                .map(element_text)
                .unwrap_or_default(),
            product_url: card
                .select(&selectors.link)
                .next()
                .and_then(|e| e.value().attr("href"))
                .map(|href| absolutize(page_url, href))
                .unwrap_or_default(),
            product_category_path: category_path.clone(),
            image_url: card
                .select(&selectors.image)
                .next()
                .and_then(|e| e.value().attr("src"))
                .map(|src| absolutize(page_url, src))
                .unwrap_or_default(),
            site_name: item.website.clone(),
            path: url_path(&item.url),
            category: item.category.clone(),
            url: item.url.clone(),
            page_number,
            url_with_page_number: page_url.to_string(),
            scraped_at,
        })
        .collect();

    ParsedPage {
        records,
        expected_total,
    }
}

#[async_trait]
impl SiteHandler for OscarHandler {
    fn supported_domains(&self) -> &'static [&'static str] {
        &["oscarstores.com"]
    }

    fn gateway(&self) -> &Arc<dyn PersistenceGateway> {
        &self.gateway
    }

    async fn scrape_url(&mut self, item: &WorkItem) -> HandlerResult<ScrapeResult> {
        let page = self.session.page_for_url(&item.url).await?;

        let mut expected_total = 0u32;
        let mut total_found = 0u32;
        let mut pages_scraped = 0u32;
        let mut current_url = item.url.clone();

        loop {
            info!(url = %current_url, "scraping listing page");
            self.session.navigate_with_pacing(&page, &current_url).await?;

            // Lazy images load on scroll; settle the page before capture.
            page.evaluate("window.scrollTo(0, document.body.scrollHeight)")
                .await
                .map_err(ScrapeError::browser)?;

            let html = page.content().await.map_err(ScrapeError::browser)?;
            let parsed =
                parse_listing_page(&self.selectors, &html, item, &current_url, pages_scraped + 1);

            if pages_scraped == 0 {
                expected_total = parsed.expected_total;
                info!(expected_total, "expected total products");
            }

            if parsed.records.is_empty() {
                info!("no product cards rendered, pagination complete");
                break;
            }

            let page_count = parsed.records.len() as u32;
            total_found += page_count;
            pages_scraped += 1;
            info!(page = pages_scraped, products = page_count, "extracted product cards");

            let written = self.gateway.insert_product_batch(&parsed.records).await;
            if written < parsed.records.len() {
                warn!(
                    written,
                    extracted = parsed.records.len(),
                    "page batch persisted partially"
                );
            }

            if pages_scraped >= MAX_PAGES {
                warn!(limit = MAX_PAGES, "reached page limit, stopping pagination");
                break;
            }

            match next_page_url(&current_url) {
                Some(next) => current_url = next,
                None => {
                    warn!(url = %current_url, "could not derive next page url");
                    break;
                }
            }
        }

        let result = pagination_result(pages_scraped, total_found, expected_total, &current_url);
        if result.success && expected_total > 0 {
            let floor = expected_total as f64 * EXPECTED_RATIO;
            if (total_found as f64) < floor {
                warn!(
                    expected = expected_total,
                    found = total_found,
                    "product count mismatch"
                );
            }
        }

        info!(pages_scraped, total_found, "oscar scraping completed");
        Ok(result)
    }
}

/// Overall pagination outcome: success means at least one page was
/// scraped. Count reconciliation is advisory and never gates it.
fn pagination_result(
    pages_scraped: u32,
    total_found: u32,
    expected_total: u32,
    final_url: &str,
) -> ScrapeResult {
    let success = pages_scraped > 0;
    ScrapeResult {
        success,
        products_found: total_found,
        pages_scraped,
        error_message: if success {
            None
        } else {
            Some("no pages scraped".into())
        },
        data: json!({
            "total_products": total_found,
            "expected_products": expected_total,
            "pages_processed": pages_scraped,
            "final_url": final_url,
        }),
    }
}

/// Next listing URL: bare URLs get `?page=2`; URLs already carrying a
/// `page=` param have the number incremented in place. A `page=` param
/// without a parseable number ends pagination.
pub fn next_page_url(current_url: &str) -> Option<String> {
    if !current_url.contains("page=") {
        return Some(format!("{current_url}?page=2"));
    }
    let captures = PAGE_PARAM_RE.captures(current_url)?;
    let current: u32 = captures.get(1)?.as_str().parse().ok()?;
    Some(
        PAGE_PARAM_RE
            .replace(current_url, format!("page={}", current + 1))
            .into_owned(),
    )
}

fn element_text(element: ElementRef<'_>) -> String {
    element.text().collect::<String>().trim().to_string()
}

fn url_path(url: &str) -> String {
    url::Url::parse(url)
        .map(|u| u.path().to_string())
        .unwrap_or_default()
}

fn absolutize(base: &str, href: &str) -> String {
    match url::Url::parse(base).and_then(|b| b.join(href)) {
        Ok(joined) => joined.to_string(),
        Err(_) => href.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_pagination_appends_page_two() {
        assert_eq!(
            next_page_url("https://www.oscarstores.com/category/dairy"),
            Some("https://www.oscarstores.com/category/dairy?page=2".to_string())
        );
    }

    #[test]
    fn existing_page_param_increments_in_place() {
        assert_eq!(
            next_page_url("https://www.oscarstores.com/category/dairy?page=2"),
            Some("https://www.oscarstores.com/category/dairy?page=3".to_string())
        );
        assert_eq!(
            next_page_url("https://x.com/c?page=9&sort=asc"),
            Some("https://x.com/c?page=10&sort=asc".to_string())
        );
    }

    #[test]
    fn malformed_page_param_ends_pagination() {
        assert_eq!(next_page_url("https://x.com/c?page=abc"), None);
    }

    const LISTING_HTML: &str = r#"
        <html><body>
          <span class="c_gray3 f-12 f-w_500 mx-1">247 products</span>
          <div class="breadcrumb">Home / Dairy</div>
          <div class="col-md-3 col-sm-4 col-6 p-1">
            <a href="/product/milk-1l"><img src="/img/milk.jpg"></a>
            <h6>Fresh Milk 1L</h6>
            <del>60.00</del>
            <span class="f-w_700">49.95 EGP</span>
            <span class="badge">-15%</span>
          </div>
          <div class="col-md-3 col-sm-4 col-6 p-1">
            <h6>Plain Yoghurt</h6>
            <span class="f-w_700">out of stock</span>
          </div>
        </body></html>"#;

    fn work_item() -> WorkItem {
        WorkItem {
            id: 7,
            serial: Some(7),
            website: "oscar".into(),
            category: "dairy".into(),
            url: "https://www.oscarstores.com/category/dairy".into(),
        }
    }

    fn parse(html: &str) -> ParsedPage {
        let selectors = CompiledSelectors::compile(&OscarSelectors::default()).unwrap();
        parse_listing_page(
            &selectors,
            html,
            &work_item(),
            "https://www.oscarstores.com/category/dairy?page=1",
            1,
        )
    }

    #[test]
    fn listing_page_extraction_is_tolerant() {
        let parsed = parse(LISTING_HTML);
        assert_eq!(parsed.expected_total, 247);
        assert_eq!(parsed.records.len(), 2);

        let milk = &parsed.records[0];
        assert_eq!(milk.product_name, "Fresh Milk 1L");
        assert_eq!(milk.final_price, Some(49.95));
        assert_eq!(milk.price_before_discount, Some(60.0));
        assert_eq!(milk.discount_rate, "-15%");
        assert_eq!(milk.product_url, "https://www.oscarstores.com/product/milk-1l");
        assert_eq!(milk.image_url, "https://www.oscarstores.com/img/milk.jpg");
        assert_eq!(milk.product_category_path, "Home / Dairy");
        assert_eq!(milk.category, "dairy");
        assert_eq!(milk.path, "/category/dairy");
        assert_eq!(milk.page_number, 1);

        // The degenerate card still yields a record.
        let yoghurt = &parsed.records[1];
        assert_eq!(yoghurt.product_name, "Plain Yoghurt");
        assert_eq!(yoghurt.final_price, None);
        assert_eq!(yoghurt.product_url, "");
    }

    #[test]
    fn page_without_cards_parses_empty() {
        let parsed = parse("<html><body></body></html>");
        assert!(parsed.records.is_empty());
        assert_eq!(parsed.expected_total, 0);
    }

    #[test]
    fn zero_pages_scraped_is_a_failure() {
        let result = pagination_result(0, 0, 0, "https://x.com/c");
        assert!(!result.success);
        assert_eq!(result.error_message.as_deref(), Some("no pages scraped"));
    }

    #[test]
    fn scraped_pages_mean_success_despite_count_shortfall() {
        // Found well under 0.8x expected: the mismatch is a warning,
        // never a gate.
        let result = pagination_result(3, 40, 100, "https://x.com/c?page=3");
        assert!(result.success);
        assert!(result.error_message.is_none());
        assert_eq!(result.pages_scraped, 3);
        assert_eq!(result.products_found, 40);
    }
}
