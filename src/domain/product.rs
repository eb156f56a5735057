//! Product records and the tolerant text parsers behind them
//!
//! Field extraction is best effort: a card with a missing name or an
//! unparseable price still yields a record with empty/None fields
//! rather than aborting the card.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static NUMBER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\d[\d,]*(?:\.\d+)?").expect("valid number regex"));

static INTEGER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").expect("valid integer regex"));

/// One product row extracted from a DOM card on a paginated listing page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductRecord {
    pub product_name: String,
    pub final_price: Option<f64>,
    pub price_before_discount: Option<f64>,
    /// Raw discount text as rendered, e.g. `"-15%"`.
    pub discount_rate: String,
    pub product_url: String,
    pub product_category_path: String,
    pub image_url: String,
    pub site_name: String,
    pub path: String,
    pub category: String,
    pub url: String,
    pub page_number: u32,
    pub url_with_page_number: String,
    pub scraped_at: DateTime<Utc>,
}

/// Parse a rendered price string into a number.
///
/// `"12.50 EGP"` → `12.50`, `"1,234"` → `1234.0`; empty or digit-free
/// text yields `None`. Thousands separators are stripped.
pub fn parse_price_text(text: &str) -> Option<f64> {
    let m = NUMBER_RE.find(text)?;
    m.as_str().replace(',', "").parse::<f64>().ok()
}

/// Parse the first integer substring out of a count indicator.
///
/// Parse failure is expected (layout drift, partial render) and
/// downgrades the later count reconciliation to a no-op, so it maps to
/// zero rather than an error.
pub fn parse_leading_count(text: &str) -> u32 {
    INTEGER_RE
        .find(text)
        .and_then(|m| m.as_str().parse::<u32>().ok())
        .unwrap_or(0)
}
