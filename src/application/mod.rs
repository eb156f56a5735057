//! Application module - site handlers and the orchestration loop
//!
//! A closed set of site handlers implements one shared extraction
//! contract; a substring registry maps each work item's URL to the
//! handler able to process it. `safe_scrape` is the only entry point
//! the orchestrator calls: it guarantees exactly one terminal log
//! event and one `ScrapeResult` per work item, no matter how the
//! handler failed internally.

pub mod orchestrator;
pub mod oscar;
pub mod response_filter;
pub mod seoudi;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info, warn};

use crate::domain::work_item::{ScrapeResult, WorkItem};
use crate::infrastructure::errors::HandlerResult;
use crate::infrastructure::persistence::PersistenceGateway;

pub use orchestrator::Orchestrator;

/// The sites this build knows how to scrape, in registry match order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SiteKind {
    Oscar,
    Seoudi,
}

/// Resolve a URL to the handler kind able to process it.
///
/// Matches an ordered list of domain substrings; domains that are
/// recognized but not yet implemented (spinneys) resolve to `None`,
/// which the orchestrator counts as a per-item failure without
/// raising.
pub fn resolve_site(url: &str) -> Option<SiteKind> {
    let url = url.to_lowercase();
    if url.contains("oscarstores.com") {
        Some(SiteKind::Oscar)
    } else if url.contains("seoudisupermarket.com") {
        Some(SiteKind::Seoudi)
    } else if url.contains("spinneys") {
        warn!(%url, "spinneys scraper not implemented yet");
        None
    } else {
        None
    }
}

/// Domain → handler listing for the startup banner.
pub fn supported_domains() -> &'static [(&'static str, &'static str)] {
    &[
        ("oscarstores.com", "OscarHandler"),
        ("seoudisupermarket.com", "SeoudiHandler"),
        ("spinneys", "SpinneysHandler (not implemented)"),
    ]
}

/// Shared extraction contract implemented by every site handler.
#[async_trait]
pub trait SiteHandler: Send {
    fn supported_domains(&self) -> &'static [&'static str];

    fn gateway(&self) -> &Arc<dyn PersistenceGateway>;

    /// Site-specific scrape of one work item. May fail; `safe_scrape`
    /// contains the failure.
    async fn scrape_url(&mut self, item: &WorkItem) -> HandlerResult<ScrapeResult>;

    /// The orchestrator's sole entry point. Emits the PENDING event,
    /// runs the scrape, converts any raised error into a failure
    /// result, and closes the log out with exactly one SUCCESS or FAIL
    /// event.
    async fn safe_scrape(&mut self, item: &WorkItem) -> ScrapeResult {
        info!(website = %item.website, url = %item.url, "starting scrape");
        let log_id = self.gateway().log_scrape_start(item).await;

        let result = match self.scrape_url(item).await {
            Ok(result) => result,
            Err(e) => {
                let message = format!("exception during scraping: {e}");
                error!(url = %item.url, "{message}");
                ScrapeResult::failure(message)
            }
        };

        match log_id {
            Some(log_id) => {
                if result.success {
                    self.gateway()
                        .log_scrape_success(log_id, result.products_found, result.pages_scraped)
                        .await;
                } else {
                    let message = result
                        .error_message
                        .as_deref()
                        .unwrap_or("scraping failed");
                    self.gateway().log_scrape_failure(log_id, message).await;
                }
            }
            None => warn!("no active log id for scrape session"),
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::errors::ScrapeError;
    use crate::infrastructure::persistence::testing::{LogEvent, MemoryGateway};

    #[test]
    fn registry_resolves_known_domains() {
        assert_eq!(
            resolve_site("https://www.oscarstores.com/category/dairy"),
            Some(SiteKind::Oscar)
        );
        assert_eq!(
            resolve_site("https://seoudisupermarket.com/fruits"),
            Some(SiteKind::Seoudi)
        );
    }

    #[test]
    fn registry_is_case_insensitive() {
        assert_eq!(
            resolve_site("https://WWW.OSCARSTORES.COM/x"),
            Some(SiteKind::Oscar)
        );
    }

    #[test]
    fn unimplemented_and_unknown_domains_resolve_to_none() {
        assert_eq!(resolve_site("https://spinneys.com/offers"), None);
        assert_eq!(resolve_site("https://example.com/shop"), None);
    }

    struct PanickyHandler {
        gateway: Arc<dyn PersistenceGateway>,
    }

    #[async_trait]
    impl SiteHandler for PanickyHandler {
        fn supported_domains(&self) -> &'static [&'static str] {
            &["example.com"]
        }

        fn gateway(&self) -> &Arc<dyn PersistenceGateway> {
            &self.gateway
        }

        async fn scrape_url(&mut self, _item: &WorkItem) -> HandlerResult<ScrapeResult> {
            Err(ScrapeError::element_timeout(".product-card"))
        }
    }

    fn work_item() -> WorkItem {
        WorkItem {
            id: 1,
            serial: None,
            website: "example.com".into(),
            category: "misc".into(),
            url: "https://example.com/shop".into(),
        }
    }

    #[tokio::test]
    async fn raised_error_becomes_failure_result_with_one_fail_event() {
        let gateway = Arc::new(MemoryGateway::default());
        let mut handler = PanickyHandler {
            gateway: gateway.clone() as Arc<dyn PersistenceGateway>,
        };

        let result = handler.safe_scrape(&work_item()).await;

        assert!(!result.success);
        assert!(result
            .error_message
            .as_deref()
            .unwrap()
            .contains(".product-card"));

        let events = gateway.events();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], LogEvent::Started { serial: 1, .. }));
        assert!(matches!(events[1], LogEvent::Failed { .. }));
    }

    struct HappyHandler {
        gateway: Arc<dyn PersistenceGateway>,
    }

    #[async_trait]
    impl SiteHandler for HappyHandler {
        fn supported_domains(&self) -> &'static [&'static str] {
            &["example.com"]
        }

        fn gateway(&self) -> &Arc<dyn PersistenceGateway> {
            &self.gateway
        }

        async fn scrape_url(&mut self, _item: &WorkItem) -> HandlerResult<ScrapeResult> {
            Ok(ScrapeResult {
                success: true,
                products_found: 48,
                pages_scraped: 4,
                error_message: None,
                data: serde_json::Value::Null,
            })
        }
    }

    #[tokio::test]
    async fn successful_scrape_emits_one_success_event() {
        let gateway = Arc::new(MemoryGateway::default());
        let mut handler = HappyHandler {
            gateway: gateway.clone() as Arc<dyn PersistenceGateway>,
        };

        let result = handler.safe_scrape(&work_item()).await;
        assert!(result.success);

        let events = gateway.events();
        assert_eq!(events.len(), 2);
        assert!(matches!(
            events[1],
            LogEvent::Succeeded { products_found: 48, pages_scraped: 4, .. }
        ));
    }
}
