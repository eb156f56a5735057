//! Sequential scrape orchestration
//!
//! Run-to-completion batch job: load every pending work item from the
//! gateway, walk them in order against a single browser session, and
//! close out with run statistics. Ctrl-C between or during items stops
//! the run; the interrupted item is counted as failed and the browser
//! still shuts down cleanly.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use tracing::{error, info, warn};

use crate::application::oscar::OscarHandler;
use crate::application::seoudi::SeoudiHandler;
use crate::application::{resolve_site, supported_domains, SiteHandler, SiteKind};
use crate::domain::work_item::WorkItem;
use crate::infrastructure::config::AppConfig;
use crate::infrastructure::persistence::PersistenceGateway;
use crate::infrastructure::session::SessionManager;

pub struct Orchestrator {
    config: AppConfig,
    gateway: Arc<dyn PersistenceGateway>,
    successful: u32,
    failed: u32,
}

impl Orchestrator {
    pub fn new(config: AppConfig, gateway: Arc<dyn PersistenceGateway>) -> Self {
        Self {
            config,
            gateway,
            successful: 0,
            failed: 0,
        }
    }

    /// Run the whole batch. Returns once every item is processed, the
    /// work list is empty, or the user interrupts.
    pub async fn run(mut self) -> Result<()> {
        self.print_banner();

        let items = self.load_work_items().await;
        if items.is_empty() {
            error!("no work items found, nothing to do");
            return Ok(());
        }

        let session = Arc::new(SessionManager::start(self.config.clone()).await?);

        let mut oscar = OscarHandler::new(session.clone(), self.gateway.clone())?;
        let mut seoudi = SeoudiHandler::new(session.clone(), self.gateway.clone(), &self.config.capture);

        let total = items.len();
        let mut interrupted = false;
        for (index, item) in items.iter().enumerate() {
            self.print_progress(index, total);
            info!(website = %item.website, url = %item.url, "processing work item");

            let handler: &mut dyn SiteHandler = match resolve_site(&item.url) {
                Some(SiteKind::Oscar) => &mut oscar,
                Some(SiteKind::Seoudi) => &mut seoudi,
                None => {
                    error!(website = %item.website, url = %item.url, "no handler for work item");
                    self.record_unhandled(item).await;
                    continue;
                }
            };

            tokio::select! {
                result = handler.safe_scrape(item) => {
                    if result.success {
                        info!(
                            website = %item.website,
                            products_found = result.products_found,
                            pages_scraped = result.pages_scraped,
                            "scrape succeeded"
                        );
                        self.successful += 1;
                    } else {
                        error!(
                            website = %item.website,
                            error = result.error_message.as_deref().unwrap_or("unknown error"),
                            "scrape failed"
                        );
                        self.failed += 1;
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    // Dropping the in-flight future aborts the item.
                    warn!(url = %item.url, "interrupted, aborting current item");
                    self.failed += 1;
                    interrupted = true;
                }
            }

            if interrupted {
                break;
            }
        }

        self.print_progress(total, total);

        // Handlers hold session clones; release them before teardown.
        drop(oscar);
        drop(seoudi);
        match Arc::try_unwrap(session) {
            Ok(session) => session.shutdown().await,
            Err(_) => warn!("session still referenced at shutdown"),
        }

        self.print_final_statistics(total).await;
        info!("scraper execution completed");
        Ok(())
    }

    fn print_banner(&self) {
        info!("================================================================");
        info!("mowaffer grocery scraper");
        info!(started_at = %Utc::now().format("%Y-%m-%d %H:%M:%S"), "run starting");
        info!("{}", self.config.summary());
        for (domain, handler) in supported_domains() {
            info!(domain, handler, "registered site handler");
        }
        info!("================================================================");
    }

    async fn load_work_items(&self) -> Vec<WorkItem> {
        info!("loading work items");
        let items = self.gateway.fetch_work_items().await;

        let mut by_domain: BTreeMap<&str, usize> = BTreeMap::new();
        for item in &items {
            *by_domain.entry(item.website.as_str()).or_default() += 1;
        }
        for (domain, count) in &by_domain {
            info!(domain, count, "work items by domain");
        }
        items
    }

    /// A work item nobody can handle still gets exactly one FAIL event.
    async fn record_unhandled(&mut self, item: &WorkItem) {
        if let Some(log_id) = self.gateway.log_scrape_start(item).await {
            self.gateway
                .log_scrape_failure(log_id, &format!("no scraper available for {}", item.website))
                .await;
        }
        self.failed += 1;
    }

    fn print_progress(&self, current: usize, total: usize) {
        let percentage = if total == 0 {
            100.0
        } else {
            current as f64 / total as f64 * 100.0
        };
        info!(
            current,
            total,
            progress = format!("{percentage:.1}%"),
            successful = self.successful,
            failed = self.failed,
            remaining = total - current,
            "progress"
        );
    }

    async fn print_final_statistics(&self, total: usize) {
        info!("================================================================");
        info!(
            total,
            successful = self.successful,
            failed = self.failed,
            "final statistics"
        );
        if total > 0 {
            let rate = self.successful as f64 / total as f64 * 100.0;
            info!(success_rate = format!("{rate:.1}%"), "run success rate");
        }
        if let Some(stats) = self.gateway.statistics().await {
            info!(
                total_attempts = stats.total_attempts,
                success_count = stats.success_count,
                fail_count = stats.fail_count,
                pending_count = stats.pending_count,
                success_rate = format!("{:.1}%", stats.success_rate()),
                "store statistics"
            );
        }
        info!(completed_at = %Utc::now().format("%Y-%m-%d %H:%M:%S"), "run complete");
        info!("================================================================");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::persistence::testing::{LogEvent, MemoryGateway};

    #[tokio::test]
    async fn unhandled_domain_gets_exactly_one_fail_event() {
        let gateway = Arc::new(MemoryGateway::default());
        let mut orchestrator =
            Orchestrator::new(AppConfig::default(), gateway.clone() as Arc<dyn PersistenceGateway>);

        let item = WorkItem {
            id: 1,
            serial: None,
            website: "spinneys".into(),
            category: "offers".into(),
            url: "https://spinneys.com/offers".into(),
        };
        assert_eq!(resolve_site(&item.url), None);

        orchestrator.record_unhandled(&item).await;

        assert_eq!(orchestrator.failed, 1);
        let events = gateway.events();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], LogEvent::Started { .. }));
        match &events[1] {
            LogEvent::Failed { error_message, .. } => {
                assert!(error_message.contains("no scraper available"));
            }
            other => panic!("expected fail event, got {other:?}"),
        }
    }
}
