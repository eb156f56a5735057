//! Persistence gateway
//!
//! Work items and scrape logs live in a remote Supabase store; product
//! batches go to a per-site history table. Every gateway call is
//! fire-and-record: persistence failures are logged and swallowed so
//! they can never abort the scrape loop.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tracing::{error, info, warn};

use crate::domain::product::ProductRecord;
use crate::domain::work_item::{truncate_error_message, ScrapeLog, ScrapeStatus, WorkItem};
use crate::infrastructure::config::SupabaseConfig;

/// Aggregate counts over the scrape-log table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScrapeStatistics {
    pub total_attempts: usize,
    pub success_count: usize,
    pub fail_count: usize,
    pub pending_count: usize,
}

impl ScrapeStatistics {
    pub fn success_rate(&self) -> f64 {
        if self.total_attempts == 0 {
            return 0.0;
        }
        self.success_count as f64 / self.total_attempts as f64 * 100.0
    }
}

/// External persistence surface: the work source, the scrape-log store
/// and the product-record sink.
#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    /// All pending work items, ordered by id. Empty on store failure.
    async fn fetch_work_items(&self) -> Vec<WorkItem>;

    /// Insert a PENDING log row for the item; returns the row id used
    /// to close the log out later. None on store failure.
    async fn log_scrape_start(&self, item: &WorkItem) -> Option<i64>;

    async fn log_scrape_success(&self, log_id: i64, products_found: u32, pages_scraped: u32);

    /// Message is truncated to the log column limit before writing.
    async fn log_scrape_failure(&self, log_id: i64, error_message: &str);

    /// Insert one page's product batch; returns rows written (0 on
    /// failure).
    async fn insert_product_batch(&self, rows: &[ProductRecord]) -> usize;

    async fn statistics(&self) -> Option<ScrapeStatistics>;
}

/// Supabase REST implementation.
pub struct SupabaseGateway {
    client: reqwest::Client,
    config: SupabaseConfig,
}

impl SupabaseGateway {
    pub fn new(config: SupabaseConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.config.url.trim_end_matches('/'), table)
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request
            .header("apikey", &self.config.key)
            .header("Authorization", format!("Bearer {}", self.config.key))
    }

    async fn patch_log(&self, log_id: i64, body: serde_json::Value) -> anyhow::Result<()> {
        let url = format!("{}?id=eq.{}", self.table_url(&self.config.log_table), log_id);
        self.authorized(self.client.patch(&url))
            .json(&body)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

#[async_trait]
impl PersistenceGateway for SupabaseGateway {
    async fn fetch_work_items(&self) -> Vec<WorkItem> {
        let url = format!("{}?select=*&order=id.asc", self.table_url(&self.config.urls_table));
        let result: anyhow::Result<Vec<WorkItem>> = async {
            let items = self
                .authorized(self.client.get(&url))
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;
            Ok(items)
        }
        .await;

        match result {
            Ok(items) => {
                info!(count = items.len(), "retrieved work items");
                items
            }
            Err(e) => {
                error!(error = %e, "failed to fetch work items");
                Vec::new()
            }
        }
    }

    async fn log_scrape_start(&self, item: &WorkItem) -> Option<i64> {
        let row = ScrapeLog::started(item);

        let result: anyhow::Result<i64> = async {
            let inserted: Vec<serde_json::Value> = self
                .authorized(self.client.post(self.table_url(&self.config.log_table)))
                .header("Prefer", "return=representation")
                .json(&row)
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;
            inserted
                .first()
                .and_then(|r| r.get("id"))
                .and_then(|id| id.as_i64())
                .ok_or_else(|| anyhow::anyhow!("insert returned no id"))
        }
        .await;

        match result {
            Ok(id) => {
                info!(website = %item.website, log_id = id, "logged scrape start");
                Some(id)
            }
            Err(e) => {
                error!(error = %e, "failed to log scrape start");
                None
            }
        }
    }

    async fn log_scrape_success(&self, log_id: i64, products_found: u32, pages_scraped: u32) {
        let body = json!({
            "scrape_status": ScrapeStatus::Success.as_str(),
            "products_found": products_found,
            "pages_scraped": pages_scraped,
            "scraped_at": Utc::now().to_rfc3339(),
        });
        if let Err(e) = self.patch_log(log_id, body).await {
            error!(log_id, error = %e, "failed to log scrape success");
        }
    }

    async fn log_scrape_failure(&self, log_id: i64, error_message: &str) {
        let body = json!({
            "scrape_status": ScrapeStatus::Fail.as_str(),
            "error_message": truncate_error_message(error_message),
            "scraped_at": Utc::now().to_rfc3339(),
        });
        if let Err(e) = self.patch_log(log_id, body).await {
            error!(log_id, error = %e, "failed to log scrape failure");
        }
    }

    async fn insert_product_batch(&self, rows: &[ProductRecord]) -> usize {
        if rows.is_empty() {
            return 0;
        }
        let result: anyhow::Result<usize> = async {
            let inserted: Vec<serde_json::Value> = self
                .authorized(
                    self.client
                        .post(self.table_url(&self.config.price_history_table)),
                )
                .header("Prefer", "return=representation")
                .json(rows)
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;
            Ok(inserted.len())
        }
        .await;

        match result {
            Ok(count) => count,
            Err(e) => {
                error!(error = %e, rows = rows.len(), "failed to insert product batch");
                0
            }
        }
    }

    async fn statistics(&self) -> Option<ScrapeStatistics> {
        let url = format!(
            "{}?select=scrape_status",
            self.table_url(&self.config.log_table)
        );
        let result: anyhow::Result<Vec<serde_json::Value>> = async {
            let rows = self
                .authorized(self.client.get(&url))
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;
            Ok(rows)
        }
        .await;

        match result {
            Ok(rows) => {
                let mut stats = ScrapeStatistics {
                    total_attempts: rows.len(),
                    ..ScrapeStatistics::default()
                };
                for row in &rows {
                    match row.get("scrape_status").and_then(|s| s.as_str()) {
                        Some("SUCCESS") => stats.success_count += 1,
                        Some("FAIL") => stats.fail_count += 1,
                        Some("PENDING") => stats.pending_count += 1,
                        _ => {}
                    }
                }
                Some(stats)
            }
            Err(e) => {
                warn!(error = %e, "failed to fetch scrape statistics");
                None
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_rate_handles_empty_log() {
        assert_eq!(ScrapeStatistics::default().success_rate(), 0.0);
        let stats = ScrapeStatistics {
            total_attempts: 4,
            success_count: 3,
            ..ScrapeStatistics::default()
        };
        assert!((stats.success_rate() - 75.0).abs() < f64::EPSILON);
    }
}
