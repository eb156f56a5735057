//! Mowaffer - browser-driven grocery price scraping engine
//!
//! Loads work items (site/category URLs) from a remote store, drives a
//! single Chromium session across them with per-domain tab reuse and
//! politeness pacing, and persists what each site handler extracts:
//! parsed product records for server-rendered listings, raw GraphQL
//! captures for client-rendered ones.

pub mod application;
pub mod domain;
pub mod infrastructure;

use std::sync::Arc;

use anyhow::Result;

use application::Orchestrator;
use infrastructure::config::AppConfig;
use infrastructure::persistence::{PersistenceGateway, SupabaseGateway};

/// Run one full scrape batch with the given configuration.
pub async fn run(config: AppConfig) -> Result<()> {
    let gateway: Arc<dyn PersistenceGateway> =
        Arc::new(SupabaseGateway::new(config.supabase.clone()));
    Orchestrator::new(config, gateway).run().await
}
