//! Browser session management
//!
//! One Chromium process per run, one tab per distinct domain, all tab
//! storage owned here - handlers never create tabs themselves. Same-
//! domain navigations are paced with a randomized politeness delay;
//! cross-domain navigations go straight through.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::Page;
use futures::StreamExt;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::infrastructure::config::AppConfig;
use crate::infrastructure::errors::{HandlerResult, ScrapeError};

/// Browser process plus the domain→tab map for the run.
pub struct SessionManager {
    browser: Mutex<Browser>,
    handler_task: JoinHandle<()>,
    tabs: RwLock<HashMap<String, Page>>,
    last_domain: Mutex<Option<String>>,
    config: AppConfig,
}

impl SessionManager {
    /// Launch the browser and return a ready session manager.
    ///
    /// Applies the stealth launch arguments, the optional proxy exit
    /// point, and spawns the CDP event-drain task the connection needs
    /// to make progress.
    pub async fn start(config: AppConfig) -> Result<Self> {
        info!("starting browser");

        let mut builder = BrowserConfig::builder()
            .args(vec![
                "--no-sandbox",
                "--disable-dev-shm-usage",
                "--disable-blink-features=AutomationControlled",
                "--disable-features=VizDisplayCompositor",
            ])
            .request_timeout(Duration::from_millis(config.browser.timeout_ms));

        if !config.browser.headless {
            builder = builder.with_head();
        }

        match config.proxy.server() {
            Some(server) => {
                info!(%server, "using residential proxy exit");
                builder = builder.arg(format!("--proxy-server={server}"));
            }
            None => info!("using direct connection (no proxy)"),
        }

        let browser_config = builder.build().map_err(|e| anyhow!(e))?;
        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .context("launching browser")?;

        // The CDP connection only makes progress while its handler
        // stream is polled.
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        info!("browser started");
        Ok(Self {
            browser: Mutex::new(browser),
            handler_task,
            tabs: RwLock::new(HashMap::new()),
            last_domain: Mutex::new(None),
            config,
        })
    }

    /// Normalized domain key for a URL.
    pub fn domain_key(url: &str) -> Option<String> {
        url::Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.to_lowercase()))
    }

    /// Get the tab bound to the URL's domain, opening one on first use.
    /// At most one tab exists per domain for the lifetime of the run.
    pub async fn page_for_url(&self, url: &str) -> HandlerResult<Page> {
        let domain = Self::domain_key(url)
            .ok_or_else(|| ScrapeError::Other(anyhow!("cannot derive domain from url: {url}")))?;

        if let Some(page) = self.tabs.read().await.get(&domain) {
            debug!(%domain, "reusing existing tab");
            return Ok(page.clone());
        }

        let mut tabs = self.tabs.write().await;
        // Re-check under the write lock.
        if let Some(page) = tabs.get(&domain) {
            return Ok(page.clone());
        }

        info!(%domain, "opening new tab");
        let browser = self.browser.lock().await;
        let page = browser
            .new_page("about:blank")
            .await
            .map_err(ScrapeError::browser)?;
        page.set_user_agent(&self.config.browser.user_agent)
            .await
            .map_err(ScrapeError::browser)?;
        tabs.insert(domain, page.clone());
        Ok(page)
    }

    /// Navigate the tab to `url`, pausing first when the target shares
    /// the domain of the previous navigation. Updates the last-navigated
    /// domain afterwards. A timeout surfaces as a handler-level error,
    /// not a retry.
    pub async fn navigate_with_pacing(&self, page: &Page, url: &str) -> HandlerResult<()> {
        let domain = Self::domain_key(url);

        {
            let last = self.last_domain.lock().await;
            match (last.as_deref(), domain.as_deref()) {
                (Some(prev), Some(next)) if prev == next => {
                    let delay = self.uniform_delay(
                        self.config.pacing.min_url_delay_secs,
                        self.config.pacing.max_url_delay_secs,
                    );
                    info!(domain = next, delay_secs = format!("{:.1}", delay.as_secs_f64()),
                        "same domain, pacing before navigation");
                    drop(last);
                    tokio::time::sleep(delay).await;
                }
                (Some(prev), Some(next)) => {
                    debug!(from = prev, to = next, "domain switch, navigating immediately");
                }
                _ => {}
            }
        }

        info!(%url, "navigating");
        let timeout = Duration::from_millis(self.config.browser.timeout_ms);
        let navigation = async {
            page.goto(url).await.map_err(ScrapeError::browser)?;
            page.wait_for_navigation()
                .await
                .map_err(ScrapeError::browser)?;
            Ok::<_, ScrapeError>(())
        };
        match tokio::time::timeout(timeout, navigation).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(ScrapeError::NavigationTimeout {
                    url: url.to_string(),
                    timeout_ms: self.config.browser.timeout_ms,
                })
            }
        }

        *self.last_domain.lock().await = domain;
        Ok(())
    }

    /// Randomized pause before a simulated click, drawn from the
    /// shorter interaction window.
    pub async fn interaction_delay(&self) {
        let delay = self.uniform_delay(
            self.config.pacing.min_click_delay_secs,
            self.config.pacing.max_click_delay_secs,
        );
        debug!(delay_secs = format!("{:.1}", delay.as_secs_f64()), "interaction delay");
        tokio::time::sleep(delay).await;
    }

    fn uniform_delay(&self, min_secs: f64, max_secs: f64) -> Duration {
        let span = (max_secs - min_secs).max(0.0);
        Duration::from_secs_f64(min_secs + fastrand::f64() * span)
    }

    /// Close all tabs, then the browser, tolerating individual close
    /// failures so teardown always runs to completion.
    pub async fn shutdown(self) {
        info!("shutting down browser session");

        let tabs: Vec<(String, Page)> = self.tabs.write().await.drain().collect();
        for (domain, page) in tabs {
            if let Err(e) = page.close().await {
                warn!(%domain, error = %e, "failed to close tab");
            } else {
                debug!(%domain, "closed tab");
            }
        }

        let mut browser = self.browser.into_inner();
        if let Err(e) = browser.close().await {
            warn!(error = %e, "failed to close browser");
        }
        if let Err(e) = browser.wait().await {
            warn!(error = %e, "browser did not exit cleanly");
        }
        self.handler_task.abort();
        info!("browser shutdown complete");
    }
}
