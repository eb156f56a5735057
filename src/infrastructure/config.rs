//! Application configuration
//!
//! Settings are read from the environment with serde-backed defaults,
//! so an empty environment still yields a runnable (proxyless,
//! headful-off) configuration. Keys match the deployment's `.env`
//! conventions.

use std::env;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Complete application configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    pub supabase: SupabaseConfig,
    pub proxy: ProxyConfig,
    pub browser: BrowserConfig,
    pub pacing: PacingConfig,
    pub capture: CaptureConfig,
    pub logging: LoggingConfig,
}

/// Supabase work-source / log-store endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupabaseConfig {
    pub url: String,
    pub key: String,
    pub urls_table: String,
    pub log_table: String,
    pub price_history_table: String,
}

impl Default for SupabaseConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            key: String::new(),
            urls_table: "links_to_scrape".into(),
            log_table: "links_to_scrape_log".into(),
            price_history_table: "oscar_price_history".into(),
        }
    }
}

/// Residential proxy exit point, applied at browser launch when enabled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: String::new(),
            port: 8000,
            username: String::new(),
            password: String::new(),
        }
    }
}

impl ProxyConfig {
    /// Proxy server URL in the `http://host:port` form the browser
    /// launch argument expects, or None when disabled.
    pub fn server(&self) -> Option<String> {
        if !self.enabled || self.host.is_empty() {
            return None;
        }
        Some(format!("http://{}:{}", self.host, self.port))
    }
}

/// Browser launch and timeout settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserConfig {
    pub headless: bool,
    /// Navigation and element-wait timeout in milliseconds.
    pub timeout_ms: u64,
    pub user_agent: String,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: true,
            timeout_ms: 30_000,
            user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
                         AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36"
                .into(),
        }
    }
}

/// Politeness delay windows, seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PacingConfig {
    /// Delay before navigating again within the same domain.
    pub min_url_delay_secs: f64,
    pub max_url_delay_secs: f64,
    /// Shorter delay before simulated clicks.
    pub min_click_delay_secs: f64,
    pub max_click_delay_secs: f64,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            min_url_delay_secs: 10.0,
            max_url_delay_secs: 20.0,
            min_click_delay_secs: 2.0,
            max_click_delay_secs: 6.0,
        }
    }
}

/// Where raw captured responses land on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    pub raw_response_dir: PathBuf,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            raw_response_dir: PathBuf::from("raw_responses"),
        }
    }
}

/// Logging output settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: "error", "warn", "info", "debug", "trace".
    pub level: String,
    pub file_output: bool,
    pub log_dir: PathBuf,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            file_output: true,
            log_dir: PathBuf::from("logs"),
        }
    }
}

impl AppConfig {
    /// Load configuration from the process environment, falling back to
    /// defaults for anything unset or unparseable.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(v) = env::var("SUPABASE_URL") {
            config.supabase.url = v;
        }
        if let Ok(v) = env::var("SUPABASE_KEY") {
            config.supabase.key = v;
        }

        config.proxy.enabled = env_bool("PROXY_ENABLED", config.proxy.enabled);
        if let Ok(v) = env::var("PROXY_HOST") {
            config.proxy.host = v;
        }
        config.proxy.port = env_parse("PROXY_PORT", config.proxy.port);
        if let Ok(v) = env::var("PROXY_USER") {
            config.proxy.username = v;
        }
        if let Ok(v) = env::var("PROXY_PASS") {
            config.proxy.password = v;
        }

        config.browser.headless = env_bool("BROWSER_HEADLESS", config.browser.headless);
        config.browser.timeout_ms = env_parse("BROWSER_TIMEOUT", config.browser.timeout_ms);

        config.pacing.min_url_delay_secs =
            env_parse("MIN_URL_DELAY", config.pacing.min_url_delay_secs);
        config.pacing.max_url_delay_secs =
            env_parse("MAX_URL_DELAY", config.pacing.max_url_delay_secs);
        config.pacing.min_click_delay_secs =
            env_parse("MIN_CLICK_DELAY", config.pacing.min_click_delay_secs);
        config.pacing.max_click_delay_secs =
            env_parse("MAX_CLICK_DELAY", config.pacing.max_click_delay_secs);

        if let Ok(v) = env::var("RAW_RESPONSE_DIR") {
            config.capture.raw_response_dir = PathBuf::from(v);
        }
        if let Ok(v) = env::var("LOG_LEVEL") {
            config.logging.level = v;
        }

        config
    }

    /// Banner-friendly one-line-per-setting summary, secrets omitted.
    pub fn summary(&self) -> String {
        format!(
            "proxy: {} | headless: {} | click delays: {:.1}-{:.1}s | domain delays: {:.1}-{:.1}s | timeout: {}ms",
            if self.proxy.enabled { "enabled" } else { "disabled" },
            self.browser.headless,
            self.pacing.min_click_delay_secs,
            self.pacing.max_click_delay_secs,
            self.pacing.min_url_delay_secs,
            self.pacing.max_url_delay_secs,
            self.browser.timeout_ms,
        )
    }
}

fn env_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .map(|v| v.eq_ignore_ascii_case("true"))
        .unwrap_or(default)
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_runnable() {
        let config = AppConfig::default();
        assert!(config.browser.headless);
        assert_eq!(config.supabase.urls_table, "links_to_scrape");
        assert!(config.proxy.server().is_none());
        assert!(config.pacing.min_url_delay_secs < config.pacing.max_url_delay_secs);
    }

    #[test]
    fn proxy_server_formatting() {
        let proxy = ProxyConfig {
            enabled: true,
            host: "la.residential.example.com".into(),
            port: 8000,
            ..ProxyConfig::default()
        };
        assert_eq!(
            proxy.server().unwrap(),
            "http://la.residential.example.com:8000"
        );
    }

    #[test]
    fn disabled_proxy_has_no_server() {
        let proxy = ProxyConfig {
            enabled: false,
            host: "h".into(),
            ..ProxyConfig::default()
        };
        assert!(proxy.server().is_none());
    }
}
