use anyhow::Result;

use mowaffer_scraper::infrastructure::config::AppConfig;
use mowaffer_scraper::infrastructure::logging::init_logging;

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::from_env();
    let _guard = init_logging(&config.logging)?;

    mowaffer_scraper::run(config).await
}
