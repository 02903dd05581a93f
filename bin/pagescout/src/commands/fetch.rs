use anyhow::anyhow;
use pagescout_browser::{BrowserService, GetPage};
use pagescout_conversion::ConversionRegistry;
use std::path::Path;

pub async fn run(
    config_path: Option<&Path>,
    url: String,
    wait_time: Option<u64>,
    format: Option<String>,
) -> anyhow::Result<()> {
    let config = super::load_config(config_path)?;

    // Resolve the conversion before touching the browser so a typo fails fast.
    let registry = ConversionRegistry::with_defaults()?;
    let conversion = match format.as_deref() {
        Some(name) => Some(registry.get(name).ok_or_else(|| {
            anyhow!("unknown format '{}' (available: {})", name, registry.names().join(", "))
        })?),
        None => None,
    };

    let rules = super::load_rules(&config)?;
    let browser = super::connect_browser(&config, rules).await?;

    let wait_time = wait_time.unwrap_or(config.server.default_wait_time_ms);
    let mut page = browser.get_page(GetPage { url, wait_time }).await?;
    if let Some(service) = conversion {
        page = service.convert(page)?;
    }

    println!("{}", serde_json::to_string_pretty(&page)?);
    Ok(())
}
