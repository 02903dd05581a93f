use pagescout_browser::{BrowserService, GetScreenshot};
use pagescout_core::Paths;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

fn default_output(paths: &Paths) -> PathBuf {
    let stamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();
    paths.screenshots_dir().join(format!("screenshot-{}.jpg", stamp))
}

pub async fn run(
    config_path: Option<&Path>,
    url: String,
    output: Option<PathBuf>,
    wait_time: Option<u64>,
) -> anyhow::Result<()> {
    let config = super::load_config(config_path)?;
    let rules = super::load_rules(&config)?;
    let browser = super::connect_browser(&config, rules).await?;

    let wait_time = wait_time.unwrap_or(config.server.default_wait_time_ms);
    let shot = browser.screenshot(GetScreenshot { url, wait_time }).await?;

    let output = output.unwrap_or_else(|| default_output(&Paths::new()));
    if let Some(parent) = output.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(&output, &shot.image)?;
    println!("Saved {} bytes to {}", shot.image.len(), output.display());
    Ok(())
}
