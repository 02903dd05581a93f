use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Paths {
    pub base: PathBuf,
}

impl Paths {
    pub fn new() -> Self {
        let base = dirs::home_dir()
            .map(|h| h.join(".pagescout"))
            .unwrap_or_else(|| PathBuf::from(".pagescout"));
        Self { base }
    }

    pub fn with_base(base: PathBuf) -> Self {
        Self { base }
    }

    pub fn config_file(&self) -> PathBuf {
        self.base.join("config.json")
    }

    pub fn rules_file(&self) -> PathBuf {
        self.base.join("rules.json")
    }

    pub fn screenshots_dir(&self) -> PathBuf {
        self.base.join("screenshots")
    }
}

impl Default for Paths {
    fn default() -> Self {
        Self::new()
    }
}
