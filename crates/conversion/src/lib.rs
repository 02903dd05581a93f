//! Post-processing of retrieved pages, selected by name (`?format=` on the HTTP API).

pub mod base64_removal;
pub mod markdown;

use pagescout_core::{Page, Result};
use std::collections::HashMap;
use std::sync::Arc;

pub use base64_removal::Base64RemovalService;
pub use markdown::{html_to_markdown, MarkdownService};

/// Rewrites the content of a page into another representation.
pub trait ConversionService: Send + Sync {
    fn convert(&self, page: Page) -> Result<Page>;
}

#[derive(Clone, Default)]
pub struct ConversionRegistry {
    services: HashMap<String, Arc<dyn ConversionService>>,
}

impl ConversionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with `markdown` and `base64-removal`.
    pub fn with_defaults() -> Result<Self> {
        let mut registry = Self::new();
        registry.register("markdown", Arc::new(MarkdownService::new()?));
        registry.register("base64-removal", Arc::new(Base64RemovalService::new()?));
        Ok(registry)
    }

    pub fn register(&mut self, name: &str, service: Arc<dyn ConversionService>) {
        self.services.insert(name.to_string(), service);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ConversionService>> {
        self.services.get(name).cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.services.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }
}
