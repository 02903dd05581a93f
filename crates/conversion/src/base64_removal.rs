use pagescout_core::{Page, Result};
use regex::Regex;

use crate::ConversionService;

const DATA_IMAGE: &str = r"data:image/([a-zA-Z]*);base64,([a-zA-Z0-9+/]*={0,2})";
const PLACEHOLDER: &str = "Base64 Image Removed";

/// Replaces inline base64 image payloads with a short placeholder.
pub struct Base64RemovalService {
    re: Regex,
}

impl Base64RemovalService {
    pub fn new() -> Result<Self> {
        Ok(Self {
            re: Regex::new(DATA_IMAGE)?,
        })
    }

    pub fn scrub(&self, content: &str) -> String {
        self.re.replace_all(content, PLACEHOLDER).into_owned()
    }
}

impl ConversionService for Base64RemovalService {
    fn convert(&self, mut page: Page) -> Result<Page> {
        page.content = self.scrub(&page.content);
        Ok(page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scrub_data_images() {
        let svc = Base64RemovalService::new().unwrap();
        let html = r#"<img src="data:image/png;base64,iVBORw0KGgoAAAANSUhEUg=="><p>text</p>"#;
        assert_eq!(svc.scrub(html), r#"<img src="Base64 Image Removed"><p>text</p>"#);
    }

    #[test]
    fn test_leaves_other_data_urls() {
        let svc = Base64RemovalService::new().unwrap();
        let content = "data:text/plain;base64,SGVsbG8= and https://example.com/a.png";
        assert_eq!(svc.scrub(content), content);
    }

    #[test]
    fn test_convert_keeps_title_and_url() {
        let svc = Base64RemovalService::new().unwrap();
        let page = Page {
            title: "T".to_string(),
            content: "![x](data:image/jpeg;base64,/9j/4AAQ)".to_string(),
            url: "https://example.com/".to_string(),
        };
        let out = svc.convert(page).unwrap();
        assert_eq!(out.content, "![x](Base64 Image Removed)");
        assert_eq!(out.title, "T");
        assert_eq!(out.url, "https://example.com/");
    }
}
