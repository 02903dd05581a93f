//! HTML to Markdown conversion of extracted page content.

use pagescout_core::{Error, Page, Result};
use regex::{Captures, Regex};
use tracing::debug;
use url::Url;

use crate::base64_removal::Base64RemovalService;
use crate::ConversionService;

/// `href`/`src` attributes whose value starts with a single `/`.
const ROOT_RELATIVE_ATTR: &str = r#"(?i)(\s(?:href|src)\s*=\s*)(?:"(/[^"]*)"|'(/[^']*)')"#;

pub struct MarkdownService {
    root_relative: Regex,
    base64: Base64RemovalService,
}

impl MarkdownService {
    pub fn new() -> Result<Self> {
        Ok(Self {
            root_relative: Regex::new(ROOT_RELATIVE_ATTR)?,
            base64: Base64RemovalService::new()?,
        })
    }

    /// Make root-relative links absolute against the origin of `page_url`.
    /// Protocol-relative values (`//host/...`) are left alone.
    fn absolutize_links(&self, html: &str, page_url: &str) -> Result<String> {
        let base = Url::parse(page_url)
            .map_err(|e| Error::Conversion(format!("invalid page URL '{}': {}", page_url, e)))?;

        let rewritten = self.root_relative.replace_all(html, |caps: &Captures| {
            let (value, quote) = match (caps.get(2), caps.get(3)) {
                (Some(v), _) => (v.as_str(), '"'),
                (None, Some(v)) => (v.as_str(), '\''),
                (None, None) => return caps[0].to_string(),
            };
            if value.starts_with("//") {
                return caps[0].to_string();
            }
            match base.join(value) {
                Ok(absolute) => format!("{}{}{}{}", &caps[1], quote, absolute, quote),
                Err(_) => caps[0].to_string(),
            }
        });
        Ok(rewritten.into_owned())
    }
}

impl ConversionService for MarkdownService {
    fn convert(&self, mut page: Page) -> Result<Page> {
        let html = self.absolutize_links(&page.content, &page.url)?;
        let markdown = html_to_markdown(&html);
        page.content = self.base64.scrub(&markdown);
        Ok(page)
    }
}

/// Convert HTML to Markdown with `htmd`, dropping non-content tags.
pub fn html_to_markdown(html: &str) -> String {
    use htmd::HtmlToMarkdown;

    let converter = HtmlToMarkdown::builder()
        .skip_tags(vec!["script", "style", "noscript", "template"])
        .build();

    match converter.convert(html) {
        Ok(md) => clean_markdown(&md),
        Err(e) => {
            debug!(error = %e, "Markdown conversion failed, extracting text");
            extract_text_fallback(html)
        }
    }
}

/// Collapse runs of blank lines to one and trim the ends.
fn clean_markdown(md: &str) -> String {
    let mut result = String::with_capacity(md.len());
    let mut blank_run = false;

    for line in md.lines() {
        if line.trim().is_empty() {
            blank_run = true;
            continue;
        }
        if !result.is_empty() {
            result.push('\n');
            if blank_run {
                result.push('\n');
            }
        }
        blank_run = false;
        result.push_str(line);
    }

    result.trim().to_string()
}

/// Plain text of the whole fragment, whitespace normalised.
fn extract_text_fallback(html: &str) -> String {
    let fragment = scraper::Html::parse_fragment(html);
    fragment
        .root_element()
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(content: &str, url: &str) -> Page {
        Page {
            title: "Example".to_string(),
            content: content.to_string(),
            url: url.to_string(),
        }
    }

    #[test]
    fn test_root_relative_links_become_absolute() {
        let svc = MarkdownService::new().unwrap();
        let html = r#"<a href="/about">About</a> <img src='/logo.png'> <a href="docs/x">rel</a> <a href="//cdn.example.net/a.js">cdn</a>"#;
        let out = svc.absolutize_links(html, "https://example.com/news/today").unwrap();
        assert!(out.contains(r#"href="https://example.com/about""#));
        assert!(out.contains("src='https://example.com/logo.png'"));
        assert!(out.contains(r#"href="docs/x""#));
        assert!(out.contains(r#"href="//cdn.example.net/a.js""#));
    }

    #[test]
    fn test_invalid_page_url_is_conversion_error() {
        let svc = MarkdownService::new().unwrap();
        let err = svc.convert(page("<p>x</p>", "not a url")).unwrap_err();
        assert!(matches!(err, Error::Conversion(_)));
    }

    #[test]
    fn test_convert_to_markdown() {
        let svc = MarkdownService::new().unwrap();
        let html = r#"<h1>Hello</h1>

<p>See <a href="/more">more</a>.</p>

<script>track()</script><ul><li>One</li><li>Two</li></ul>"#;
        let out = svc.convert(page(html, "https://example.com/")).unwrap();
        assert!(out.content.contains("# Hello") || out.content.contains("Hello\n==="));
        assert!(out.content.contains("[more](https://example.com/more)"));
        assert!(out.content.contains("One"));
        assert!(!out.content.contains("track()"));
        assert_eq!(out.title, "Example");
    }

    #[test]
    fn test_inline_images_are_scrubbed() {
        let svc = MarkdownService::new().unwrap();
        let html = r#"<p>pic</p><img alt="x" src="data:image/gif;base64,R0lGODlhAQABAAAAACw=">"#;
        let out = svc.convert(page(html, "https://example.com/")).unwrap();
        assert!(out.content.contains("Base64 Image Removed"));
        assert!(!out.content.contains("R0lGOD"));
    }

    #[test]
    fn test_clean_markdown_collapses_blanks() {
        assert_eq!(clean_markdown("\n\nLine 1\n\n\n\nLine 2\nLine 3\n\n"), "Line 1\n\nLine 2\nLine 3");
    }

    #[test]
    fn test_extract_text_fallback() {
        assert_eq!(extract_text_fallback("<div> Main\n  content <b>here</b></div>"), "Main content here");
    }
}
