//! Browser stand-in shared by the front end tests.

use async_trait::async_trait;
use pagescout_browser::{BrowserService, GetPage, GetScreenshot, ScreenshotResponse};
use pagescout_core::{Error, Page, Result};
use std::sync::Mutex;

#[derive(Default)]
pub struct StubBrowser {
    /// `(url, wait_time)` of every call, in order.
    pub requests: Mutex<Vec<(String, u64)>>,
    pub fail: bool,
}

#[async_trait]
impl BrowserService for StubBrowser {
    async fn get_page(&self, req: GetPage) -> Result<Page> {
        self.requests.lock().unwrap().push((req.url.clone(), req.wait_time));
        if self.fail {
            return Err(Error::Browser("navigation failed".to_string()));
        }
        Ok(Page {
            title: "Example".to_string(),
            content: r#"<h1>News</h1><p><a href="/a">A</a></p>"#.to_string(),
            url: req.url,
        })
    }

    async fn screenshot(&self, req: GetScreenshot) -> Result<ScreenshotResponse> {
        self.requests.lock().unwrap().push((req.url, req.wait_time));
        Ok(ScreenshotResponse { image: vec![0xff, 0xd8, 0xff] })
    }
}
