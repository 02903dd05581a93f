//! Chrome DevTools Protocol backend: connects to a running browser, implements
//! [`pagescout_autoconsent::PageDriver`] on a live page, and serves page retrieval.

pub mod cdp;
pub mod driver;
pub mod endpoint;
pub mod page;

pub use cdp::CdpClient;
pub use driver::CdpDriver;
pub use page::{BrowserService, ChromeService, GetPage, GetScreenshot, ScreenshotResponse};
