use serde::{Deserialize, Serialize};

/// A rendered web page as handed to callers and conversion services.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    /// Document title.
    pub title: String,
    /// Visible HTML, or converted content once a conversion service has run.
    pub content: String,
    /// URL that was requested.
    pub url: String,
}
