//! Browser automation seam.
//!
//! Navigation and submission only talk to `BrowserDriver`. Production runs
//! use a WebDriver session; tests use a scripted in-memory page set.

pub mod webdriver;

#[cfg(test)]
pub mod fake;

use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("no element matches '{0}'")]
    NotFound(String),

    #[error("element '{selector}' rejected the interaction: {detail}")]
    NotInteractable { selector: String, detail: String },

    #[error("browser session error: {0}")]
    Session(String),
}

/// One live page. Selectors are CSS.
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    async fn goto(&self, url: &str, timeout: Duration) -> Result<(), BrowserError>;

    async fn page_source(&self) -> Result<String, BrowserError>;

    async fn current_url(&self) -> Result<String, BrowserError>;

    async fn click(&self, selector: &str) -> Result<(), BrowserError>;

    /// Clears a text control and types `value` into it.
    async fn fill(&self, selector: &str, value: &str) -> Result<(), BrowserError>;

    /// Types into an autocomplete input and picks the first suggestion that
    /// contains `value`.
    async fn fill_combobox(&self, selector: &str, value: &str) -> Result<(), BrowserError>;

    /// Current value of a text control, `None` if the control is gone.
    async fn read_value(&self, selector: &str) -> Result<Option<String>, BrowserError>;

    async fn set_checked(&self, selector: &str, checked: bool) -> Result<(), BrowserError>;

    async fn is_checked(&self, selector: &str) -> Result<Option<bool>, BrowserError>;

    /// Selects exactly the `<option>`s whose labels are given.
    async fn select_options(&self, selector: &str, labels: &[String]) -> Result<(), BrowserError>;

    async fn selected_options(&self, selector: &str) -> Result<Option<Vec<String>>, BrowserError>;

    async fn upload_file(&self, selector: &str, path: &Path) -> Result<(), BrowserError>;

    /// PNG bytes, `None` when the driver cannot capture.
    async fn screenshot(&self) -> Result<Option<Vec<u8>>, BrowserError>;

    /// Lets scripts on the page settle after an interaction.
    async fn settle(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    async fn close(&self) -> Result<(), BrowserError>;
}

/// Opens fresh, isolated browser sessions.
#[async_trait]
pub trait BrowserFactory: Send + Sync {
    async fn open(&self) -> Result<Box<dyn BrowserDriver>, BrowserError>;
}
