use async_trait::async_trait;
use fantoccini::elements::Element;
use fantoccini::{Client, ClientBuilder, Locator};
use serde_json::json;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

use crate::browser::{BrowserDriver, BrowserError, BrowserFactory};

/// WebDriver "Enter" key code point.
const ENTER_KEY: &str = "\u{E007}";
const SUGGESTION_DELAY: Duration = Duration::from_millis(400);

/// Opens one WebDriver session per call against a chromedriver/geckodriver
/// endpoint.
pub struct WebDriverFactory {
    url: String,
    headless: bool,
}

impl WebDriverFactory {
    pub fn new(url: impl Into<String>, headless: bool) -> Self {
        Self {
            url: url.into(),
            headless,
        }
    }

    fn capabilities(&self) -> serde_json::Map<String, serde_json::Value> {
        let mut caps = serde_json::Map::new();
        let mut chrome_args = vec!["--disable-gpu", "--no-sandbox", "--window-size=1366,900"];
        let mut firefox_args = vec![];
        if self.headless {
            chrome_args.push("--headless=new");
            firefox_args.push("-headless");
        }
        caps.insert("goog:chromeOptions".to_string(), json!({ "args": chrome_args }));
        caps.insert("moz:firefoxOptions".to_string(), json!({ "args": firefox_args }));
        caps
    }
}

#[async_trait]
impl BrowserFactory for WebDriverFactory {
    async fn open(&self) -> Result<Box<dyn BrowserDriver>, BrowserError> {
        let mut builder = ClientBuilder::native();
        builder.capabilities(self.capabilities());
        let client = builder
            .connect(&self.url)
            .await
            .map_err(|e| BrowserError::Session(e.to_string()))?;
        info!("WebDriver session opened at {} (headless={})", self.url, self.headless);
        Ok(Box::new(WebDriverBrowser { client }))
    }
}

pub struct WebDriverBrowser {
    client: Client,
}

impl WebDriverBrowser {
    async fn element(&self, selector: &str) -> Result<Element, BrowserError> {
        self.client
            .find(Locator::Css(selector))
            .await
            .map_err(|_| BrowserError::NotFound(selector.to_string()))
    }

    async fn element_opt(&self, selector: &str) -> Result<Option<Element>, BrowserError> {
        let mut found = self
            .client
            .find_all(Locator::Css(selector))
            .await
            .map_err(|e| BrowserError::Session(e.to_string()))?;
        Ok(if found.is_empty() {
            None
        } else {
            Some(found.swap_remove(0))
        })
    }
}

fn rejected(selector: &str, err: impl std::fmt::Display) -> BrowserError {
    BrowserError::NotInteractable {
        selector: selector.to_string(),
        detail: err.to_string(),
    }
}

#[async_trait]
impl BrowserDriver for WebDriverBrowser {
    async fn goto(&self, url: &str, timeout: Duration) -> Result<(), BrowserError> {
        match tokio::time::timeout(timeout, self.client.goto(url)).await {
            Err(_) => Err(BrowserError::Timeout(timeout)),
            Ok(result) => result.map_err(|e| BrowserError::Session(e.to_string())),
        }
    }

    async fn page_source(&self) -> Result<String, BrowserError> {
        self.client
            .source()
            .await
            .map_err(|e| BrowserError::Session(e.to_string()))
    }

    async fn current_url(&self) -> Result<String, BrowserError> {
        self.client
            .current_url()
            .await
            .map(|u| u.to_string())
            .map_err(|e| BrowserError::Session(e.to_string()))
    }

    async fn click(&self, selector: &str) -> Result<(), BrowserError> {
        let element = self.element(selector).await?;
        element.click().await.map_err(|e| rejected(selector, e))
    }

    async fn fill(&self, selector: &str, value: &str) -> Result<(), BrowserError> {
        let element = self.element(selector).await?;
        element.clear().await.map_err(|e| rejected(selector, e))?;
        element
            .send_keys(value)
            .await
            .map_err(|e| rejected(selector, e))
    }

    async fn fill_combobox(&self, selector: &str, value: &str) -> Result<(), BrowserError> {
        let element = self.element(selector).await?;
        element.click().await.map_err(|e| rejected(selector, e))?;
        element.clear().await.map_err(|e| rejected(selector, e))?;
        element
            .send_keys(value)
            .await
            .map_err(|e| rejected(selector, e))?;
        tokio::time::sleep(SUGGESTION_DELAY).await;

        let wanted = value.trim().to_lowercase();
        let suggestions = self
            .client
            .find_all(Locator::Css("[role='option']"))
            .await
            .map_err(|e| BrowserError::Session(e.to_string()))?;
        for suggestion in suggestions {
            let text = suggestion.text().await.unwrap_or_default();
            if text.to_lowercase().contains(&wanted) {
                debug!("Combobox {selector}: picking suggestion '{}'", text.trim());
                return suggestion.click().await.map_err(|e| rejected(selector, e));
            }
        }
        // Free-text comboboxes accept the typed value on Enter.
        element
            .send_keys(ENTER_KEY)
            .await
            .map_err(|e| rejected(selector, e))
    }

    async fn read_value(&self, selector: &str) -> Result<Option<String>, BrowserError> {
        match self.element_opt(selector).await? {
            None => Ok(None),
            Some(element) => Ok(Some(
                element
                    .prop("value")
                    .await
                    .map_err(|e| BrowserError::Session(e.to_string()))?
                    .unwrap_or_default(),
            )),
        }
    }

    async fn set_checked(&self, selector: &str, checked: bool) -> Result<(), BrowserError> {
        let element = self.element(selector).await?;
        let current = element
            .is_selected()
            .await
            .map_err(|e| rejected(selector, e))?;
        if current != checked {
            element.click().await.map_err(|e| rejected(selector, e))?;
        }
        Ok(())
    }

    async fn is_checked(&self, selector: &str) -> Result<Option<bool>, BrowserError> {
        match self.element_opt(selector).await? {
            None => Ok(None),
            Some(element) => element
                .is_selected()
                .await
                .map(Some)
                .map_err(|e| BrowserError::Session(e.to_string())),
        }
    }

    async fn select_options(&self, selector: &str, labels: &[String]) -> Result<(), BrowserError> {
        let select = self.element(selector).await?;
        let multiple = select
            .attr("multiple")
            .await
            .map_err(|e| rejected(selector, e))?
            .is_some();
        let options = self
            .client
            .find_all(Locator::Css(&format!("{selector} option")))
            .await
            .map_err(|e| BrowserError::Session(e.to_string()))?;

        let mut matched = 0;
        for option in options {
            let text = option.text().await.unwrap_or_default();
            let wanted = labels
                .iter()
                .any(|l| l.trim().eq_ignore_ascii_case(text.trim()));
            let selected = option
                .is_selected()
                .await
                .map_err(|e| rejected(selector, e))?;
            if wanted {
                matched += 1;
            }
            if (wanted && !selected) || (multiple && !wanted && selected) {
                option.click().await.map_err(|e| rejected(selector, e))?;
            }
        }
        if matched == 0 {
            return Err(rejected(
                selector,
                format!("no option labelled {labels:?}"),
            ));
        }
        Ok(())
    }

    async fn selected_options(&self, selector: &str) -> Result<Option<Vec<String>>, BrowserError> {
        if self.element_opt(selector).await?.is_none() {
            return Ok(None);
        }
        let options = self
            .client
            .find_all(Locator::Css(&format!("{selector} option")))
            .await
            .map_err(|e| BrowserError::Session(e.to_string()))?;
        let mut selected = Vec::new();
        for option in options {
            if option.is_selected().await.unwrap_or(false) {
                selected.push(option.text().await.unwrap_or_default().trim().to_string());
            }
        }
        Ok(Some(selected))
    }

    async fn upload_file(&self, selector: &str, path: &Path) -> Result<(), BrowserError> {
        let element = self.element(selector).await?;
        let absolute = std::fs::canonicalize(path).map_err(|e| rejected(selector, e))?;
        element
            .send_keys(&absolute.to_string_lossy())
            .await
            .map_err(|e| rejected(selector, e))
    }

    async fn screenshot(&self) -> Result<Option<Vec<u8>>, BrowserError> {
        self.client
            .screenshot()
            .await
            .map(Some)
            .map_err(|e| BrowserError::Session(e.to_string()))
    }

    async fn close(&self) -> Result<(), BrowserError> {
        self.client
            .clone()
            .close()
            .await
            .map_err(|e| BrowserError::Session(e.to_string()))
    }
}
