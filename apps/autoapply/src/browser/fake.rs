//! In-memory browser for tests: static HTML pages wired together by click
//! transitions, with every interaction written to a shared journal.

use async_trait::async_trait;
use scraper::{Html, Selector};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::browser::{BrowserDriver, BrowserError, BrowserFactory};

#[derive(Default)]
pub struct FakeSite {
    pages: HashMap<String, String>,
    routes: HashMap<String, String>,
    transitions: HashMap<(String, String), String>,
    broken: HashSet<String>,
    timeouts: Mutex<HashMap<String, u32>>,
}

impl FakeSite {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(mut self, key: &str, html: &str) -> Self {
        self.pages.insert(key.to_string(), html.to_string());
        self
    }

    pub fn route(mut self, url: &str, page: &str) -> Self {
        self.routes.insert(url.to_string(), page.to_string());
        self
    }

    pub fn on_click(mut self, page: &str, selector: &str, to: &str) -> Self {
        self.transitions
            .insert((page.to_string(), selector.to_string()), to.to_string());
        self
    }

    /// Writes to `selector` fail as if the control were detached.
    pub fn broken(mut self, selector: &str) -> Self {
        self.broken.insert(selector.to_string());
        self
    }

    /// The first `times` navigations to `url` time out.
    pub fn timeout_first(self, url: &str, times: u32) -> Self {
        if let Ok(mut map) = self.timeouts.lock() {
            map.insert(url.to_string(), times);
        }
        self
    }

    fn url_of(&self, page: &str) -> String {
        self.routes
            .iter()
            .find(|(_, p)| p.as_str() == page)
            .map(|(url, _)| url.clone())
            .unwrap_or_else(|| format!("https://fake.test/{page}"))
    }
}

pub struct FakeBrowserFactory {
    site: Arc<FakeSite>,
    journal: Arc<Mutex<Vec<String>>>,
    opened: AtomicUsize,
    closed: Arc<AtomicUsize>,
}

impl FakeBrowserFactory {
    pub fn new(site: FakeSite) -> Self {
        Self {
            site: Arc::new(site),
            journal: Arc::new(Mutex::new(Vec::new())),
            opened: AtomicUsize::new(0),
            closed: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn journal(&self) -> Vec<String> {
        self.journal.lock().map(|j| j.clone()).unwrap_or_default()
    }

    pub fn sessions_opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn sessions_closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BrowserFactory for FakeBrowserFactory {
    async fn open(&self) -> Result<Box<dyn BrowserDriver>, BrowserError> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeBrowser {
            site: self.site.clone(),
            journal: self.journal.clone(),
            closed: self.closed.clone(),
            state: Mutex::new(FakeState::default()),
        }))
    }
}

#[derive(Default)]
struct FakeState {
    page: Option<String>,
    values: HashMap<String, String>,
    checked: HashMap<String, bool>,
    selected: HashMap<String, Vec<String>>,
}

pub struct FakeBrowser {
    site: Arc<FakeSite>,
    journal: Arc<Mutex<Vec<String>>>,
    closed: Arc<AtomicUsize>,
    state: Mutex<FakeState>,
}

/// Facts about the first element matching a selector on the current page.
struct Probe {
    tag: String,
    input_type: String,
    value: Option<String>,
    checked: bool,
    options: Vec<(String, bool)>,
}

impl FakeBrowser {
    fn log(&self, entry: String) {
        if let Ok(mut journal) = self.journal.lock() {
            journal.push(entry);
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, FakeState>, BrowserError> {
        self.state
            .lock()
            .map_err(|_| BrowserError::Session("fake browser state poisoned".to_string()))
    }

    fn current_html(&self) -> Result<(String, String), BrowserError> {
        let state = self.lock()?;
        let page = state
            .page
            .clone()
            .ok_or_else(|| BrowserError::Session("no page loaded".to_string()))?;
        let html = self
            .site
            .pages
            .get(&page)
            .cloned()
            .ok_or_else(|| BrowserError::Session(format!("unknown page '{page}'")))?;
        Ok((page, html))
    }

    fn probe(&self, selector: &str) -> Result<Option<Probe>, BrowserError> {
        let (_, html) = self.current_html()?;
        let doc = Html::parse_document(&html);
        let parsed =
            Selector::parse(selector).map_err(|_| BrowserError::NotFound(selector.to_string()))?;
        let Some(el) = doc.select(&parsed).next() else {
            return Ok(None);
        };
        let option_sel = Selector::parse("option").map_err(|_| BrowserError::NotFound("option".into()))?;
        let options = el
            .select(&option_sel)
            .map(|o| {
                let text = o.text().collect::<String>().trim().to_string();
                (text, o.value().attr("selected").is_some())
            })
            .collect();
        Ok(Some(Probe {
            tag: el.value().name().to_string(),
            input_type: el.value().attr("type").unwrap_or("text").to_ascii_lowercase(),
            value: el.value().attr("value").map(str::to_string),
            checked: el.value().attr("checked").is_some(),
            options,
        }))
    }

    fn require(&self, selector: &str) -> Result<Probe, BrowserError> {
        self.probe(selector)?
            .ok_or_else(|| BrowserError::NotFound(selector.to_string()))
    }

    fn require_writable(&self, selector: &str) -> Result<Probe, BrowserError> {
        let probe = self.require(selector)?;
        if self.site.broken.contains(selector) {
            return Err(BrowserError::NotInteractable {
                selector: selector.to_string(),
                detail: "element is detached from the document".to_string(),
            });
        }
        Ok(probe)
    }
}

#[async_trait]
impl BrowserDriver for FakeBrowser {
    async fn goto(&self, url: &str, timeout: Duration) -> Result<(), BrowserError> {
        self.log(format!("goto {url}"));
        if let Ok(mut timeouts) = self.site.timeouts.lock() {
            if let Some(remaining) = timeouts.get_mut(url) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(BrowserError::Timeout(timeout));
                }
            }
        }
        let page = self
            .site
            .routes
            .get(url)
            .cloned()
            .ok_or_else(|| BrowserError::Session(format!("unreachable url {url}")))?;
        let mut state = self.lock()?;
        *state = FakeState {
            page: Some(page),
            ..FakeState::default()
        };
        Ok(())
    }

    async fn page_source(&self) -> Result<String, BrowserError> {
        self.current_html().map(|(_, html)| html)
    }

    async fn current_url(&self) -> Result<String, BrowserError> {
        let (page, _) = self.current_html()?;
        Ok(self.site.url_of(&page))
    }

    async fn click(&self, selector: &str) -> Result<(), BrowserError> {
        let probe = self.require(selector)?;
        self.log(format!("click {selector}"));
        let (page, _) = self.current_html()?;
        let mut state = self.lock()?;
        if probe.tag == "input" && probe.input_type == "radio" {
            state.checked.insert(selector.to_string(), true);
        } else if probe.tag == "input" && probe.input_type == "checkbox" {
            let now = state.checked.get(selector).copied().unwrap_or(probe.checked);
            state.checked.insert(selector.to_string(), !now);
        }
        if let Some(next) = self
            .site
            .transitions
            .get(&(page, selector.to_string()))
        {
            state.page = Some(next.clone());
        }
        Ok(())
    }

    async fn fill(&self, selector: &str, value: &str) -> Result<(), BrowserError> {
        self.require_writable(selector)?;
        self.log(format!("fill {selector}={value}"));
        self.lock()?
            .values
            .insert(selector.to_string(), value.to_string());
        Ok(())
    }

    async fn fill_combobox(&self, selector: &str, value: &str) -> Result<(), BrowserError> {
        self.fill(selector, value).await
    }

    async fn read_value(&self, selector: &str) -> Result<Option<String>, BrowserError> {
        let Some(probe) = self.probe(selector)? else {
            return Ok(None);
        };
        let stored = self.lock()?.values.get(selector).cloned();
        Ok(Some(stored.or(probe.value).unwrap_or_default()))
    }

    async fn set_checked(&self, selector: &str, checked: bool) -> Result<(), BrowserError> {
        self.require_writable(selector)?;
        self.log(format!("check {selector}={checked}"));
        self.lock()?.checked.insert(selector.to_string(), checked);
        Ok(())
    }

    async fn is_checked(&self, selector: &str) -> Result<Option<bool>, BrowserError> {
        let Some(probe) = self.probe(selector)? else {
            return Ok(None);
        };
        let stored = self.lock()?.checked.get(selector).copied();
        Ok(Some(stored.unwrap_or(probe.checked)))
    }

    async fn select_options(&self, selector: &str, labels: &[String]) -> Result<(), BrowserError> {
        let probe = self.require_writable(selector)?;
        let known: Vec<&String> = labels
            .iter()
            .filter(|l| probe.options.iter().any(|(o, _)| o.eq_ignore_ascii_case(l.trim())))
            .collect();
        if known.is_empty() {
            return Err(BrowserError::NotInteractable {
                selector: selector.to_string(),
                detail: format!("no option labelled {labels:?}"),
            });
        }
        self.log(format!("select {selector}={}", labels.join("|")));
        self.lock()?
            .selected
            .insert(selector.to_string(), known.into_iter().cloned().collect());
        Ok(())
    }

    async fn selected_options(&self, selector: &str) -> Result<Option<Vec<String>>, BrowserError> {
        let Some(probe) = self.probe(selector)? else {
            return Ok(None);
        };
        let stored = self.lock()?.selected.get(selector).cloned();
        Ok(Some(stored.unwrap_or_else(|| {
            probe
                .options
                .into_iter()
                .filter(|(_, selected)| *selected)
                .map(|(label, _)| label)
                .collect()
        })))
    }

    async fn upload_file(&self, selector: &str, path: &Path) -> Result<(), BrowserError> {
        self.require_writable(selector)?;
        self.log(format!("upload {selector}={}", path.display()));
        self.lock()?
            .values
            .insert(selector.to_string(), path.display().to_string());
        Ok(())
    }

    async fn screenshot(&self) -> Result<Option<Vec<u8>>, BrowserError> {
        Ok(None)
    }

    async fn settle(&self, _duration: Duration) {}

    async fn close(&self) -> Result<(), BrowserError> {
        self.log("close".to_string());
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
