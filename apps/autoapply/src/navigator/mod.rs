pub mod dom;
pub mod snapshots;

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::browser::{BrowserDriver, BrowserError, BrowserFactory};
use crate::errors::ApplyError;
use crate::models::{ApplyEntry, DiscoveredForm, FieldType, FormField, FormStep};
use snapshots::{Phase, SnapshotKey, SnapshotStore};

#[derive(Debug, Clone)]
pub struct NavigatorConfig {
    /// Upper bound on "next"/"continue" steps followed in one form.
    pub max_steps: usize,
    pub settle: Duration,
}

impl Default for NavigatorConfig {
    fn default() -> Self {
        Self {
            max_steps: 10,
            settle: Duration::from_millis(1500),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DiscoveryRequest {
    pub job_url: String,
    pub job_id: String,
    /// Keys this run's snapshots.
    pub run_id: String,
    pub timeout: Duration,
}

/// Finds the application flow behind a job URL and describes its fields.
#[async_trait]
pub trait FormDiscoverer: Send + Sync {
    async fn discover(&self, request: &DiscoveryRequest) -> Result<DiscoveredForm, ApplyError>;
}

/// Browser-driven discovery: goto, dismiss overlays, find an apply control
/// or inline form, then walk step controls until no new fields appear.
pub struct ApplicationNavigator {
    browsers: Arc<dyn BrowserFactory>,
    snapshots: SnapshotStore,
    config: NavigatorConfig,
}

pub(crate) fn navigation_error(url: &str, err: BrowserError) -> ApplyError {
    match err {
        BrowserError::Timeout(d) => ApplyError::NavigationTimeout {
            url: url.to_string(),
            timeout_secs: d.as_secs(),
        },
        other => ApplyError::Infrastructure(format!("navigation to {url} failed: {other}")),
    }
}

fn browser_failure(err: BrowserError) -> ApplyError {
    ApplyError::Infrastructure(format!("browser: {err}"))
}

fn fillable(fields: &[FormField]) -> bool {
    fields
        .iter()
        .any(|f| !matches!(f.field_type, FieldType::Hidden | FieldType::CaptchaToken))
}

/// Dismisses cookie banners that would intercept clicks. Missing banners are
/// the normal case.
pub(crate) async fn dismiss_overlays(browser: &dyn BrowserDriver, settle: Duration) {
    let Ok(html) = browser.page_source().await else {
        return;
    };
    for selector in dom::COOKIE_ACCEPT_SELECTORS {
        if !dom::exists(&html, selector) {
            continue;
        }
        match browser.click(selector).await {
            Ok(()) => {
                debug!("Dismissed overlay via {selector}");
                browser.settle(settle).await;
                return;
            }
            Err(e) => debug!("Overlay control {selector} not clickable: {e}"),
        }
    }
}

/// Opens the application flow from the posting page.
pub(crate) async fn enter_flow(
    browser: &dyn BrowserDriver,
    entry: &ApplyEntry,
    timeout: Duration,
) -> Result<(), BrowserError> {
    match (&entry.selector, &entry.href) {
        (_, Some(href)) if entry.follow_href => browser.goto(href, timeout).await,
        (Some(selector), _) => browser.click(selector).await,
        (None, Some(href)) => browser.goto(href, timeout).await,
        (None, None) => Err(BrowserError::NotFound(entry.label.clone())),
    }
}

impl ApplicationNavigator {
    pub fn new(
        browsers: Arc<dyn BrowserFactory>,
        snapshots: SnapshotStore,
        config: NavigatorConfig,
    ) -> Self {
        Self {
            browsers,
            snapshots,
            config,
        }
    }

    async fn discover_with(
        &self,
        browser: &dyn BrowserDriver,
        request: &DiscoveryRequest,
    ) -> Result<DiscoveredForm, ApplyError> {
        let key = SnapshotKey {
            job_id: &request.job_id,
            run_id: &request.run_id,
            phase: Phase::Discover,
        };

        self.load_posting(browser, request).await?;
        let landing = browser.page_source().await.map_err(browser_failure)?;
        self.snapshots
            .capture(browser, key, 0, "landing", &landing)
            .await;

        let landing_fields = dom::extract_fields(&landing, 0);
        let entries = dom::detect_apply_entries(&landing);
        let mut surfaces: Vec<String> = dom::embedded_surface(&landing).into_iter().collect();
        debug!(
            "Landing page for {}: {} fields, {} apply candidates",
            request.job_id,
            landing_fields.len(),
            entries.len()
        );

        let mut chosen: Option<(Option<ApplyEntry>, String)> = None;
        if fillable(&landing_fields) && entries.is_empty() {
            chosen = Some((None, landing));
        } else {
            for entry in &entries {
                if let Err(e) = enter_flow(browser, entry, request.timeout).await {
                    debug!("Apply candidate '{}' failed: {e}", entry.label);
                    continue;
                }
                browser.settle(self.config.settle).await;
                let html = browser.page_source().await.map_err(browser_failure)?;
                if fillable(&dom::extract_fields(&html, 0)) {
                    info!(
                        "Apply flow for {} opened via '{}' (confidence {:.1})",
                        request.job_id, entry.label, entry.confidence
                    );
                    chosen = Some((Some(entry.clone()), html));
                    break;
                }
                surfaces.extend(dom::embedded_surface(&html));
                self.load_posting(browser, request).await?;
            }
            if chosen.is_none() && fillable(&landing_fields) {
                chosen = Some((None, browser.page_source().await.map_err(browser_failure)?));
            }
        }

        let Some((entry, first_html)) = chosen else {
            if let Some(detail) = surfaces.into_iter().next() {
                return Err(ApplyError::UnsupportedFormTechnology { detail });
            }
            return Err(ApplyError::NoApplyFlowFound {
                url: request.job_url.clone(),
            });
        };

        let steps = self.walk_steps(browser, key, first_html).await?;
        Ok(DiscoveredForm {
            job_url: request.job_url.clone(),
            job_id: request.job_id.clone(),
            entry,
            steps,
        })
    }

    async fn load_posting(
        &self,
        browser: &dyn BrowserDriver,
        request: &DiscoveryRequest,
    ) -> Result<(), ApplyError> {
        browser
            .goto(&request.job_url, request.timeout)
            .await
            .map_err(|e| navigation_error(&request.job_url, e))?;
        browser.settle(self.config.settle).await;
        dismiss_overlays(browser, self.config.settle).await;
        Ok(())
    }

    /// Fields of the current step. Selects without options get one re-read
    /// after settling. A required one that is still empty fails discovery;
    /// an optional one is left out of the form.
    async fn step_fields(
        &self,
        browser: &dyn BrowserDriver,
        html: &mut String,
        index: usize,
    ) -> Result<Vec<FormField>, ApplyError> {
        let mut fields = dom::extract_fields(html, index);
        if fields.iter().any(|f| !f.has_valid_options()) {
            browser.settle(self.config.settle).await;
            *html = browser.page_source().await.map_err(browser_failure)?;
            fields = dom::extract_fields(html, index);
        }
        if let Some(blocked) = fields.iter().find(|f| f.required && !f.has_valid_options()) {
            return Err(ApplyError::UnsupportedFormTechnology {
                detail: format!(
                    "required field '{}' ({}) offers no selectable options",
                    blocked.label, blocked.field_id
                ),
            });
        }
        fields.retain(|f| {
            let usable = f.has_valid_options();
            if !usable {
                warn!("Leaving out optional field {} with no selectable options", f.field_id);
            }
            usable
        });
        Ok(fields)
    }

    /// Records the current step, then follows its advance control while the
    /// next page shows fields not seen before.
    async fn walk_steps(
        &self,
        browser: &dyn BrowserDriver,
        key: SnapshotKey<'_>,
        first_html: String,
    ) -> Result<Vec<FormStep>, ApplyError> {
        let mut steps: Vec<FormStep> = Vec::new();
        let mut taken: HashMap<String, usize> = HashMap::new();
        let mut html = first_html;

        loop {
            let index = steps.len();
            let raw_fields = self.step_fields(browser, &mut html, index).await?;
            let raw_ids: HashSet<String> = raw_fields.iter().map(|f| f.field_id.clone()).collect();
            let fields = assign_unique_ids(raw_fields, &mut taken);
            let snapshot = self
                .snapshots
                .capture(browser, key, index, "form", &html)
                .await;
            steps.push(FormStep {
                index,
                fields,
                advance_selector: None,
                snapshot,
            });

            if steps.len() >= self.config.max_steps {
                warn!("Stopping at {} steps for {}", steps.len(), key.job_id);
                break;
            }
            let Some(advance) = dom::find_advance_control(&html) else {
                break;
            };
            if let Err(e) = browser.click(&advance).await {
                debug!("Advance control {advance} not clickable: {e}");
                break;
            }
            browser.settle(self.config.settle).await;
            let next = browser.page_source().await.map_err(browser_failure)?;
            let next_fields = dom::extract_fields(&next, index + 1);
            let is_new_step = fillable(&next_fields)
                && next_fields.iter().any(|f| !raw_ids.contains(&f.field_id));
            if !is_new_step {
                break;
            }
            if let Some(step) = steps.last_mut() {
                step.advance_selector = Some(advance);
            }
            html = next;
        }

        info!(
            "Discovered {} step(s), {} field(s) for {}",
            steps.len(),
            steps.iter().map(|s| s.fields.len()).sum::<usize>(),
            key.job_id
        );
        Ok(steps)
    }
}

/// Field ids are unique within one form; later duplicates get `-2`, `-3`...
fn assign_unique_ids(fields: Vec<FormField>, taken: &mut HashMap<String, usize>) -> Vec<FormField> {
    let mut fields = fields;
    for field in &mut fields {
        let count = taken.entry(field.field_id.clone()).or_insert(0);
        *count += 1;
        if *count > 1 {
            field.field_id = format!("{}-{}", field.field_id, count);
        }
    }
    fields
}

#[async_trait]
impl FormDiscoverer for ApplicationNavigator {
    async fn discover(&self, request: &DiscoveryRequest) -> Result<DiscoveredForm, ApplyError> {
        let browser = self.browsers.open().await.map_err(browser_failure)?;
        let result = self.discover_with(browser.as_ref(), request).await;
        // The discovery session is always released; submission opens its own.
        if let Err(e) = browser.close().await {
            warn!("Could not close discovery browser: {e}");
        }
        result
    }
}
