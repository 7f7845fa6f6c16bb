//! Replays a discovered form in a fresh browser session, writes every
//! answer with read-back checks, and performs the final submit.
//!
//! Submission is never retried: a second attempt can file a duplicate
//! application.

pub mod outcome;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::browser::{BrowserDriver, BrowserError, BrowserFactory};
use crate::errors::ApplyError;
use crate::models::{AnswerSource, ApplicationSession, ControlKind, FormField, ResolvedAnswer};
use crate::navigator::snapshots::{Phase, SnapshotKey, SnapshotStore};
use crate::navigator::{dismiss_overlays, dom, enter_flow, navigation_error};
use outcome::{classify_post_submit, PostSubmit};

#[derive(Debug, Clone)]
pub struct SubmitterConfig {
    pub navigation_timeout: Duration,
    pub settle: Duration,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubmissionReport {
    pub step_count: usize,
    pub submitted_at: DateTime<Utc>,
    pub final_url: Option<String>,
    pub confirmation: String,
    pub log: Vec<String>,
}

/// A failed attempt and everything done before it failed.
#[derive(Debug, Clone)]
pub struct SubmitFailure {
    pub error: ApplyError,
    pub log: Vec<String>,
}

#[derive(Default)]
struct ActionLog {
    lines: Vec<String>,
}

impl ActionLog {
    fn push(&mut self, line: impl Into<String>) {
        let line = line.into();
        info!("submit: {line}");
        self.lines.push(line);
    }
}

pub struct ApplicationSubmitter {
    browsers: Arc<dyn BrowserFactory>,
    snapshots: SnapshotStore,
    config: SubmitterConfig,
}

impl ApplicationSubmitter {
    pub fn new(browsers: Arc<dyn BrowserFactory>, snapshots: SnapshotStore, config: SubmitterConfig) -> Self {
        Self {
            browsers,
            snapshots,
            config,
        }
    }

    /// Refuses to start unless every discovered field has an answer.
    pub async fn submit(
        &self,
        session: &ApplicationSession,
        run_id: &str,
    ) -> Result<SubmissionReport, SubmitFailure> {
        let missing = session.missing_answers();
        if !missing.is_empty() {
            return Err(SubmitFailure {
                error: ApplyError::AnswerResolutionExhausted { field_ids: missing },
                log: Vec::new(),
            });
        }

        let browser = self.browsers.open().await.map_err(|e| SubmitFailure {
            error: ApplyError::Infrastructure(format!("browser: {e}")),
            log: Vec::new(),
        })?;
        let mut log = ActionLog::default();
        let result = self.replay(browser.as_ref(), session, run_id, &mut log).await;
        if let Err(e) = browser.close().await {
            warn!("Could not close submission browser: {e}");
        }

        match result {
            Ok((final_url, confirmation)) => Ok(SubmissionReport {
                step_count: session.steps.len(),
                submitted_at: Utc::now(),
                final_url,
                confirmation,
                log: log.lines,
            }),
            Err(error) => {
                log.push(format!("aborted: {error}"));
                Err(SubmitFailure {
                    error,
                    log: log.lines,
                })
            }
        }
    }

    async fn replay(
        &self,
        browser: &dyn BrowserDriver,
        session: &ApplicationSession,
        run_id: &str,
        log: &mut ActionLog,
    ) -> Result<(Option<String>, String), ApplyError> {
        let key = SnapshotKey {
            job_id: &session.job_id,
            run_id,
            phase: Phase::Submit,
        };
        let timeout = self.config.navigation_timeout;

        browser
            .goto(&session.job_url, timeout)
            .await
            .map_err(|e| navigation_error(&session.job_url, e))?;
        browser.settle(self.config.settle).await;
        dismiss_overlays(browser, self.config.settle).await;
        log.push(format!("opened {}", session.job_url));

        if let Some(entry) = &session.entry {
            enter_flow(browser, entry, timeout).await.map_err(|e| {
                warn!("Apply entry '{}' no longer works: {e}", entry.label);
                ApplyError::NoApplyFlowFound {
                    url: session.job_url.clone(),
                }
            })?;
            browser.settle(self.config.settle).await;
            log.push(format!("entered apply flow via '{}'", entry.label));
        }

        let last = session.steps.len().saturating_sub(1);
        for step in &session.steps {
            let before = page(browser).await?;
            self.snapshots
                .capture(browser, key, step.index, "before", &before)
                .await;

            for field in &step.fields {
                let answer = session.answers.get(&field.field_id).ok_or_else(|| {
                    ApplyError::AnswerResolutionExhausted {
                        field_ids: vec![field.field_id.clone()],
                    }
                })?;
                write_field(browser, field, answer, log).await?;
            }

            let filled = page(browser).await?;
            self.snapshots
                .capture(browser, key, step.index, "filled", &filled)
                .await;

            if step.index == last {
                break;
            }
            let advance = step.advance_selector.as_deref().ok_or_else(|| {
                ApplyError::SubmitControlNotFound {
                    detail: format!("step {} has no recorded advance control", step.index + 1),
                }
            })?;
            browser
                .click(advance)
                .await
                .map_err(|e| ApplyError::SubmitControlNotFound {
                    detail: format!("advance control on step {}: {e}", step.index + 1),
                })?;
            browser.settle(self.config.settle).await;
            log.push(format!("advanced past step {} via {advance}", step.index + 1));
        }

        let html = page(browser).await?;
        let control = dom::find_submit_control(&html).ok_or_else(|| ApplyError::SubmitControlNotFound {
            detail: "no submit control on the final step".to_string(),
        })?;
        browser
            .click(&control.selector)
            .await
            .map_err(|e| ApplyError::SubmitControlNotFound {
                detail: format!("'{}' could not be clicked: {e}", control.label),
            })?;
        log.push(format!("clicked submit '{}' ({})", control.label, control.selector));
        browser.settle(self.config.settle).await;

        let after = page(browser).await?;
        self.snapshots
            .capture(browser, key, session.steps.len(), "after-submit", &after)
            .await;
        let final_url = browser.current_url().await.ok();

        match classify_post_submit(&after) {
            PostSubmit::Confirmed(marker) => {
                log.push(format!("confirmation seen: '{marker}'"));
                Ok((final_url, marker))
            }
            PostSubmit::Ambiguous(detail) => Err(ApplyError::PostSubmitAmbiguous { detail }),
        }
    }
}

async fn page(browser: &dyn BrowserDriver) -> Result<String, ApplyError> {
    browser
        .page_source()
        .await
        .map_err(|e| ApplyError::Infrastructure(format!("browser: {e}")))
}

fn write_failed(field: &FormField, detail: impl Into<String>) -> ApplyError {
    ApplyError::FieldWriteFailed {
        field_id: field.field_id.clone(),
        detail: detail.into(),
    }
}

fn browser_write_failed(field: &FormField) -> impl Fn(BrowserError) -> ApplyError + '_ {
    move |e| write_failed(field, e.to_string())
}

/// Writes one answer into its control and checks what the control reports
/// back, where it reports anything.
async fn write_field(
    browser: &dyn BrowserDriver,
    field: &FormField,
    answer: &ResolvedAnswer,
    log: &mut ActionLog,
) -> Result<(), ApplyError> {
    let css = field.selector.css.as_str();
    let id = &field.field_id;
    let value = &answer.value;

    if field.selector.control == ControlKind::Passive {
        log.push(format!("left {id} untouched ({})", answer.confidence_reason));
        return Ok(());
    }
    if value.is_empty() && field.selector.control != ControlKind::Checkbox {
        let why = if answer.source == AnswerSource::DefaultSkip {
            "skipped"
        } else {
            "left blank"
        };
        log.push(format!("{why} {id}: {}", answer.confidence_reason));
        return Ok(());
    }

    match field.selector.control {
        ControlKind::TextInput | ControlKind::TextArea => {
            let text = value.display();
            browser.fill(css, &text).await.map_err(browser_write_failed(field))?;
            let shown = browser.read_value(css).await.map_err(browser_write_failed(field))?;
            match shown {
                Some(shown) if shown.trim() == text.trim() => {}
                Some(shown) => {
                    return Err(write_failed(
                        field,
                        format!("control shows '{shown}' instead of the intended value"),
                    ))
                }
                None => return Err(write_failed(field, "control disappeared after typing")),
            }
            log.push(format!("filled {id}"));
        }
        ControlKind::Combobox => {
            let text = value.display();
            browser
                .fill_combobox(css, &text)
                .await
                .map_err(browser_write_failed(field))?;
            let shown = browser.read_value(css).await.map_err(browser_write_failed(field))?;
            if shown.map(|s| s.trim().is_empty()).unwrap_or(true) {
                return Err(write_failed(field, "no suggestion was accepted"));
            }
            log.push(format!("picked '{text}' for {id}"));
        }
        ControlKind::Select => {
            let labels = value.labels();
            browser
                .select_options(css, &labels)
                .await
                .map_err(browser_write_failed(field))?;
            let selected = browser
                .selected_options(css)
                .await
                .map_err(browser_write_failed(field))?
                .unwrap_or_default();
            let all_selected = labels
                .iter()
                .all(|l| selected.iter().any(|s| s.trim().eq_ignore_ascii_case(l.trim())));
            if !all_selected {
                return Err(write_failed(
                    field,
                    format!("selected {selected:?}, wanted {labels:?}"),
                ));
            }
            log.push(format!("selected {} for {id}", labels.join(", ")));
        }
        ControlKind::RadioGroup => {
            let label = value.labels().into_iter().next().unwrap_or_default();
            let option = field
                .selector
                .option_selector(&label)
                .ok_or_else(|| write_failed(field, format!("no radio option labelled '{label}'")))?;
            browser.click(option).await.map_err(browser_write_failed(field))?;
            if browser.is_checked(option).await.map_err(browser_write_failed(field))? == Some(false) {
                return Err(write_failed(field, format!("option '{label}' did not stay selected")));
            }
            log.push(format!("chose '{label}' for {id}"));
        }
        ControlKind::Checkbox => {
            let on = value.is_truthy();
            browser
                .set_checked(css, on)
                .await
                .map_err(browser_write_failed(field))?;
            match browser.is_checked(css).await.map_err(browser_write_failed(field))? {
                Some(state) if state != on => {
                    return Err(write_failed(field, "checkbox did not take the intended state"))
                }
                _ => {}
            }
            log.push(format!("{} {id}", if on { "checked" } else { "unchecked" }));
        }
        ControlKind::FileInput => {
            let text = value.display();
            let path = Path::new(&text);
            if !path.is_file() {
                return Err(write_failed(field, format!("file {} does not exist", path.display())));
            }
            browser
                .upload_file(css, path)
                .await
                .map_err(browser_write_failed(field))?;
            log.push(format!("attached {} to {id}", path.display()));
        }
        ControlKind::Passive => {}
    }
    Ok(())
}
