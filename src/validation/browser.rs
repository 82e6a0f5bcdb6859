//! Headless browser loading of HTML artifacts.
//!
//! The [`BrowserDriver`] trait is the seam between validation and the actual
//! browser. [`PlaywrightDriver`] runs an embedded Python probe under the
//! sandbox executor; each load gets a fresh browser context, so storage never
//! leaks between RunTargets. [`BrowserPool`] bounds how many browsers run at
//! once.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

use crate::error::BrowserError;
use crate::sandbox::{CommandSpec, SandboxExecutor};
use crate::utils::tail_excerpt;

const PAGE_PROBE: &str = include_str!("page_probe.py");
const PAGE_MARKER: &str = "@@VIBE_PAGE@@";
const UNAVAILABLE_EXIT: i32 = 3;

/// Extra wall-clock allowed for browser startup on top of load and settle.
const LAUNCH_SLACK: Duration = Duration::from_secs(20);

/// What happened while a page loaded and settled.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PageReport {
    pub loaded: bool,
    #[serde(default)]
    pub page_errors: Vec<String>,
    #[serde(default)]
    pub console_errors: Vec<String>,
    #[serde(default)]
    pub failed_requests: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load_error: Option<String>,
}

impl PageReport {
    /// Uncaught script errors. Console noise about missing resources is a
    /// failed load, not a script error.
    pub fn script_errors(&self) -> Vec<String> {
        self.page_errors
            .iter()
            .chain(
                self.console_errors
                    .iter()
                    .filter(|msg| !is_resource_failure(msg)),
            )
            .cloned()
            .collect()
    }

    /// Failed resource loads, from either channel.
    pub fn resource_failures(&self) -> Vec<String> {
        self.failed_requests
            .iter()
            .chain(
                self.console_errors
                    .iter()
                    .filter(|msg| is_resource_failure(msg)),
            )
            .cloned()
            .collect()
    }
}

fn is_resource_failure(message: &str) -> bool {
    message.starts_with("Failed to load resource")
}

/// Loads a local HTML file in a headless browser.
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    /// Load `page`, wait for the load event (bounded by `load_timeout`), then
    /// keep collecting errors for `settle`.
    async fn load(
        &self,
        page: &Path,
        settle: Duration,
        load_timeout: Duration,
    ) -> Result<PageReport, BrowserError>;
}

/// Bounds concurrent browser processes.
#[derive(Debug, Clone)]
pub struct BrowserPool {
    slots: Arc<Semaphore>,
}

impl BrowserPool {
    pub fn new(slots: usize) -> Self {
        Self {
            slots: Arc::new(Semaphore::new(slots.max(1))),
        }
    }

    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit, BrowserError> {
        self.slots
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| BrowserError::Unavailable("browser pool closed".to_string()))
    }

    pub fn available(&self) -> usize {
        self.slots.available_permits()
    }
}

/// Playwright (Python) backed driver.
#[derive(Debug, Clone)]
pub struct PlaywrightDriver {
    executor: SandboxExecutor,
    python_bin: String,
    pool: BrowserPool,
}

impl PlaywrightDriver {
    pub fn new(executor: SandboxExecutor, python_bin: impl Into<String>, pool: BrowserPool) -> Self {
        Self {
            executor,
            python_bin: python_bin.into(),
            pool,
        }
    }
}

#[async_trait]
impl BrowserDriver for PlaywrightDriver {
    async fn load(
        &self,
        page: &Path,
        settle: Duration,
        load_timeout: Duration,
    ) -> Result<PageReport, BrowserError> {
        let _permit = self.pool.acquire().await?;

        let scratch = tempfile::tempdir()?;
        let script = scratch.path().join("page_probe.py");
        tokio::fs::write(&script, PAGE_PROBE).await?;

        let spec = CommandSpec::new(&self.python_bin, scratch.path())
            .arg(script.to_string_lossy())
            .arg(page.to_string_lossy())
            .arg(settle.as_millis().to_string())
            .arg(load_timeout.as_millis().to_string())
            .env("PYTHONDONTWRITEBYTECODE", "1")
            .timeout(load_timeout + settle + LAUNCH_SLACK);

        let outcome = self.executor.run(&spec).await?;
        debug!(page = %page.display(), exit = ?outcome.exit_code, "Page probe finished");

        if outcome.timed_out {
            return Ok(PageReport {
                loaded: false,
                load_error: Some("page probe timed out".to_string()),
                ..PageReport::default()
            });
        }
        if outcome.exit_code == Some(UNAVAILABLE_EXIT) {
            return Err(BrowserError::Unavailable(tail_excerpt(&outcome.stderr, 300)));
        }

        parse_page_report(&outcome.stdout).ok_or_else(|| {
            BrowserError::Protocol(format!(
                "no page report (exit {:?}): {}",
                outcome.exit_code,
                tail_excerpt(&outcome.stderr, 500)
            ))
        })
    }
}

/// Parse the last marker line printed by the page probe.
pub fn parse_page_report(stdout: &str) -> Option<PageReport> {
    stdout
        .lines()
        .rev()
        .find_map(|line| line.trim().strip_prefix(PAGE_MARKER))
        .and_then(|json| serde_json::from_str(json).ok())
}

/// Cheap fallback when no browser exists: both `<html` and `<body` present.
pub fn structural_check(source: &str) -> Result<(), Vec<&'static str>> {
    let lower = source.to_lowercase();
    let mut missing = Vec::new();
    if !lower.contains("<html") {
        missing.push("missing <html> tag");
    }
    if !lower.contains("<body") {
        missing.push("missing <body> tag");
    }
    if missing.is_empty() {
        Ok(())
    } else {
        Err(missing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_page_report() {
        let stdout = "noise\n@@VIBE_PAGE@@{\"loaded\": true, \"page_errors\": [\"SyntaxError: Unexpected token\"], \"console_errors\": [], \"failed_requests\": []}\n";
        let report = parse_page_report(stdout).unwrap();
        assert!(report.loaded);
        assert_eq!(report.page_errors.len(), 1);
    }

    #[test]
    fn test_parse_page_report_missing() {
        assert!(parse_page_report("Traceback ...").is_none());
    }

    #[test]
    fn test_resource_failures_are_split_out() {
        let report = PageReport {
            loaded: true,
            console_errors: vec![
                "Failed to load resource: net::ERR_FILE_NOT_FOUND".to_string(),
                "Uncaught TypeError: x is undefined".to_string(),
            ],
            failed_requests: vec!["file:///style.css: net::ERR_FILE_NOT_FOUND".to_string()],
            ..PageReport::default()
        };
        assert_eq!(report.script_errors(), vec!["Uncaught TypeError: x is undefined"]);
        assert_eq!(report.resource_failures().len(), 2);
    }

    #[test]
    fn test_structural_check() {
        assert!(structural_check("<!DOCTYPE html><HTML><Body></body></html>").is_ok());
        let missing = structural_check("<div>fragment</div>").unwrap_err();
        assert_eq!(missing.len(), 2);
    }

    #[tokio::test]
    async fn test_pool_bounds_permits() {
        let pool = BrowserPool::new(2);
        let a = pool.acquire().await.unwrap();
        let _b = pool.acquire().await.unwrap();
        assert_eq!(pool.available(), 0);
        drop(a);
        assert_eq!(pool.available(), 1);
    }
}
