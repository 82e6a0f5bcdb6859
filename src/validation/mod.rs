//! Execution validation of generated artifacts.
//!
//! This module classifies an artifact into an [`ExecutionVerdict`]:
//! Python scripts run under the sandbox (servers in probe mode), HTML pages
//! load in a headless browser.

pub mod browser;
pub mod python;
pub mod validator;
pub mod verdict;

pub use browser::{BrowserDriver, BrowserPool, PageReport, PlaywrightDriver};
pub use python::PythonValidator;
pub use validator::{classify_page, ExecutionValidator, STRUCTURAL_ONLY_WARNING};
pub use verdict::{ExecutionVerdict, VerdictStatus};
