//! Evaluation configuration.
//!
//! [`EvalConfig`] groups the sandbox limits, the judge panel, the scoring gate
//! and the session scheduling options. It can be built in code with the
//! `with_*` builders, loaded from a YAML file, and overlaid with `VIBE_EVAL_*`
//! environment variables. Always call [`EvalConfig::validate`] before use.

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::llm::OPENROUTER_API_BASE;

pub use crate::error::ConfigError;

/// Execution-timeout profile requested by a case or the session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeoutProfile {
    Fast,
    #[default]
    Full,
}

impl fmt::Display for TimeoutProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeoutProfile::Fast => write!(f, "fast"),
            TimeoutProfile::Full => write!(f, "full"),
        }
    }
}

impl FromStr for TimeoutProfile {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "fast" => Ok(TimeoutProfile::Fast),
            "full" => Ok(TimeoutProfile::Full),
            other => Err(format!("unknown timeout profile '{}'", other)),
        }
    }
}

/// Limits applied to sandboxed processes and browser loads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxSettings {
    /// Python interpreter used for artifacts, harnesses and the page probe.
    pub python_bin: String,
    /// Run timeout under the full profile, in seconds.
    pub full_timeout_secs: u64,
    /// Run timeout under the fast profile, in seconds.
    pub fast_timeout_secs: u64,
    /// Timeout for the syntax check, in seconds.
    pub syntax_timeout_secs: u64,
    /// Hard timeout for one functional test, in seconds.
    pub test_timeout_secs: u64,
    /// Upper bound for a server liveness probe, in seconds.
    pub probe_bound_secs: u64,
    /// Grace period used when a server exposes no detectable port, in milliseconds.
    pub probe_grace_ms: u64,
    /// Interval between liveness polls, in milliseconds.
    pub probe_poll_ms: u64,
    /// Settle window after an HTML page reaches `load`, in milliseconds.
    pub settle_window_ms: u64,
    /// Navigation timeout for an HTML page, in milliseconds.
    pub page_load_timeout_ms: u64,
    /// Maximum bytes kept from each of stdout and stderr.
    pub max_output_bytes: usize,
    /// Maximum concurrent browser processes.
    pub browser_slots: usize,
}

impl Default for SandboxSettings {
    fn default() -> Self {
        Self {
            python_bin: "python3".to_string(),
            full_timeout_secs: 30,
            fast_timeout_secs: 10,
            syntax_timeout_secs: 10,
            test_timeout_secs: 30,
            probe_bound_secs: 10,
            probe_grace_ms: 2000,
            probe_poll_ms: 100,
            settle_window_ms: 1000,
            page_load_timeout_ms: 10_000,
            max_output_bytes: 64 * 1024,
            browser_slots: 4,
        }
    }
}

impl SandboxSettings {
    /// Run timeout for the given profile.
    pub fn run_timeout(&self, profile: TimeoutProfile) -> Duration {
        match profile {
            TimeoutProfile::Fast => Duration::from_secs(self.fast_timeout_secs),
            TimeoutProfile::Full => Duration::from_secs(self.full_timeout_secs),
        }
    }

    pub fn syntax_timeout(&self) -> Duration {
        Duration::from_secs(self.syntax_timeout_secs)
    }

    pub fn test_timeout(&self) -> Duration {
        Duration::from_secs(self.test_timeout_secs)
    }

    pub fn probe_bound(&self) -> Duration {
        Duration::from_secs(self.probe_bound_secs)
    }

    pub fn probe_grace(&self) -> Duration {
        Duration::from_millis(self.probe_grace_ms)
    }

    pub fn probe_poll(&self) -> Duration {
        Duration::from_millis(self.probe_poll_ms)
    }

    pub fn settle_window(&self) -> Duration {
        Duration::from_millis(self.settle_window_ms)
    }

    pub fn page_load_timeout(&self) -> Duration {
        Duration::from_millis(self.page_load_timeout_ms)
    }
}

/// One judge backend in the panel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JudgeSpec {
    /// Stable identifier used in logs, metrics and the ledger.
    pub id: String,
    /// Model identifier sent to the chat-completions endpoint.
    pub model: String,
}

impl JudgeSpec {
    pub fn new(id: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            model: model.into(),
        }
    }
}

/// Multi-judge panel configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JudgePanelConfig {
    /// Judges dispatched for every run target.
    pub judges: Vec<JudgeSpec>,
    /// OpenAI-compatible API base URL.
    pub api_base: String,
    /// Per-judge call timeout, in seconds.
    pub timeout_secs: u64,
    /// Deviation from the median (0-10 scale) beyond which a judge counts as
    /// divergent on a dimension.
    pub divergence_threshold: f64,
    /// Sampling temperature.
    pub temperature: f64,
    /// Completion token limit.
    pub max_tokens: u32,
    /// Maximum number of workspace files shown to a judge.
    pub max_code_files: usize,
    /// Maximum characters kept per file shown to a judge.
    pub max_file_chars: usize,
}

impl Default for JudgePanelConfig {
    fn default() -> Self {
        Self {
            judges: vec![
                JudgeSpec::new("claude-opus", "anthropic/claude-opus-4.5"),
                JudgeSpec::new("gpt-4o", "openai/gpt-4o"),
                JudgeSpec::new("gemini-flash", "google/gemini-3-flash-preview"),
            ],
            api_base: OPENROUTER_API_BASE.to_string(),
            timeout_secs: 120,
            divergence_threshold: 3.0,
            temperature: 0.0,
            max_tokens: 2000,
            max_code_files: 20,
            max_file_chars: 100_000,
        }
    }
}

impl JudgePanelConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Execution gate parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringSettings {
    /// Minimum execution and test sub-score (0-10) that avoids the cap.
    pub gate_threshold: f64,
    /// Ceiling (0-100) applied when the gate trips.
    pub gate_cap: f64,
}

impl Default for ScoringSettings {
    fn default() -> Self {
        Self {
            gate_threshold: 3.0,
            gate_cap: 30.0,
        }
    }
}

/// Session scheduling and persistence options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Maximum run targets evaluated concurrently.
    pub max_workers: usize,
    /// Wall-clock bound for one run target, in seconds.
    pub target_timeout_secs: u64,
    /// Profile used when a case does not request one.
    pub default_profile: TimeoutProfile,
    /// Attempts per ledger write before the session fails.
    pub ledger_write_attempts: u32,
    /// Initial backoff between ledger write attempts, in milliseconds.
    pub ledger_retry_backoff_ms: u64,
    /// Interval between progress log lines, in seconds.
    pub progress_interval_secs: u64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            max_workers: 4,
            target_timeout_secs: 600,
            default_profile: TimeoutProfile::Full,
            ledger_write_attempts: 3,
            ledger_retry_backoff_ms: 100,
            progress_interval_secs: 30,
        }
    }
}

impl SessionSettings {
    pub fn target_timeout(&self) -> Duration {
        Duration::from_secs(self.target_timeout_secs)
    }

    pub fn ledger_retry_backoff(&self) -> Duration {
        Duration::from_millis(self.ledger_retry_backoff_ms)
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_secs(self.progress_interval_secs)
    }
}

/// Top-level configuration for an evaluation session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvalConfig {
    pub sandbox: SandboxSettings,
    pub judges: JudgePanelConfig,
    pub scoring: ScoringSettings,
    pub session: SessionSettings,
}

impl EvalConfig {
    /// Creates a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from a YAML file. Missing keys keep their defaults.
    pub fn from_yaml_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&text)
    }

    /// Parses configuration from YAML text.
    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(text)?)
    }

    /// Overlays values from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `VIBE_EVAL_MAX_WORKERS`: Concurrent run targets (default: 4)
    /// - `VIBE_EVAL_TARGET_TIMEOUT_SECS`: Per-target timeout (default: 600)
    /// - `VIBE_EVAL_PYTHON`: Python interpreter (default: python3)
    /// - `VIBE_EVAL_RUN_TIMEOUT_SECS`: Full-profile run timeout (default: 30)
    /// - `VIBE_EVAL_TEST_TIMEOUT_SECS`: Per-test timeout (default: 30)
    /// - `VIBE_EVAL_BROWSER_SLOTS`: Concurrent browsers (default: 4)
    /// - `VIBE_EVAL_JUDGE_TIMEOUT_SECS`: Per-judge timeout (default: 120)
    /// - `VIBE_EVAL_JUDGE_MODELS`: Comma-separated judge models, replacing the panel
    /// - `VIBE_EVAL_DIVERGENCE_THRESHOLD`: Judge divergence threshold (default: 3.0)
    /// - `LITELLM_API_BASE`: Judge API base URL
    pub fn apply_env(mut self) -> Result<Self, ConfigError> {
        if let Ok(val) = std::env::var("VIBE_EVAL_MAX_WORKERS") {
            self.session.max_workers = parse_env_value(&val, "VIBE_EVAL_MAX_WORKERS")?;
        }
        if let Ok(val) = std::env::var("VIBE_EVAL_TARGET_TIMEOUT_SECS") {
            self.session.target_timeout_secs =
                parse_env_value(&val, "VIBE_EVAL_TARGET_TIMEOUT_SECS")?;
        }
        if let Ok(val) = std::env::var("VIBE_EVAL_PYTHON") {
            self.sandbox.python_bin = val;
        }
        if let Ok(val) = std::env::var("VIBE_EVAL_RUN_TIMEOUT_SECS") {
            self.sandbox.full_timeout_secs = parse_env_value(&val, "VIBE_EVAL_RUN_TIMEOUT_SECS")?;
        }
        if let Ok(val) = std::env::var("VIBE_EVAL_TEST_TIMEOUT_SECS") {
            self.sandbox.test_timeout_secs =
                parse_env_value(&val, "VIBE_EVAL_TEST_TIMEOUT_SECS")?;
        }
        if let Ok(val) = std::env::var("VIBE_EVAL_BROWSER_SLOTS") {
            self.sandbox.browser_slots = parse_env_value(&val, "VIBE_EVAL_BROWSER_SLOTS")?;
        }
        if let Ok(val) = std::env::var("VIBE_EVAL_JUDGE_TIMEOUT_SECS") {
            self.judges.timeout_secs = parse_env_value(&val, "VIBE_EVAL_JUDGE_TIMEOUT_SECS")?;
        }
        if let Ok(val) = std::env::var("VIBE_EVAL_JUDGE_MODELS") {
            self.judges.judges = parse_judge_models(&val);
        }
        if let Ok(val) = std::env::var("VIBE_EVAL_DIVERGENCE_THRESHOLD") {
            self.judges.divergence_threshold =
                parse_env_value(&val, "VIBE_EVAL_DIVERGENCE_THRESHOLD")?;
        }
        if let Ok(val) = std::env::var("LITELLM_API_BASE") {
            self.judges.api_base = val;
        }
        Ok(self)
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` if any values are invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.session.max_workers == 0 {
            return Err(ConfigError::ValidationFailed(
                "session.max_workers must be greater than 0".to_string(),
            ));
        }

        if self.session.target_timeout_secs == 0 {
            return Err(ConfigError::ValidationFailed(
                "session.target_timeout_secs must be greater than 0".to_string(),
            ));
        }

        if self.session.ledger_write_attempts == 0 {
            return Err(ConfigError::ValidationFailed(
                "session.ledger_write_attempts must be at least 1".to_string(),
            ));
        }

        if self.sandbox.python_bin.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "sandbox.python_bin cannot be empty".to_string(),
            ));
        }

        if self.sandbox.full_timeout_secs == 0 || self.sandbox.fast_timeout_secs == 0 {
            return Err(ConfigError::ValidationFailed(
                "sandbox run timeouts must be greater than 0".to_string(),
            ));
        }

        if self.sandbox.test_timeout_secs == 0 {
            return Err(ConfigError::ValidationFailed(
                "sandbox.test_timeout_secs must be greater than 0".to_string(),
            ));
        }

        if self.sandbox.probe_poll_ms == 0 {
            return Err(ConfigError::ValidationFailed(
                "sandbox.probe_poll_ms must be greater than 0".to_string(),
            ));
        }

        if self.sandbox.max_output_bytes < 1024 {
            return Err(ConfigError::ValidationFailed(
                "sandbox.max_output_bytes must be at least 1024".to_string(),
            ));
        }

        if self.sandbox.browser_slots == 0 {
            return Err(ConfigError::ValidationFailed(
                "sandbox.browser_slots must be greater than 0".to_string(),
            ));
        }

        let mut seen = std::collections::HashSet::new();
        for judge in &self.judges.judges {
            if judge.id.is_empty() || judge.model.is_empty() {
                return Err(ConfigError::ValidationFailed(
                    "judge id and model cannot be empty".to_string(),
                ));
            }
            if !seen.insert(judge.id.as_str()) {
                return Err(ConfigError::ValidationFailed(format!(
                    "duplicate judge id '{}'",
                    judge.id
                )));
            }
        }

        if self.judges.timeout_secs == 0 {
            return Err(ConfigError::ValidationFailed(
                "judges.timeout_secs must be greater than 0".to_string(),
            ));
        }

        if !(0.0..=10.0).contains(&self.judges.divergence_threshold) {
            return Err(ConfigError::ValidationFailed(
                "judges.divergence_threshold must be between 0.0 and 10.0".to_string(),
            ));
        }

        if !(0.0..=2.0).contains(&self.judges.temperature) {
            return Err(ConfigError::ValidationFailed(
                "judges.temperature must be between 0.0 and 2.0".to_string(),
            ));
        }

        if !(0.0..=10.0).contains(&self.scoring.gate_threshold) {
            return Err(ConfigError::ValidationFailed(
                "scoring.gate_threshold must be between 0.0 and 10.0".to_string(),
            ));
        }

        if !(0.0..=100.0).contains(&self.scoring.gate_cap) {
            return Err(ConfigError::ValidationFailed(
                "scoring.gate_cap must be between 0.0 and 100.0".to_string(),
            ));
        }

        Ok(())
    }

    /// Builder method to set the worker limit.
    pub fn with_max_workers(mut self, max: usize) -> Self {
        self.session.max_workers = max;
        self
    }

    /// Builder method to set the per-target timeout.
    pub fn with_target_timeout(mut self, timeout: Duration) -> Self {
        self.session.target_timeout_secs = timeout.as_secs();
        self
    }

    /// Builder method to set the default timeout profile.
    pub fn with_default_profile(mut self, profile: TimeoutProfile) -> Self {
        self.session.default_profile = profile;
        self
    }

    /// Builder method to set the Python interpreter.
    pub fn with_python_bin(mut self, python: impl Into<String>) -> Self {
        self.sandbox.python_bin = python.into();
        self
    }

    /// Builder method to replace the judge panel.
    pub fn with_judges(mut self, judges: Vec<JudgeSpec>) -> Self {
        self.judges.judges = judges;
        self
    }

    /// Builder method to set the divergence threshold.
    pub fn with_divergence_threshold(mut self, threshold: f64) -> Self {
        self.judges.divergence_threshold = threshold;
        self
    }

    /// Builder method to set the execution gate.
    pub fn with_gate(mut self, threshold: f64, cap: f64) -> Self {
        self.scoring.gate_threshold = threshold;
        self.scoring.gate_cap = cap;
        self
    }
}

/// Turn `"a/b,c/d"` into judge specs whose ids are the model's last path segment.
fn parse_judge_models(value: &str) -> Vec<JudgeSpec> {
    value
        .split(',')
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .map(|model| {
            let id = model.rsplit('/').next().unwrap_or(model);
            JudgeSpec::new(id, model)
        })
        .collect()
}

/// Parse an environment variable value.
fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("could not parse '{}'", value),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EvalConfig::default();
        assert_eq!(config.session.max_workers, 4);
        assert_eq!(config.session.target_timeout(), Duration::from_secs(600));
        assert_eq!(config.sandbox.python_bin, "python3");
        assert_eq!(
            config.sandbox.run_timeout(TimeoutProfile::Full),
            Duration::from_secs(30)
        );
        assert_eq!(
            config.sandbox.run_timeout(TimeoutProfile::Fast),
            Duration::from_secs(10)
        );
        assert_eq!(config.judges.judges.len(), 3);
        assert!((config.judges.divergence_threshold - 3.0).abs() < f64::EPSILON);
        assert!((config.scoring.gate_cap - 30.0).abs() < f64::EPSILON);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = EvalConfig::new()
            .with_max_workers(8)
            .with_target_timeout(Duration::from_secs(120))
            .with_default_profile(TimeoutProfile::Fast)
            .with_python_bin("python3.11")
            .with_judges(vec![JudgeSpec::new("solo", "openai/gpt-4o")])
            .with_divergence_threshold(2.0)
            .with_gate(4.0, 25.0);

        assert_eq!(config.session.max_workers, 8);
        assert_eq!(config.session.target_timeout_secs, 120);
        assert_eq!(config.session.default_profile, TimeoutProfile::Fast);
        assert_eq!(config.sandbox.python_bin, "python3.11");
        assert_eq!(config.judges.judges.len(), 1);
        assert!((config.scoring.gate_threshold - 4.0).abs() < f64::EPSILON);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_zero_workers() {
        let config = EvalConfig::new().with_max_workers(0);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationFailed(_))
        ));
    }

    #[test]
    fn test_validation_rejects_duplicate_judges() {
        let config = EvalConfig::new().with_judges(vec![
            JudgeSpec::new("a", "openai/gpt-4o"),
            JudgeSpec::new("a", "google/gemini-3-flash-preview"),
        ]);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate judge id"));
    }

    #[test]
    fn test_validation_rejects_bad_gate() {
        let config = EvalConfig::new().with_gate(3.0, 130.0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_yaml_partial_override() {
        let yaml = r#"
session:
  max_workers: 2
sandbox:
  fast_timeout_secs: 5
judges:
  judges:
    - id: solo
      model: openai/gpt-4o
"#;
        let config = EvalConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.session.max_workers, 2);
        assert_eq!(config.session.target_timeout_secs, 600);
        assert_eq!(config.sandbox.fast_timeout_secs, 5);
        assert_eq!(config.sandbox.full_timeout_secs, 30);
        assert_eq!(config.judges.judges, vec![JudgeSpec::new("solo", "openai/gpt-4o")]);
        assert_eq!(config.judges.timeout_secs, 120);
    }

    #[test]
    fn test_empty_yaml_is_default() {
        let config = EvalConfig::from_yaml_str("   \n").unwrap();
        assert_eq!(config, EvalConfig::default());
    }

    #[test]
    fn test_parse_judge_models() {
        let judges = parse_judge_models("openai/gpt-4o, google/gemini-3-flash-preview,,");
        assert_eq!(judges.len(), 2);
        assert_eq!(judges[0].id, "gpt-4o");
        assert_eq!(judges[1].model, "google/gemini-3-flash-preview");
    }

    #[test]
    fn test_parse_env_value() {
        let val: usize = parse_env_value("12", "KEY").unwrap();
        assert_eq!(val, 12);
        let err = parse_env_value::<usize>("abc", "KEY").unwrap_err();
        assert!(err.to_string().contains("KEY"));
    }

    #[test]
    fn test_profile_from_str() {
        assert_eq!("FAST".parse::<TimeoutProfile>(), Ok(TimeoutProfile::Fast));
        assert!("medium".parse::<TimeoutProfile>().is_err());
    }
}
