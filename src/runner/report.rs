use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::{EXIT_FAILURE, EXIT_SUCCESS};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TestOutcome {
    Passed,
    /// `exit_code` is `None` when the process was terminated by a signal.
    Failed { exit_code: Option<i32> },
    TimedOut { after_ms: u64 },
    SpawnFailed { reason: String },
}

impl TestOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, TestOutcome::Passed)
    }
}

impl fmt::Display for TestOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestOutcome::Passed => write!(f, "PASS"),
            TestOutcome::Failed {
                exit_code: Some(code),
            } => write!(f, "FAIL (exit code {code})"),
            TestOutcome::Failed { exit_code: None } => write!(f, "FAIL (killed by signal)"),
            TestOutcome::TimedOut { after_ms } => write!(f, "TIMEOUT (after {after_ms}ms)"),
            TestOutcome::SpawnFailed { reason } => write!(f, "ERROR ({reason})"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    pub case: PathBuf,
    pub outcome: TestOutcome,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}

/// Outcome of one harness run. The failure flag is sticky: once a case
/// fails it stays set for the rest of the run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    results: Vec<TestResult>,
    any_failed: bool,
}

impl Default for RunReport {
    fn default() -> Self {
        Self::new()
    }
}

impl RunReport {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            finished_at: None,
            results: Vec::new(),
            any_failed: false,
        }
    }

    pub fn record(&mut self, result: TestResult) {
        if !result.outcome.is_success() {
            self.any_failed = true;
        }
        self.results.push(result);
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    pub fn results(&self) -> &[TestResult] {
        &self.results
    }

    pub fn any_failed(&self) -> bool {
        self.any_failed
    }

    pub fn passed_count(&self) -> usize {
        self.results
            .iter()
            .filter(|r| r.outcome.is_success())
            .count()
    }

    pub fn failed(&self) -> Vec<&TestResult> {
        self.results
            .iter()
            .filter(|r| !r.outcome.is_success())
            .collect()
    }

    pub fn exit_code(&self) -> i32 {
        if self.any_failed {
            EXIT_FAILURE
        } else {
            EXIT_SUCCESS
        }
    }

    pub fn summary_lines(&self) -> Vec<String> {
        let mut lines: Vec<String> = self
            .results
            .iter()
            .map(|r| {
                format!(
                    "{:<8} {} ({}ms)",
                    status_tag(&r.outcome),
                    r.case.display(),
                    r.duration_ms
                )
            })
            .collect();

        lines.push(format!(
            "{} passed, {} failed, {} total",
            self.passed_count(),
            self.results.len() - self.passed_count(),
            self.results.len()
        ));

        let failed = self.failed();
        if !failed.is_empty() {
            lines.push("Failed test cases:".to_string());
            for result in failed {
                lines.push(format!("  {}: {}", result.case.display(), result.outcome));
            }
        }

        lines
    }

    pub fn print_summary(&self) {
        for line in self.summary_lines() {
            println!("{line}");
        }
    }

    pub fn write_json(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("Failed to serialize run report")?;
        fs::write(path, json)
            .with_context(|| format!("Failed to write run report to: {}", path.display()))?;
        log::info!("Run report written to {}", path.display());
        Ok(())
    }
}

fn status_tag(outcome: &TestOutcome) -> &'static str {
    match outcome {
        TestOutcome::Passed => "PASS",
        TestOutcome::Failed { .. } => "FAIL",
        TestOutcome::TimedOut { .. } => "TIMEOUT",
        TestOutcome::SpawnFailed { .. } => "ERROR",
    }
}
