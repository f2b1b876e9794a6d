pub mod discovery;
pub mod report;

use log::{error, info, warn};
use std::collections::BTreeMap;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;

use crate::config::HarnessConfig;

pub use discovery::{discover, TestCase};
pub use report::{RunReport, TestOutcome, TestResult};

/// Runs test cases one at a time, each as its own process.
#[derive(Debug, Clone, Default)]
pub struct TestRunner {
    interpreter: Option<String>,
    timeout: Option<Duration>,
    extra_env: BTreeMap<String, String>,
}

impl TestRunner {
    pub fn new(interpreter: Option<String>, timeout: Option<Duration>) -> Self {
        Self {
            interpreter,
            timeout,
            extra_env: BTreeMap::new(),
        }
    }

    pub fn from_config(config: &HarnessConfig) -> Self {
        Self::new(
            config.tests.interpreter().map(str::to_string),
            config.tests.timeout(),
        )
        .with_env(config.test_env.clone())
    }

    pub fn with_env(mut self, extra_env: BTreeMap<String, String>) -> Self {
        self.extra_env = extra_env;
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    fn command(&self, case: &TestCase) -> Command {
        let mut cmd = match &self.interpreter {
            Some(interpreter) => {
                let mut cmd = Command::new(interpreter);
                cmd.arg(case.path());
                cmd
            }
            None => Command::new(case.path()),
        };

        cmd.envs(&self.extra_env)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        cmd
    }

    /// Print the case identifier, then run it to completion or timeout.
    pub async fn run_case(&self, case: &TestCase) -> TestResult {
        println!("{case}");

        let started_at = chrono::Utc::now();
        let start = Instant::now();
        let outcome = self.execute(case).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        match &outcome {
            TestOutcome::Passed => info!("{case} passed in {duration_ms}ms"),
            TestOutcome::SpawnFailed { reason } => error!("{case} could not be started: {reason}"),
            other => warn!("{case} {other} after {duration_ms}ms"),
        }

        TestResult {
            case: case.path().to_path_buf(),
            outcome,
            started_at,
            duration_ms,
        }
    }

    async fn execute(&self, case: &TestCase) -> TestOutcome {
        let mut child = match self.command(case).spawn() {
            Ok(child) => child,
            Err(e) => {
                return TestOutcome::SpawnFailed {
                    reason: e.to_string(),
                }
            }
        };

        let Some(timeout) = self.timeout else {
            return match child.wait().await {
                Ok(status) if status.success() => TestOutcome::Passed,
                Ok(status) => TestOutcome::Failed {
                    exit_code: status.code(),
                },
                Err(e) => TestOutcome::SpawnFailed {
                    reason: format!("Process wait failed: {e}"),
                },
            };
        };

        tokio::select! {
            status = child.wait() => match status {
                Ok(status) if status.success() => TestOutcome::Passed,
                Ok(status) => TestOutcome::Failed { exit_code: status.code() },
                Err(e) => TestOutcome::SpawnFailed {
                    reason: format!("Process wait failed: {e}"),
                },
            },

            _ = tokio::time::sleep(timeout) => {
                if let Err(e) = child.kill().await {
                    error!("Failed to kill timed out test case {case}: {e}");
                }
                TestOutcome::TimedOut { after_ms: timeout.as_millis() as u64 }
            }
        }
    }

    /// Run every case in order. A failure never stops the batch.
    pub async fn run_all(&self, cases: &[TestCase]) -> RunReport {
        let mut report = RunReport::new();
        info!("Running {} test cases (run {})", cases.len(), report.run_id);

        for case in cases {
            let result = self.run_case(case).await;
            report.record(result);
        }

        report.finish();
        report
    }
}
