use anyhow::{Context, Result};
use log::{info, warn};

use crate::broker::{BrokerControl, BrokerLauncher, StopOutcome};
use crate::config::HarnessConfig;
use crate::environment;
use crate::runner::{discover, RunReport, TestRunner};

/// Sequences one run: search path, broker start, test batch, broker stop.
pub struct Harness<B> {
    config: HarnessConfig,
    broker: B,
}

impl Harness<BrokerLauncher> {
    pub fn from_config(config: HarnessConfig) -> Self {
        let broker = BrokerLauncher::new(config.broker.clone());
        Self::new(config, broker)
    }
}

impl<B: BrokerControl> Harness<B> {
    pub fn new(config: HarnessConfig, broker: B) -> Self {
        Self { config, broker }
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    pub fn broker(&self) -> &B {
        &self.broker
    }

    /// Any error returned here happened before a single test case ran.
    pub async fn run(&mut self) -> Result<RunReport> {
        environment::compose_and_install(&self.config)?;

        self.broker
            .start()
            .await
            .context("Broker failed to start")?;

        let cases = match discover(&self.config.tests.dir, &self.config.tests.pattern) {
            Ok(cases) => cases,
            Err(e) => {
                self.stop_broker().await;
                return Err(e);
            }
        };

        let report = TestRunner::from_config(&self.config)
            .run_all(&cases)
            .await;

        self.stop_broker().await;

        info!(
            "Run {} finished: {} of {} test cases passed",
            report.run_id,
            report.passed_count(),
            report.results().len()
        );

        Ok(report)
    }

    async fn stop_broker(&mut self) {
        match self.broker.stop().await {
            StopOutcome::Terminated | StopOutcome::Killed => {}
            StopOutcome::Failed(reason) => warn!("Failed to stop broker: {reason}"),
            other => warn!("Broker stop: {other:?}"),
        }
    }
}
