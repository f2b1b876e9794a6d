use anyhow::{Context, Result};
use clap::ArgMatches;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "tests/e2e.toml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    pub log_level: Option<String>,
    pub search_path: SearchPathConfig,
    pub broker: BrokerConfig,
    pub tests: TestsConfig,
    /// Extra variables exported to every test case (e.g. `LOG_LEVEL`).
    pub test_env: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchPathConfig {
    pub env_var: String,
    pub mock_dir: PathBuf,
    pub frozen_entry: String,
    pub user_lib_dir: String,
    pub system_lib_dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub executable: String,
    pub config_file: PathBuf,
    /// Flag preceding the config file path on the broker command line.
    pub config_flag: String,
    pub host: String,
    pub port: u16,
    /// 0 disables the readiness probe.
    pub readiness_timeout_secs: u64,
    pub readiness_interval_ms: u64,
    pub stop_timeout_secs: u64,
    /// Forward broker stdout/stderr to the harness output.
    pub inherit_output: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TestsConfig {
    pub dir: PathBuf,
    pub pattern: String,
    /// Empty means the scripts are executed directly.
    pub interpreter: String,
    /// None or 0 means a test case may run forever.
    pub timeout_secs: Option<u64>,
}

impl Default for SearchPathConfig {
    fn default() -> Self {
        Self {
            env_var: "MICROPYPATH".to_string(),
            mock_dir: PathBuf::from("tests/mocks"),
            frozen_entry: ".frozen".to_string(),
            user_lib_dir: "~/.micropython/lib".to_string(),
            system_lib_dir: PathBuf::from("/usr/lib/micropython"),
        }
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            executable: "mosquitto".to_string(),
            config_file: PathBuf::from("tests/mosquitto.conf"),
            config_flag: "-c".to_string(),
            host: "127.0.0.1".to_string(),
            port: 1883,
            readiness_timeout_secs: 10,
            readiness_interval_ms: 100,
            stop_timeout_secs: 5,
            inherit_output: false,
        }
    }
}

impl Default for TestsConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("tests/e2e"),
            pattern: "e2e_*".to_string(),
            interpreter: "micropython".to_string(),
            timeout_secs: Some(120),
        }
    }
}

impl BrokerConfig {
    pub fn readiness_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn readiness_timeout(&self) -> Option<Duration> {
        match self.readiness_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    pub fn readiness_interval(&self) -> Duration {
        Duration::from_millis(self.readiness_interval_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }
}

impl TestsConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }

    pub fn interpreter(&self) -> Option<&str> {
        let interpreter = self.interpreter.trim();
        (!interpreter.is_empty()).then_some(interpreter)
    }
}

impl HarnessConfig {
    pub fn validate(&self) -> Result<()> {
        if self.search_path.env_var.is_empty() {
            return Err(anyhow::anyhow!("search_path.env_var must not be empty"));
        }

        if self.broker.executable.is_empty() {
            return Err(anyhow::anyhow!("broker.executable must not be empty"));
        }

        if self.broker.port == 0 {
            return Err(anyhow::anyhow!("broker.port must be greater than 0"));
        }

        if self.broker.readiness_timeout_secs > 0 && self.broker.readiness_interval_ms == 0 {
            return Err(anyhow::anyhow!(
                "broker.readiness_interval_ms must be greater than 0"
            ));
        }

        glob::Pattern::new(&self.tests.pattern)
            .with_context(|| format!("Invalid test pattern: {}", self.tests.pattern))?;

        Ok(())
    }

    pub fn apply_cli_overrides(&mut self, matches: &ArgMatches) {
        if let Some(dir) = matches.get_one::<String>("test-dir") {
            self.tests.dir = PathBuf::from(dir);
        }

        if let Some(pattern) = matches.get_one::<String>("pattern") {
            self.tests.pattern = pattern.clone();
        }

        if let Some(interpreter) = matches.get_one::<String>("interpreter") {
            self.tests.interpreter = interpreter.clone();
        }

        if let Some(timeout_secs) = matches.get_one::<u64>("test-timeout") {
            self.tests.timeout_secs = Some(*timeout_secs);
        }

        if let Some(executable) = matches.get_one::<String>("broker") {
            self.broker.executable = executable.clone();
        }

        if let Some(config_file) = matches.get_one::<String>("broker-config") {
            self.broker.config_file = PathBuf::from(config_file);
        }

        if let Some(port) = matches.get_one::<u16>("broker-port") {
            self.broker.port = *port;
        }

        if let Some(log_level) = matches.get_one::<String>("log-level") {
            self.log_level = Some(log_level.clone());
        }
    }

    pub fn apply_env_overrides(&mut self) {
        if let Ok(dir) = std::env::var("E2E_TEST_DIR") {
            self.tests.dir = PathBuf::from(dir);
        }

        if let Ok(pattern) = std::env::var("E2E_PATTERN") {
            self.tests.pattern = pattern;
        }

        if let Ok(interpreter) = std::env::var("E2E_INTERPRETER") {
            self.tests.interpreter = interpreter;
        }

        if let Ok(timeout_str) = std::env::var("E2E_TEST_TIMEOUT") {
            if let Ok(timeout_secs) = timeout_str.parse::<u64>() {
                self.tests.timeout_secs = Some(timeout_secs);
            }
        }

        if let Ok(executable) = std::env::var("E2E_BROKER") {
            self.broker.executable = executable;
        }

        if let Ok(config_file) = std::env::var("E2E_BROKER_CONFIG") {
            self.broker.config_file = PathBuf::from(config_file);
        }

        if let Ok(port_str) = std::env::var("E2E_BROKER_PORT") {
            if let Ok(port) = port_str.parse::<u16>() {
                self.broker.port = port;
            }
        }

        if let Ok(log_level) = std::env::var("E2E_LOG_LEVEL") {
            self.log_level = Some(log_level);
        }
    }
}

/// Read a config file, falling back to defaults when it does not exist.
pub fn load_config_file(path: &Path) -> Result<HarnessConfig> {
    if !path.exists() {
        log::info!("Config file not found: {}, using defaults", path.display());
        return Ok(HarnessConfig::default());
    }

    let file_content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: HarnessConfig = toml::from_str(&file_content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

    log::info!("Loaded configuration from file: {}", path.display());
    Ok(config)
}

/// Log level known before logging starts: CLI args > env vars > config file.
///
/// An unreadable or malformed file yields `None`; `load_config` reports it.
pub fn early_log_level(config_path: Option<&str>, matches: &ArgMatches) -> Option<String> {
    if let Some(level) = matches.get_one::<String>("log-level") {
        return Some(level.clone());
    }

    if let Ok(level) = std::env::var("E2E_LOG_LEVEL") {
        return Some(level);
    }

    let content = fs::read_to_string(config_path?).ok()?;
    toml::from_str::<HarnessConfig>(&content).ok()?.log_level
}

/// Load configuration: CLI args > env vars > config file > defaults
pub fn load_config(config_path: Option<&str>, matches: &ArgMatches) -> Result<HarnessConfig> {
    let mut config = match config_path {
        Some(path) => load_config_file(Path::new(path))?,
        None => HarnessConfig::default(),
    };

    config.apply_env_overrides();
    config.apply_cli_overrides(matches);

    config
        .validate()
        .with_context(|| "Configuration validation failed")?;

    log::debug!("Final config: {config:?}");

    Ok(config)
}

/// Create a sample configuration file
pub fn create_sample_config(path: &str) -> Result<()> {
    let mut config = HarnessConfig::default();
    config
        .test_env
        .insert("LOG_LEVEL".to_string(), "WARNING".to_string());
    let toml_content =
        toml::to_string_pretty(&config).context("Failed to serialize default config")?;

    fs::write(path, toml_content)
        .with_context(|| format!("Failed to write sample config to: {path}"))?;

    println!("Sample configuration written to: {path}");
    Ok(())
}
