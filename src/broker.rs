use log::{debug, info, warn};
use std::ffi::OsString;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::process::{Child, Command};

use crate::config::BrokerConfig;

/// Errors that abort the run before any test case executes.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("Broker executable '{0}' not found on PATH")]
    ExecutableNotFound(String),

    #[error("Broker config file not found: {}", .0.display())]
    ConfigMissing(PathBuf),

    #[error("Failed to spawn broker {}: {source}", .path.display())]
    Spawn {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Broker exited during startup with {0}")]
    ExitedEarly(ExitStatus),

    #[error("Broker not accepting connections on {addr} after {waited:?}")]
    NotReady { addr: String, waited: Duration },

    #[error("Broker process error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopOutcome {
    Terminated,
    Killed,
    AlreadyExited,
    NotStarted,
    Failed(String),
}

pub type BrokerFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Start/stop seam the harness sequences around the test batch.
pub trait BrokerControl {
    fn start(&mut self) -> BrokerFuture<'_, Result<(), BrokerError>>;

    /// Never fails the run; problems are reported in the outcome.
    fn stop(&mut self) -> BrokerFuture<'_, StopOutcome>;
}

/// Find `name` on `PATH`. Names containing a separator are checked as-is.
pub fn locate_executable(name: &str) -> Option<PathBuf> {
    locate_in(name, std::env::var_os("PATH"))
}

pub fn locate_in(name: &str, path_var: Option<OsString>) -> Option<PathBuf> {
    let candidate = Path::new(name);
    if candidate.components().count() > 1 {
        return is_executable(candidate).then(|| candidate.to_path_buf());
    }

    let path_var = path_var?;
    std::env::split_paths(&path_var)
        .map(|dir| dir.join(name))
        .find(|path| is_executable(path))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    std::fs::metadata(path)
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// A broker process started by this run. Only this instance is ever signalled.
pub struct RunningBroker {
    child: Child,
    executable: PathBuf,
    address: String,
}

impl RunningBroker {
    /// Spawn the broker in the background and, unless disabled, wait until
    /// it accepts connections.
    pub async fn spawn(config: &BrokerConfig) -> Result<Self, BrokerError> {
        let executable = locate_executable(&config.executable)
            .ok_or_else(|| BrokerError::ExecutableNotFound(config.executable.clone()))?;

        if !config.config_file.exists() {
            return Err(BrokerError::ConfigMissing(config.config_file.clone()));
        }

        let mut cmd = Command::new(&executable);
        if !config.config_flag.is_empty() {
            cmd.arg(&config.config_flag);
        }
        cmd.arg(&config.config_file)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        if config.inherit_output {
            cmd.stdout(Stdio::inherit()).stderr(Stdio::inherit());
        } else {
            cmd.stdout(Stdio::null()).stderr(Stdio::null());
        }

        let child = cmd.spawn().map_err(|source| BrokerError::Spawn {
            path: executable.clone(),
            source,
        })?;

        info!(
            "Broker started: {} {} (PID {:?})",
            executable.display(),
            config.config_file.display(),
            child.id()
        );

        let mut broker = Self {
            child,
            executable,
            address: config.readiness_address(),
        };

        if let Some(timeout) = config.readiness_timeout() {
            if let Err(e) = broker
                .wait_for_readiness(timeout, config.readiness_interval())
                .await
            {
                broker.stop(config.stop_timeout()).await;
                return Err(e);
            }
        }

        Ok(broker)
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }

    /// Poll the broker's listener until a TCP connect succeeds.
    pub async fn wait_for_readiness(
        &mut self,
        timeout: Duration,
        interval: Duration,
    ) -> Result<(), BrokerError> {
        info!("Waiting for broker to accept connections on {}", self.address);
        let start = Instant::now();
        let mut attempt = 0u32;

        loop {
            attempt += 1;

            if let Some(status) = self.child.try_wait()? {
                return Err(BrokerError::ExitedEarly(status));
            }

            match tokio::time::timeout(interval, TcpStream::connect(&self.address)).await {
                Ok(Ok(_)) => {
                    // The listener may belong to another process if ours failed to bind.
                    tokio::time::sleep(interval).await;
                    if let Some(status) = self.child.try_wait()? {
                        return Err(BrokerError::ExitedEarly(status));
                    }
                    info!("Broker ready after {attempt} attempts");
                    return Ok(());
                }
                Ok(Err(e)) => debug!("Readiness attempt {attempt} failed: {e}"),
                Err(_) => debug!("Readiness attempt {attempt} timed out"),
            }

            let waited = start.elapsed();
            if waited >= timeout {
                return Err(BrokerError::NotReady {
                    addr: self.address.clone(),
                    waited,
                });
            }

            tokio::time::sleep(interval).await;
        }
    }

    /// SIGTERM this instance, then force kill once `grace` runs out.
    pub async fn stop(&mut self, grace: Duration) -> StopOutcome {
        match self.child.try_wait() {
            Ok(Some(status)) => {
                warn!("Broker had already exited with {status}");
                return StopOutcome::AlreadyExited;
            }
            Ok(None) => {}
            Err(e) => return StopOutcome::Failed(e.to_string()),
        }

        let pid = self.child.id();
        if let Err(e) = terminate(&mut self.child) {
            warn!("Failed to signal broker (PID {pid:?}): {e}");
        }

        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(Ok(status)) => {
                info!("Broker (PID {pid:?}) stopped with {status}");
                StopOutcome::Terminated
            }
            Ok(Err(e)) => StopOutcome::Failed(e.to_string()),
            Err(_) => {
                warn!("Broker did not stop within {grace:?}, killing it");
                match self.child.kill().await {
                    Ok(()) => StopOutcome::Killed,
                    Err(e) => StopOutcome::Failed(e.to_string()),
                }
            }
        }
    }
}

#[cfg(unix)]
fn terminate(child: &mut Child) -> std::io::Result<()> {
    let Some(pid) = child.id() else {
        return Ok(());
    };

    let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
    if rc == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

#[cfg(not(unix))]
fn terminate(child: &mut Child) -> std::io::Result<()> {
    child.start_kill()
}

/// Launches the configured broker and owns it until `stop`.
pub struct BrokerLauncher {
    config: BrokerConfig,
    running: Option<RunningBroker>,
}

impl BrokerLauncher {
    pub fn new(config: BrokerConfig) -> Self {
        Self {
            config,
            running: None,
        }
    }

    pub fn running(&self) -> Option<&RunningBroker> {
        self.running.as_ref()
    }
}

impl BrokerControl for BrokerLauncher {
    fn start(&mut self) -> BrokerFuture<'_, Result<(), BrokerError>> {
        Box::pin(async move {
            let broker = RunningBroker::spawn(&self.config).await?;
            self.running = Some(broker);
            Ok(())
        })
    }

    fn stop(&mut self) -> BrokerFuture<'_, StopOutcome> {
        Box::pin(async move {
            let grace = self.config.stop_timeout();
            match self.running.take() {
                Some(mut broker) => broker.stop(grace).await,
                None => StopOutcome::NotStarted,
            }
        })
    }
}
