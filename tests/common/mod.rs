#![allow(dead_code)]

use std::fs;
use std::net::TcpListener;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;

/// A throwaway repository layout with a fake broker and shell test cases.
pub struct Sandbox {
    dir: TempDir,
    port: u16,
}

impl Sandbox {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("should create temp dir");
        fs::create_dir_all(dir.path().join("tests/e2e")).unwrap();
        fs::create_dir_all(dir.path().join("tests/mocks")).unwrap();
        fs::create_dir_all(dir.path().join("bin")).unwrap();
        fs::write(dir.path().join("tests/mosquitto.conf"), "listener 1883\n").unwrap();

        let port = TcpListener::bind("127.0.0.1:0")
            .and_then(|listener| listener.local_addr())
            .expect("should reserve a port")
            .port();

        let sandbox = Self { dir, port };
        sandbox.write_config();
        sandbox.write_broker();
        sandbox
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn journal(&self) -> PathBuf {
        self.root().join("journal")
    }

    fn ready_marker(&self) -> PathBuf {
        self.root().join("broker.ready")
    }

    pub fn broker_path(&self) -> PathBuf {
        self.root().join("bin/fake-broker")
    }

    fn write_config(&self) {
        let port = self.port;
        let config = format!(
            r#"log_level = "info"

[broker]
executable = "{broker}"
port = {port}
readiness_timeout_secs = 5
readiness_interval_ms = 20
stop_timeout_secs = 5

[tests]
interpreter = "sh"
timeout_secs = 10

[search_path]
env_var = "MICROPYPATH"
"#,
            broker = self.broker_path().display(),
        );
        fs::write(self.root().join("tests/e2e.toml"), config).unwrap();
    }

    fn write_broker(&self) {
        let journal = self.journal();
        let script = format!(
            "#!/bin/sh\n\
             trap 'echo broker-stop >> {journal}; exit 0' TERM\n\
             echo \"broker-start $1 $2\" >> {journal}\n\
             echo \"$MICROPYPATH\" > {root}/broker.path\n\
             touch {ready}\n\
             while true; do sleep 0.1; done\n",
            journal = journal.display(),
            root = self.root().display(),
            ready = self.ready_marker().display(),
        );
        let path = self.broker_path();
        fs::write(&path, script).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    }

    /// Add a test case that journals its name and exits with `exit_code`.
    pub fn add_case(&self, name: &str, exit_code: i32) {
        self.add_case_body(
            name,
            &format!("echo {name} >> {}\nexit {exit_code}", self.journal().display()),
        );
    }

    pub fn add_case_body(&self, name: &str, body: &str) {
        fs::write(self.root().join("tests/e2e").join(name), format!("{body}\n")).unwrap();
    }

    pub fn journal_lines(&self) -> Vec<String> {
        fs::read_to_string(self.journal())
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    /// Listen on the broker port only once the fake broker has started, so
    /// the readiness probe observes the broker script itself.
    fn serve_port_when_ready(&self, done: Arc<AtomicBool>) -> thread::JoinHandle<()> {
        let marker = self.ready_marker();
        let port = self.port;

        thread::spawn(move || {
            let deadline = Instant::now() + Duration::from_secs(30);
            while !done.load(Ordering::SeqCst) && Instant::now() < deadline {
                if marker.exists() {
                    let _listener = TcpListener::bind(("127.0.0.1", port));
                    while !done.load(Ordering::SeqCst) {
                        thread::sleep(Duration::from_millis(20));
                    }
                    return;
                }
                thread::sleep(Duration::from_millis(10));
            }
        })
    }

    pub fn run(&self, args: &[&str]) -> Output {
        let done = Arc::new(AtomicBool::new(false));
        let server = self.serve_port_when_ready(done.clone());

        let output = Command::new(env!("CARGO_BIN_EXE_mqtt-e2e"))
            .args(args)
            .current_dir(self.root())
            .env_remove("RUST_LOG")
            .env_remove("MICROPYPATH")
            .env_remove("E2E_BROKER")
            .env_remove("E2E_TEST_DIR")
            .env_remove("E2E_PATTERN")
            .env_remove("E2E_INTERPRETER")
            .env_remove("E2E_TEST_TIMEOUT")
            .env_remove("E2E_BROKER_CONFIG")
            .env_remove("E2E_BROKER_PORT")
            .env_remove("E2E_LOG_LEVEL")
            .output()
            .expect("should run harness binary");

        done.store(true, Ordering::SeqCst);
        server.join().expect("listener thread should not panic");
        output
    }
}

pub fn stdout_lines(output: &Output) -> Vec<String> {
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(str::to_string)
        .collect()
}
