pub mod broker;
pub mod config;
pub mod environment;
pub mod harness;
pub mod runner;

// Re-export commonly used types
pub use broker::{BrokerControl, BrokerError, BrokerLauncher, RunningBroker, StopOutcome};
pub use config::{load_config, HarnessConfig};
pub use environment::ModuleSearchPath;
pub use harness::Harness;
pub use runner::{discover, RunReport, TestCase, TestOutcome, TestResult, TestRunner};

// Harness exit codes
pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_FAILURE: i32 = 1;
