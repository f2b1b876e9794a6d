//! Drives the `mqtt-e2e` binary against a fake broker and shell test cases.

#![cfg(unix)]

mod common;

use common::{stdout_lines, Sandbox};
use serial_test::serial;
use std::fs;

#[test]
#[serial]
fn test_mixed_results_exit_one_and_run_everything() {
    let sandbox = Sandbox::new();
    sandbox.add_case("e2e_connect.py", 0);
    sandbox.add_case("e2e_publish.py", 1);

    let output = sandbox.run(&[]);
    assert_eq!(output.status.code(), Some(1));

    let stdout = stdout_lines(&output);
    assert!(stdout.contains(&"tests/e2e/e2e_connect.py".to_string()));
    assert!(stdout.contains(&"tests/e2e/e2e_publish.py".to_string()));

    let journal = sandbox.journal_lines();
    assert_eq!(journal.len(), 4, "journal: {journal:?}");
    assert_eq!(journal[0], "broker-start -c tests/mosquitto.conf");
    assert_eq!(journal[3], "broker-stop");
    assert!(journal.contains(&"e2e_connect.py".to_string()));
    assert!(journal.contains(&"e2e_publish.py".to_string()));
}

#[test]
#[serial]
fn test_identifier_printed_before_case_output() {
    let sandbox = Sandbox::new();
    sandbox.add_case_body("e2e_pubsub.py", "echo pubsub-output");

    let output = sandbox.run(&[]);
    assert_eq!(output.status.code(), Some(0));

    let stdout = stdout_lines(&output);
    let id = stdout
        .iter()
        .position(|l| l == "tests/e2e/e2e_pubsub.py")
        .unwrap();
    let body = stdout.iter().position(|l| l == "pubsub-output").unwrap();
    assert!(id < body);
}

#[test]
#[serial]
fn test_all_passing_exit_zero() {
    let sandbox = Sandbox::new();
    sandbox.add_case("e2e_keepalive.py", 0);
    sandbox.add_case("e2e_properties.py", 0);

    let output = sandbox.run(&[]);
    assert_eq!(output.status.code(), Some(0));
    assert_eq!(sandbox.journal_lines().last().map(String::as_str), Some("broker-stop"));
}

#[test]
#[serial]
fn test_no_matching_cases_exit_zero() {
    let sandbox = Sandbox::new();
    fs::write(sandbox.root().join("tests/e2e/test_client.py"), "exit 1\n").unwrap();

    let output = sandbox.run(&[]);
    assert_eq!(output.status.code(), Some(0));
    assert_eq!(
        sandbox.journal_lines(),
        vec!["broker-start -c tests/mosquitto.conf", "broker-stop"]
    );
}

#[test]
#[serial]
fn test_missing_broker_aborts_before_any_case() {
    let sandbox = Sandbox::new();
    sandbox.add_case("e2e_connect.py", 0);

    let output = sandbox.run(&["--broker", "definitely-not-a-broker-e2e"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(sandbox.journal_lines().is_empty());

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("definitely-not-a-broker-e2e"), "stderr: {stderr}");
}

#[test]
#[serial]
fn test_mocks_lead_search_path_for_every_child() {
    let sandbox = Sandbox::new();
    let case_path = sandbox.root().join("case.path");
    sandbox.add_case_body(
        "e2e_mocks.py",
        &format!("echo \"$MICROPYPATH\" > {}", case_path.display()),
    );

    let output = sandbox.run(&[]);
    assert_eq!(output.status.code(), Some(0));

    let root = fs::canonicalize(sandbox.root()).unwrap();
    let mocks = root.join("tests/mocks");
    for file in [sandbox.root().join("broker.path"), case_path] {
        let value = fs::read_to_string(&file).unwrap();
        let entries: Vec<&str> = value.trim().split(':').collect();
        assert_eq!(fs::canonicalize(entries[0]).unwrap(), mocks);
        assert_eq!(fs::canonicalize(entries[1]).unwrap(), root);
        assert_eq!(entries[2], ".frozen");
        assert_eq!(entries[4], "/usr/lib/micropython");
    }
}

#[test]
#[serial]
fn test_timed_out_case_fails_but_batch_continues() {
    let sandbox = Sandbox::new();
    sandbox.add_case_body("e2e_hang.py", "exec sleep 30");
    sandbox.add_case("e2e_after.py", 0);

    let output = sandbox.run(&["--test-timeout", "1"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(sandbox.journal_lines().contains(&"e2e_after.py".to_string()));

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("TIMEOUT"), "stdout: {stdout}");
}

#[test]
#[serial]
fn test_list_does_not_start_broker() {
    let sandbox = Sandbox::new();
    sandbox.add_case("e2e_connect.py", 0);

    let output = sandbox.run(&["--list"]);
    assert_eq!(output.status.code(), Some(0));
    assert_eq!(stdout_lines(&output), vec!["tests/e2e/e2e_connect.py"]);
    assert!(sandbox.journal_lines().is_empty());
}

#[test]
#[serial]
fn test_json_report_names_failures() {
    let sandbox = Sandbox::new();
    sandbox.add_case("e2e_publish.py", 2);

    let output = sandbox.run(&["--report", "report.json"]);
    assert_eq!(output.status.code(), Some(1));

    let report: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(sandbox.root().join("report.json")).unwrap())
            .unwrap();
    assert_eq!(report["any_failed"], serde_json::json!(true));
    assert_eq!(
        report["results"][0]["outcome"],
        serde_json::json!({"status": "failed", "exit_code": 2})
    );
}

#[test]
#[serial]
fn test_config_loading_is_logged() {
    let sandbox = Sandbox::new();

    let output = sandbox.run(&["--log-level", "info", "--list"]);
    assert_eq!(output.status.code(), Some(0));

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Loaded configuration from file"), "stderr: {stderr}");
}

#[test]
#[serial]
fn test_malformed_port_is_rejected() {
    let sandbox = Sandbox::new();
    sandbox.add_case("e2e_connect.py", 0);

    let output = sandbox.run(&["--broker-port", "18830x"]);
    assert_ne!(output.status.code(), Some(0));
    assert!(sandbox.journal_lines().is_empty());
}
