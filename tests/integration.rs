#![cfg(unix)]

use assert_cmd::Command;
use assert_fs::TempDir;
use assert_fs::prelude::*;
use predicates::prelude::*;

/// Points the config lookup at an empty temporary directory so a developer's
/// own config file cannot leak into the tests.
fn cmdprobe_cmd(config_home: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("cmdprobe").unwrap();
    cmd.env("XDG_CONFIG_HOME", config_home.path());
    cmd.env("HOME", config_home.path());
    cmd.env("NO_COLOR", "1");
    cmd
}

// ---- Default output tests ----

#[test]
fn single_iteration_prints_first_iteration() {
    let tmp = TempDir::new().unwrap();
    cmdprobe_cmd(&tmp)
        .args(["sleep 0.1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("====> First Iteration <===="))
        .stdout(predicate::str::contains("Runtime: "))
        .stdout(predicate::str::contains("Exit code: 0"))
        .stdout(predicate::str::contains("Statistics").not())
        .stderr(predicate::str::contains("Benchmarking started.."))
        .stderr(predicate::str::contains("Last runtime: "));
}

#[test]
fn multiple_iterations_print_statistics() {
    let tmp = TempDir::new().unwrap();
    cmdprobe_cmd(&tmp)
        .args(["-i", "2", "sleep 0.05"])
        .assert()
        .success()
        .stdout(predicate::str::contains("====> Statistics <===="))
        .stdout(predicate::str::contains("(mean: "))
        .stdout(predicate::str::contains("First Iteration").not())
        .stderr(predicate::str::contains("Last runtime: ").count(2));
}

// ---- Print selector tests ----

#[test]
fn selected_sections_only() {
    let tmp = TempDir::new().unwrap();
    cmdprobe_cmd(&tmp)
        .args(["-i", "2", "-a", "-A", "true"])
        .assert()
        .success()
        .stdout(predicate::str::contains("====> Averages <===="))
        .stdout(predicate::str::contains("====> All Iterations <===="))
        .stdout(predicate::str::contains("====> Iteration #2 <===="))
        .stdout(predicate::str::contains("====> Statistics <====").not());
}

#[test]
fn values_section() {
    let tmp = TempDir::new().unwrap();
    cmdprobe_cmd(&tmp)
        .args(["-v", "-i", "2", "sh -c 'exit 0'"])
        .assert()
        .success()
        .stdout(predicate::str::contains("====> Values <===="))
        .stdout(predicate::str::contains("Exit code: [0, 0]"));
}

// ---- JSON tests ----

#[test]
fn json_output_is_valid() {
    let tmp = TempDir::new().unwrap();
    let output = cmdprobe_cmd(&tmp)
        .args(["--json", "-i", "2", "sh", "-c", "echo hello; exit 3"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let iterations = json.as_array().unwrap();
    assert_eq!(iterations.len(), 2);
    for iteration in iterations {
        assert_eq!(iteration["process"]["stdout"], "hello\n");
        assert_eq!(iteration["process"]["exit_code"], 3);
        let ts = &iteration["time_series"];
        let len = ts["sample_milliseconds"].as_array().unwrap().len();
        assert_eq!(ts["cpu_percentages"].as_array().unwrap().len(), len);
        assert_eq!(ts["memory_bytes"].as_array().unwrap().len(), len);
    }
}

#[test]
fn trailing_arguments_keep_their_quoting() {
    let tmp = TempDir::new().unwrap();
    let output = cmdprobe_cmd(&tmp)
        .args(["--json", "--no-accounting", "printf", "%s|", "it's", "two words"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json[0]["process"]["stdout"], "it's|two words|");
}

// ---- Error tests ----

#[test]
fn missing_command_fails() {
    let tmp = TempDir::new().unwrap();
    cmdprobe_cmd(&tmp)
        .args(["cmdprobe-no-such-program"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("Command not found: cmdprobe-no-such-program"));
}

#[test]
fn zero_iterations_fails() {
    let tmp = TempDir::new().unwrap();
    cmdprobe_cmd(&tmp)
        .args(["-i", "0", "true"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains(">= 1"));
}

#[test]
fn unterminated_quote_fails() {
    let tmp = TempDir::new().unwrap();
    cmdprobe_cmd(&tmp)
        .args(["echo 'oops"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unterminated quote"));
}

#[test]
fn command_is_required() {
    let tmp = TempDir::new().unwrap();
    cmdprobe_cmd(&tmp).assert().failure();
}

// ---- Config tests ----

#[test]
fn malformed_config_fails() {
    let tmp = TempDir::new().unwrap();
    tmp.child("cmdprobe/config.toml")
        .write_str("sampling_interval_ms = \"often\"\n")
        .unwrap();

    cmdprobe_cmd(&tmp)
        .args(["true"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to parse config file"));
}

#[test]
fn config_file_is_applied() {
    let tmp = TempDir::new().unwrap();
    tmp.child("cmdprobe/config.toml")
        .write_str("use_accounting_utility = false\nsampling_interval_ms = 5\nlog_level = \"debug\"\n")
        .unwrap();

    cmdprobe_cmd(&tmp)
        .args(["sleep 0.05"])
        .assert()
        .success()
        .stderr(predicate::str::contains("accounting utility=None"));
}
