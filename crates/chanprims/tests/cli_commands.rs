#![cfg(all(unix, feature = "cli"))]

use std::process::{Command, Output};

use serde_json::Value;

fn run(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_chanprims"))
        .args(["--log-level", "error", "--format", "json"])
        .args(args)
        .output()
        .expect("chanprims should run")
}

fn json_stdout(output: &Output) -> Value {
    let stdout = String::from_utf8_lossy(&output.stdout);
    serde_json::from_str(stdout.trim()).expect("stdout should be a JSON document")
}

fn end<'a>(report: &'a Value, role: &str) -> &'a Value {
    report["ends"]
        .as_array()
        .expect("ends should be an array")
        .iter()
        .find(|end| end["role"] == role)
        .unwrap_or_else(|| panic!("missing end {role}"))
}

#[test]
fn pair_reports_shared_token_and_delivered_ping() {
    let output = run(&["pair", "input events"]);
    assert!(output.status.success(), "{output:?}");

    let report = json_stdout(&output);
    assert_eq!(report["command"], "pair");
    assert_eq!(report["name"], "input events");
    assert_eq!(report["ping"]["delivered"], true);

    let token = report["token"].clone();
    assert_eq!(end(&report, "server")["token"], token);
    assert_eq!(end(&report, "client")["token"], token);
    assert_eq!(end(&report, "server")["state"], "active");
}

#[test]
fn pair_over_stream_sockets() {
    let output = run(&["pair", "streamed", "--kind", "stream", "--buffer-size", "8192"]);
    assert!(output.status.success(), "{output:?}");
    assert_eq!(json_stdout(&output)["kind"], "stream");
}

#[test]
fn dup_outlives_disposed_original() {
    let output = run(&["dup", "dup-check"]);
    assert!(output.status.success(), "{output:?}");

    let report = json_stdout(&output);
    assert_eq!(report["hook_fired"], 1);
    assert_eq!(report["identity_preserved"], true);
    assert_eq!(report["ping"]["delivered"], true);
    assert_eq!(end(&report, "original")["state"], "disposed");
    assert!(end(&report, "original")["token"].is_null());
    assert_eq!(end(&report, "duplicate")["state"], "active");
}

#[test]
fn transfer_moves_handle_through_parcel() {
    let output = run(&["transfer", "shipped"]);
    assert!(output.status.success(), "{output:?}");

    let report = json_stdout(&output);
    assert_eq!(report["identity_preserved"], true);
    assert_eq!(report["ping"]["delivered"], true);
    assert!(report["parcel_bytes"].as_u64().unwrap_or(0) > 0);
    assert_eq!(end(&report, "sender")["state"], "disposed");
    assert_eq!(end(&report, "received")["token"], report["token"]);
}

#[test]
fn zero_buffer_size_exits_with_usage() {
    let output = run(&["pair", "x", "--buffer-size", "0"]);
    assert_eq!(output.status.code(), Some(64));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("--buffer-size"));
}

#[test]
fn doctor_passes_locally() {
    let output = run(&["doctor"]);
    assert!(output.status.success(), "{output:?}");

    let report = json_stdout(&output);
    assert_eq!(report["overall"], "pass");
    let names: Vec<&str> = report["checks"]
        .as_array()
        .expect("checks should be an array")
        .iter()
        .filter_map(|check| check["name"].as_str())
        .collect();
    assert!(names.contains(&"descriptor_passing"));
}

#[test]
fn version_prints_package_version() {
    let output = Command::new(env!("CARGO_BIN_EXE_chanprims"))
        .arg("version")
        .output()
        .expect("version should run");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(
        stdout.trim(),
        format!("chanprims {}", env!("CARGO_PKG_VERSION"))
    );
}

#[test]
fn raw_format_prints_only_the_token() {
    let output = Command::new(env!("CARGO_BIN_EXE_chanprims"))
        .args(["--log-level", "error", "--format", "raw", "pair", "raw"])
        .output()
        .expect("pair should run");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.trim().contains(':'));
    assert_eq!(stdout.lines().count(), 1);
}
