//! Integration tests for the tidestomes binary
//!
//! Runs the compiled CLI against a local mock upstream with a scrubbed
//! environment, so no real API keys or network access are involved.

use std::path::Path;
use std::process::Command;

use mockito::Matcher;
use serde_json::Value;

const ENV_VARS: [&str; 8] = [
    "OPENWEATHER_API_KEY",
    "OPENWEATHER_BASE_URL",
    "GFW_API_TOKEN",
    "GFW_API_BASE_URL",
    "MARINE_FEATURES_BASE_URL",
    "TIDES_CACHE_DIR",
    "TIDES_LOG",
    "RUST_LOG",
];

/// Helper to run the CLI with given args and env, from an empty directory
fn run_cli(dir: &Path, args: &[&str], env: &[(&str, &str)]) -> std::process::Output {
    let mut command = Command::new(env!("CARGO_BIN_EXE_tidestomes"));
    command.current_dir(dir).args(args);
    for var in ENV_VARS {
        command.env_remove(var);
    }
    command
        .env("API_RETRY_ATTEMPTS", "2")
        .env("API_RETRY_DELAY_SECS", "0")
        .env("API_TIMEOUT_SECS", "5");
    for (key, value) in env {
        command.env(key, value);
    }
    command.output().expect("Failed to execute tidestomes")
}

fn stdout_json(output: &std::process::Output) -> Value {
    let stdout = String::from_utf8_lossy(&output.stdout);
    serde_json::from_str(&stdout).unwrap_or_else(|e| panic!("stdout is not JSON ({e}): {stdout}"))
}

#[test]
fn test_help_flag_exits_successfully() {
    let dir = tempfile::tempdir().unwrap();
    let output = run_cli(dir.path(), &["--help"], &[]);
    assert!(output.status.success(), "Expected --help to exit successfully");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("tidestomes"), "Help should mention tidestomes");
    assert!(stdout.contains("weather"), "Help should list the weather command");
    assert!(stdout.contains("events"), "Help should list the events command");
}

#[test]
fn test_invalid_region_prints_error_and_exits() {
    let dir = tempfile::tempdir().unwrap();
    let output = run_cli(dir.path(), &["weather", "--region", "narnia"], &[]);
    assert!(!output.status.success(), "Expected invalid region to fail");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("Invalid region") && stderr.contains("narnia"),
        "Should print error message about invalid region: {}",
        stderr
    );
}

#[test]
fn test_keys_reports_missing_credentials() {
    let dir = tempfile::tempdir().unwrap();
    let output = run_cli(dir.path(), &["keys"], &[("GFW_API_TOKEN", "token")]);
    assert!(output.status.success());

    let json = stdout_json(&output);
    assert_eq!(json["openweather"], Value::Bool(false));
    assert_eq!(json["global_fishing_watch"], Value::Bool(true));
    assert_eq!(json["missing"], serde_json::json!(["OPENWEATHER_API_KEY"]));
}

#[test]
fn test_missing_api_key_is_a_hard_failure() {
    let dir = tempfile::tempdir().unwrap();
    let output = run_cli(dir.path(), &["weather", "--no-disk-cache"], &[]);
    assert!(!output.status.success(), "Expected missing key to fail");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("MissingCredentials") || stderr.contains("credentials"), "{}", stderr);
    assert!(output.stdout.is_empty());
}

#[test]
fn test_weather_prints_live_status() {
    let mut server = mockito::Server::new();
    let mock = server
        .mock("GET", "/weather")
        .match_query(Matcher::UrlEncoded("appid".into(), "test-key".into()))
        .with_status(200)
        .with_body(r#"{"main": {"temp": 9.4, "humidity": 84, "pressure": 1004}, "wind": {"speed": 7.2}, "weather": [{"description": "light rain"}]}"#)
        .create();
    let dir = tempfile::tempdir().unwrap();
    let url = server.url();

    let output = run_cli(
        dir.path(),
        &["weather", "--region", "islay", "--no-disk-cache"],
        &[("OPENWEATHER_API_KEY", "test-key"), ("OPENWEATHER_BASE_URL", &url)],
    );

    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let json = stdout_json(&output);
    assert_eq!(json["status"], "live");
    assert_eq!(json["payload"]["region_id"], "islay");
    assert_eq!(json["payload"]["description"], "light rain");
    mock.assert();
}

#[test]
fn test_outage_prints_fallback_status_and_succeeds() {
    let mut server = mockito::Server::new();
    let mock = server
        .mock("GET", "/weather")
        .match_query(Matcher::Any)
        .with_status(503)
        .expect(2)
        .create();
    let dir = tempfile::tempdir().unwrap();
    let url = server.url();

    let output = run_cli(
        dir.path(),
        &["weather", "--region", "aberlour", "--no-disk-cache"],
        &[("OPENWEATHER_API_KEY", "test-key"), ("OPENWEATHER_BASE_URL", &url)],
    );

    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let json = stdout_json(&output);
    assert_eq!(json["status"], "fallback");
    assert!(json["stored_at"].is_null());
    assert_eq!(json["payload"]["description"], "overcast clouds");
    mock.assert();
}

#[test]
fn test_disk_cache_serves_stale_data_across_runs() {
    let dir = tempfile::tempdir().unwrap();
    let cache_dir = dir.path().join("cache");
    let cache_dir = cache_dir.to_str().unwrap();

    let mut server = mockito::Server::new();
    let ok = server
        .mock("GET", "/weather")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(r#"{"main": {"temp": 6.1, "humidity": 74}}"#)
        .expect(1)
        .create();
    let url = server.url();
    let env = [
        ("OPENWEATHER_API_KEY", "test-key"),
        ("OPENWEATHER_BASE_URL", url.as_str()),
        ("TIDES_CACHE_DIR", cache_dir),
        // one second TTL so the second run sees an expired entry
        ("CACHE_TTL_WEATHER_SECS", "1"),
    ];

    let first = run_cli(dir.path(), &["weather", "--region", "glasgow"], &env);
    assert!(first.status.success(), "{}", String::from_utf8_lossy(&first.stderr));
    assert_eq!(stdout_json(&first)["status"], "live");
    ok.assert();

    let _down = server
        .mock("GET", "/weather")
        .match_query(Matcher::Any)
        .with_status(500)
        .create();
    std::thread::sleep(std::time::Duration::from_millis(1100));

    let second = run_cli(dir.path(), &["weather", "--region", "glasgow"], &env);
    assert!(second.status.success(), "{}", String::from_utf8_lossy(&second.stderr));
    let json = stdout_json(&second);
    assert_eq!(json["status"], "stale");
    assert_eq!(json["payload"]["ambient_temp"], 6.1);
}
