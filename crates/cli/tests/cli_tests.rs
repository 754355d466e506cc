//! CLI integration tests

use std::io::Write;
use std::process::Command;

fn dcp(args: &[&str]) -> std::process::Output {
    Command::new("cargo")
        .args(["run", "-p", "dcp-cli", "--quiet", "--"])
        .args(args)
        .output()
        .expect("Failed to execute command")
}

/// Test that the CLI shows help
#[test]
fn test_cli_help() {
    let output = dcp(&["--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI help should succeed");
    assert!(
        stdout.contains("Datacenter Energy Predictor"),
        "Should show app name"
    );
    assert!(stdout.contains("resolve"), "Should show resolve command");
    assert!(stdout.contains("query"), "Should show query command");
    assert!(stdout.contains("nodes"), "Should show nodes command");
}

/// Test that the CLI shows version
#[test]
fn test_cli_version() {
    let output = dcp(&["--version"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI version should succeed");
    assert!(stdout.contains("dcp"), "Should show binary name");
}

/// Test resolve subcommand help
#[test]
fn test_resolve_help() {
    let output = dcp(&["resolve", "--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "Resolve help should succeed");
    assert!(stdout.contains("--metadata"), "Should show metadata option");
    assert!(
        stdout.contains("--selection"),
        "Should show selection option"
    );
    assert!(stdout.contains("--lenient"), "Should show lenient option");
    assert!(stdout.contains("DCP_METADATA"), "Should show env var");
}

/// Test query subcommand help
#[test]
fn test_query_help() {
    let output = dcp(&["query", "--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "Query help should succeed");
    assert!(
        stdout.contains("--starttime"),
        "Should show starttime option"
    );
    assert!(stdout.contains("--endtime"), "Should show endtime option");
    assert!(
        stdout.contains("--aggregation"),
        "Should show aggregation option"
    );
}

/// Test format option
#[test]
fn test_format_option() {
    let output = dcp(&["--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(stdout.contains("--format"), "Should show format option");
    assert!(stdout.contains("table"), "Should show table format");
    assert!(stdout.contains("json"), "Should show json format");
}

/// Test resolving an everything-selection against a metadata file
#[test]
fn test_resolve_all_selection() {
    let mut metadata = tempfile::NamedTempFile::new().expect("temp file");
    write!(
        metadata,
        r#"{{
            "dc1": {{
                "time_interval": 60,
                "device_types": {{
                    "sensor_attribute": {{
                        "temperature": {{
                            "devices": ["s1", "s2"],
                            "attribute": {{"type": "continuous", "unit": "c"}}
                        }}
                    }}
                }}
            }}
        }}"#
    )
    .expect("write metadata");

    let path = metadata.path().to_str().expect("utf-8 path");
    let output = dcp(&["--format", "json", "resolve", "--metadata", path, "dc1"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "Resolve should succeed: {stdout}");
    assert!(stdout.contains("sensor_attribute"), "Should list device type");
    assert!(stdout.contains("temperature"), "Should list measurement");
    assert!(stdout.contains("s1"), "Should list devices");
}

/// Test strict resolution fails on unknown names
#[test]
fn test_resolve_unknown_datacenter() {
    let mut metadata = tempfile::NamedTempFile::new().expect("temp file");
    write!(metadata, r#"{{"dc1": {{"time_interval": 60}}}}"#).expect("write metadata");

    let path = metadata.path().to_str().expect("utf-8 path");
    let output = dcp(&["resolve", "--metadata", path, "dc9"]);

    assert!(!output.status.success(), "Unknown datacenter should fail");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("dc9") || stderr.contains("not exist"),
        "Should name the missing record"
    );
}

/// Test invalid command error handling
#[test]
fn test_invalid_command() {
    let output = dcp(&["invalid-command"]);

    assert!(!output.status.success(), "Invalid command should fail");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("error") || stderr.contains("invalid"),
        "Should show error message"
    );
}

/// Test missing required argument error handling
#[test]
fn test_missing_argument() {
    let output = dcp(&["resolve"]);

    assert!(!output.status.success(), "Missing argument should fail");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("required") || stderr.contains("error"),
        "Should show error about missing argument"
    );
}
