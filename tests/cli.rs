//! Operator CLI smoke tests.

use std::fs;
use std::path::Path;

use assert_cmd::Command;

const DOMAINS: &str = r#"
[[domain]]
id = 0
name = "untrusted"
ceiling = "el0"

[[domain]]
id = 2
name = "trusted-daemons"
ceiling = "el0"
regions = ["region-a"]
"#;

const RULES: &str = r#"
default_domain = 0

[[rule]]
pattern = "/usr/bin/trusted-*"
domain = 2
"#;

const SCENARIO: &str = r#"
[[step]]
spawn = { task = 1 }

[[step]]
exec = { task = 1, path = "/usr/bin/trusted-daemon" }

[[step]]
op = { task = 1, capability = { region = "region-b" } }

[[step]]
op = { task = 1, capability = { region = "region-a" } }
"#;

fn write_fixture(dir: &Path) -> std::path::PathBuf {
    fs::write(dir.join("domains.toml"), DOMAINS).expect("write domains");
    fs::write(dir.join("rules.toml"), RULES).expect("write rules");
    fs::write(dir.join("scenario.toml"), SCENARIO).expect("write scenario");
    let config = format!(
        r#"
[paths]
domains_file = "{}"
rules_file = "{}"
audit_export = "{}"
"#,
        dir.join("domains.toml").display(),
        dir.join("rules.toml").display(),
        dir.join("audit.jsonl").display(),
    );
    let config_path = dir.join("straylight.toml");
    fs::write(&config_path, config).expect("write config");
    config_path
}

fn run(config: &Path, args: &[&str]) -> std::process::Output {
    let mut cmd = Command::cargo_bin("straylight").expect("binary");
    cmd.arg("--config").arg(config);
    cmd.args(args);
    cmd.output().expect("run binary")
}

#[test]
fn check_accepts_valid_configuration() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = write_fixture(dir.path());

    let output = run(&config, &["check"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("domains: 2"), "stdout: {stdout}");
    assert!(stdout.contains("rules: 1"), "stdout: {stdout}");
    assert!(stdout.contains("default domain: 0"), "stdout: {stdout}");
    assert!(stdout.contains("ok"), "stdout: {stdout}");
}

#[test]
fn check_rejects_rule_with_unknown_domain() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = write_fixture(dir.path());
    fs::write(
        dir.path().join("rules.toml"),
        "[[rule]]\npattern = \"/usr/bin/x\"\ndomain = 42\n",
    )
    .expect("overwrite rules");

    let output = run(&config, &["check"]);
    assert!(!output.status.success());
}

#[test]
fn classify_resolves_domain_and_name() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = write_fixture(dir.path());

    let output = run(&config, &["classify", "/usr/bin/trusted-daemon"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(
        stdout.contains("domain 2 (trusted-daemons)"),
        "stdout: {stdout}"
    );
}

#[test]
fn classify_reports_default_for_unmatched_path() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = write_fixture(dir.path());

    let output = run(&config, &["classify", "/tmp/payload"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("domain 0 (untrusted)"), "stdout: {stdout}");
}

#[test]
fn simulate_replays_scenario_and_exports_audit() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = write_fixture(dir.path());

    let output = run(
        &config,
        &[
            "simulate",
            &dir.path().join("scenario.toml").display().to_string(),
        ],
    );
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("domain 2"), "stdout: {stdout}");
    assert!(stdout.contains("deny"), "stdout: {stdout}");
    assert!(stdout.contains("allow"), "stdout: {stdout}");

    // The denied op must have landed in the exported audit log.
    let export = fs::read_to_string(dir.path().join("audit.jsonl")).expect("read export");
    let line = export.lines().next().expect("one record");
    let record: serde_json::Value = serde_json::from_str(line).expect("valid JSON");
    assert!(record["kind"]["elevation_denied"].is_object());
}
