#![allow(deprecated)] // cargo_bin is deprecated but still functional

use assert_cmd::Command;
use predicates::str::contains;
use std::path::Path;
use tempfile::TempDir;

const CONFIG: &str = r#"
[policy]
id = 7
name = "media"
type = "ks3"
bucket_name = "media-bucket"
server = "ks3-cn-beijing.ksyuncs.com"
access_key = "ak"
secret_key = "sk"

[policy.settings]
chunk_size = 5242880
thumb_generator_proxy = true

[upload]
site_url = "https://depot.example.com"
"#;

fn depot() -> Command {
    let mut cmd = Command::cargo_bin("depot").unwrap();
    for (key, _) in std::env::vars() {
        if key.starts_with("DEPOT_") {
            cmd.env_remove(key);
        }
    }
    cmd
}

fn write_config(dir: &Path, contents: &str) -> std::path::PathBuf {
    let path = dir.join("depot.toml");
    std::fs::write(&path, contents).unwrap();
    path
}

#[test]
fn help_lists_commands() {
    depot()
        .arg("--help")
        .assert()
        .success()
        .stdout(contains("token"))
        .stdout(contains("archive-ls"))
        .stdout(contains("complete"));
}

#[test]
fn missing_configuration_is_reported() {
    let temp = TempDir::new().unwrap();

    depot()
        .arg("--config")
        .arg(temp.path().join("missing.toml"))
        .arg("check")
        .assert()
        .failure()
        .stderr(contains("No configuration provided"));
}

#[test]
fn check_prints_policy_and_capabilities() {
    let temp = TempDir::new().unwrap();
    let config = write_config(temp.path(), CONFIG);

    depot()
        .arg("--config")
        .arg(&config)
        .arg("check")
        .assert()
        .success()
        .stdout(contains("policy: media (ks3)"))
        .stdout(contains("chunk_size: 5242880"))
        .stdout(contains("UploadSentinelRequired"))
        .stdout(contains("thumb_proxy: true"))
        .stdout(contains("max_source_expire: 604800s"));
}

#[test]
fn environment_overrides_file() {
    let temp = TempDir::new().unwrap();
    let config = write_config(temp.path(), CONFIG);

    depot()
        .env("DEPOT_POLICY__BUCKET_NAME", "from-env")
        .arg("--config")
        .arg(&config)
        .arg("check")
        .assert()
        .success()
        .stdout(contains("bucket: from-env"));
}

#[test]
fn config_from_environment_only() {
    let temp = TempDir::new().unwrap();

    depot()
        .env("DEPOT_POLICY__BUCKET_NAME", "env-bucket")
        .env("DEPOT_POLICY__SERVER", "http://localhost:9000")
        .arg("--config")
        .arg(temp.path().join("missing.toml"))
        .arg("check")
        .assert()
        .success()
        .stdout(contains("bucket: env-bucket"))
        .stdout(contains("(s3)"));
}

#[test]
fn invalid_policy_is_rejected() {
    let temp = TempDir::new().unwrap();
    let config = write_config(
        temp.path(),
        r#"
        [policy]
        bucket_name = "media"
        secret_key = "sk"
        "#,
    );

    depot()
        .arg("--config")
        .arg(&config)
        .arg("check")
        .assert()
        .failure()
        .stderr(contains("invalid configuration"));
}

#[test]
fn complete_without_session_file_fails() {
    let temp = TempDir::new().unwrap();
    let config = write_config(temp.path(), CONFIG);

    depot()
        .arg("--config")
        .arg(&config)
        .arg("complete")
        .arg("--session")
        .arg(temp.path().join("none.json"))
        .assert()
        .failure()
        .stderr(contains("failed to read session file"));
}
