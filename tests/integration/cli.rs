use anyhow::Result;
use assert_cmd::Command;
use assert_cmd::assert::OutputAssertExt;
use overlay_updater::test_utils::{AppFixture, TestServer};
use predicates::prelude::*;
use std::path::{Path, PathBuf};

use super::{PACKAGE_PATH, installed_150, package_server};

/// Config file next to (not inside) the application directory.
fn write_config(fixture: &AppFixture, api_base_url: &str) -> Result<PathBuf> {
    let path = fixture.outside("config.toml");
    std::fs::write(
        &path,
        format!(
            r#"
[app]
name = "GameOverlay"
executable = "GameOverlay"

[upgrade]
api_base_url = "{api_base_url}"
min_download_bytes = 16
min_backup_bytes = 16
use_system_proxy = false
"#
        ),
    )?;
    Ok(path)
}

fn updater(config: &Path, app_dir: &Path) -> Result<Command> {
    let mut cmd = Command::cargo_bin("overlay-updater")?;
    cmd.arg("--config")
        .arg(config)
        .arg("--app-dir")
        .arg(app_dir)
        .arg("--no-progress")
        .env_remove("RUST_LOG");
    Ok(cmd)
}

#[test]
fn test_help_lists_commands() -> Result<()> {
    Command::cargo_bin("overlay-updater")?
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("install"))
        .stdout(predicate::str::contains("rollback"))
        .stdout(predicate::str::contains("resume"));
    Ok(())
}

#[test]
fn test_status_reports_installed_version() -> Result<()> {
    let fixture = installed_150()?;
    let config = write_config(&fixture, "http://127.0.0.1:9")?;

    updater(&config, fixture.app_dir())?
        .args(["status", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""version": "1.5.0""#))
        .stdout(predicate::str::contains(r#""backups": 0"#));
    Ok(())
}

#[test]
fn test_backups_when_none_exist() -> Result<()> {
    let fixture = installed_150()?;
    let config = write_config(&fixture, "http://127.0.0.1:9")?;

    updater(&config, fixture.app_dir())?
        .arg("backups")
        .assert()
        .success()
        .stdout(predicate::str::contains("No backups found"));
    Ok(())
}

#[test]
fn test_rollback_to_missing_backup_fails() -> Result<()> {
    let fixture = installed_150()?;
    let config = write_config(&fixture, "http://127.0.0.1:9")?;

    updater(&config, fixture.app_dir())?
        .args(["rollback", "GameOverlay_v0.9.0_20240101_000000.zip"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found"));
    Ok(())
}

#[test]
fn test_resume_with_nothing_pending() -> Result<()> {
    let fixture = installed_150()?;
    let config = write_config(&fixture, "http://127.0.0.1:9")?;

    updater(&config, fixture.app_dir())?
        .arg("resume")
        .assert()
        .success()
        .stdout(predicate::str::contains("Nothing to resume"));
    Ok(())
}

#[test]
fn test_install_requires_url_with_version() -> Result<()> {
    let fixture = installed_150()?;
    let config = write_config(&fixture, "http://127.0.0.1:9")?;

    updater(&config, fixture.app_dir())?
        .args(["install", "1.6.0"])
        .assert()
        .failure();
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn test_install_from_url() -> Result<()> {
    let fixture = installed_150()?;
    let server = package_server().await?;
    let config = write_config(&fixture, server.base_url())?;
    let mut cmd = updater(&config, fixture.app_dir())?;
    cmd.args(["install", "1.6.0", &server.url(PACKAGE_PATH)]);

    let output = tokio::task::spawn_blocking(move || cmd.output()).await??;

    output
        .assert()
        .success()
        .stdout(predicate::str::contains("Now running version"))
        .stdout(predicate::str::contains("1.6.0"));
    assert_eq!(fixture.read("GameOverlay")?, "exe 1.6.0");
    assert_eq!(fixture.read("version.txt")?, "1.6.0");
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn test_check_reports_available_update() -> Result<()> {
    let fixture = installed_150()?;
    let release = serde_json::json!({
        "tag_name": "v1.6.0",
        "html_url": "https://example/releases/v1.6.0",
        "body": "Faster overlay",
        "draft": false,
        "prerelease": false,
        "assets": [{ "name": "GameOverlay-1.6.0.zip", "browser_download_url": "https://dl.example/GameOverlay-1.6.0.zip" }]
    });
    let server = TestServer::start(vec![(
        "/repos/overlay-team/game-overlay/releases/latest",
        200,
        serde_json::to_vec(&release)?,
    )])
    .await?;
    let config = write_config(&fixture, server.base_url())?;
    let mut cmd = updater(&config, fixture.app_dir())?;
    cmd.arg("check");

    let output = tokio::task::spawn_blocking(move || cmd.output()).await??;

    output
        .assert()
        .success()
        .stdout(predicate::str::contains("Update available"))
        .stdout(predicate::str::contains("Faster overlay"));
    Ok(())
}
