use anyhow::Result;
use overlay_updater::core::ErrorKind;
use overlay_updater::test_utils::{RecordingHandoff, TestServer, zip_bytes};
use overlay_updater::upgrade::ledger::{Ledger, LedgerKind};
use overlay_updater::upgrade::{Completion, ResumeOutcome, UpdateState};

use super::{PACKAGE_PATH, installed_150, orchestrator, orchestrator_with, package_server};

#[tokio::test]
async fn test_full_update_from_nested_archive() -> Result<()> {
    let fixture = installed_150()?;
    let server = package_server().await?;
    let updater = orchestrator(&fixture, &[]);

    let completion = updater.install_update("1.6.0", &server.url(PACKAGE_PATH)).await?;

    assert!(matches!(completion, Completion::Finalized { ref version } if version == "1.6.0"));
    assert_eq!(fixture.read("GameOverlay")?, "exe 1.6.0");
    assert_eq!(fixture.read("data/new_feature.json")?, "{}");
    // Files the release does not ship are left alone.
    assert_eq!(fixture.read("data/settings.json")?, "user settings");
    assert!(!fixture.exists("GameOverlay-1.6.0"));
    assert_eq!(updater.resolver().current_version(), "1.6.0");

    let log = updater.session_log_text();
    assert!(log.contains("[INFO] Package sha256:"));
    assert!(log.contains("[SUCCESS] Updated to 1.6.0"));
    assert!(std::fs::read_to_string(updater.session_log_path())?.contains("Updated to 1.6.0"));
    Ok(())
}

#[tokio::test]
async fn test_corrupt_package_changes_nothing() -> Result<()> {
    let fixture = installed_150()?;
    let before = fixture.snapshot()?;
    let server =
        TestServer::start(vec![(PACKAGE_PATH, 200, b"<html>this is not a zip archive</html>".to_vec())])
            .await?;
    let updater = orchestrator(&fixture, &[]);

    let failure = updater
        .install_update("1.6.0", &server.url(PACKAGE_PATH))
        .await
        .unwrap_err();

    assert_eq!(failure.kind, ErrorKind::Integrity);
    assert_eq!(fixture.snapshot()?, before);
    assert!(updater.list_backups().await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_escaping_entry_aborts_before_install() -> Result<()> {
    let fixture = installed_150()?;
    let before = fixture.snapshot()?;
    let package = zip_bytes(&[("GameOverlay", b"exe 1.6.0"), ("../../../escape.txt", b"x")])?;
    let server = TestServer::start(vec![(PACKAGE_PATH, 200, package)]).await?;
    let updater = orchestrator(&fixture, &[]);

    let failure = updater
        .install_update("1.6.0", &server.url(PACKAGE_PATH))
        .await
        .unwrap_err();

    assert_eq!(failure.kind, ErrorKind::Integrity);
    assert_eq!(fixture.snapshot()?, before);
    // The backup was already taken and stays available.
    assert_eq!(updater.list_backups().await?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_unreachable_host_is_transient() -> Result<()> {
    let fixture = installed_150()?;
    let updater = orchestrator(&fixture, &[]);

    let failure = updater
        .install_update("1.6.0", &TestServer::unused_url().await?)
        .await
        .unwrap_err();

    assert_eq!(failure.kind, ErrorKind::TransientNetwork);
    assert_eq!(updater.last_error(), Some(failure));
    assert_eq!(updater.state(), UpdateState::Idle);
    Ok(())
}

#[tokio::test]
async fn test_deferred_helper_completes_on_next_start() -> Result<()> {
    let fixture = installed_150()?;
    let server = package_server().await?;

    let first_run = orchestrator(&fixture, &["OverlayHelper"]);
    let completion = first_run
        .install_update("1.6.0", &server.url(PACKAGE_PATH))
        .await?;
    assert!(matches!(completion, Completion::AwaitingRestart { deferred: 1, .. }));
    assert_eq!(fixture.read("OverlayHelper")?, "helper 1.5.0");
    assert_eq!(fixture.read("GameOverlay")?, "exe 1.6.0");
    drop(first_run);

    let second_run = orchestrator(&fixture, &[]);
    assert_eq!(second_run.resume_pending_if_any().await?, ResumeOutcome::Completed);
    assert_eq!(fixture.read("OverlayHelper")?, "helper 1.6.0");
    assert_eq!(second_run.resolver().current_version(), "1.6.0");
    assert!(!second_run.has_pending_operation());

    // Nothing left to do on the start after that.
    let third_run = orchestrator(&fixture, &[]);
    assert_eq!(third_run.resume_pending_if_any().await?, ResumeOutcome::NotActed);
    Ok(())
}

#[tokio::test]
async fn test_running_main_executable_is_handed_off() -> Result<()> {
    let fixture = installed_150()?;
    let server = package_server().await?;
    orchestrator(&fixture, &["GameOverlay"])
        .install_update("1.6.0", &server.url(PACKAGE_PATH))
        .await?;

    let record = Ledger::new(&fixture.paths, LedgerKind::Update).read()?.unwrap();
    assert_eq!(record.updates, vec!["GameOverlay"]);

    let handoff = RecordingHandoff::default();
    let next_start = orchestrator_with(&fixture, &["GameOverlay"], &handoff);
    assert_eq!(next_start.resume_pending_if_any().await?, ResumeOutcome::HandedOff);

    let plans = handoff.plans();
    assert_eq!(plans.len(), 1);
    let plan = &plans[0];
    assert_eq!(plan.extract_path, record.extract_path);
    assert_eq!(plan.source_root, record.extract_path.join("GameOverlay-1.6.0"));
    assert_eq!(plan.marker_path, fixture.paths.version_marker());
    assert_eq!(plan.record_path, fixture.paths.version_record());
    assert_eq!(plan.script_path, fixture.paths.handoff_script());
    assert_eq!(plan.app_dir, fixture.paths.app_dir());
    Ok(())
}

#[tokio::test]
async fn test_ledger_without_scratch_dir_is_discarded() -> Result<()> {
    let fixture = installed_150()?;
    let server = package_server().await?;
    orchestrator(&fixture, &["OverlayHelper"])
        .install_update("1.6.0", &server.url(PACKAGE_PATH))
        .await?;

    let record = Ledger::new(&fixture.paths, LedgerKind::Update).read()?.unwrap();
    std::fs::remove_dir_all(&record.extract_path)?;
    let before = fixture.snapshot()?;

    let next_start = orchestrator(&fixture, &[]);
    assert_eq!(next_start.resume_pending_if_any().await?, ResumeOutcome::NotActed);
    assert!(!next_start.has_pending_operation());
    assert_eq!(fixture.snapshot()?, before);
    assert_eq!(next_start.resolver().current_version(), "1.5.0");
    Ok(())
}
