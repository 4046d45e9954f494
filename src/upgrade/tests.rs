use super::*;
use crate::core::ErrorKind;
use crate::test_utils::{
    AppFixture, FakeProcessProbe, RecordingHandoff, TestServer, test_config, zip_bytes,
};
use crate::upgrade::ledger::{Ledger, LedgerKind, PendingOperationRecord};
use anyhow::Result;
use std::sync::Arc;

const OLD_FILES: &[(&str, &str)] = &[
    ("GameOverlay", "old exe"),
    ("OverlayHelper", "old helper"),
    ("data/maps.json", "old maps"),
];

fn release_zip() -> Result<Vec<u8>> {
    zip_bytes(&[
        ("GameOverlay", b"new exe"),
        ("OverlayHelper", b"new helper"),
        ("data/maps.json", b"new maps"),
        ("data/extra.json", b"extra"),
    ])
}

async fn serve(body: Vec<u8>) -> Result<(TestServer, String)> {
    let server = TestServer::start(vec![("/GameOverlay-1.6.0.zip", 200, body)]).await?;
    let url = server.url("/GameOverlay-1.6.0.zip");
    Ok((server, url))
}

fn orchestrator(fixture: &AppFixture, running: &[&str]) -> UpdateOrchestrator {
    let running = running.iter().map(|name| fixture.path(name)).collect();
    UpdateOrchestrator::new(fixture.paths.clone(), test_config())
        .with_process_probe(Arc::new(FakeProcessProbe::new(running)))
        .with_handoff(Arc::new(RecordingHandoff::default()))
}

fn drain(rx: &mut tokio::sync::broadcast::Receiver<UpdateEvent>) -> Vec<UpdateEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn temp_entries(fixture: &AppFixture) -> Vec<String> {
    std::fs::read_dir(fixture.paths.temp_dir())
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .collect()
        })
        .unwrap_or_default()
}

#[tokio::test]
async fn test_install_replaces_files_and_commits_version() -> Result<()> {
    let fixture = AppFixture::installed("1.5.0", OLD_FILES)?;
    let (_server, url) = serve(release_zip()?).await?;
    let updater = orchestrator(&fixture, &[]);

    let completion = updater.install_update("1.6.0", &url).await?;

    assert_eq!(
        completion,
        Completion::Finalized {
            version: "1.6.0".to_string()
        }
    );
    assert_eq!(fixture.read("GameOverlay")?, "new exe");
    assert_eq!(fixture.read("data/maps.json")?, "new maps");
    assert_eq!(fixture.read("data/extra.json")?, "extra");
    assert_eq!(fixture.read("version.txt")?, "1.6.0");
    assert_eq!(updater.resolver().current_version(), "1.6.0");
    assert_eq!(updater.resolver().read_record().unwrap().version, "1.6.0");

    let backups = updater.list_backups().await?;
    assert_eq!(backups.len(), 1);
    assert_eq!(backups[0].version, "1.5.0");

    assert!(temp_entries(&fixture).is_empty(), "scratch data left: {:?}", temp_entries(&fixture));
    assert!(!updater.has_pending_operation());
    assert_eq!(updater.state(), UpdateState::Idle);
    assert!(updater.last_error().is_none());
    Ok(())
}

#[tokio::test]
async fn test_install_walks_the_state_machine() -> Result<()> {
    let fixture = AppFixture::installed("1.5.0", OLD_FILES)?;
    let (_server, url) = serve(release_zip()?).await?;
    let updater = orchestrator(&fixture, &[]);
    let mut rx = updater.subscribe();

    updater.install_update("1.6.0", &url).await?;

    let events = drain(&mut rx);
    let states: Vec<UpdateState> = events
        .iter()
        .filter_map(|e| match e {
            UpdateEvent::StateChanged(state) => Some(*state),
            _ => None,
        })
        .collect();
    assert_eq!(
        states,
        vec![
            UpdateState::Downloading,
            UpdateState::BackingUp,
            UpdateState::Extracting,
            UpdateState::Installing,
            UpdateState::Finalizing,
            UpdateState::Idle,
        ]
    );
    assert!(events.iter().any(|e| matches!(
        e,
        UpdateEvent::Progress(ProgressUpdate { state: UpdateState::Installing, percent: Some(100), .. })
    )));
    assert!(events.iter().any(|e| matches!(e, UpdateEvent::Completed(Completion::Finalized { .. }))));
    Ok(())
}

#[tokio::test]
async fn test_extract_failure_leaves_app_dir_unchanged() -> Result<()> {
    let fixture = AppFixture::installed("1.5.0", OLD_FILES)?;
    let before = fixture.snapshot()?;
    let package = zip_bytes(&[("GameOverlay", b"new exe"), ("../../evil.txt", b"evil")])?;
    let (_server, url) = serve(package).await?;
    let updater = orchestrator(&fixture, &[]);
    let mut rx = updater.subscribe();

    let failure = updater.install_update("1.6.0", &url).await.unwrap_err();

    assert_eq!(failure.kind, ErrorKind::Integrity);
    assert_eq!(fixture.snapshot()?, before);
    assert!(temp_entries(&fixture).is_empty());
    assert!(!fixture.exists("evil.txt"));
    assert_eq!(updater.last_error(), Some(failure.clone()));
    assert!(drain(&mut rx).contains(&UpdateEvent::Error(failure)));
    assert_eq!(updater.resolver().current_version(), "1.5.0");
    assert_eq!(updater.state(), UpdateState::Idle);
    Ok(())
}

#[tokio::test]
async fn test_download_failure_makes_no_backup() -> Result<()> {
    let fixture = AppFixture::installed("1.5.0", OLD_FILES)?;
    let before = fixture.snapshot()?;
    let server = TestServer::start(vec![]).await?;
    let updater = orchestrator(&fixture, &[]);

    let failure = updater
        .install_update("1.6.0", &server.url("/missing.zip"))
        .await
        .unwrap_err();

    assert_eq!(failure.kind, ErrorKind::TransientNetwork);
    assert_eq!(fixture.snapshot()?, before);
    assert!(updater.list_backups().await?.is_empty());
    assert!(updater.session_log_text().contains("Download failed"));
    Ok(())
}

#[tokio::test]
async fn test_checksum_mismatch_aborts_before_backup() -> Result<()> {
    let fixture = AppFixture::installed("1.5.0", OLD_FILES)?;
    let before = fixture.snapshot()?;
    let (_server, url) = serve(release_zip()?).await?;
    let updater = orchestrator(&fixture, &[]);

    let failure = updater
        .install_with_checksum("1.6.0", &url, Some(&"0".repeat(64)))
        .await
        .unwrap_err();

    assert_eq!(failure.kind, ErrorKind::Integrity);
    assert_eq!(fixture.snapshot()?, before);
    assert!(updater.list_backups().await?.is_empty());
    assert!(temp_entries(&fixture).is_empty());
    Ok(())
}

#[tokio::test]
async fn test_running_file_is_deferred_to_ledger() -> Result<()> {
    let fixture = AppFixture::installed("1.5.0", OLD_FILES)?;
    let (_server, url) = serve(release_zip()?).await?;
    let updater = orchestrator(&fixture, &["OverlayHelper"]);

    let completion = updater.install_update("1.6.0", &url).await?;

    assert_eq!(
        completion,
        Completion::AwaitingRestart {
            version: "1.6.0".to_string(),
            deferred: 1
        }
    );
    assert_eq!(fixture.read("OverlayHelper")?, "old helper");
    assert_eq!(fixture.read("GameOverlay")?, "new exe");
    assert!(!fixture.exists("version.txt"));
    assert_eq!(updater.resolver().current_version(), "1.5.0");

    let record = Ledger::new(&fixture.paths, LedgerKind::Update).read()?.unwrap();
    assert_eq!(record.updates, vec!["OverlayHelper"]);
    assert_eq!(record.version.as_deref(), Some("1.6.0"));
    assert!(record.is_actionable());
    assert!(updater.has_pending_operation());
    Ok(())
}

#[tokio::test]
async fn test_pending_operation_blocks_new_install() -> Result<()> {
    let fixture = AppFixture::installed("1.5.0", OLD_FILES)?;
    let (server, url) = serve(release_zip()?).await?;
    let updater = orchestrator(&fixture, &["OverlayHelper"]);
    updater.install_update("1.6.0", &url).await?;
    let downloads = server.hits();

    let failure = updater.install_update("1.6.0", &url).await.unwrap_err();

    assert!(failure.to_string().contains("pending"));
    assert_eq!(server.hits(), downloads);
    assert_eq!(updater.list_backups().await?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_resume_completes_deferred_files() -> Result<()> {
    let fixture = AppFixture::installed("1.5.0", OLD_FILES)?;
    let (_server, url) = serve(release_zip()?).await?;
    orchestrator(&fixture, &["OverlayHelper"])
        .install_update("1.6.0", &url)
        .await?;
    let scratch = Ledger::new(&fixture.paths, LedgerKind::Update)
        .read()?
        .unwrap()
        .extract_path;

    // Next start: the helper is no longer running.
    let updater = orchestrator(&fixture, &[]);
    let mut rx = updater.subscribe();
    let outcome = updater.resume_pending_if_any().await?;

    assert_eq!(outcome, ResumeOutcome::Completed);
    assert_eq!(fixture.read("OverlayHelper")?, "new helper");
    assert_eq!(fixture.read("version.txt")?, "1.6.0");
    assert_eq!(updater.resolver().current_version(), "1.6.0");
    assert!(!updater.has_pending_operation());
    assert!(!scratch.exists());
    assert!(drain(&mut rx).contains(&UpdateEvent::Completed(Completion::Resumed {
        version: Some("1.6.0".to_string())
    })));

    assert_eq!(updater.resume_pending_if_any().await?, ResumeOutcome::NotActed);
    Ok(())
}

#[tokio::test]
async fn test_resume_keeps_ledger_while_file_is_locked() -> Result<()> {
    let fixture = AppFixture::installed("1.5.0", OLD_FILES)?;
    let (_server, url) = serve(release_zip()?).await?;
    orchestrator(&fixture, &["OverlayHelper"])
        .install_update("1.6.0", &url)
        .await?;

    // A non-empty directory in the way cannot be overwritten.
    std::fs::remove_file(fixture.path("OverlayHelper"))?;
    fixture.write("OverlayHelper/lock", "held")?;

    let updater = orchestrator(&fixture, &[]);
    let failure = updater.resume_pending_if_any().await.unwrap_err();

    assert_eq!(failure.kind, ErrorKind::FilesystemContention);
    let record = Ledger::new(&fixture.paths, LedgerKind::Update).read()?.unwrap();
    assert_eq!(record.updates, vec!["OverlayHelper"]);
    assert!(record.extract_path.exists());
    assert!(!fixture.exists("version.txt"));
    Ok(())
}

#[tokio::test]
async fn test_resume_hands_off_main_executable() -> Result<()> {
    let fixture = AppFixture::installed("1.5.0", OLD_FILES)?;
    let (_server, url) = serve(release_zip()?).await?;
    orchestrator(&fixture, &["GameOverlay"])
        .install_update("1.6.0", &url)
        .await?;

    let handoff = RecordingHandoff::default();
    let updater = UpdateOrchestrator::new(fixture.paths.clone(), test_config())
        .with_process_probe(Arc::new(FakeProcessProbe::new(vec![fixture.path("GameOverlay")])))
        .with_handoff(Arc::new(handoff.clone()));

    let outcome = updater.resume_pending_if_any().await?;

    assert_eq!(outcome, ResumeOutcome::HandedOff);
    let plans = handoff.plans();
    assert_eq!(plans.len(), 1);
    assert_eq!(plans[0].updates, vec!["GameOverlay"]);
    assert_eq!(plans[0].version.as_deref(), Some("1.6.0"));
    assert_eq!(plans[0].relaunch, fixture.paths.executable());
    assert_eq!(plans[0].ledger_path, fixture.paths.update_ledger());
    // The helper finishes the job; until then the ledger stays.
    assert!(updater.has_pending_operation());
    assert_eq!(fixture.read("GameOverlay")?, "old exe");
    Ok(())
}

#[tokio::test]
async fn test_failed_handoff_is_reported_and_ledger_kept() -> Result<()> {
    let fixture = AppFixture::installed("1.5.0", OLD_FILES)?;
    let (_server, url) = serve(release_zip()?).await?;
    orchestrator(&fixture, &["GameOverlay"])
        .install_update("1.6.0", &url)
        .await?;

    let updater = orchestrator(&fixture, &["GameOverlay"])
        .with_handoff(Arc::new(RecordingHandoff::failing()));
    assert!(updater.resume_pending_if_any().await.is_err());
    assert!(updater.has_pending_operation());
    Ok(())
}

#[tokio::test]
async fn test_resume_discards_ledger_with_missing_scratch_dir() -> Result<()> {
    let fixture = AppFixture::installed("1.5.0", OLD_FILES)?;
    let ledger = Ledger::new(&fixture.paths, LedgerKind::Update);
    ledger.write(&PendingOperationRecord::new(
        fixture.paths.temp_dir().join("update_20250101_000000"),
        vec!["GameOverlay".to_string()],
        Some("1.6.0".to_string()),
    ))?;
    let before = fixture.snapshot()?;

    let updater = orchestrator(&fixture, &[]);
    assert_eq!(updater.resume_pending_if_any().await?, ResumeOutcome::NotActed);

    assert!(!ledger.exists());
    assert_eq!(fixture.snapshot()?, before);
    assert!(updater.last_error().is_none());
    Ok(())
}

#[tokio::test]
async fn test_resume_discards_ledger_whose_files_are_gone() -> Result<()> {
    let fixture = AppFixture::installed("1.5.0", OLD_FILES)?;
    let scratch = fixture.paths.temp_dir().join("update_20250101_000000");
    std::fs::create_dir_all(&scratch)?;
    std::fs::write(scratch.join("other.txt"), "unrelated")?;
    let ledger = Ledger::new(&fixture.paths, LedgerKind::Update);
    ledger.write(&PendingOperationRecord::new(
        scratch.clone(),
        vec!["OverlayHelper".to_string()],
        Some("1.6.0".to_string()),
    ))?;

    let updater = orchestrator(&fixture, &[]);
    let failure = updater.resume_pending_if_any().await.unwrap_err();

    assert_eq!(failure.kind, ErrorKind::CorruptState);
    assert!(!ledger.exists());
    assert!(!scratch.exists());
    assert!(!updater.has_pending_operation());
    assert_eq!(fixture.read("OverlayHelper")?, "old helper");
    assert!(!fixture.exists("version.txt"));

    // Not retried on the next start, and new work is no longer blocked.
    assert_eq!(updater.resume_pending_if_any().await?, ResumeOutcome::NotActed);
    let (_server, url) = serve(release_zip()?).await?;
    updater.install_update("1.6.0", &url).await?;
    assert_eq!(fixture.read("OverlayHelper")?, "new helper");
    Ok(())
}

#[tokio::test]
async fn test_resume_finds_deferred_file_elsewhere_in_scratch() -> Result<()> {
    let fixture = AppFixture::installed("1.5.0", OLD_FILES)?;
    let scratch = fixture.paths.temp_dir().join("update_20250101_000000");
    std::fs::create_dir_all(scratch.join("bin"))?;
    std::fs::write(scratch.join("bin").join("OverlayHelper"), "moved helper")?;
    std::fs::write(scratch.join("readme.txt"), "x")?;
    Ledger::new(&fixture.paths, LedgerKind::Update).write(&PendingOperationRecord::new(
        scratch.clone(),
        vec!["OverlayHelper".to_string()],
        Some("1.6.0".to_string()),
    ))?;

    let updater = orchestrator(&fixture, &[]);
    assert_eq!(updater.resume_pending_if_any().await?, ResumeOutcome::Completed);
    assert_eq!(fixture.read("OverlayHelper")?, "moved helper");
    assert!(!updater.has_pending_operation());
    Ok(())
}

#[tokio::test]
async fn test_resume_discards_corrupt_ledger() -> Result<()> {
    let fixture = AppFixture::installed("1.5.0", OLD_FILES)?;
    fixture.write("pending_rollback.json", "{ not json")?;

    let updater = orchestrator(&fixture, &[]);
    assert_eq!(updater.resume_pending_if_any().await?, ResumeOutcome::NotActed);
    assert!(!fixture.exists("pending_rollback.json"));
    assert!(updater.session_log_text().contains("Discarding pending rollback"));
    Ok(())
}

#[tokio::test]
async fn test_rollback_restores_backup() -> Result<()> {
    let fixture = AppFixture::installed("1.5.0", OLD_FILES)?;
    let (_server, url) = serve(release_zip()?).await?;
    let updater = orchestrator(&fixture, &[]);
    updater.install_update("1.6.0", &url).await?;
    let backup = updater.list_backups().await?.remove(0);
    assert_eq!(backup.version, "1.5.0");

    // Distinct timestamp for the pre-rollback backup.
    tokio::time::sleep(std::time::Duration::from_millis(1100)).await;
    let completion = updater.rollback(&backup.file_name).await?;

    assert_eq!(
        completion,
        Completion::Finalized {
            version: "1.5.0".to_string()
        }
    );
    assert_eq!(fixture.read("GameOverlay")?, "old exe");
    assert_eq!(fixture.read("data/maps.json")?, "old maps");
    assert_eq!(updater.resolver().current_version(), "1.5.0");

    let backups = updater.list_backups().await?;
    assert_eq!(backups.len(), 2);
    assert_eq!(backups[0].version, "1.6.0");
    assert!(temp_entries(&fixture).is_empty());
    Ok(())
}

#[tokio::test]
async fn test_rollback_with_running_file_uses_rollback_ledger() -> Result<()> {
    let fixture = AppFixture::installed("1.5.0", OLD_FILES)?;
    let (_server, url) = serve(release_zip()?).await?;
    orchestrator(&fixture, &[]).install_update("1.6.0", &url).await?;

    let updater = orchestrator(&fixture, &["OverlayHelper"]);
    let backup = updater.list_backups().await?.remove(0);
    tokio::time::sleep(std::time::Duration::from_millis(1100)).await;
    let completion = updater.rollback(&backup.file_name).await?;

    assert!(matches!(completion, Completion::AwaitingRestart { deferred: 1, .. }));
    let record = Ledger::new(&fixture.paths, LedgerKind::Rollback).read()?.unwrap();
    assert_eq!(record.version.as_deref(), Some("1.5.0"));
    assert!(!Ledger::new(&fixture.paths, LedgerKind::Update).exists());

    let next_start = orchestrator(&fixture, &[]);
    assert_eq!(next_start.resume_pending_if_any().await?, ResumeOutcome::Completed);
    assert_eq!(fixture.read("OverlayHelper")?, "old helper");
    assert_eq!(next_start.resolver().current_version(), "1.5.0");
    Ok(())
}

#[tokio::test]
async fn test_rollback_to_unknown_backup_fails_cleanly() -> Result<()> {
    let fixture = AppFixture::installed("1.5.0", OLD_FILES)?;
    let before = fixture.snapshot()?;
    let updater = orchestrator(&fixture, &[]);

    let failure = updater
        .rollback("GameOverlay_v1.0.0_20240101_000000.zip")
        .await
        .unwrap_err();

    assert!(failure.to_string().contains("not found"));
    assert_eq!(fixture.snapshot()?, before);
    assert_eq!(updater.state(), UpdateState::Idle);
    Ok(())
}

#[tokio::test]
async fn test_retention_prunes_after_finalize() -> Result<()> {
    let fixture = AppFixture::installed("1.5.0", OLD_FILES)?;
    for day in 1..=3 {
        fixture.write(
            &format!("Backups/GameOverlay_v1.{day}.0_2025010{day}_120000.zip"),
            "placeholder",
        )?;
    }
    let (_server, url) = serve(release_zip()?).await?;
    let mut config = test_config();
    config.backup_retention = 2;
    let updater = UpdateOrchestrator::new(fixture.paths.clone(), config)
        .with_process_probe(Arc::new(FakeProcessProbe::default()));

    updater.install_update("1.6.0", &url).await?;

    let versions: Vec<String> = updater
        .list_backups()
        .await?
        .into_iter()
        .map(|b| b.version)
        .collect();
    assert_eq!(versions, vec!["1.5.0", "1.3.0"]);
    Ok(())
}
