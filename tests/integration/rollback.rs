use anyhow::Result;
use overlay_updater::core::ErrorKind;
use overlay_updater::upgrade::{Completion, ResumeOutcome};
use std::time::Duration;

use super::{PACKAGE_PATH, installed_150, orchestrator, package_server};

#[tokio::test]
async fn test_update_then_rollback_round_trip() -> Result<()> {
    let fixture = installed_150()?;
    let original = fixture.snapshot()?;
    let server = package_server().await?;
    let updater = orchestrator(&fixture, &[]);
    updater.install_update("1.6.0", &server.url(PACKAGE_PATH)).await?;

    let backup = updater.list_backups().await?.remove(0);
    assert_eq!(backup.version, "1.5.0");
    assert!(backup.size_in_mb > 0.0);

    tokio::time::sleep(Duration::from_millis(1100)).await;
    let completion = updater.rollback(&backup.file_name).await?;

    assert_eq!(
        completion,
        Completion::Finalized {
            version: "1.5.0".to_string()
        }
    );
    assert_eq!(fixture.read("GameOverlay")?, "exe 1.5.0");
    assert_eq!(fixture.read("OverlayHelper")?, "helper 1.5.0");
    assert_eq!(updater.resolver().current_version(), "1.5.0");
    assert_eq!(fixture.read("version.txt")?, "1.5.0");

    // Files added by 1.6.0 are not removed by a rollback.
    let mut restored = fixture.snapshot()?;
    assert!(restored.remove("data/new_feature.json").is_some());
    for (path, content) in &original {
        if path != "version.json" {
            assert_eq!(restored.get(path), Some(content), "{path} differs after rollback");
        }
    }
    Ok(())
}

#[tokio::test]
async fn test_deferred_rollback_completes_on_next_start() -> Result<()> {
    let fixture = installed_150()?;
    let server = package_server().await?;
    orchestrator(&fixture, &[])
        .install_update("1.6.0", &server.url(PACKAGE_PATH))
        .await?;

    let updater = orchestrator(&fixture, &["OverlayHelper"]);
    let backup = updater.list_backups().await?.remove(0);
    tokio::time::sleep(Duration::from_millis(1100)).await;
    let completion = updater.rollback(&backup.file_name).await?;
    assert!(matches!(completion, Completion::AwaitingRestart { deferred: 1, .. }));
    assert!(fixture.exists("pending_rollback.json"));
    assert!(!fixture.exists("pending_update.json"));

    let next_start = orchestrator(&fixture, &[]);
    assert_eq!(next_start.resume_pending_if_any().await?, ResumeOutcome::Completed);
    assert_eq!(fixture.read("OverlayHelper")?, "helper 1.5.0");
    assert!(!fixture.exists("pending_rollback.json"));
    Ok(())
}

#[tokio::test]
async fn test_no_new_operation_while_one_is_pending() -> Result<()> {
    let fixture = installed_150()?;
    let server = package_server().await?;
    let updater = orchestrator(&fixture, &["OverlayHelper"]);
    updater.install_update("1.6.0", &server.url(PACKAGE_PATH)).await?;
    let backup = updater.list_backups().await?.remove(0);

    let install = updater
        .install_update("1.6.0", &server.url(PACKAGE_PATH))
        .await
        .unwrap_err();
    let rollback = updater.rollback(&backup.file_name).await.unwrap_err();

    assert_eq!(install.kind, ErrorKind::Unexpected);
    assert!(install.message.contains("waiting to be completed"));
    assert!(rollback.message.contains("waiting to be completed"));
    assert_eq!(updater.list_backups().await?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_cleanup_keeps_newest() -> Result<()> {
    let fixture = installed_150()?;
    for name in [
        "GameOverlay_v1.2.0_20240101_100000.zip",
        "GameOverlay_v1.3.0_20240201_100000.zip",
        "GameOverlay_v1.4.0_20240301_100000.zip",
    ] {
        fixture.write(&format!("Backups/{name}"), "archive")?;
    }
    let updater = orchestrator(&fixture, &[]);

    assert_eq!(updater.cleanup_old_backups(1).await?, 2);
    let remaining = updater.list_backups().await?;
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].version, "1.4.0");
    assert_eq!(updater.cleanup_old_backups(5).await?, 0);
    Ok(())
}
