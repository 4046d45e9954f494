use anyhow::Result;
use overlay_updater::core::ErrorKind;
use overlay_updater::test_utils::{AppFixture, FakeProcessProbe, TestServer, test_config};
use overlay_updater::upgrade::{UpdateEvent, UpdateOrchestrator, UpdateState};
use serde_json::json;
use std::sync::Arc;

use super::installed_150;

const LATEST: &str = "/repos/overlay-team/game-overlay/releases/latest";
const ALL: &str = "/repos/overlay-team/game-overlay/releases";

fn release(tag: &str, draft: bool, prerelease: bool, asset: Option<&str>) -> serde_json::Value {
    let assets: Vec<_> = asset
        .map(|name| json!({ "name": name, "browser_download_url": format!("https://dl.example/{name}") }))
        .into_iter()
        .collect();
    json!({
        "tag_name": tag,
        "html_url": format!("https://example/releases/{tag}"),
        "body": format!("What's new in {tag}"),
        "draft": draft,
        "prerelease": prerelease,
        "assets": assets,
    })
}

fn drain(events: &mut tokio::sync::broadcast::Receiver<UpdateEvent>) -> Vec<UpdateEvent> {
    std::iter::from_fn(|| events.try_recv().ok()).collect()
}

fn feed_orchestrator(fixture: &AppFixture, server: &TestServer, prereleases: bool) -> UpdateOrchestrator {
    let mut config = test_config();
    config.api_base_url = server.base_url().to_string();
    config.include_prereleases = prereleases;
    UpdateOrchestrator::new(fixture.paths.clone(), config)
        .with_process_probe(Arc::new(FakeProcessProbe::default()))
}

#[tokio::test]
async fn test_latest_stable_release_is_offered() -> Result<()> {
    let fixture = installed_150()?;
    let body = serde_json::to_vec(&release("v1.6.0", false, false, Some("GameOverlay-1.6.0.zip")))?;
    let server = TestServer::start(vec![(LATEST, 200, body)]).await?;
    let updater = feed_orchestrator(&fixture, &server, false);
    let mut events = updater.subscribe();

    let candidate = updater.check_for_updates().await?.unwrap();

    assert_eq!(candidate.version, "1.6.0");
    assert_eq!(candidate.download_url, "https://dl.example/GameOverlay-1.6.0.zip");
    assert_eq!(candidate.notes, "What's new in v1.6.0");
    assert_eq!(
        drain(&mut events),
        vec![
            UpdateEvent::StateChanged(UpdateState::Checking),
            UpdateEvent::UpdateAvailable(candidate),
            UpdateEvent::StateChanged(UpdateState::Idle),
        ]
    );
    assert!(updater.session_log_text().contains("Update available: 1.6.0"));
    Ok(())
}

#[tokio::test]
async fn test_same_version_is_not_offered() -> Result<()> {
    let fixture = installed_150()?;
    let body = serde_json::to_vec(&release("v1.5.0", false, false, Some("GameOverlay.zip")))?;
    let server = TestServer::start(vec![(LATEST, 200, body)]).await?;
    let updater = feed_orchestrator(&fixture, &server, false);
    let mut events = updater.subscribe();

    assert!(updater.check_for_updates().await?.is_none());
    assert_eq!(
        drain(&mut events),
        vec![
            UpdateEvent::StateChanged(UpdateState::Checking),
            UpdateEvent::UpToDate { current: "1.5.0".to_string() },
            UpdateEvent::StateChanged(UpdateState::Idle),
        ]
    );
    assert!(updater.session_log_text().contains("Already up to date"));
    assert_eq!(updater.state(), UpdateState::Idle);
    Ok(())
}

#[tokio::test]
async fn test_prerelease_feed_skips_drafts_and_assetless_releases() -> Result<()> {
    let fixture = installed_150()?;
    let body = serde_json::to_vec(&json!([
        release("v2.0.0", true, false, Some("GameOverlay-2.0.0.zip")),
        release("PR_v1.7.0-beta", false, true, None),
        release("PR_v1.6.1-beta", false, true, Some("GameOverlay-1.6.1-beta.zip")),
        release("v1.6.0", false, false, Some("GameOverlay-1.6.0.zip")),
    ]))?;
    let server = TestServer::start(vec![(ALL, 200, body)]).await?;
    let updater = feed_orchestrator(&fixture, &server, true);

    let candidate = updater.check_for_updates().await?.unwrap();
    assert_eq!(candidate.version, "1.6.1-beta");
    Ok(())
}

#[tokio::test]
async fn test_repository_without_releases() -> Result<()> {
    let fixture = installed_150()?;
    let server = TestServer::start(vec![]).await?;
    let updater = feed_orchestrator(&fixture, &server, false);

    assert!(updater.check_for_updates().await?.is_none());
    Ok(())
}

#[tokio::test]
async fn test_server_error_is_transient() -> Result<()> {
    let fixture = installed_150()?;
    let server = TestServer::start(vec![(LATEST, 503, b"busy".to_vec())]).await?;
    let updater = feed_orchestrator(&fixture, &server, false);

    let failure = updater.check_for_updates().await.unwrap_err();
    assert_eq!(failure.kind, ErrorKind::TransientNetwork);
    assert!(failure.message.contains("503"));
    Ok(())
}
