//! Integration test suite for the overlay updater
//!
//! End-to-end tests against a real application directory in a temp location
//! and a loopback HTTP server standing in for the release host.
//!
//! # Running Integration Tests
//!
//! ```bash
//! cargo test --test integration
//! ```
//!
//! # Test Organization
//!
//! - **update_flow**: install, deferral, resume and handoff
//! - **rollback**: rollback, pending-operation guard and backup retention
//! - **release_feed**: polling the release feed
//! - **cli**: the `overlay-updater` binary

mod cli;
mod release_feed;
mod rollback;
mod update_flow;

use anyhow::Result;
use overlay_updater::test_utils::{
    AppFixture, FakeProcessProbe, RecordingHandoff, TestServer, init_test_logging, test_config,
    zip_bytes,
};
use overlay_updater::upgrade::UpdateOrchestrator;
use std::sync::Arc;

pub const PACKAGE_PATH: &str = "/downloads/GameOverlay-1.6.0.zip";

/// An installed 1.5.0 with an executable, a helper and some data.
pub fn installed_150() -> Result<AppFixture> {
    init_test_logging(None);
    AppFixture::installed(
        "1.5.0",
        &[
            ("GameOverlay", "exe 1.5.0"),
            ("OverlayHelper", "helper 1.5.0"),
            ("data/maps.json", "maps 1.5.0"),
            ("data/settings.json", "user settings"),
        ],
    )
}

/// The 1.6.0 release archive, packed inside a top-level folder.
pub fn release_160() -> Result<Vec<u8>> {
    zip_bytes(&[
        ("GameOverlay-1.6.0/GameOverlay", b"exe 1.6.0"),
        ("GameOverlay-1.6.0/OverlayHelper", b"helper 1.6.0"),
        ("GameOverlay-1.6.0/data/maps.json", b"maps 1.6.0"),
        ("GameOverlay-1.6.0/data/new_feature.json", b"{}"),
    ])
}

pub async fn package_server() -> Result<TestServer> {
    TestServer::start(vec![(PACKAGE_PATH, 200, release_160()?)]).await
}

/// Orchestrator for `fixture` that sees `running` (relative names) as running
/// and records handoffs in `handoff`.
pub fn orchestrator_with(
    fixture: &AppFixture,
    running: &[&str],
    handoff: &RecordingHandoff,
) -> UpdateOrchestrator {
    let running = running.iter().map(|name| fixture.path(name)).collect();
    UpdateOrchestrator::new(fixture.paths.clone(), test_config())
        .with_process_probe(Arc::new(FakeProcessProbe::new(running)))
        .with_handoff(Arc::new(handoff.clone()))
}

pub fn orchestrator(fixture: &AppFixture, running: &[&str]) -> UpdateOrchestrator {
    orchestrator_with(fixture, running, &RecordingHandoff::default())
}
