//! Test utilities for the updater
//!
//! Helpers shared by unit tests and the integration suite:
//! - [`AppFixture`]: an application directory in a temporary location
//! - [`write_zip`] / [`zip_bytes`]: release and backup archives
//! - [`TestServer`]: a loopback HTTP server for downloads and the release feed
//! - [`FakeProcessProbe`] / [`RecordingHandoff`]: scripted process state
//!
//! # Example
//!
//! ```rust,no_run
//! use overlay_updater::test_utils::{AppFixture, test_config};
//! use overlay_updater::upgrade::UpdateOrchestrator;
//!
//! let fixture = AppFixture::installed("1.5.0", &[("GameOverlay", "old")]).unwrap();
//! let orchestrator = UpdateOrchestrator::new(fixture.paths.clone(), test_config());
//! assert_eq!(orchestrator.resolver().current_version(), "1.5.0");
//! ```

pub mod fakes;
pub mod fixtures;
pub mod server;

pub use fakes::{FakeProcessProbe, RecordingHandoff};
pub use fixtures::{AppFixture, FIXTURE_APP, test_config, write_zip, zip_bytes};
pub use server::TestServer;

use std::sync::Once;
use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Global flag to ensure logging is only initialized once in tests
static INIT_LOGGING: Once = Once::new();

/// Initialize logging for tests.
///
/// Only the first call has an effect. `level` wins over `RUST_LOG`; with
/// neither, tests run silently.
///
/// ```bash
/// RUST_LOG=overlay_updater=debug cargo test
/// ```
pub fn init_test_logging(level: Option<Level>) {
    INIT_LOGGING.call_once(|| {
        let filter = if let Some(level) = level {
            EnvFilter::new(level.to_string())
        } else if std::env::var("RUST_LOG").is_ok() {
            EnvFilter::from_default_env()
        } else {
            return;
        };

        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .with_thread_ids(false)
            .try_init();
    });
}
