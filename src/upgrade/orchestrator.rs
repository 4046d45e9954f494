//! The update state machine.
//!
//! [`UpdateOrchestrator`] drives forward updates, rollbacks and the startup
//! resume of deferred operations. Every public operation returns
//! `Result<T, UpdateFailure>`: failures are converted at the step boundary,
//! written to the session log, stored as the last error and published as an
//! [`UpdateEvent::Error`]. Nothing panics or escapes as an untyped error.
//!
//! # Install
//!
//! `Downloading → BackingUp → Extracting → Installing → Finalizing | AwaitingRestart`
//!
//! No destructive step runs before a verified backup exists. A failure before
//! `Installing` leaves the application directory untouched. Files that cannot
//! be replaced are deferred; if any are, a ledger is written once the whole
//! pass has finished and the scratch directory is kept as its source.
//!
//! # Rollback
//!
//! The same pipeline without the download: the current state is backed up
//! first, then the chosen backup is extracted and installed. Deferrals go to a
//! separate rollback ledger.
//!
//! # Resume
//!
//! [`UpdateOrchestrator::resume_pending_if_any`] runs at startup before anything
//! else. A ledger that is corrupt or whose scratch directory is gone is
//! discarded. If an outstanding file is the running executable, completion is
//! handed to an external [`Handoff`] and the caller must exit.

use anyhow::{Context, Result};
use chrono::Local;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::broadcast;

use crate::core::{UpdateError, UpdateFailure};
use crate::upgrade::archive::{content_root, extract_archive, verify_archive};
use crate::upgrade::backup::{BackupInfo, BackupManager};
use crate::upgrade::config::UpgradeConfig;
use crate::upgrade::download::PackageDownloader;
use crate::upgrade::events::{
    Completion, ProgressUpdate, UpdateCandidate, UpdateEvent, UpdateState,
};
use crate::upgrade::handoff::{Handoff, HandoffPlan, ScriptHandoff};
use crate::upgrade::installer::{InstallReport, install_listed, install_tree, missing_listed};
use crate::upgrade::ledger::{Ledger, LedgerKind, PendingOperationRecord};
use crate::upgrade::paths::AppPaths;
use crate::upgrade::processes::{ProcessProbe, RunningExecutableSet, SystemProcessProbe};
use crate::upgrade::release_check::ReleaseChecker;
use crate::upgrade::session_log::SessionLogger;
use crate::upgrade::verification::ChecksumVerifier;
use crate::upgrade::version_resolver::VersionResolver;
use crate::utils::fs::remove_dir_all;

const EVENT_CAPACITY: usize = 256;

/// What the startup resume did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeOutcome {
    /// No actionable ledger.
    NotActed,
    /// Outstanding files were copied in-process.
    Completed,
    /// An external helper took over; the caller must exit now.
    HandedOff,
}

impl ResumeOutcome {
    pub fn acted(self) -> bool {
        self != Self::NotActed
    }
}

/// Drives update, rollback and resume for one application directory.
pub struct UpdateOrchestrator {
    paths: AppPaths,
    config: UpgradeConfig,
    resolver: Arc<VersionResolver>,
    probe: Arc<dyn ProcessProbe>,
    handoff: Arc<dyn Handoff>,
    logger: SessionLogger,
    events: broadcast::Sender<UpdateEvent>,
    state: Mutex<UpdateState>,
    last_error: Mutex<Option<UpdateFailure>>,
}

/// Returns the orchestrator to `Idle` however a session ends.
struct SessionGuard<'a> {
    orchestrator: &'a UpdateOrchestrator,
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        self.orchestrator.set_state(UpdateState::Idle);
    }
}

impl UpdateOrchestrator {
    pub fn new(paths: AppPaths, config: UpgradeConfig) -> Self {
        let resolver = Arc::new(VersionResolver::new(&paths));
        let logger = SessionLogger::new(&paths.logs_dir());
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            paths,
            config,
            resolver,
            probe: Arc::new(SystemProcessProbe),
            handoff: Arc::new(ScriptHandoff),
            logger,
            events,
            state: Mutex::new(UpdateState::Idle),
            last_error: Mutex::new(None),
        }
    }

    /// Share an existing resolver instead of creating one.
    #[must_use]
    pub fn with_resolver(mut self, resolver: Arc<VersionResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    #[must_use]
    pub fn with_process_probe(mut self, probe: Arc<dyn ProcessProbe>) -> Self {
        self.probe = probe;
        self
    }

    #[must_use]
    pub fn with_handoff(mut self, handoff: Arc<dyn Handoff>) -> Self {
        self.handoff = handoff;
        self
    }

    pub fn paths(&self) -> &AppPaths {
        &self.paths
    }

    pub fn resolver(&self) -> &Arc<VersionResolver> {
        &self.resolver
    }

    /// Receive progress, error, completion and availability notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<UpdateEvent> {
        self.events.subscribe()
    }

    pub fn state(&self) -> UpdateState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn last_error(&self) -> Option<UpdateFailure> {
        self.last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Whether an update or rollback is waiting for a restart.
    pub fn has_pending_operation(&self) -> bool {
        Ledger::new(&self.paths, LedgerKind::Update).exists()
            || Ledger::new(&self.paths, LedgerKind::Rollback).exists()
    }

    /// Text of the current session log.
    pub fn session_log_text(&self) -> String {
        self.logger.session_text()
    }

    pub fn session_log_path(&self) -> &Path {
        self.logger.path()
    }

    /// Query the release feed for a newer version.
    pub async fn check_for_updates(&self) -> Result<Option<UpdateCandidate>, UpdateFailure> {
        let result = async {
            let _session = self.begin(UpdateState::Checking, false)?;
            self.logger.info(&format!(
                "Checking for updates (installed {})",
                self.resolver.current_version()
            ));
            let checker = ReleaseChecker::new(&self.config)?.with_events(self.events.clone());
            let candidate = checker.check_for_updates(&self.resolver).await?;
            match &candidate {
                Some(candidate) => self
                    .logger
                    .info(&format!("Update available: {}", candidate.version)),
                None => self.logger.info("Already up to date"),
            }
            Ok::<_, anyhow::Error>(candidate)
        }
        .await;
        self.conclude(result)
    }

    /// Download and install `version` from `download_url`.
    pub async fn install_update(
        &self,
        version: &str,
        download_url: &str,
    ) -> Result<Completion, UpdateFailure> {
        self.install_with_checksum(version, download_url, None).await
    }

    /// [`Self::install_update`], additionally verifying the package's SHA-256.
    pub async fn install_with_checksum(
        &self,
        version: &str,
        download_url: &str,
        expected_sha256: Option<&str>,
    ) -> Result<Completion, UpdateFailure> {
        let result = self.run_install(version, download_url, expected_sha256).await;
        self.conclude(result)
    }

    /// Restore the installation from the backup called `backup_name`.
    pub async fn rollback(&self, backup_name: &str) -> Result<Completion, UpdateFailure> {
        let result = self.run_rollback(backup_name).await;
        self.conclude(result)
    }

    /// Complete a deferred update or rollback left by a previous run.
    pub async fn resume_pending_if_any(&self) -> Result<ResumeOutcome, UpdateFailure> {
        let result = self.run_resume().await;
        self.conclude(result)
    }

    /// Backups on disk, newest first.
    pub async fn list_backups(&self) -> Result<Vec<BackupInfo>, UpdateFailure> {
        let result = self.backups().list_backups().await;
        self.conclude(result)
    }

    /// Keep the `keep` newest backups and delete the rest.
    pub async fn cleanup_old_backups(&self, keep: usize) -> Result<usize, UpdateFailure> {
        let result = self.backups().cleanup_old_backups(keep).await;
        self.conclude(result)
    }

    fn backups(&self) -> BackupManager {
        BackupManager::new(&self.paths, &self.config)
    }

    fn conclude<T>(&self, result: Result<T>) -> Result<T, UpdateFailure> {
        result.map_err(|error| {
            let failure = UpdateFailure::from_anyhow(&error);
            self.logger.error(&format!("[{}] {}", failure.kind, failure));
            *self.last_error.lock().unwrap_or_else(PoisonError::into_inner) = Some(failure.clone());
            let _ = self.events.send(UpdateEvent::Error(failure.clone()));
            failure
        })
    }

    /// Claim the orchestrator for one operation.
    fn begin(&self, first: UpdateState, require_no_pending: bool) -> Result<SessionGuard<'_>> {
        {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if *state != UpdateState::Idle {
                return Err(UpdateError::Busy {
                    state: state.to_string(),
                }
                .into());
            }
            if require_no_pending {
                for kind in [LedgerKind::Update, LedgerKind::Rollback] {
                    let ledger = Ledger::new(&self.paths, kind);
                    if ledger.exists() {
                        return Err(UpdateError::OperationPending {
                            ledger: ledger.path().display().to_string(),
                        }
                        .into());
                    }
                }
            }
            *state = first;
        }
        *self.last_error.lock().unwrap_or_else(PoisonError::into_inner) = None;
        let _ = self.events.send(UpdateEvent::StateChanged(first));
        Ok(SessionGuard { orchestrator: self })
    }

    fn set_state(&self, next: UpdateState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = next;
        let _ = self.events.send(UpdateEvent::StateChanged(next));
        if next != UpdateState::Idle {
            self.logger.progress(&format!("State: {next}"));
        }
    }

    fn progress(&self, percent: Option<u8>, message: impl Into<String>) {
        let _ = self.events.send(UpdateEvent::Progress(ProgressUpdate {
            state: self.state(),
            percent,
            message: message.into(),
        }));
    }

    fn complete(&self, completion: Completion) -> Completion {
        let _ = self.events.send(UpdateEvent::Completed(completion.clone()));
        completion
    }

    fn scratch_dir(&self, prefix: &str) -> PathBuf {
        self.paths
            .temp_dir()
            .join(format!("{prefix}_{}", Local::now().format("%Y%m%d_%H%M%S")))
    }

    async fn run_install(
        &self,
        version: &str,
        download_url: &str,
        expected_sha256: Option<&str>,
    ) -> Result<Completion> {
        let version = version.trim();
        if version.is_empty() {
            return Err(UpdateError::Other {
                message: "Target version is empty".to_string(),
            }
            .into());
        }

        let _session = self.begin(UpdateState::Downloading, true)?;
        let current = self.resolver.current_version();
        self.logger
            .info(&format!("Starting update {current} -> {version} from {download_url}"));

        let package = self
            .paths
            .temp_dir()
            .join(format!("update_{}.zip", file_safe(version)));

        let downloader = PackageDownloader::new(&self.config)?;
        downloader
            .download(download_url, &package, |percent, bytes| {
                match percent {
                    Some(p) => {
                        if p % 10 == 0 {
                            self.logger.progress(&format!("Downloading: {p}%"));
                        }
                        self.progress(Some(p), format!("Downloading {version}: {p}%"));
                    }
                    None => self.progress(None, format!("Downloading {version}: {bytes} bytes")),
                }
            })
            .await
            .context("Download failed")?;

        let result = self
            .apply_package(&package, version, &current, expected_sha256)
            .await;
        if let Err(e) = tokio::fs::remove_file(&package).await {
            tracing::debug!("Could not remove package {}: {}", package.display(), e);
        }
        result
    }

    async fn apply_package(
        &self,
        package: &Path,
        version: &str,
        current: &str,
        expected_sha256: Option<&str>,
    ) -> Result<Completion> {
        let digest = match expected_sha256 {
            Some(expected) => ChecksumVerifier::verify_checksum(package, expected).await?,
            None => ChecksumVerifier::compute_sha256(package).await?,
        };
        self.logger.info(&format!("Package sha256: {digest}"));

        let archive = package.to_path_buf();
        let entries = tokio::task::spawn_blocking(move || verify_archive(&archive))
            .await
            .context("Archive check panicked")??;
        self.logger.info(&format!("Package contains {entries} entries"));

        self.set_state(UpdateState::BackingUp);
        self.progress(None, "Backing up current installation");
        let backup = self
            .backups()
            .create_backup(current)
            .await
            .context("Backup failed; update aborted before any file was changed")?;
        self.logger.info(&format!("Backup written to {}", backup.display()));

        self.set_state(UpdateState::Extracting);
        let scratch = self.scratch_dir("update");
        self.extract_to_scratch(package, &scratch).await?;

        self.set_state(UpdateState::Installing);
        let report = self.install_pass(&scratch).await?;
        self.logger.info(&format!(
            "Installed {} file(s), deferred {}",
            report.copied.len(),
            report.deferred.len()
        ));

        if report.is_complete() {
            self.set_state(UpdateState::Finalizing);
            if let Err(e) = remove_dir_all(&scratch) {
                self.logger.warn(&format!("Could not remove scratch directory: {e:#}"));
            }
            self.commit_version(version);
            match self.backups().cleanup_old_backups(self.config.backup_retention).await {
                Ok(0) => {}
                Ok(n) => self.logger.info(&format!("Removed {n} old backup(s)")),
                Err(e) => self.logger.warn(&format!("Backup retention failed: {e:#}")),
            }
            self.logger.success(&format!("Updated to {version}"));
            Ok(self.complete(Completion::Finalized {
                version: version.to_string(),
            }))
        } else {
            self.await_restart(LedgerKind::Update, scratch, report, Some(version.to_string()))
        }
    }

    async fn run_rollback(&self, backup_name: &str) -> Result<Completion> {
        let _session = self.begin(UpdateState::BackingUp, true)?;
        let manager = self.backups();
        let archive = manager.backup_path(backup_name)?;
        let target_version = BackupInfo::parse_file_name(backup_name).map(|(version, _)| version);
        let current = self.resolver.current_version();
        self.logger.info(&format!(
            "Starting rollback {current} -> {} from {backup_name}",
            target_version.as_deref().unwrap_or("unknown version")
        ));

        self.progress(None, "Backing up current installation");
        let safety = manager
            .create_backup(&current)
            .await
            .context("Backup failed; rollback aborted before any file was changed")?;
        self.logger.info(&format!("Backup written to {}", safety.display()));

        self.set_state(UpdateState::Extracting);
        let scratch = self.scratch_dir("rollback");
        self.extract_to_scratch(&archive, &scratch).await?;

        self.set_state(UpdateState::Installing);
        let report = self.install_pass(&scratch).await?;
        self.logger.info(&format!(
            "Restored {} file(s), deferred {}",
            report.copied.len(),
            report.deferred.len()
        ));

        if report.is_complete() {
            self.set_state(UpdateState::Finalizing);
            if let Err(e) = remove_dir_all(&scratch) {
                self.logger.warn(&format!("Could not remove scratch directory: {e:#}"));
            }
            if let Some(version) = &target_version {
                self.commit_version(version);
            }
            let version = target_version.unwrap_or_else(|| self.resolver.current_version());
            self.logger.success(&format!("Rolled back to {version}"));
            Ok(self.complete(Completion::Finalized { version }))
        } else {
            self.await_restart(LedgerKind::Rollback, scratch, report, target_version)
        }
    }

    async fn extract_to_scratch(&self, archive: &Path, scratch: &Path) -> Result<()> {
        self.progress(None, "Extracting");
        remove_dir_all(scratch)?;

        let source = archive.to_path_buf();
        let dest = scratch.to_path_buf();
        let extracted = tokio::task::spawn_blocking(move || extract_archive(&source, &dest))
            .await
            .context("Extraction task panicked")?;

        match extracted {
            Ok(files) => {
                self.logger
                    .info(&format!("Extracted {files} file(s) to {}", scratch.display()));
                Ok(())
            }
            Err(e) => {
                let _ = remove_dir_all(scratch);
                Err(e.context("Extraction failed; no installed file was changed"))
            }
        }
    }

    async fn install_pass(&self, scratch: &Path) -> Result<InstallReport> {
        let source_root = content_root(scratch)?;
        let app_dir = self.paths.app_dir().to_path_buf();
        let skip = self.paths.state_file_names();
        let probe = Arc::clone(&self.probe);
        let events = self.events.clone();

        tokio::task::spawn_blocking(move || {
            let running = RunningExecutableSet::capture(probe.as_ref(), &app_dir);
            install_tree(&source_root, &app_dir, &running, &skip, |done, total| {
                let percent = (done * 100 / total.max(1)).min(100) as u8;
                let _ = events.send(UpdateEvent::Progress(ProgressUpdate {
                    state: UpdateState::Installing,
                    percent: Some(percent),
                    message: format!("Installing files: {done}/{total}"),
                }));
            })
        })
        .await
        .context("Install task panicked")?
    }

    fn await_restart(
        &self,
        kind: LedgerKind,
        scratch: PathBuf,
        report: InstallReport,
        version: Option<String>,
    ) -> Result<Completion> {
        self.set_state(UpdateState::AwaitingRestart);
        for deferred in &report.deferred {
            self.logger.warn(&format!("Deferred until restart: {deferred}"));
        }

        let deferred = report.deferred.len();
        let record = PendingOperationRecord::new(scratch, report.deferred, version.clone());
        Ledger::new(&self.paths, kind)
            .write(&record)
            .with_context(|| format!("Failed to persist pending {kind} record"))?;

        let version = version.unwrap_or_else(|| self.resolver.current_version());
        self.logger.success(&format!(
            "{kind} to {version} will complete after restart ({deferred} file(s) pending)"
        ));
        Ok(self.complete(Completion::AwaitingRestart { version, deferred }))
    }

    /// Write both version files and drop the cached version.
    fn commit_version(&self, version: &str) {
        if !self.resolver.record_version(version) {
            self.logger.warn("Failed to write version record");
        }
        if !self.resolver.write_override_marker(version) {
            self.logger.warn("Failed to write version marker");
        }
        self.resolver.invalidate();
    }

    async fn run_resume(&self) -> Result<ResumeOutcome> {
        for kind in [LedgerKind::Update, LedgerKind::Rollback] {
            let ledger = Ledger::new(&self.paths, kind);
            let record = match ledger.read() {
                Ok(Some(record)) => record,
                Ok(None) => continue,
                Err(e) => {
                    self.logger.warn(&format!("Discarding pending {kind} record: {e:#}"));
                    ledger.discard()?;
                    continue;
                }
            };

            if !record.is_actionable() {
                self.logger.warn(&format!(
                    "Discarding pending {kind} record: {} is missing or empty",
                    record.extract_path.display()
                ));
                ledger.discard()?;
                let _ = remove_dir_all(&record.extract_path);
                continue;
            }

            let _session = self.begin(UpdateState::Installing, false)?;
            return self.complete_pending(&ledger, record).await;
        }
        Ok(ResumeOutcome::NotActed)
    }

    async fn complete_pending(
        &self,
        ledger: &Ledger,
        record: PendingOperationRecord,
    ) -> Result<ResumeOutcome> {
        let kind = ledger.kind();
        self.logger.info(&format!(
            "Resuming pending {kind}: {} file(s) outstanding",
            record.updates.len()
        ));

        let source_root = content_root(&record.extract_path)?;
        let missing = missing_listed(&source_root, &record.extract_path, &record.updates);
        if !missing.is_empty() {
            return Err(self.discard_corrupt(ledger, &record, &missing));
        }

        let running = RunningExecutableSet::capture(self.probe.as_ref(), self.paths.app_dir());
        let main_exe = self.paths.executable_name();
        let needs_handoff = record.updates.iter().any(|relative| {
            let name = relative.rsplit('/').next().unwrap_or(relative);
            same_file_name(name, main_exe) || running.contains_name(name)
        });

        if needs_handoff {
            let plan = HandoffPlan {
                app_dir: self.paths.app_dir().to_path_buf(),
                source_root,
                extract_path: record.extract_path.clone(),
                updates: record.updates.clone(),
                version: record.version.clone(),
                marker_path: self.paths.version_marker(),
                record_path: self.paths.version_record(),
                ledger_path: ledger.path().to_path_buf(),
                relaunch: self.paths.executable(),
                script_path: self.paths.handoff_script(),
            };
            self.handoff
                .hand_off(&plan)
                .context("Failed to hand off the running executable replacement")?;
            self.logger
                .info("Running executable will be replaced after this process exits");
            return Ok(ResumeOutcome::HandedOff);
        }

        let app_dir = self.paths.app_dir().to_path_buf();
        let search_root = record.extract_path.clone();
        let updates = record.updates.clone();
        let report = tokio::task::spawn_blocking(move || {
            install_listed(&source_root, &search_root, &app_dir, &updates)
        })
        .await
        .context("Resume task panicked")?;

        if !report.missing.is_empty() {
            return Err(self.discard_corrupt(ledger, &record, &report.missing));
        }

        if let Some(first) = report.remaining.first() {
            let path = first.clone();
            let count = report.remaining.len();
            ledger
                .write(&PendingOperationRecord {
                    updates: report.remaining,
                    ..record
                })
                .with_context(|| format!("Failed to update pending {kind} record"))?;
            return Err(anyhow::Error::new(UpdateError::FileLocked { path })
                .context(format!("{count} file(s) are still in use; will retry on next start")));
        }

        self.set_state(UpdateState::Finalizing);
        if let Some(version) = &record.version {
            self.commit_version(version);
        }
        ledger.discard()?;
        if let Err(e) = remove_dir_all(&record.extract_path) {
            self.logger.warn(&format!("Could not remove scratch directory: {e:#}"));
        }
        self.logger.success(&format!("Completed pending {kind}"));
        self.complete(Completion::Resumed {
            version: record.version,
        });
        Ok(ResumeOutcome::Completed)
    }

    /// Drop a ledger whose files no longer exist, with its scratch directory.
    fn discard_corrupt(
        &self,
        ledger: &Ledger,
        record: &PendingOperationRecord,
        missing: &[String],
    ) -> anyhow::Error {
        let kind = ledger.kind();
        self.logger.warn(&format!(
            "Discarding pending {kind} record: {} file(s) missing from {}",
            missing.len(),
            record.extract_path.display()
        ));
        if let Err(e) = ledger.discard() {
            return e.context(format!("Failed to discard pending {kind} record"));
        }
        if let Err(e) = remove_dir_all(&record.extract_path) {
            self.logger.warn(&format!("Could not remove scratch directory: {e:#}"));
        }
        UpdateError::CorruptLedger {
            path: ledger.path().display().to_string(),
            reason: format!("deferred file(s) not found in scratch directory: {}", missing.join(", ")),
        }
        .into()
    }
}

fn same_file_name(a: &str, b: &str) -> bool {
    if cfg!(windows) {
        a.eq_ignore_ascii_case(b)
    } else {
        a == b
    }
}

/// Version string safe to embed in a file name.
fn file_safe(version: &str) -> String {
    version
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') { c } else { '_' })
        .collect()
}
