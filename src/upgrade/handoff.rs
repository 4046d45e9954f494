//! Out-of-process completion of a pending operation.
//!
//! A process cannot overwrite the executable it is running from. When a
//! deferred file is the running image, the orchestrator describes the
//! remaining work as a [`HandoffPlan`] and passes it to a [`Handoff`]
//! implementation, after which the caller must exit so the image is released.
//!
//! [`ScriptHandoff`] writes a small self-deleting shell script (`.cmd` on
//! Windows, `sh` elsewhere) that waits for the process to exit, copies the
//! outstanding files, writes the version marker and record, clears the scratch directory
//! and ledger, relaunches the application and removes itself. If any copy
//! fails the ledger and scratch directory are left in place, so the next start
//! retries.

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::info;

use crate::constants::HANDOFF_DELAY_SECS;

/// Everything needed to finish an operation without this process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandoffPlan {
    /// Live application directory.
    pub app_dir: PathBuf,
    /// Directory the outstanding relative paths are resolved against.
    pub source_root: PathBuf,
    /// Scratch directory; searched when a file is not at its expected path,
    /// deleted on success.
    pub extract_path: PathBuf,
    /// Outstanding files, relative and `/`-separated.
    pub updates: Vec<String>,
    /// Version written to the marker and record on success.
    pub version: Option<String>,
    pub marker_path: PathBuf,
    pub record_path: PathBuf,
    pub ledger_path: PathBuf,
    /// Executable relaunched at the end.
    pub relaunch: PathBuf,
    /// Where the generated script is written.
    pub script_path: PathBuf,
}

/// Capability to finish a [`HandoffPlan`] outside this process.
pub trait Handoff: Send + Sync {
    /// Start the external completion. The caller exits afterwards.
    fn hand_off(&self, plan: &HandoffPlan) -> Result<()>;
}

/// [`Handoff`] through a generated shell script.
#[derive(Debug, Default, Clone, Copy)]
pub struct ScriptHandoff;

impl ScriptHandoff {
    /// Script text for the current platform.
    pub fn render_script(plan: &HandoffPlan) -> String {
        if cfg!(windows) {
            render_cmd(plan)
        } else {
            render_sh(plan)
        }
    }
}

impl Handoff for ScriptHandoff {
    fn hand_off(&self, plan: &HandoffPlan) -> Result<()> {
        let script = Self::render_script(plan);
        std::fs::write(&plan.script_path, script).with_context(|| {
            format!("Failed to write finalize script: {}", plan.script_path.display())
        })?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&plan.script_path, std::fs::Permissions::from_mode(0o755))
                .with_context(|| {
                    format!("Failed to mark {} executable", plan.script_path.display())
                })?;
        }

        spawn_detached(&plan.script_path)?;
        info!(
            "Handed off {} file(s) to {}",
            plan.updates.len(),
            plan.script_path.display()
        );
        Ok(())
    }
}

#[cfg(windows)]
fn spawn_detached(script: &Path) -> Result<()> {
    use std::os::windows::process::CommandExt;
    const CREATE_NO_WINDOW: u32 = 0x0800_0000;

    Command::new("cmd")
        .arg("/C")
        .arg(script)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .creation_flags(CREATE_NO_WINDOW)
        .spawn()
        .with_context(|| format!("Failed to launch {}", script.display()))?;
    Ok(())
}

#[cfg(not(windows))]
fn spawn_detached(script: &Path) -> Result<()> {
    Command::new("sh")
        .arg(script)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .with_context(|| format!("Failed to launch {}", script.display()))?;
    Ok(())
}

/// `version.json` contents committing `version`, stamped now.
fn record_json(version: &str) -> String {
    serde_json::json!({
        "Version": version,
        "UpdatedOn": Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
    })
    .to_string()
}

fn sh_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

fn sh_path(path: &Path) -> String {
    sh_quote(&path.to_string_lossy())
}

/// POSIX `sh` rendition of a plan.
pub fn render_sh(plan: &HandoffPlan) -> String {
    let mut script = String::new();
    script.push_str("#!/bin/sh\n");
    script.push_str("# Completes a pending overlay update after the application exits.\n");
    script.push_str(&format!("sleep {HANDOFF_DELAY_SECS}\n\n"));
    script.push_str(&format!("SRC={}\n", sh_path(&plan.source_root)));
    script.push_str(&format!("DST={}\n", sh_path(&plan.app_dir)));
    script.push_str(&format!("EXTRACT={}\n", sh_path(&plan.extract_path)));
    script.push_str("FAILED=0\n\n");
    script.push_str(
        r#"copy_update() {
    rel="$1"
    src="$SRC/$rel"
    if [ ! -f "$src" ]; then
        found=$(find "$EXTRACT" -type f -name "$(basename "$rel")" 2>/dev/null | head -n 1)
        if [ -n "$found" ]; then
            src="$found"
        fi
    fi
    mkdir -p "$(dirname "$DST/$rel")"
    if ! cp -f "$src" "$DST/$rel"; then
        FAILED=1
    fi
}

"#,
    );

    for relative in &plan.updates {
        script.push_str(&format!("copy_update {}\n", sh_quote(relative)));
    }

    script.push_str("\nif [ \"$FAILED\" = \"0\" ]; then\n");
    if let Some(version) = &plan.version {
        script.push_str(&format!(
            "    printf '%s' {} > {}\n",
            sh_quote(version),
            sh_path(&plan.marker_path)
        ));
        script.push_str(&format!(
            "    printf '%s' {} > {}\n",
            sh_quote(&record_json(version)),
            sh_path(&plan.record_path)
        ));
    }
    script.push_str("    rm -rf \"$EXTRACT\"\n");
    script.push_str(&format!("    rm -f {}\n", sh_path(&plan.ledger_path)));
    script.push_str("fi\n\n");
    script.push_str(&format!(
        "nohup {} >/dev/null 2>&1 &\n",
        sh_path(&plan.relaunch)
    ));
    script.push_str("rm -f \"$0\"\n");
    script
}

fn cmd_escape(value: &str) -> String {
    value.replace('%', "%%")
}

fn cmd_path(path: &Path) -> String {
    cmd_escape(&path.to_string_lossy())
}

/// Windows `cmd` rendition of a plan.
pub fn render_cmd(plan: &HandoffPlan) -> String {
    let mut script = String::new();
    script.push_str("@echo off\r\n");
    script.push_str("rem Completes a pending overlay update after the application exits.\r\n");
    script.push_str(&format!("timeout /t {HANDOFF_DELAY_SECS} /nobreak >nul\r\n"));
    script.push_str(&format!("set \"SRC={}\"\r\n", cmd_path(&plan.source_root)));
    script.push_str(&format!("set \"DST={}\"\r\n", cmd_path(&plan.app_dir)));
    script.push_str(&format!("set \"EXTRACT={}\"\r\n", cmd_path(&plan.extract_path)));
    script.push_str("set FAILED=0\r\n");

    for relative in &plan.updates {
        script.push_str(&format!(
            "call :copy_update \"{}\"\r\n",
            cmd_escape(&relative.replace('/', "\\"))
        ));
    }

    script.push_str("if \"%FAILED%\"==\"0\" (\r\n");
    if let Some(version) = &plan.version {
        script.push_str(&format!(
            "    <nul set /p \"={}\" > \"{}\"\r\n",
            cmd_escape(version),
            cmd_path(&plan.marker_path)
        ));
        script.push_str(&format!(
            "    >\"{}\" echo {}\r\n",
            cmd_path(&plan.record_path),
            cmd_escape(&record_json(version))
        ));
    }
    script.push_str("    rmdir /s /q \"%EXTRACT%\"\r\n");
    script.push_str(&format!("    del /f /q \"{}\"\r\n", cmd_path(&plan.ledger_path)));
    script.push_str(")\r\n");
    script.push_str(&format!("start \"\" \"{}\"\r\n", cmd_path(&plan.relaunch)));
    script.push_str("(goto) 2>nul & del \"%~f0\"\r\n");
    script.push_str("exit /b\r\n\r\n");
    script.push_str(
        ":copy_update\r\n\
         set \"REL=%~1\"\r\n\
         set \"S=%SRC%\\%REL%\"\r\n\
         if not exist \"%S%\" for /r \"%EXTRACT%\" %%F in (%~nx1) do set \"S=%%F\"\r\n\
         for %%D in (\"%DST%\\%REL%\") do if not exist \"%%~dpD\" mkdir \"%%~dpD\"\r\n\
         copy /y \"%S%\" \"%DST%\\%REL%\" >nul || set FAILED=1\r\n\
         exit /b\r\n",
    );
    script
}
