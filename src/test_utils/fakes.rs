//! Scriptable stand-ins for the process probe and the handoff.

use anyhow::{Result, bail};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use crate::upgrade::handoff::{Handoff, HandoffPlan};
use crate::upgrade::processes::ProcessProbe;

/// Reports a fixed list of running executables.
#[derive(Debug, Clone, Default)]
pub struct FakeProcessProbe {
    running: Vec<PathBuf>,
}

impl FakeProcessProbe {
    pub fn new(running: Vec<PathBuf>) -> Self {
        Self { running }
    }
}

impl ProcessProbe for FakeProcessProbe {
    fn running_executables(&self) -> Vec<PathBuf> {
        self.running.clone()
    }
}

/// Records handoff plans instead of launching anything.
#[derive(Debug, Clone, Default)]
pub struct RecordingHandoff {
    plans: Arc<Mutex<Vec<HandoffPlan>>>,
    fail: bool,
}

impl RecordingHandoff {
    /// A handoff whose launch always fails.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn plans(&self) -> Vec<HandoffPlan> {
        self.plans.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl Handoff for RecordingHandoff {
    fn hand_off(&self, plan: &HandoffPlan) -> Result<()> {
        if self.fail {
            bail!("helper could not be started");
        }
        self.plans
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(plan.clone());
        Ok(())
    }
}
