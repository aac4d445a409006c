//! Retry decisions for phase attempts.
//!
//! The policy is a pure function of the phase, the attempt number within
//! the current visit, and whether the attempt passed. Loops in the runner
//! ask it what to do next instead of keeping their own counters.

use serde::{Deserialize, Serialize};

use super::model::{CommandKind, Phase};
use crate::config::PipelineConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Decision {
    /// Try the phase again after a fix.
    Retry,
    /// Move on to the next phase.
    Proceed,
    /// End the run as failed.
    Fail,
}

/// What a dev run does when the execute check never passes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExhaustionPolicy {
    /// Commit anyway and report the failure as a diagnostic.
    #[default]
    Proceed,
    /// Fail the run.
    Fail,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RetryPolicy {
    setup: u32,
    execute_check: u32,
    assurance: u32,
    on_execute_check_exhausted: ExhaustionPolicy,
}

impl RetryPolicy {
    pub fn for_kind(kind: CommandKind, config: &PipelineConfig) -> Self {
        Self {
            setup: config.setup_attempts,
            execute_check: match kind {
                CommandKind::Dev => config.execute_check_attempts,
                CommandKind::Ask | CommandKind::Review => 0,
            },
            assurance: match kind {
                CommandKind::Dev => config.dev_assurance_attempts,
                CommandKind::Ask => config.ask_cleanup_passes,
                CommandKind::Review => 0,
            },
            on_execute_check_exhausted: config.on_execute_check_exhausted,
        }
    }

    /// Most attempts a single visit to `phase` may make.
    pub fn budget(&self, phase: Phase) -> u32 {
        match phase {
            Phase::Setup | Phase::SetupCheck => self.setup,
            Phase::ExecuteCheck => self.execute_check,
            Phase::Assurance => self.assurance,
            Phase::Execute | Phase::CommitPush => 1,
        }
    }

    pub fn decide(&self, phase: Phase, attempt: u32, passed: bool) -> Decision {
        if passed {
            return Decision::Proceed;
        }
        // A failed install, agent call or push is never retried in place.
        if matches!(phase, Phase::Setup | Phase::Execute | Phase::CommitPush) {
            return Decision::Fail;
        }
        if attempt < self.budget(phase) {
            return Decision::Retry;
        }
        match phase {
            Phase::ExecuteCheck => match self.on_execute_check_exhausted {
                ExhaustionPolicy::Proceed => Decision::Proceed,
                ExhaustionPolicy::Fail => Decision::Fail,
            },
            Phase::Assurance => Decision::Proceed,
            _ => Decision::Fail,
        }
    }
}
