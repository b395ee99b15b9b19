//! Trial progression engine for paired behavioral sessions.
//!
//! The engine owns the session lifecycle: resuming or creating a durable
//! session document, reconciling it against the append-only trial log,
//! scheduling stimuli and choice layouts, resolving rewards, and advancing
//! the block/trio counters after each completed trio. Rendering, input
//! capture, and hardware actuation stay behind the [`TrialRunner`] and
//! [`RewardActuator`] traits so the same progression logic drives a live
//! apparatus or a scripted simulation.

pub mod controller;
pub mod rewards;
pub mod scheduler;
pub mod session;

use std::time::Duration;

use pairlab_core::ConfigError;
use pairlab_store::StoreError;
use thiserror::Error;

pub use controller::{
    ActuatorError, ChoiceOutcome, ChoicePlan, ControllerState, PhaseSignal, ReconcileReport,
    RewardActuator, SessionController, StepOutcome, StimulusPlan, TrialRunner,
};
pub use rewards::{
    choice_units, resolve_paired_choice, resolve_stimulus, PairedDelivery, RewardDecision,
    StimulusOutcome,
};
pub use scheduler::StimulusScheduler;
pub use session::{apply_edit, new_or_resume, EditRequest};

const DEFAULT_EXPOSURE_CEILING: Duration = Duration::from_secs(5);
const DEFAULT_SHORT_ITI: Duration = Duration::from_secs(2);
const DEFAULT_NO_GO_TARGET: Duration = Duration::from_secs(7);
const DEFAULT_CHOICE_DEADLINE: Duration = Duration::from_secs(30);
const DEFAULT_DELIVERY_PACING: Duration = Duration::from_secs(1);
const DEFAULT_GO_REWARD_UNITS: u32 = 2;
const DEFAULT_LARGE_CHOICE_UNITS: u32 = 4;
const DEFAULT_SMALL_CHOICE_UNITS: u32 = 1;

/// Errors surfaced by the progression engine.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
}

/// Timing and reward knobs for a session.
///
/// Defaults mirror the apparatus the engine was built for; a scripted
/// simulation typically zeroes the intervals instead of redefining them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Longest a stimulus stays on screen waiting for contact.
    pub exposure_ceiling: Duration,
    /// Rest after choices, rewarded Go trials, withheld No-Go trials, and
    /// every Ambiguous trial.
    pub short_iti: Duration,
    /// Touching a No-Go stimulus yokes the rest to this total minus the
    /// response latency.
    pub no_go_target: Duration,
    /// How long each participant gets to commit a choice before the trio
    /// aborts.
    pub choice_deadline: Duration,
    /// Gap between individual reward units during choice delivery.
    pub delivery_pacing: Duration,
    /// Units dispensed for contacting a Go stimulus.
    pub go_reward_units: u32,
    /// Units behind the large choice option.
    pub large_choice_units: u32,
    /// Units behind the small choice option.
    pub small_choice_units: u32,
    /// Delete the session document once every session is complete instead
    /// of moving it to the archive directory.
    pub delete_finished: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            exposure_ceiling: DEFAULT_EXPOSURE_CEILING,
            short_iti: DEFAULT_SHORT_ITI,
            no_go_target: DEFAULT_NO_GO_TARGET,
            choice_deadline: DEFAULT_CHOICE_DEADLINE,
            delivery_pacing: DEFAULT_DELIVERY_PACING,
            go_reward_units: DEFAULT_GO_REWARD_UNITS,
            large_choice_units: DEFAULT_LARGE_CHOICE_UNITS,
            small_choice_units: DEFAULT_SMALL_CHOICE_UNITS,
            delete_finished: true,
        }
    }
}
