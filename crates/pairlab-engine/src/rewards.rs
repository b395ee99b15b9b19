//! Reward contingencies for stimulus exposures and paired choices.

use std::time::Duration;

use pairlab_core::{ChoiceOption, StimulusCategory};

use crate::EngineConfig;

/// What one stimulus exposure earned and how long to rest before the next
/// phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RewardDecision {
    pub units: u32,
    pub iti: Duration,
}

/// How one stimulus exposure ended, as reported by the trial front-end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StimulusOutcome {
    /// Whether the participant touched the stimulus before the ceiling.
    pub contacted: bool,
    /// Onset-to-contact latency, or the full exposure ceiling on a
    /// timeout.
    pub latency: Duration,
}

/// Applies the stimulus contingency table.
///
/// Contacting a Go stimulus pays out; contacting a No-Go stimulus earns a
/// rest yoked to the response latency, so a fast error waits longest.
/// Everything else gets the short rest and nothing more.
pub fn resolve_stimulus(
    config: &EngineConfig,
    category: StimulusCategory,
    outcome: StimulusOutcome,
) -> RewardDecision {
    match category {
        StimulusCategory::Go if outcome.contacted => RewardDecision {
            units: config.go_reward_units,
            iti: config.short_iti,
        },
        StimulusCategory::NoGo if outcome.contacted => RewardDecision {
            units: 0,
            iti: config.no_go_target.saturating_sub(outcome.latency),
        },
        _ => RewardDecision {
            units: 0,
            iti: config.short_iti,
        },
    }
}

/// Units behind one choice option.
pub fn choice_units(config: &EngineConfig, option: ChoiceOption) -> u32 {
    match option {
        ChoiceOption::Large => config.large_choice_units,
        ChoiceOption::Small => config.small_choice_units,
    }
}

/// Amounts owed after a paired choice, already crossed over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PairedDelivery {
    pub to_leader: u32,
    pub to_follower: u32,
}

/// Resolves a paired choice: each participant receives the amount the
/// other one selected.
pub fn resolve_paired_choice(
    config: &EngineConfig,
    leader_choice: ChoiceOption,
    follower_choice: ChoiceOption,
) -> PairedDelivery {
    PairedDelivery {
        to_leader: choice_units(config, follower_choice),
        to_follower: choice_units(config, leader_choice),
    }
}
