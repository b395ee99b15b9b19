//! Drives one trio at a time: paired choice, leader stimulus, follower
//! stimulus, then the durable commit.
//!
//! The controller decides and delegates; it never sleeps and never draws.
//! Timing and rendering belong to the [`TrialRunner`], pellet hardware to
//! the [`RewardActuator`]. Persistence happens exactly once per trio, after
//! the last reward of the trio has been handled, so an abort at any phase
//! leaves the document, the log, and the placement history untouched.

use std::time::Duration;

use chrono::Local;
use pairlab_core::stimulus::{profile_color, Rgb};
use pairlab_core::{
    ChoiceLayout, ChoiceOption, SessionState, SessionStatus, Side, Stage, StimulusLabel,
    TrialLogRow, TRIOS_PER_SESSION,
};
use pairlab_store::{SessionStore, TrialLog};
use rand::Rng;
use thiserror::Error;
use tracing::{info, warn};

use crate::rewards::{resolve_paired_choice, resolve_stimulus, StimulusOutcome};
use crate::scheduler::StimulusScheduler;
use crate::{EngineConfig, EngineError};

/// Everything the front-end needs to present the paired-choice phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChoicePlan {
    pub leader: String,
    pub follower: String,
    pub leader_side: Side,
    /// Arrangement of the two options on the leader's half.
    pub leader_layout: ChoiceLayout,
    /// Arrangement on the follower's half, drawn independently.
    pub follower_layout: ChoiceLayout,
    /// Per-participant time budget; the runner aborts the trio when either
    /// participant lets it lapse.
    pub deadline: Duration,
}

/// Both committed choices with their onset-to-commit latencies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChoiceOutcome {
    pub leader_choice: ChoiceOption,
    pub leader_latency: Duration,
    pub follower_choice: ChoiceOption,
    pub follower_latency: Duration,
}

/// One stimulus exposure for one participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StimulusPlan {
    pub participant: String,
    pub side: Side,
    pub label: StimulusLabel,
    /// Fill color under the active stimulus profile.
    pub color: Rgb,
    pub exposure_ceiling: Duration,
}

/// A phase either produced its outcome or the operator pulled the plug.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseSignal<T> {
    Completed(T),
    Aborted,
}

/// Front-end contract: render phases, collect responses, and own every
/// wait. `rest` covers inter-trial intervals and reward pacing alike.
pub trait TrialRunner {
    fn run_choice(&mut self, plan: &ChoicePlan) -> PhaseSignal<ChoiceOutcome>;
    fn run_stimulus(&mut self, plan: &StimulusPlan) -> PhaseSignal<StimulusOutcome>;
    fn rest(&mut self, interval: Duration);
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct ActuatorError(pub String);

/// Pellet hardware contract. Faults are reported upward, logged by the
/// controller, and never end a session.
pub trait RewardActuator {
    fn dispense(&mut self, side: Side, units: u32) -> Result<(), ActuatorError>;
}

/// Where the controller currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    /// Ready to start the next trio.
    Idle,
    /// A trio is mid-flight.
    TrioRunning,
    /// The 28th trio just landed; rolling or finishing is in progress.
    SessionComplete,
    /// Every session is done and the record has been retired.
    AllSessionsComplete,
}

/// What one controller tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// Trio finished and was persisted; more remain in this session.
    TrioCompleted,
    /// Trio finished the session and the record rolled into the next one.
    SessionRolled,
    /// Trio finished the final session; the record was retired.
    Finished,
    /// Operator abort: nothing ran to completion, nothing was recorded.
    Aborted,
}

/// What startup reconciliation found and did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReconcileReport {
    /// Data rows found in this session's trial log.
    pub log_rows: u32,
    /// Counter as loaded from the document.
    pub counter_before: u32,
    /// Whether the counter had to be rebased onto the log.
    pub adjusted: bool,
    /// The log already held a full session, so the record rolled forward.
    pub rolled_session: bool,
    /// The log completed the final session.
    pub finished: bool,
}

enum RollOutcome {
    Rolled,
    Finished,
}

/// Owns one session record end to end.
pub struct SessionController<R: Rng> {
    config: EngineConfig,
    store: SessionStore,
    log: TrialLog,
    scheduler: StimulusScheduler<R>,
    state: SessionState,
    phase: ControllerState,
}

impl<R: Rng> SessionController<R> {
    pub fn new(
        config: EngineConfig,
        store: SessionStore,
        log: TrialLog,
        scheduler: StimulusScheduler<R>,
        state: SessionState,
    ) -> Self {
        Self {
            config,
            store,
            log,
            scheduler,
            state,
            phase: ControllerState::Idle,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn controller_state(&self) -> ControllerState {
        self.phase
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn into_state(self) -> SessionState {
        self.state
    }

    /// Startup repair. The trial log's row count outranks the document's
    /// counter: rows land only after a trio fully finished, while the
    /// counter can be stale after a crash or a hand edit. A log that
    /// already holds a full session drives the same roll-or-finish path a
    /// live 28th trio would. Running this twice in a row is a no-op.
    pub fn reconcile(&mut self) -> Result<ReconcileReport, EngineError> {
        let pair = self.state.config.pair_id();
        let session = self.state.progress.session_index;
        let log_rows = self.log.row_count(&pair, session)?;
        let counter_before = self.state.progress.completed_trios;
        let mut report = ReconcileReport {
            log_rows,
            counter_before,
            ..ReconcileReport::default()
        };

        if log_rows != counter_before {
            info!(
                session,
                log_rows, counter_before, "trial log outranks the progress counter"
            );
            self.state.progress.rebase_completed(log_rows);
            report.adjusted = true;
        }

        if self.state.progress.completed_trios >= TRIOS_PER_SESSION {
            self.state.status = SessionStatus::Complete;
            self.store.save(&mut self.state)?;
            match self.roll_or_finish()? {
                RollOutcome::Rolled => report.rolled_session = true,
                RollOutcome::Finished => report.finished = true,
            }
            return Ok(report);
        }

        let status_was_stale = self.state.is_complete();
        if status_was_stale {
            self.state.status = SessionStatus::Incomplete;
        }
        if report.adjusted || status_was_stale {
            self.store.save(&mut self.state)?;
        }
        self.phase = ControllerState::Idle;
        Ok(report)
    }

    /// Runs one trio end to end. Returns [`StepOutcome::Finished`] without
    /// doing anything once every session is complete.
    pub fn step(
        &mut self,
        runner: &mut dyn TrialRunner,
        actuator: &mut dyn RewardActuator,
    ) -> Result<StepOutcome, EngineError> {
        if self.phase == ControllerState::AllSessionsComplete {
            return Ok(StepOutcome::Finished);
        }
        self.phase = ControllerState::TrioRunning;
        let started = Local::now().naive_local();

        let leader = self.state.config.leader.clone();
        let follower = self.state.config.follower.clone();
        let profile = self.state.config.stimulus_profile.clone();
        let pair = self.state.config.pair_id();
        let leader_side = self.state.config.leader_side();
        let follower_side = leader_side.opposite();

        // Deck draws run against a scratch copy; an abort drops it.
        let mut decks = self.state.progress.decks.clone();

        self.state.progress.stage = Stage::Choice;
        let leader_layout = self.scheduler.choose_layout(leader_side);
        let follower_layout = self.scheduler.choose_layout(follower_side);
        let choice_plan = ChoicePlan {
            leader: leader.clone(),
            follower: follower.clone(),
            leader_side,
            leader_layout,
            follower_layout,
            deadline: self.config.choice_deadline,
        };
        let choice = match runner.run_choice(&choice_plan) {
            PhaseSignal::Completed(outcome) => outcome,
            PhaseSignal::Aborted => return self.abort(),
        };

        // Cross-delivery: the follower's earnings go out first.
        let delivery =
            resolve_paired_choice(&self.config, choice.leader_choice, choice.follower_choice);
        self.deliver_paced(runner, actuator, follower_side, delivery.to_follower);
        self.deliver_paced(runner, actuator, leader_side, delivery.to_leader);
        runner.rest(self.config.short_iti);

        self.state.progress.stage = Stage::LeaderStimulus;
        let leader_label = self.scheduler.next_label(&mut decks, leader_side);
        let leader_plan = StimulusPlan {
            participant: leader.clone(),
            side: leader_side,
            label: leader_label,
            color: profile_color(&profile, leader_label),
            exposure_ceiling: self.config.exposure_ceiling,
        };
        let leader_outcome = match runner.run_stimulus(&leader_plan) {
            PhaseSignal::Completed(outcome) => outcome,
            PhaseSignal::Aborted => return self.abort(),
        };
        let leader_decision =
            resolve_stimulus(&self.config, leader_label.category(), leader_outcome);
        self.dispense_logged(actuator, leader_side, leader_decision.units);
        runner.rest(leader_decision.iti);

        self.state.progress.stage = Stage::FollowerStimulus;
        let follower_label = self.scheduler.next_label(&mut decks, follower_side);
        let follower_plan = StimulusPlan {
            participant: follower.clone(),
            side: follower_side,
            label: follower_label,
            color: profile_color(&profile, follower_label),
            exposure_ceiling: self.config.exposure_ceiling,
        };
        let follower_outcome = match runner.run_stimulus(&follower_plan) {
            PhaseSignal::Completed(outcome) => outcome,
            PhaseSignal::Aborted => return self.abort(),
        };
        let follower_decision =
            resolve_stimulus(&self.config, follower_label.category(), follower_outcome);
        self.dispense_logged(actuator, follower_side, follower_decision.units);
        runner.rest(follower_decision.iti);

        // The trio happened: commit the scratch state.
        self.state.progress.decks = decks;
        self.scheduler.record_layout(leader_side, leader_layout);
        self.scheduler.record_layout(follower_side, follower_layout);

        let row = TrialLogRow {
            date: started.date(),
            time: started.time(),
            stimulus_profile: profile,
            pair,
            leader_side,
            leader,
            follower,
            session: self.state.progress.session_index,
            block: self.state.progress.block_index,
            trial: self.state.progress.next_trial(),
            leader_choice: choice.leader_choice,
            leader_choice_ms: choice.leader_latency.as_millis() as u64,
            follower_choice: choice.follower_choice,
            follower_choice_ms: choice.follower_latency.as_millis() as u64,
            leader_stimulus: leader_label,
            leader_hit: leader_outcome.contacted,
            leader_rt_ms: leader_outcome.latency.as_millis() as u64,
            follower_stimulus: follower_label,
            follower_hit: follower_outcome.contacted,
            follower_rt_ms: follower_outcome.latency.as_millis() as u64,
        };

        let session_done = self.state.progress.advance_after_trio();
        if session_done {
            self.state.status = SessionStatus::Complete;
        }
        self.store.save(&mut self.state)?;
        if let Err(err) = self.log.append_row(&row) {
            warn!(
                error = %err,
                "trial log append failed; the next reconcile absorbs the gap"
            );
        }
        info!(
            session = row.session,
            block = row.block,
            trial = row.trial,
            "trio complete"
        );

        if session_done {
            self.phase = ControllerState::SessionComplete;
            return match self.roll_or_finish()? {
                RollOutcome::Rolled => Ok(StepOutcome::SessionRolled),
                RollOutcome::Finished => Ok(StepOutcome::Finished),
            };
        }
        self.phase = ControllerState::Idle;
        Ok(StepOutcome::TrioCompleted)
    }

    /// Runs trios until the operator aborts or every session is finished.
    pub fn run(
        &mut self,
        runner: &mut dyn TrialRunner,
        actuator: &mut dyn RewardActuator,
    ) -> Result<StepOutcome, EngineError> {
        loop {
            match self.step(runner, actuator)? {
                StepOutcome::TrioCompleted | StepOutcome::SessionRolled => continue,
                outcome => return Ok(outcome),
            }
        }
    }

    fn abort(&mut self) -> Result<StepOutcome, EngineError> {
        info!("trio aborted by the operator; nothing recorded");
        self.state.progress.stage = Stage::default();
        self.phase = ControllerState::Idle;
        Ok(StepOutcome::Aborted)
    }

    fn roll_or_finish(&mut self) -> Result<RollOutcome, EngineError> {
        if self.state.progress.session_index < self.state.config.sessions_total {
            self.state.progress.start_next_session();
            self.state.status = SessionStatus::Incomplete;
            self.store.save(&mut self.state)?;
            self.phase = ControllerState::Idle;
            info!(
                session = self.state.progress.session_index,
                of = self.state.config.sessions_total,
                "rolled into the next session"
            );
            return Ok(RollOutcome::Rolled);
        }
        self.store
            .archive_or_delete(&self.state, self.config.delete_finished)?;
        self.phase = ControllerState::AllSessionsComplete;
        info!(uid = %self.state.uid, "all sessions complete; record retired");
        Ok(RollOutcome::Finished)
    }

    /// Choice rewards go out one unit at a time with a rest after each, so
    /// a four-unit amount reads as four discrete events.
    fn deliver_paced(
        &self,
        runner: &mut dyn TrialRunner,
        actuator: &mut dyn RewardActuator,
        side: Side,
        units: u32,
    ) {
        for _ in 0..units {
            self.dispense_logged(actuator, side, 1);
            runner.rest(self.config.delivery_pacing);
        }
    }

    /// Actuator faults are logged and swallowed; a feeder jam must not end
    /// the session.
    fn dispense_logged(&self, actuator: &mut dyn RewardActuator, side: Side, units: u32) {
        if units == 0 {
            return;
        }
        if let Err(err) = actuator.dispense(side, units) {
            warn!(side = %side, units, error = %err, "reward dispense failed");
        }
    }
}
