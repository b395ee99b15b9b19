//! Scripted stand-ins for the apparatus: seeded participants and a
//! console feeder, driving the real engine against real files.

use anyhow::Result;
use clap::Args;
use pairlab_core::{ChoiceOption, Side, StimulusCategory};
use pairlab_engine::{
    new_or_resume, ActuatorError, ChoiceOutcome, ChoicePlan, EngineConfig, PhaseSignal,
    RewardActuator, SessionController, StepOutcome, StimulusOutcome, StimulusPlan,
    StimulusScheduler, TrialRunner,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;
use tracing::info;

use crate::session::{print_record, ConfigArgs, LabPaths};

#[derive(Args, Debug)]
pub struct SimulateArgs {
    #[command(flatten)]
    pub config: ConfigArgs,
    /// Stop after this many completed trios; omit to run every remaining
    /// session to the end.
    #[arg(long)]
    pub trios: Option<u32>,
    /// Seed for the scheduler and the simulated participants; random when
    /// omitted, always printed.
    #[arg(long)]
    pub seed: Option<u64>,
    /// Move the finished record into the archive instead of deleting it.
    #[arg(long)]
    pub archive_finished: bool,
}

pub fn run_simulation(paths: &LabPaths, args: &SimulateArgs) -> Result<()> {
    let config = args.config.to_config()?;
    let store = paths.open_store()?;
    let log = paths.open_log()?;
    let (state, resumed) = new_or_resume(&store, config)?;
    if resumed {
        println!("Resuming {}", state.uid);
    } else {
        println!("Starting {}", state.uid);
    }

    let seed = args.seed.unwrap_or_else(rand::random);
    println!("seed: {seed}");
    let engine_config = EngineConfig {
        delete_finished: !args.archive_finished,
        ..EngineConfig::default()
    };
    let scheduler = StimulusScheduler::new(StdRng::seed_from_u64(seed));
    let mut controller = SessionController::new(engine_config, store, log, scheduler, state);

    let report = controller.reconcile()?;
    if report.adjusted {
        println!(
            "reconciled: trial log held {} row(s), counter said {}",
            report.log_rows, report.counter_before
        );
    }

    let mut runner = SimRunner::new(StdRng::seed_from_u64(seed.wrapping_add(1)));
    let mut actuator = ConsoleActuator;
    let mut completed = 0u32;
    let mut finished = report.finished;
    while !finished {
        if args.trios.map_or(false, |limit| completed >= limit) {
            break;
        }
        match controller.step(&mut runner, &mut actuator)? {
            StepOutcome::TrioCompleted | StepOutcome::SessionRolled => completed += 1,
            StepOutcome::Finished => {
                completed += 1;
                finished = true;
            }
            StepOutcome::Aborted => break,
        }
    }

    println!("completed {completed} trio(s) this run");
    if finished {
        println!("All sessions complete; record retired.");
    } else {
        println!("Paused with the record at:");
        print_record(controller.state());
    }
    println!("trial logs: {}", paths.logs_dir.display());
    Ok(())
}

/// Deterministic participants: plausible latencies, category-sensitive
/// contact rates, and no real waiting.
struct SimRunner {
    rng: StdRng,
}

impl SimRunner {
    fn new(rng: StdRng) -> Self {
        Self { rng }
    }

    fn pick_option(&mut self) -> ChoiceOption {
        if self.rng.gen_bool(0.5) {
            ChoiceOption::Large
        } else {
            ChoiceOption::Small
        }
    }

    fn latency(&mut self, low_ms: u64, high_ms: u64) -> Duration {
        Duration::from_millis(self.rng.gen_range(low_ms..high_ms))
    }
}

impl TrialRunner for SimRunner {
    fn run_choice(&mut self, _plan: &ChoicePlan) -> PhaseSignal<ChoiceOutcome> {
        PhaseSignal::Completed(ChoiceOutcome {
            leader_choice: self.pick_option(),
            leader_latency: self.latency(400, 4_000),
            follower_choice: self.pick_option(),
            follower_latency: self.latency(400, 4_000),
        })
    }

    fn run_stimulus(&mut self, plan: &StimulusPlan) -> PhaseSignal<StimulusOutcome> {
        let contact_rate = match plan.label.category() {
            StimulusCategory::Go => 0.85,
            StimulusCategory::NoGo => 0.30,
            StimulusCategory::Ambiguous => 0.50,
        };
        if self.rng.gen_bool(contact_rate) {
            PhaseSignal::Completed(StimulusOutcome {
                contacted: true,
                latency: self.latency(250, 4_500),
            })
        } else {
            PhaseSignal::Completed(StimulusOutcome {
                contacted: false,
                latency: plan.exposure_ceiling,
            })
        }
    }

    fn rest(&mut self, _interval: Duration) {}
}

/// Dev feeder: every pulse goes to the log instead of a GPIO line.
struct ConsoleActuator;

impl RewardActuator for ConsoleActuator {
    fn dispense(&mut self, side: Side, units: u32) -> Result<(), ActuatorError> {
        info!(side = %side, units, "simulated pellet pulse");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    fn sim_args(trios: Option<u32>, seed: u64, sessions: u32) -> SimulateArgs {
        SimulateArgs {
            config: ConfigArgs {
                leader: "Ira".to_string(),
                follower: "Irene".to_string(),
                leader_side: "left".to_string(),
                profile: "Dark S+".to_string(),
                sessions,
            },
            trios,
            seed: Some(seed),
            archive_finished: false,
        }
    }

    fn paths(dir: &TempDir) -> LabPaths {
        LabPaths::resolve(Some(dir.path().to_path_buf())).expect("resolve paths")
    }

    /// Everything after the timestamp and identity columns: choices,
    /// latencies, stimuli, outcomes.
    fn behavior_columns(path: &Path) -> Vec<String> {
        fs::read_to_string(path)
            .expect("read log")
            .lines()
            .skip(1)
            .map(|line| line.split(',').skip(10).collect::<Vec<_>>().join(","))
            .collect()
    }

    #[test]
    fn limited_run_writes_exactly_that_many_rows() {
        let dir = TempDir::new().expect("tempdir");
        let paths = paths(&dir);
        run_simulation(&paths, &sim_args(Some(5), 21, 6)).expect("simulate");

        let log = paths.open_log().expect("log");
        assert_eq!(log.row_count("Ira-Irene", 1).expect("rows"), 5);
        let store = paths.open_store().expect("store");
        let state = store
            .load(&sim_args(None, 0, 6).config.to_config().expect("config").uid())
            .expect("load")
            .expect("present");
        assert_eq!(state.progress.completed_trios, 5);
    }

    #[test]
    fn same_seed_replays_the_same_behavior() {
        let dir_a = TempDir::new().expect("tempdir");
        let dir_b = TempDir::new().expect("tempdir");
        run_simulation(&paths(&dir_a), &sim_args(Some(6), 77, 6)).expect("simulate a");
        run_simulation(&paths(&dir_b), &sim_args(Some(6), 77, 6)).expect("simulate b");

        let path_a = paths(&dir_a).open_log().expect("log").log_path("Ira-Irene", 1);
        let path_b = paths(&dir_b).open_log().expect("log").log_path("Ira-Irene", 1);
        assert_eq!(behavior_columns(&path_a), behavior_columns(&path_b));
    }

    #[test]
    fn unlimited_run_retires_a_single_session_plan() {
        let dir = TempDir::new().expect("tempdir");
        let paths = paths(&dir);
        run_simulation(&paths, &sim_args(None, 5, 1)).expect("simulate");

        let log = paths.open_log().expect("log");
        assert_eq!(log.row_count("Ira-Irene", 1).expect("rows"), 28);
        let store = paths.open_store().expect("store");
        assert!(store.load_all().expect("load all").is_empty());
    }

    #[test]
    fn interrupted_simulation_resumes_where_it_stopped() {
        let dir = TempDir::new().expect("tempdir");
        let paths = paths(&dir);
        run_simulation(&paths, &sim_args(Some(10), 3, 2)).expect("first run");
        run_simulation(&paths, &sim_args(Some(25), 3, 2)).expect("second run");

        let log = paths.open_log().expect("log");
        assert_eq!(log.row_count("Ira-Irene", 1).expect("rows"), 28);
        assert_eq!(log.row_count("Ira-Irene", 2).expect("rows"), 7);
    }
}
