//! Operator-facing record workflows: create, list, show, edit.

use anyhow::{anyhow, Context, Result};
use clap::Args;
use pairlab_core::stimulus::PROFILE_NAMES;
use pairlab_core::{
    validate_config, SessionConfig, SessionState, Side, StimulusLabel, TRIOS_PER_SESSION,
};
use pairlab_engine::{apply_edit, new_or_resume, EditRequest};
use pairlab_store::{SessionStore, TrialLog};
use std::path::PathBuf;
use tracing::warn;

/// Where this installation keeps its durable state.
pub struct LabPaths {
    pub root: PathBuf,
    pub state_dir: PathBuf,
    pub logs_dir: PathBuf,
}

impl LabPaths {
    pub fn resolve(data_dir: Option<PathBuf>) -> Result<Self> {
        let root = data_dir
            .or_else(|| std::env::var_os("PAIRLAB_DATA_DIR").map(PathBuf::from))
            .or_else(|| dirs::data_local_dir().map(|dir| dir.join("pairlab")))
            .context("no data directory; pass --data-dir or set PAIRLAB_DATA_DIR")?;
        Ok(Self {
            state_dir: root.join("state"),
            logs_dir: root.join("logs"),
            root,
        })
    }

    pub fn open_store(&self) -> Result<SessionStore> {
        SessionStore::open(&self.state_dir)
            .with_context(|| format!("open session store at {}", self.state_dir.display()))
    }

    pub fn open_log(&self) -> Result<TrialLog> {
        TrialLog::open(&self.logs_dir)
            .with_context(|| format!("open trial logs at {}", self.logs_dir.display()))
    }
}

/// Session parameters shared by `new` and `simulate`.
#[derive(Args, Debug)]
pub struct ConfigArgs {
    /// Participant who chooses first.
    #[arg(long)]
    pub leader: String,
    /// Participant who chooses second.
    #[arg(long)]
    pub follower: String,
    /// Which side the leader sits on: left or right.
    #[arg(long, default_value = "left")]
    pub leader_side: String,
    /// Stimulus color profile.
    #[arg(long, default_value = "Dark S+")]
    pub profile: String,
    /// Planned number of sessions for this pair.
    #[arg(long, default_value_t = 6, value_parser = clap::value_parser!(u32).range(1..=12))]
    pub sessions: u32,
}

impl ConfigArgs {
    pub fn to_config(&self) -> Result<SessionConfig> {
        let leader_side = parse_side(&self.leader_side)?;
        let (left_side, right_side) = match leader_side {
            Side::Left => (self.leader.clone(), self.follower.clone()),
            Side::Right => (self.follower.clone(), self.leader.clone()),
        };
        let config = SessionConfig {
            leader: self.leader.clone(),
            follower: self.follower.clone(),
            left_side,
            right_side,
            stimulus_profile: self.profile.clone(),
            sessions_total: self.sessions,
            extra: Default::default(),
        };
        validate_config(&config)?;
        if !PROFILE_NAMES.contains(&config.stimulus_profile.as_str()) {
            warn!(
                profile = %config.stimulus_profile,
                "unknown stimulus profile, colors fall back to {}", PROFILE_NAMES[0]
            );
        }
        Ok(config)
    }
}

#[derive(Args, Debug)]
pub struct NewArgs {
    #[command(flatten)]
    pub config: ConfigArgs,
}

#[derive(Args, Debug)]
pub struct ShowArgs {
    /// Record uid as shown by `list`.
    pub uid: String,
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct EditArgs {
    /// Record uid as shown by `list`.
    pub uid: String,
    /// Rename the participant on the left.
    #[arg(long)]
    pub left: Option<String>,
    /// Rename the participant on the right.
    #[arg(long)]
    pub right: Option<String>,
    /// Move leadership to this side: left or right.
    #[arg(long)]
    pub leader_side: Option<String>,
    /// Switch the stimulus color profile.
    #[arg(long)]
    pub profile: Option<String>,
    /// 1-based session to resume into.
    #[arg(long)]
    pub session: Option<u32>,
    /// 1-based trial to run next; values past 28 clamp.
    #[arg(long)]
    pub trial: Option<u32>,
}

pub fn new_record(paths: &LabPaths, args: &NewArgs) -> Result<()> {
    let config = args.config.to_config()?;
    let store = paths.open_store()?;
    let (state, resumed) = new_or_resume(&store, config)?;
    if resumed {
        println!("Resumed existing record:");
    } else {
        println!("Created new record:");
    }
    print_record(&state);
    println!("data:     {}", paths.root.display());
    Ok(())
}

pub fn list_records(paths: &LabPaths) -> Result<()> {
    let store = paths.open_store()?;
    let records = store.load_all()?;
    if records.is_empty() {
        println!("No resumable session records in {}", paths.root.display());
        return Ok(());
    }
    println!("Found {} resumable record(s):", records.len());
    for state in records.values() {
        println!(
            "- {} / {} [{}]  session {}/{}  next trial {}/{}",
            state.config.leader,
            state.config.follower,
            state.config.stimulus_profile,
            state.progress.session_index,
            state.config.sessions_total,
            state.progress.next_trial(),
            TRIOS_PER_SESSION
        );
        println!("    uid: {}", state.uid);
    }
    Ok(())
}

pub fn show_record(paths: &LabPaths, args: &ShowArgs) -> Result<()> {
    let store = paths.open_store()?;
    let state = store
        .load(&args.uid)?
        .with_context(|| format!("no session record with uid {}", args.uid))?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&state)?);
        return Ok(());
    }
    print_record(&state);
    println!(
        "decks:    left [{}], right [{}]",
        join_labels(&state.progress.decks.left),
        join_labels(&state.progress.decks.right)
    );
    Ok(())
}

pub fn edit_record(paths: &LabPaths, args: &EditArgs) -> Result<()> {
    let store = paths.open_store()?;
    let state = store
        .load(&args.uid)?
        .with_context(|| format!("no session record with uid {}", args.uid))?;

    let current_left = state.config.participant_on(Side::Left).to_string();
    let current_right = state.config.participant_on(Side::Right).to_string();
    let leader_side = match &args.leader_side {
        Some(raw) => parse_side(raw)?,
        None => state.config.leader_side(),
    };
    let edit = EditRequest {
        left_side: args.left.clone().unwrap_or(current_left),
        right_side: args.right.clone().unwrap_or(current_right),
        left_is_leader: leader_side == Side::Left,
        stimulus_profile: args
            .profile
            .clone()
            .unwrap_or_else(|| state.config.stimulus_profile.clone()),
        session_index: args.session.unwrap_or(state.progress.session_index),
        next_trial: args.trial.unwrap_or_else(|| state.progress.next_trial()),
    };
    let updated = apply_edit(&store, state, edit)?;
    println!("Updated record:");
    print_record(&updated);
    Ok(())
}

pub(crate) fn print_record(state: &SessionState) {
    println!("uid:      {}", state.uid);
    println!(
        "pair:     {} leads from the {} side, {} follows",
        state.config.leader,
        state.config.leader_side(),
        state.config.follower
    );
    println!("profile:  {}", state.config.stimulus_profile);
    println!("status:   {}", state.status);
    println!(
        "position: session {}/{}, block {}, trio {}, next trial {}/{}",
        state.progress.session_index,
        state.config.sessions_total,
        state.progress.block_index,
        state.progress.trio_index,
        state.progress.next_trial(),
        TRIOS_PER_SESSION
    );
    if let Some(saved) = &state.progress.last_saved {
        println!("saved:    {saved}");
    }
}

fn join_labels(labels: &[StimulusLabel]) -> String {
    labels
        .iter()
        .map(|label| label.as_str())
        .collect::<Vec<_>>()
        .join(" ")
}

fn parse_side(raw: &str) -> Result<Side> {
    raw.parse::<Side>().map_err(|err| anyhow!(err))
}
