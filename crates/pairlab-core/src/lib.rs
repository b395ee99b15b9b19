use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub mod stimulus;
pub mod trial;

pub use stimulus::{StimulusCategory, StimulusLabel, DECK_TEMPLATE};
pub use trial::{ChoiceLayout, ChoiceOption, TrialLogRow, TRIAL_LOG_HEADER};

/// Current on-disk document revision.
pub const STATE_VERSION: u32 = 1;
pub const TRIOS_PER_BLOCK: u32 = 7;
pub const BLOCKS_PER_SESSION: u32 = 4;
pub const TRIOS_PER_SESSION: u32 = TRIOS_PER_BLOCK * BLOCKS_PER_SESSION;

/// One durable document per pair/configuration. Tolerates hand-edited JSON:
/// unknown fields round-trip through `extra`, optional fields default.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionState {
    #[serde(default = "default_version")]
    pub version: u32,
    pub uid: String,
    #[serde(default, deserialize_with = "deserialize_status")]
    pub status: SessionStatus,
    pub config: SessionConfig,
    #[serde(default)]
    pub progress: Progress,
    #[serde(default, flatten)]
    pub extra: HashMap<String, Value>,
}

impl SessionState {
    pub fn new(config: SessionConfig) -> Self {
        let uid = config.uid();
        Self {
            version: STATE_VERSION,
            uid,
            status: SessionStatus::Incomplete,
            config,
            progress: Progress::default(),
            extra: HashMap::new(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.status == SessionStatus::Complete
    }

    /// Re-derives `uid` from the current config. Returns the previous uid
    /// when it changed, so callers can drop the old backing document.
    pub fn refresh_uid(&mut self) -> Option<String> {
        let fresh = self.config.uid();
        if fresh == self.uid {
            return None;
        }
        Some(std::mem::replace(&mut self.uid, fresh))
    }

    /// Minimum shape a loaded document must have to be usable. Weaker than
    /// [`validate_config`]: hand-edited documents may omit side assignments.
    pub fn check_required(&self) -> Result<(), ConfigError> {
        if self.uid.trim().is_empty() {
            return Err(ConfigError::EmptyField { field: "uid" });
        }
        if self.config.leader.trim().is_empty() {
            return Err(ConfigError::EmptyField { field: "leader" });
        }
        if self.config.follower.trim().is_empty() {
            return Err(ConfigError::EmptyField { field: "follower" });
        }
        if self.config.sessions_total < 1 {
            return Err(ConfigError::SessionsOutOfRange {
                got: self.config.sessions_total,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionConfig {
    pub leader: String,
    pub follower: String,
    #[serde(default)]
    pub left_side: String,
    #[serde(default)]
    pub right_side: String,
    pub stimulus_profile: String,
    pub sessions_total: u32,
    #[serde(default, flatten)]
    pub extra: HashMap<String, Value>,
}

impl SessionConfig {
    pub fn uid(&self) -> String {
        session_uid(
            &self.leader,
            &self.follower,
            &self.stimulus_profile,
            self.sessions_total,
        )
    }

    pub fn pair_id(&self) -> String {
        format!("{}-{}", self.leader, self.follower)
    }

    /// Documents written before side assignments existed carry only
    /// leader/follower; those default to leader-on-left.
    pub fn participant_on(&self, side: Side) -> &str {
        match side {
            Side::Left if self.left_side.is_empty() => &self.leader,
            Side::Left => &self.left_side,
            Side::Right if self.right_side.is_empty() => &self.follower,
            Side::Right => &self.right_side,
        }
    }

    pub fn leader_side(&self) -> Side {
        if self.leader == self.participant_on(Side::Left) {
            Side::Left
        } else {
            Side::Right
        }
    }

    pub fn follower_side(&self) -> Side {
        self.leader_side().opposite()
    }
}

/// Deterministic document id; doubles as the backing file stem.
pub fn session_uid(leader: &str, follower: &str, profile: &str, sessions_total: u32) -> String {
    format!(
        "pairlab_v1__Leader-{leader}__Follower-{follower}__Stim-{profile}__Sessions-{sessions_total}"
    )
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Progress {
    #[serde(default = "default_index")]
    pub session_index: u32,
    #[serde(default = "default_index")]
    pub block_index: u32,
    #[serde(default = "default_index")]
    pub trio_index: u32,
    #[serde(default)]
    pub completed_trios: u32,
    #[serde(default, deserialize_with = "deserialize_stage")]
    pub stage: Stage,
    #[serde(default)]
    pub decks: SideDecks,
    #[serde(default)]
    pub last_saved: Option<String>,
    #[serde(default, flatten)]
    pub extra: HashMap<String, Value>,
}

impl Default for Progress {
    fn default() -> Self {
        Self {
            session_index: 1,
            block_index: 1,
            trio_index: 1,
            completed_trios: 0,
            stage: Stage::default(),
            decks: SideDecks::default(),
            last_saved: None,
            extra: HashMap::new(),
        }
    }
}

impl Progress {
    /// 1-based number of the trial that runs next (within the session).
    pub fn next_trial(&self) -> u32 {
        self.completed_trios + 1
    }

    /// Counts one finished trio. Returns `true` when this completed the
    /// session (the 28th trio); indices then rest at block 4 / trio 7.
    pub fn advance_after_trio(&mut self) -> bool {
        self.completed_trios += 1;
        self.stage = Stage::default();
        if self.completed_trios >= TRIOS_PER_SESSION {
            self.block_index = BLOCKS_PER_SESSION;
            self.trio_index = TRIOS_PER_BLOCK;
            return true;
        }
        self.block_index = self.completed_trios / TRIOS_PER_BLOCK + 1;
        self.trio_index = self.completed_trios % TRIOS_PER_BLOCK + 1;
        false
    }

    /// Forces the counter to `completed` finished trios and recomputes the
    /// block/trio indices to match. Counts above a full session clamp to 28.
    pub fn rebase_completed(&mut self, completed: u32) {
        let completed = completed.min(TRIOS_PER_SESSION);
        self.completed_trios = completed;
        if completed >= TRIOS_PER_SESSION {
            self.block_index = BLOCKS_PER_SESSION;
            self.trio_index = TRIOS_PER_BLOCK;
        } else {
            self.block_index = completed / TRIOS_PER_BLOCK + 1;
            self.trio_index = completed % TRIOS_PER_BLOCK + 1;
        }
        self.stage = Stage::default();
    }

    /// Operator jump: position the session so that `next_trial` (clamped to
    /// 1..=28) runs next. The three index fields stay mutually consistent.
    pub fn set_next_trial(&mut self, session_index: u32, next_trial: u32) {
        let next_trial = next_trial.clamp(1, TRIOS_PER_SESSION);
        self.session_index = session_index;
        self.rebase_completed(next_trial - 1);
    }

    /// Rolls into the following session: counters reset, decks dropped so
    /// the first draw reshuffles fresh.
    pub fn start_next_session(&mut self) {
        self.session_index += 1;
        self.block_index = 1;
        self.trio_index = 1;
        self.completed_trios = 0;
        self.stage = Stage::default();
        self.decks.clear();
    }
}

/// Remaining stimulus labels per physical side; draws pop from the back.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SideDecks {
    #[serde(default)]
    pub left: Vec<StimulusLabel>,
    #[serde(default)]
    pub right: Vec<StimulusLabel>,
}

impl SideDecks {
    pub fn side(&self, side: Side) -> &[StimulusLabel] {
        match side {
            Side::Left => &self.left,
            Side::Right => &self.right,
        }
    }

    pub fn side_mut(&mut self, side: Side) -> &mut Vec<StimulusLabel> {
        match side {
            Side::Left => &mut self.left,
            Side::Right => &mut self.right,
        }
    }

    pub fn clear(&mut self) {
        self.left.clear();
        self.right.clear();
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Incomplete,
    Complete,
}

impl Default for SessionStatus {
    fn default() -> Self {
        Self::Incomplete
    }
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Incomplete => "incomplete",
            SessionStatus::Complete => "complete",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sub-phase of the trio in flight. Persisted state almost always reads
/// `choice` because every completed trio resets to it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Choice,
    LeaderStimulus,
    FollowerStimulus,
}

impl Default for Stage {
    fn default() -> Self {
        Self::Choice
    }
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Choice => "choice",
            Stage::LeaderStimulus => "leader_stimulus",
            Stage::FollowerStimulus => "follower_stimulus",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let normalized = input.trim().to_lowercase();
        match normalized.as_str() {
            "choice" | "paired_choice" => Ok(Stage::Choice),
            "leader_stimulus" => Ok(Stage::LeaderStimulus),
            "follower_stimulus" => Ok(Stage::FollowerStimulus),
            other => Err(format!("Unknown stage: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Left,
    Right,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Left => "left",
            Side::Right => "right",
        }
    }

    /// Capitalized form used in the trial log.
    pub fn label(&self) -> &'static str {
        match self {
            Side::Left => "Left",
            Side::Right => "Right",
        }
    }

    pub fn opposite(&self) -> Side {
        match self {
            Side::Left => Side::Right,
            Side::Right => Side::Left,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Side {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let normalized = input.trim().to_lowercase();
        match normalized.as_str() {
            "left" | "l" => Ok(Side::Left),
            "right" | "r" => Ok(Side::Right),
            other => Err(format!("Unknown side: {other}")),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{field} must not be empty")]
    EmptyField { field: &'static str },
    #[error("{field} must not contain path separators")]
    UnsafeField { field: &'static str },
    #[error("left and right participants must differ")]
    IdenticalParticipants,
    #[error("leader {leader:?} is not one of the side assignments")]
    LeaderOffSides { leader: String },
    #[error("follower {follower:?} is not one of the side assignments")]
    FollowerOffSides { follower: String },
    #[error("leader and follower must differ")]
    LeaderIsFollower,
    #[error("sessions_total must be at least 1, got {got}")]
    SessionsOutOfRange { got: u32 },
    #[error("target session {got} is outside 1..={max}")]
    SessionIndexOutOfRange { got: u32, max: u32 },
}

/// Full launch-time validation. The first violated rule is returned; callers
/// surface it verbatim to the operator.
pub fn validate_config(config: &SessionConfig) -> Result<(), ConfigError> {
    for (field, value) in [
        ("leader", &config.leader),
        ("follower", &config.follower),
        ("left_side", &config.left_side),
        ("right_side", &config.right_side),
        ("stimulus_profile", &config.stimulus_profile),
    ] {
        if value.trim().is_empty() {
            return Err(ConfigError::EmptyField { field });
        }
        // uid doubles as the backing file stem
        if value.contains('/') || value.contains('\\') {
            return Err(ConfigError::UnsafeField { field });
        }
    }
    if config.left_side == config.right_side {
        return Err(ConfigError::IdenticalParticipants);
    }
    if config.leader != config.left_side && config.leader != config.right_side {
        return Err(ConfigError::LeaderOffSides {
            leader: config.leader.clone(),
        });
    }
    if config.follower != config.left_side && config.follower != config.right_side {
        return Err(ConfigError::FollowerOffSides {
            follower: config.follower.clone(),
        });
    }
    if config.leader == config.follower {
        return Err(ConfigError::LeaderIsFollower);
    }
    if config.sessions_total < 1 {
        return Err(ConfigError::SessionsOutOfRange {
            got: config.sessions_total,
        });
    }
    Ok(())
}

fn default_version() -> u32 {
    STATE_VERSION
}

fn default_index() -> u32 {
    1
}

/// Anything that is not literally "complete" counts as incomplete, matching
/// how resumable records are selected.
fn deserialize_status<'de, D>(deserializer: D) -> Result<SessionStatus, D::Error>
where
    D: Deserializer<'de>,
{
    let val: Value = Value::deserialize(deserializer)?;
    match val {
        Value::String(s) if s.trim().eq_ignore_ascii_case("complete") => {
            Ok(SessionStatus::Complete)
        }
        _ => Ok(SessionStatus::Incomplete),
    }
}

/// Unknown stage strings in hand-edited documents fall back to the first
/// phase rather than rejecting the document.
fn deserialize_stage<'de, D>(deserializer: D) -> Result<Stage, D::Error>
where
    D: Deserializer<'de>,
{
    let val: Value = Value::deserialize(deserializer)?;
    match val {
        Value::String(s) => Ok(s.parse().unwrap_or_default()),
        _ => Ok(Stage::default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_config() -> SessionConfig {
        SessionConfig {
            leader: "Ira".to_string(),
            follower: "Irene".to_string(),
            left_side: "Ira".to_string(),
            right_side: "Irene".to_string(),
            stimulus_profile: "Dark S+".to_string(),
            sessions_total: 6,
            extra: HashMap::new(),
        }
    }

    #[test]
    fn uid_is_deterministic_and_readable() {
        let config = sample_config();
        assert_eq!(
            config.uid(),
            "pairlab_v1__Leader-Ira__Follower-Irene__Stim-Dark S+__Sessions-6"
        );
        assert_eq!(config.uid(), sample_config().uid());
    }

    #[test]
    fn indices_follow_completed_count_for_every_trial() {
        for n in 0..TRIOS_PER_SESSION {
            let mut advanced = Progress::default();
            let mut finished = false;
            for _ in 0..n {
                finished = advanced.advance_after_trio();
            }
            assert!(!finished);
            assert_eq!(advanced.completed_trios, n);
            assert_eq!(advanced.block_index, n / 7 + 1);
            assert_eq!(advanced.trio_index, n % 7 + 1);

            let mut rebased = Progress::default();
            rebased.rebase_completed(n);
            assert_eq!(rebased.block_index, advanced.block_index);
            assert_eq!(rebased.trio_index, advanced.trio_index);
        }
    }

    #[test]
    fn twenty_eighth_trio_finishes_the_session() {
        let mut progress = Progress::default();
        for _ in 0..27 {
            assert!(!progress.advance_after_trio());
        }
        assert!(progress.advance_after_trio());
        assert_eq!(progress.completed_trios, 28);
        assert_eq!(progress.block_index, 4);
        assert_eq!(progress.trio_index, 7);
    }

    #[test]
    fn rebase_matches_advancement_at_the_boundary() {
        let mut progress = Progress::default();
        progress.rebase_completed(28);
        assert_eq!(progress.block_index, 4);
        assert_eq!(progress.trio_index, 7);
        // over-full counts clamp instead of overflowing the indices
        progress.rebase_completed(31);
        assert_eq!(progress.completed_trios, 28);
        assert_eq!(progress.block_index, 4);
    }

    #[test]
    fn set_next_trial_clamps_and_stays_consistent() {
        let mut progress = Progress::default();
        progress.set_next_trial(3, 8);
        assert_eq!(progress.session_index, 3);
        assert_eq!(progress.completed_trios, 7);
        assert_eq!(progress.block_index, 2);
        assert_eq!(progress.trio_index, 1);

        progress.set_next_trial(1, 0);
        assert_eq!(progress.completed_trios, 0);
        assert_eq!(progress.trio_index, 1);

        progress.set_next_trial(1, 99);
        assert_eq!(progress.completed_trios, 27);
        assert_eq!(progress.block_index, 4);
        assert_eq!(progress.trio_index, 7);
    }

    #[test]
    fn next_session_resets_counters_and_decks() {
        let mut progress = Progress::default();
        progress.decks.left.push(StimulusLabel::SPlus);
        progress.rebase_completed(28);
        progress.start_next_session();
        assert_eq!(progress.session_index, 2);
        assert_eq!(progress.completed_trios, 0);
        assert_eq!(progress.block_index, 1);
        assert_eq!(progress.trio_index, 1);
        assert!(progress.decks.left.is_empty());
    }

    #[test]
    fn validate_accepts_sane_config() {
        assert_eq!(validate_config(&sample_config()), Ok(()));
    }

    #[test]
    fn validate_rejects_bad_configs() {
        let mut config = sample_config();
        config.leader = String::new();
        assert_eq!(
            validate_config(&config),
            Err(ConfigError::EmptyField { field: "leader" })
        );

        let mut config = sample_config();
        config.right_side = "Ira".to_string();
        assert_eq!(
            validate_config(&config),
            Err(ConfigError::IdenticalParticipants)
        );

        let mut config = sample_config();
        config.leader = "Paddy".to_string();
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::LeaderOffSides { .. })
        ));

        let mut config = sample_config();
        config.leader = "Ira/..".to_string();
        config.left_side = "Ira/..".to_string();
        assert_eq!(
            validate_config(&config),
            Err(ConfigError::UnsafeField { field: "leader" })
        );

        let mut config = sample_config();
        config.sessions_total = 0;
        assert_eq!(
            validate_config(&config),
            Err(ConfigError::SessionsOutOfRange { got: 0 })
        );
    }

    #[test]
    fn leader_side_follows_assignments() {
        let mut config = sample_config();
        assert_eq!(config.leader_side(), Side::Left);
        assert_eq!(config.follower_side(), Side::Right);
        config.left_side = "Irene".to_string();
        config.right_side = "Ira".to_string();
        assert_eq!(config.leader_side(), Side::Right);
        assert_eq!(config.participant_on(Side::Left), "Irene");
    }

    #[test]
    fn state_round_trips_with_extra_fields() {
        let raw = r#"{
            "version": 1,
            "uid": "pairlab_v1__Leader-Ira__Follower-Irene__Stim-Dark S+__Sessions-6",
            "status": "incomplete",
            "config": {
                "leader": "Ira",
                "follower": "Irene",
                "stimulus_profile": "Dark S+",
                "sessions_total": 6,
                "operator_note": "hand added"
            },
            "progress": {
                "session_index": 2,
                "block_index": 2,
                "trio_index": 4,
                "completed_trios": 10,
                "stage": "choice",
                "decks": {"left": ["S+", "NN"], "right": []}
            }
        }"#;
        let state: SessionState = serde_json::from_str(raw).expect("parse state");
        assert_eq!(state.progress.completed_trios, 10);
        assert_eq!(state.config.extra["operator_note"], "hand added");
        assert_eq!(
            state.progress.decks.left,
            vec![StimulusLabel::SPlus, StimulusLabel::NovelNegative]
        );

        let round = serde_json::to_string(&state).expect("serialize state");
        assert!(round.contains("operator_note"));
    }

    #[test]
    fn legacy_documents_without_sides_default_to_leader_on_left() {
        let raw = r#"{
            "uid": "pairlab_v1__Leader-Ira__Follower-Irene__Stim-Dark S+__Sessions-6",
            "config": {
                "leader": "Ira",
                "follower": "Irene",
                "stimulus_profile": "Dark S+",
                "sessions_total": 6
            }
        }"#;
        let state: SessionState = serde_json::from_str(raw).expect("parse state");
        assert_eq!(state.config.leader_side(), Side::Left);
        assert_eq!(state.progress.session_index, 1);
        assert_eq!(state.status, SessionStatus::Incomplete);
        assert!(state.check_required().is_ok());
    }

    #[test]
    fn unknown_status_and_stage_fall_back() {
        let raw = r#"{
            "uid": "u",
            "status": "paused",
            "config": {
                "leader": "Ira",
                "follower": "Irene",
                "stimulus_profile": "Dark S+",
                "sessions_total": 6
            },
            "progress": {"stage": "someday"}
        }"#;
        let state: SessionState = serde_json::from_str(raw).expect("parse state");
        assert_eq!(state.status, SessionStatus::Incomplete);
        assert_eq!(state.progress.stage, Stage::Choice);
    }

    #[test]
    fn refresh_uid_reports_the_old_id() {
        let mut state = SessionState::new(sample_config());
        assert_eq!(state.refresh_uid(), None);
        let old = state.uid.clone();
        state.config.stimulus_profile = "Light S+".to_string();
        assert_eq!(state.refresh_uid(), Some(old));
        assert!(state.uid.contains("Light S+"));
    }
}
