use chrono::{NaiveDate, NaiveTime};
use std::fmt;
use std::str::FromStr;

use crate::stimulus::StimulusLabel;
use crate::Side;

/// The two fixed options of the paired-choice phase. Sizes (how many reward
/// units each maps to) live in the engine configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChoiceOption {
    Large,
    Small,
}

impl ChoiceOption {
    /// Single-letter form used in the trial log.
    pub fn as_str(&self) -> &'static str {
        match self {
            ChoiceOption::Large => "L",
            ChoiceOption::Small => "S",
        }
    }
}

impl fmt::Display for ChoiceOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChoiceOption {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_lowercase().as_str() {
            "l" | "large" => Ok(ChoiceOption::Large),
            "s" | "small" => Ok(ChoiceOption::Small),
            other => Err(format!("Unknown choice option: {other}")),
        }
    }
}

/// Physical arrangement of the two choice options on one side's half of the
/// display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChoiceLayout {
    LargeLeft,
    LargeRight,
}

impl ChoiceLayout {
    pub const BOTH: [ChoiceLayout; 2] = [ChoiceLayout::LargeLeft, ChoiceLayout::LargeRight];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChoiceLayout::LargeLeft => "large-left",
            ChoiceLayout::LargeRight => "large-right",
        }
    }

    /// Which option occupies the given position within the half.
    pub fn option_at(&self, position: Side) -> ChoiceOption {
        match (self, position) {
            (ChoiceLayout::LargeLeft, Side::Left) | (ChoiceLayout::LargeRight, Side::Right) => {
                ChoiceOption::Large
            }
            _ => ChoiceOption::Small,
        }
    }

    pub fn position_of(&self, option: ChoiceOption) -> Side {
        match (self, option) {
            (ChoiceLayout::LargeLeft, ChoiceOption::Large)
            | (ChoiceLayout::LargeRight, ChoiceOption::Small) => Side::Left,
            _ => Side::Right,
        }
    }
}

impl fmt::Display for ChoiceLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub const TRIAL_LOG_HEADER: [&str; 21] = [
    "date",
    "time",
    "stimulus_profile",
    "pair",
    "leader_side",
    "leader",
    "follower",
    "session",
    "block",
    "trial",
    "paired_choice",
    "leader_choice",
    "leader_choice_ms",
    "follower_choice",
    "follower_choice_ms",
    "leader_stimulus",
    "leader_hit",
    "leader_rt_ms",
    "follower_stimulus",
    "follower_hit",
    "follower_rt_ms",
];

/// One immutable line of the append-only trial log; written only after the
/// trio's reward delivery has fully executed.
#[derive(Debug, Clone, PartialEq)]
pub struct TrialLogRow {
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub stimulus_profile: String,
    pub pair: String,
    pub leader_side: Side,
    pub leader: String,
    pub follower: String,
    pub session: u32,
    pub block: u32,
    pub trial: u32,
    pub leader_choice: ChoiceOption,
    pub leader_choice_ms: u64,
    pub follower_choice: ChoiceOption,
    pub follower_choice_ms: u64,
    pub leader_stimulus: StimulusLabel,
    pub leader_hit: bool,
    pub leader_rt_ms: u64,
    pub follower_stimulus: StimulusLabel,
    pub follower_hit: bool,
    pub follower_rt_ms: u64,
}

impl TrialLogRow {
    /// Leader letter then follower letter, e.g. `LS`.
    pub fn paired_choice(&self) -> String {
        format!("{}{}", self.leader_choice, self.follower_choice)
    }

    /// Column values in header order.
    pub fn fields(&self) -> [String; 21] {
        [
            self.date.format("%Y-%m-%d").to_string(),
            self.time.format("%H:%M:%S").to_string(),
            self.stimulus_profile.clone(),
            self.pair.clone(),
            self.leader_side.label().to_string(),
            self.leader.clone(),
            self.follower.clone(),
            self.session.to_string(),
            self.block.to_string(),
            self.trial.to_string(),
            self.paired_choice(),
            self.leader_choice.to_string(),
            self.leader_choice_ms.to_string(),
            self.follower_choice.to_string(),
            self.follower_choice_ms.to_string(),
            self.leader_stimulus.to_string(),
            u32::from(self.leader_hit).to_string(),
            self.leader_rt_ms.to_string(),
            self.follower_stimulus.to_string(),
            u32::from(self.follower_hit).to_string(),
            self.follower_rt_ms.to_string(),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveTime};

    fn sample_row() -> TrialLogRow {
        TrialLogRow {
            date: NaiveDate::from_ymd_opt(2026, 2, 23).expect("date"),
            time: NaiveTime::from_hms_opt(9, 41, 7).expect("time"),
            stimulus_profile: "Dark S+".to_string(),
            pair: "Ira-Irene".to_string(),
            leader_side: Side::Left,
            leader: "Ira".to_string(),
            follower: "Irene".to_string(),
            session: 2,
            block: 3,
            trial: 15,
            leader_choice: ChoiceOption::Large,
            leader_choice_ms: 1843,
            follower_choice: ChoiceOption::Small,
            follower_choice_ms: 922,
            leader_stimulus: StimulusLabel::SPlus,
            leader_hit: true,
            leader_rt_ms: 1210,
            follower_stimulus: StimulusLabel::SMinus,
            follower_hit: false,
            follower_rt_ms: 5000,
        }
    }

    #[test]
    fn fields_line_up_with_the_header() {
        let row = sample_row();
        let fields = row.fields();
        assert_eq!(fields.len(), TRIAL_LOG_HEADER.len());
        assert_eq!(fields[0], "2026-02-23");
        assert_eq!(fields[1], "09:41:07");
        assert_eq!(fields[4], "Left");
        assert_eq!(fields[9], "15");
        assert_eq!(fields[10], "LS");
        assert_eq!(fields[16], "1");
        assert_eq!(fields[19], "0");
    }

    #[test]
    fn layout_maps_options_to_positions() {
        assert_eq!(
            ChoiceLayout::LargeLeft.option_at(Side::Left),
            ChoiceOption::Large
        );
        assert_eq!(
            ChoiceLayout::LargeLeft.option_at(Side::Right),
            ChoiceOption::Small
        );
        assert_eq!(
            ChoiceLayout::LargeRight.position_of(ChoiceOption::Large),
            Side::Right
        );
        assert_eq!(
            ChoiceLayout::LargeRight.position_of(ChoiceOption::Small),
            Side::Left
        );
    }

    #[test]
    fn options_parse_from_letters_and_words() {
        assert_eq!("L".parse::<ChoiceOption>(), Ok(ChoiceOption::Large));
        assert_eq!("small".parse::<ChoiceOption>(), Ok(ChoiceOption::Small));
        assert!("x".parse::<ChoiceOption>().is_err());
    }
}
