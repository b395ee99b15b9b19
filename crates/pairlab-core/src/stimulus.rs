use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// One block's deal for a single side: 2 Go, 2 No-Go, 1 of each ambiguous
/// label. Decks refill from this template and are then shuffled.
pub const DECK_TEMPLATE: [StimulusLabel; 7] = [
    StimulusLabel::SPlus,
    StimulusLabel::SPlus,
    StimulusLabel::SMinus,
    StimulusLabel::SMinus,
    StimulusLabel::NovelPositive,
    StimulusLabel::NovelNegative,
    StimulusLabel::Intermediate,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StimulusLabel {
    SPlus,
    SMinus,
    NovelPositive,
    NovelNegative,
    Intermediate,
}

impl StimulusLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            StimulusLabel::SPlus => "S+",
            StimulusLabel::SMinus => "S-",
            StimulusLabel::NovelPositive => "NP",
            StimulusLabel::NovelNegative => "NN",
            StimulusLabel::Intermediate => "INT",
        }
    }

    pub fn category(&self) -> StimulusCategory {
        match self {
            StimulusLabel::SPlus => StimulusCategory::Go,
            StimulusLabel::SMinus => StimulusCategory::NoGo,
            StimulusLabel::NovelPositive
            | StimulusLabel::NovelNegative
            | StimulusLabel::Intermediate => StimulusCategory::Ambiguous,
        }
    }
}

impl fmt::Display for StimulusLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StimulusLabel {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_uppercase().as_str() {
            "S+" => Ok(StimulusLabel::SPlus),
            "S-" => Ok(StimulusLabel::SMinus),
            "NP" => Ok(StimulusLabel::NovelPositive),
            "NN" => Ok(StimulusLabel::NovelNegative),
            "INT" => Ok(StimulusLabel::Intermediate),
            other => Err(format!("Unknown stimulus label: {other}")),
        }
    }
}

impl Serialize for StimulusLabel {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for StimulusLabel {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StimulusCategory {
    Go,
    NoGo,
    Ambiguous,
}

impl StimulusCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            StimulusCategory::Go => "go",
            StimulusCategory::NoGo => "no-go",
            StimulusCategory::Ambiguous => "ambiguous",
        }
    }
}

impl fmt::Display for StimulusCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub type Rgb = (u8, u8, u8);

/// Known profile names, in menu order. The first entry is the fallback for
/// unknown names in hand-edited documents.
pub const PROFILE_NAMES: [&str; 2] = ["Dark S+", "Light S+"];

/// Grayscale the rendering layer should paint a label with under the given
/// profile. The two profiles invert the brightness ramp so S+ is the darkest
/// square in one and the lightest in the other.
pub fn profile_color(profile: &str, label: StimulusLabel) -> Rgb {
    let ramp = match profile {
        "Light S+" => [145u8, 135, 125, 115, 105],
        _ => [105u8, 115, 125, 135, 145],
    };
    let shade = match label {
        StimulusLabel::SPlus => ramp[0],
        StimulusLabel::NovelPositive => ramp[1],
        StimulusLabel::Intermediate => ramp[2],
        StimulusLabel::NovelNegative => ramp[3],
        StimulusLabel::SMinus => ramp[4],
    };
    (shade, shade, shade)
}
