use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Output format for daemon log records.
#[derive(
    Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum LogFormat {
    /// One flattened JSON object per event.
    #[default]
    Json,
    /// Human-readable single line output.
    Compact,
}

impl LogFormat {
    /// Returns true when records are emitted as machine-readable JSON.
    #[must_use]
    pub const fn is_structured(self) -> bool {
        matches!(self, Self::Json)
    }
}

/// Errors encountered while parsing a [`LogFormat`] from text.
pub type LogFormatParseError = strum::ParseError;
