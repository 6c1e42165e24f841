use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Inventory flavour built when the simulator starts.
///
/// `Vpx` mimics a management server fronting datacenters, hosts, and virtual
/// machines. `Esx` mimics a single standalone host: one implicit datacenter
/// and one host regardless of the configured counts.
#[derive(
    Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum ModelKind {
    /// Management-server inventory.
    #[default]
    Vpx,
    /// Standalone host inventory.
    Esx,
}

impl ModelKind {
    /// API type advertised by the service instance for this flavour.
    #[must_use]
    pub const fn api_type(self) -> &'static str {
        match self {
            Self::Vpx => "VirtualCenter",
            Self::Esx => "HostAgent",
        }
    }
}

/// Errors encountered while parsing a [`ModelKind`] from text.
pub type ModelKindParseError = strum::ParseError;
