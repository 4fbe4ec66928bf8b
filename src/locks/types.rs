//! Resource group and lock information types.

use super::metadata::LockState;
use crate::error::SetupError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

/// One of the four independently locked hardware subsystems.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceGroup {
    /// High-voltage bias supply.
    Bias,
    /// Oscilloscope or digitizer.
    SignalAcquisition,
    /// Motorized stages and the pulsed laser.
    Tct,
    /// Peltier cells and their supply.
    Temperature,
}

impl ResourceGroup {
    /// All groups, in a fixed order.
    pub const ALL: [ResourceGroup; 4] = [
        ResourceGroup::Bias,
        ResourceGroup::SignalAcquisition,
        ResourceGroup::Tct,
        ResourceGroup::Temperature,
    ];

    /// Lock name of this group; also the stem of its lock files.
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceGroup::Bias => "bias",
            ResourceGroup::SignalAcquisition => "signal_acquisition",
            ResourceGroup::Tct => "tct",
            ResourceGroup::Temperature => "temperature",
        }
    }
}

impl std::fmt::Display for ResourceGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceGroup {
    type Err = SetupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bias" => Ok(ResourceGroup::Bias),
            "signal_acquisition" => Ok(ResourceGroup::SignalAcquisition),
            "tct" => Ok(ResourceGroup::Tct),
            "temperature" => Ok(ResourceGroup::Temperature),
            other => Err(SetupError::InvalidInput(format!(
                "unknown resource group '{}' (expected bias, signal_acquisition, tct or temperature)",
                other
            ))),
        }
    }
}

/// Information about a held lock.
#[derive(Debug, Clone)]
pub struct LockInfo {
    /// The lock state file path.
    pub path: PathBuf,

    /// The lock name (e.g., "bias").
    pub name: String,

    /// The resource group, if the name is one of the known groups.
    pub group: Option<ResourceGroup>,

    /// Who holds the lock and since when.
    pub state: LockState,

    /// Whether the lock has been held longer than the stale threshold.
    pub is_stale: bool,
}

impl std::fmt::Display for LockInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} (holder: {}, depth: {}, age: {}{})",
            self.name,
            self.state.holder,
            self.state.count,
            self.state.age_string(),
            if self.is_stale { ", STALE" } else { "" }
        )
    }
}
