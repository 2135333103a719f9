use std::fmt;
use std::str::FromStr;

use crate::order::model::Coord;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverStatus {
    Available,
    TransitToCollect,
    Offline,
    Suspended,
}

impl DriverStatus {
    /// Drivers already en route to a pickup may still receive offers;
    /// everyone else must be available.
    pub fn is_offerable(&self) -> bool {
        matches!(self, DriverStatus::Available | DriverStatus::TransitToCollect)
    }
}

impl fmt::Display for DriverStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DriverStatus::Available => "AVAILABLE",
            DriverStatus::TransitToCollect => "TRANSIT_TO_COLLECT",
            DriverStatus::Offline => "OFFLINE",
            DriverStatus::Suspended => "SUSPENDED",
        };
        f.write_str(s)
    }
}

impl FromStr for DriverStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "AVAILABLE" => Ok(DriverStatus::Available),
            "TRANSIT_TO_COLLECT" => Ok(DriverStatus::TransitToCollect),
            "OFFLINE" => Ok(DriverStatus::Offline),
            "SUSPENDED" => Ok(DriverStatus::Suspended),
            other => Err(anyhow::anyhow!("Invalid DriverStatus value: {}", other)),
        }
    }
}

/// Snapshot of a courier as the dispatcher sees it. The core operates on
/// value copies; the external store owns the live record.
#[derive(Debug, Clone, PartialEq)]
pub struct Driver {
    pub id: String,
    pub location: Coord,
    pub status: DriverStatus,

    /// Remaining order-carrying capacity.
    pub max_capacity: u32,

    pub push_token: String,
}

impl Driver {
    pub fn is_offerable(&self) -> bool {
        self.status.is_offerable() && self.max_capacity > 0
    }
}
