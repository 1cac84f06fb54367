//! Region Selection
//!
//! Only the user's choice lives here. Addresses, server keys, and DNS come
//! back from registration, so a region is just a named selector.

use serde::{Deserialize, Serialize};

/// Region identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RegionId {
    Helsinki,
    // Add more as they launch.
}

impl RegionId {
    /// Get all launched regions
    pub fn all() -> &'static [RegionId] {
        &[RegionId::Helsinki]
    }

    /// Wire name sent to the registration backend
    pub fn name(&self) -> &'static str {
        match self {
            RegionId::Helsinki => "Helsinki",
        }
    }
}

impl std::fmt::Display for RegionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for RegionId {
    type Err = UnknownRegion;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "helsinki" => Ok(RegionId::Helsinki),
            _ => Err(UnknownRegion(s.to_string())),
        }
    }
}

/// Region parse error
#[derive(Debug, Clone, thiserror::Error)]
#[error("Unknown region: {0}")]
pub struct UnknownRegion(pub String);
