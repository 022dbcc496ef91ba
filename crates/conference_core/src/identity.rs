use serde::{Deserialize, Serialize};
use shared::{
    domain::{Role, Uid},
    error::{SessionError, SessionResult},
};

/// Half-open uid range `[min, max)` owned by one role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityRange {
    pub role: Role,
    pub min: u32,
    pub max: u32,
}

impl IdentityRange {
    pub fn new(role: Role, min: u32, max: u32) -> Self {
        Self { role, min, max }
    }

    fn contains(&self, uid: u32) -> bool {
        uid >= self.min && uid < self.max
    }
}

pub fn default_ranges() -> Vec<IdentityRange> {
    vec![
        IdentityRange::new(Role::Video, 1_000, 2_000),
        IdentityRange::new(Role::ScreenShare, 2_000, 3_000),
        IdentityRange::new(Role::Whiteboard, 3_000, 4_000),
    ]
}

/// Validated, immutable partition of the uid space across roles.
///
/// Ranges are checked for disjointness once, at construction; `classify`
/// is then total over all uids.
#[derive(Debug, Clone)]
pub struct IdentityPlan {
    ranges: Vec<IdentityRange>,
}

impl IdentityPlan {
    pub fn new(mut ranges: Vec<IdentityRange>) -> SessionResult<Self> {
        if ranges.is_empty() {
            return Err(SessionError::configuration(
                "identity partition requires at least one range",
            ));
        }

        for range in &ranges {
            if range.role == Role::Unknown {
                return Err(SessionError::configuration(
                    "identity range may not be assigned to the unknown role",
                ));
            }
            if range.min >= range.max {
                return Err(SessionError::configuration(format!(
                    "identity range for {} is empty or inverted: [{}, {})",
                    range.role, range.min, range.max
                )));
            }
        }

        ranges.sort_by_key(|r| r.min);
        for pair in ranges.windows(2) {
            if pair[1].min < pair[0].max {
                return Err(SessionError::configuration(format!(
                    "identity ranges overlap: {} [{}, {}) and {} [{}, {})",
                    pair[0].role, pair[0].min, pair[0].max, pair[1].role, pair[1].min, pair[1].max
                )));
            }
        }

        Ok(Self { ranges })
    }

    pub fn classify(&self, uid: Uid) -> Role {
        self.ranges
            .iter()
            .find(|range| range.contains(uid.0))
            .map(|range| range.role)
            .unwrap_or(Role::Unknown)
    }

    pub fn ranges(&self) -> &[IdentityRange] {
        &self.ranges
    }
}
