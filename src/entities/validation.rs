//! Validation lifecycle of an organization record.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::FinderError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStatus {
    #[default]
    Pending,
    Extracted,
    Verified,
    HumanApproved,
    Rejected,
}

impl ValidationStatus {
    pub const ALL: [ValidationStatus; 5] = [
        Self::Pending,
        Self::Extracted,
        Self::Verified,
        Self::HumanApproved,
        Self::Rejected,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Extracted => "extracted",
            Self::Verified => "verified",
            Self::HumanApproved => "human_approved",
            Self::Rejected => "rejected",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::HumanApproved | Self::Rejected)
    }

    fn rank(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Extracted => 1,
            Self::Verified => 2,
            Self::HumanApproved | Self::Rejected => 3,
        }
    }

    /// Forward-only transition table. Resets to `pending` go through
    /// [`ValidationStatus::reset`] instead.
    pub fn can_advance_to(self, next: ValidationStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            Self::Pending => false,
            Self::HumanApproved => self == Self::Verified,
            Self::Rejected => true,
            Self::Extracted | Self::Verified => next.rank() > self.rank(),
        }
    }

    /// Checks the transition and returns the new state.
    ///
    /// # Errors
    ///
    /// Returns [`FinderError::Conflict`] when the move is not forward along the lifecycle.
    pub fn advance(self, next: ValidationStatus) -> Result<ValidationStatus, FinderError> {
        if self.can_advance_to(next) {
            Ok(next)
        } else {
            Err(FinderError::Conflict(format!(
                "cannot move validation status from {self} to {next}"
            )))
        }
    }

    pub fn reset() -> ValidationStatus {
        Self::Pending
    }
}

impl fmt::Display for ValidationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ValidationStatus {
    type Err = FinderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == normalized)
            .ok_or_else(|| {
                FinderError::InvalidArgument(format!(
                    "Invalid validation status: {s}. Expected one of: pending, extracted, verified, human_approved, rejected"
                ))
            })
    }
}
