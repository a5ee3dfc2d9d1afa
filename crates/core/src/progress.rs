//! Project progress checkpoints and their rollback rules.
//!
//! A project's `progress` field moves through a small state machine:
//!
//! ```text
//! initialized -> finalized -> analyzing -> analyzed
//!                                 \-> failed
//! (any durable) -> compiling -> compiled -> uploading -> uploaded
//! ```
//!
//! `analyzing`, `compiling` and `uploading` are *transient*: they are only
//! valid while a live owner (the dispatcher or a supervised task) is driving
//! the project. Whenever that owner goes away without settling the
//! checkpoint, [`ProjectProgress::rollback_target`] names the durable value
//! the project must return to.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// A named point in a project's progress state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectProgress {
    Initialized,
    Finalized,
    Analyzing,
    Analyzed,
    Failed,
    Compiling,
    Compiled,
    Uploading,
    Uploaded,
}

impl ProjectProgress {
    /// Every checkpoint that may persist without a live owner.
    pub const DURABLE: [ProjectProgress; 6] = [
        Self::Initialized,
        Self::Finalized,
        Self::Analyzed,
        Self::Failed,
        Self::Compiled,
        Self::Uploaded,
    ];

    /// Every checkpoint that requires a live owner.
    pub const TRANSIENT: [ProjectProgress; 3] =
        [Self::Analyzing, Self::Compiling, Self::Uploading];

    /// The value stored in the `progress` column.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initialized => "initialized",
            Self::Finalized => "finalized",
            Self::Analyzing => "analyzing",
            Self::Analyzed => "analyzed",
            Self::Failed => "failed",
            Self::Compiling => "compiling",
            Self::Compiled => "compiled",
            Self::Uploading => "uploading",
            Self::Uploaded => "uploaded",
        }
    }

    pub fn is_transient(self) -> bool {
        Self::TRANSIENT.contains(&self)
    }

    /// The durable checkpoint a transient value reverts to.
    ///
    /// `saved` is the project's `old_progress` slot, written when the
    /// transient value was entered. Returns `None` for durable values,
    /// which never need rolling back.
    pub fn rollback_target(self, saved: Option<ProjectProgress>) -> Option<ProjectProgress> {
        let saved_durable = saved.filter(|p| !p.is_transient());
        match self {
            Self::Analyzing => Some(saved_durable.unwrap_or(Self::Finalized)),
            Self::Compiling => Some(saved_durable.unwrap_or(Self::Initialized)),
            Self::Uploading => Some(Self::Compiled),
            _ => None,
        }
    }
}

impl fmt::Display for ProjectProgress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProjectProgress {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "initialized" => Ok(Self::Initialized),
            "finalized" => Ok(Self::Finalized),
            "analyzing" => Ok(Self::Analyzing),
            "analyzed" => Ok(Self::Analyzed),
            "failed" => Ok(Self::Failed),
            "compiling" => Ok(Self::Compiling),
            "compiled" => Ok(Self::Compiled),
            "uploading" => Ok(Self::Uploading),
            "uploaded" => Ok(Self::Uploaded),
            other => Err(CoreError::Validation(format!(
                "unknown progress checkpoint '{other}'"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
