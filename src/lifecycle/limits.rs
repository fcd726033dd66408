//! Raising the open-file limit before the node starts.
//!
//! Every expert connection holds descriptors, so busy nodes exhaust the
//! usual default of 1024 quickly. Failures here are never fatal.

use thiserror::Error;

/// Soft limit requested when raising, capped by the hard limit
pub const TARGET_OPEN_FILES: u64 = 1 << 15;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EnvironmentAdjustmentError {
    #[error("Failed to query the open file limit: {0}")]
    Query(String),

    #[error("Failed to raise the open file limit to {target}: {reason}")]
    Raise { target: u64, reason: String },

    #[error("Raising the open file limit is not supported on this platform")]
    Unsupported,
}

/// Soft and hard limits after an adjustment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileLimit {
    pub soft: u64,
    pub hard: u64,
}

/// Raises the per-process open-file limit
pub trait FileLimitRaiser: Send + Sync {
    fn raise(&self) -> Result<FileLimit, EnvironmentAdjustmentError>;
}

/// Soft limit to request given the current limits. Pure function - no I/O.
///
/// Never lowers the soft limit and never exceeds the hard one.
pub fn next_soft_limit(current: FileLimit, target: u64) -> u64 {
    current.soft.max(target.min(current.hard))
}

/// `RLIMIT_NOFILE` of the current process
#[derive(Debug, Clone, Copy)]
pub struct NofileLimit {
    pub target: u64,
}

impl Default for NofileLimit {
    fn default() -> Self {
        Self {
            target: TARGET_OPEN_FILES,
        }
    }
}

#[cfg(unix)]
impl FileLimitRaiser for NofileLimit {
    fn raise(&self) -> Result<FileLimit, EnvironmentAdjustmentError> {
        use nix::sys::resource::{getrlimit, setrlimit, Resource};

        let (soft, hard) = getrlimit(Resource::RLIMIT_NOFILE)
            .map_err(|e| EnvironmentAdjustmentError::Query(e.to_string()))?;
        let current = FileLimit {
            soft: soft as u64,
            hard: hard as u64,
        };

        let soft = next_soft_limit(current, self.target);
        if soft == current.soft {
            return Ok(current);
        }

        setrlimit(Resource::RLIMIT_NOFILE, soft as _, hard).map_err(|e| {
            EnvironmentAdjustmentError::Raise {
                target: soft,
                reason: e.to_string(),
            }
        })?;
        Ok(FileLimit {
            soft,
            hard: current.hard,
        })
    }
}

#[cfg(not(unix))]
impl FileLimitRaiser for NofileLimit {
    fn raise(&self) -> Result<FileLimit, EnvironmentAdjustmentError> {
        Err(EnvironmentAdjustmentError::Unsupported)
    }
}
