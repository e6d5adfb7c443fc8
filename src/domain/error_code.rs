//! Exit code taxonomy surfaced to the backup pipeline
//!
//! The pipeline that embeds the host only understands four outcomes:
//!
//! | Code | Meaning |
//! |------|---------|
//! | `0` | Script ran without error (warnings possible) |
//! | `5` | Script did not exit within its window |
//! | `10` | Configuration could not be loaded |
//! | other | Raw exit status of the script (e.g. `127` for script not found) |

use std::fmt;

use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};

/// Numeric code for a timed out script
pub const TIMEOUT_CODE: i32 = 5;

/// Numeric code for a configuration or load failure
pub const CONFIGURATION_ERROR_CODE: i32 = 10;

/// Closed set of hook outcomes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ErrorCode {
    #[default]
    Success,
    Timeout,
    ConfigurationError,
    /// Non-zero exit, carrying the child's raw exit status
    ProcessFailure(i32),
}

impl ErrorCode {
    /// Maps a raw process exit status into the taxonomy
    pub fn from_exit_status(status: i32) -> Self {
        if status == 0 {
            ErrorCode::Success
        } else {
            ErrorCode::ProcessFailure(status)
        }
    }

    /// Returns the numeric code reported to the caller
    ///
    /// A script may itself exit with 5 or 10, so the number alone does not
    /// identify the variant; use the enum where the distinction matters.
    pub fn code(&self) -> i32 {
        match self {
            ErrorCode::Success => 0,
            ErrorCode::Timeout => TIMEOUT_CODE,
            ErrorCode::ConfigurationError => CONFIGURATION_ERROR_CODE,
            ErrorCode::ProcessFailure(status) => *status,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ErrorCode::Success)
    }

    /// Short machine-friendly label
    pub fn kind(&self) -> &'static str {
        match self {
            ErrorCode::Success => "success",
            ErrorCode::Timeout => "timeout",
            ErrorCode::ConfigurationError => "configuration_error",
            ErrorCode::ProcessFailure(_) => "process_failure",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCode::ProcessFailure(status) => write!(f, "process failure ({})", status),
            other => write!(f, "{} ({})", other.kind().replace('_', " "), other.code()),
        }
    }
}

impl Serialize for ErrorCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("ErrorCode", 2)?;
        state.serialize_field("kind", self.kind())?;
        state.serialize_field("code", &self.code())?;
        state.end()
    }
}
