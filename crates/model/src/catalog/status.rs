use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use thiserror::Error;

#[derive(Debug, Error)]
#[error("unknown status: {0}")]
pub struct StatusParseError(String);

macro_rules! status_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = StatusParseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(StatusParseError(other.to_string())),
                }
            }
        }
    };
}

status_enum!(JobStatus {
    Pending => "pending",
    Planning => "planning",
    Running => "running",
    Completed => "completed",
    Failed => "failed",
    Paused => "paused",
});

status_enum!(TableStatus {
    Pending => "pending",
    Running => "running",
    Completed => "completed",
    Failed => "failed",
});

status_enum!(ChunkStatus {
    Pending => "pending",
    Running => "running",
    Completed => "completed",
    Failed => "failed",
});

status_enum!(ValidationStatus {
    Pending => "pending",
    Validated => "validated",
    Failed => "failed",
});

status_enum!(WorkerStatus {
    Idle => "idle",
    Busy => "busy",
    Draining => "draining",
});

impl JobStatus {
    /// Completed and failed jobs accept no further chunk transitions
    /// except an explicit operator resume.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Whether the dispatcher may hand out chunks of this job.
    pub fn is_dispatchable(&self) -> bool {
        matches!(self, JobStatus::Planning | JobStatus::Running)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_str() {
        for status in [
            JobStatus::Pending,
            JobStatus::Planning,
            JobStatus::Running,
            JobStatus::Completed,
            JobStatus::Failed,
            JobStatus::Paused,
        ] {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
        }
        assert!("bogus".parse::<ChunkStatus>().is_err());
    }

    #[test]
    fn terminal_jobs_are_not_dispatchable() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(!JobStatus::Completed.is_dispatchable());
        assert!(JobStatus::Planning.is_dispatchable());
        assert!(!JobStatus::Paused.is_dispatchable());
    }
}
