use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub status: CommandStatus,
    pub message: String,
    #[serde(default)]
    pub details: Value,
}

impl ExecutionOutcome {
    pub fn success(message: impl Into<String>, details: Value) -> Self {
        Self::with_status(CommandStatus::Ok, message, details)
    }

    pub fn failure(message: impl Into<String>, details: Value) -> Self {
        Self::with_status(CommandStatus::Failure, message, details)
    }

    pub fn user_error(message: impl Into<String>, details: Value) -> Self {
        Self::with_status(CommandStatus::UserError, message, details)
    }

    /// The run completed but reported problems the caller asked to fail on.
    pub fn findings(message: impl Into<String>, details: Value) -> Self {
        Self::with_status(CommandStatus::Findings, message, details)
    }

    fn with_status(status: CommandStatus, message: impl Into<String>, details: Value) -> Self {
        Self {
            status,
            message: message.into(),
            details,
        }
    }

    #[must_use]
    pub fn exit_code(&self) -> i32 {
        self.status.exit_code()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum CommandStatus {
    Ok,
    UserError,
    Failure,
    Findings,
}

impl CommandStatus {
    #[must_use]
    pub fn exit_code(self) -> i32 {
        match self {
            Self::Ok => 0,
            Self::UserError => 1,
            Self::Failure => 2,
            Self::Findings => 3,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::UserError => "user-error",
            Self::Failure => "failure",
            Self::Findings => "findings",
        }
    }
}
