//! Run status, usage accumulation, and the trajectory output record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::gateway::GatewayError;
use crate::llm::{ChatMessage, LlmError, LlmErrorKind, TokenUsage};

/// Lifecycle state of one agent run.
///
/// `Running` is entered once after tool-catalog initialization and is the
/// only state in which steps execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Created, tools not yet initialized
    Pending,
    /// Steps are executing
    Running,
    /// The run finalized with an explicit answer
    Completed,
    /// Step budget exhausted or task-level failure
    Failed,
    /// Infrastructure failure or overall deadline expiry
    Error,
    /// Externally cancelled
    Cancelled,
}

impl RunStatus {
    /// Whether this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Pending | RunStatus::Running)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Error => write!(f, "error"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Task outcome declared by the model in its terminal answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskOutcome {
    Completed,
    Blocked,
    Failed,
}

/// The terminal answer payload submitted by the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalAnswer {
    pub answer: String,
    pub status: TaskOutcome,
}

/// Monotonically accumulated token counters for one run.
///
/// Updated once per model call; read only at trajectory finalization.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageTally {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    pub model_calls: u64,
}

impl UsageTally {
    /// Fold one model call's usage into the tally.
    pub fn record(&mut self, usage: Option<&TokenUsage>) {
        self.model_calls += 1;
        if let Some(usage) = usage {
            self.prompt_tokens += usage.prompt_tokens;
            self.completion_tokens += usage.completion_tokens;
            self.total_tokens += usage.total_tokens;
        }
    }
}

/// Complete output record of one agent run.
///
/// Always produced, even on abnormal termination, so that callers can
/// inspect partial transcripts and usage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trajectory {
    /// Unique identifier for this run
    pub run_id: Uuid,
    /// Full transcript
    pub messages: Vec<ChatMessage>,
    /// Terminal status
    pub status: RunStatus,
    /// Wall-clock seconds from start to termination
    pub time_elapsed: f64,
    /// Accumulated token counters
    pub usage: UsageTally,
    /// The terminal answer, if the run finalized
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_answer: Option<FinalAnswer>,
    /// When the trajectory was produced
    pub created_at: DateTime<Utc>,
}

/// Policy deciding whether an unhandled error is an infrastructure failure
/// (run status `Error`) or a task-level failure (run status `Failed`).
pub type SystemErrorPolicy = fn(&anyhow::Error) -> bool;

/// Default system-error classification.
///
/// Fatal gateway errors and LLM errors are infrastructure failures. Anything
/// else is attributed to the task.
pub fn default_is_system_error(error: &anyhow::Error) -> bool {
    if let Some(gateway) = error.downcast_ref::<GatewayError>() {
        return gateway.is_fatal();
    }
    if let Some(llm) = error.downcast_ref::<LlmError>() {
        // Timeout and context exhaustion are handled inside the loop and
        // should never surface here; treat the rest as infrastructure.
        return !matches!(
            llm.kind,
            LlmErrorKind::Timeout | LlmErrorKind::ContextExceeded
        );
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::Role;

    #[test]
    fn test_usage_tally_accumulates() {
        let mut tally = UsageTally::default();
        tally.record(Some(&TokenUsage::new(100, 10)));
        tally.record(None);
        tally.record(Some(&TokenUsage::new(200, 20)));

        assert_eq!(tally.model_calls, 3);
        assert_eq!(tally.prompt_tokens, 300);
        assert_eq!(tally.completion_tokens, 30);
        assert_eq!(tally.total_tokens, 330);
    }

    #[test]
    fn test_status_terminality() {
        assert!(!RunStatus::Pending.is_terminal());
        assert!(!RunStatus::Running.is_terminal());
        assert!(RunStatus::Completed.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
        assert!(RunStatus::Error.is_terminal());
        assert!(RunStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_default_system_error_policy() {
        let fatal: anyhow::Error = GatewayError::Transport("down".to_string()).into();
        assert!(default_is_system_error(&fatal));

        let tool: anyhow::Error = GatewayError::Tool("no such file".to_string()).into();
        assert!(!default_is_system_error(&tool));

        let llm: anyhow::Error = LlmError::server_error(500, "boom".to_string()).into();
        assert!(default_is_system_error(&llm));

        let plain = anyhow::anyhow!("task went sideways");
        assert!(!default_is_system_error(&plain));
    }

    #[test]
    fn test_trajectory_serializes_status_snake_case() {
        let trajectory = Trajectory {
            run_id: Uuid::new_v4(),
            messages: vec![ChatMessage::new(Role::User, "do the thing")],
            status: RunStatus::Completed,
            time_elapsed: 1.5,
            usage: UsageTally::default(),
            final_answer: None,
            created_at: Utc::now(),
        };
        let json = serde_json::to_value(&trajectory).unwrap();
        assert_eq!(json["status"], "completed");
        assert_eq!(json["messages"][0]["role"], "user");
    }
}
