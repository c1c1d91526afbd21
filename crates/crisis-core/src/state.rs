//! Escalation and telephony state enums.
//!
//! `EscalationState` is the per-session state machine:
//!
//! ```text
//! IDLE → DETECTED → ASSESSING → AWAITING_CONFIRMATION → ESCALATING → CALLING → MONITORING
//!                       │                 │                                │          │
//!                       ▼                 ▼                                ▼          ▼
//!                   RESOLVED          TIMED_OUT                      CALL_COMPLETED (failed / ended)
//!
//! any non-terminal state ──cancel──▶ CANCELLED
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EscalationState {
    Idle,
    Detected,
    Assessing,
    AwaitingConfirmation,
    Escalating,
    Calling,
    Monitoring,
    Resolved,
    CallCompleted,
    TimedOut,
    Cancelled,
}

impl EscalationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            EscalationState::Idle => "IDLE",
            EscalationState::Detected => "DETECTED",
            EscalationState::Assessing => "ASSESSING",
            EscalationState::AwaitingConfirmation => "AWAITING_CONFIRMATION",
            EscalationState::Escalating => "ESCALATING",
            EscalationState::Calling => "CALLING",
            EscalationState::Monitoring => "MONITORING",
            EscalationState::Resolved => "RESOLVED",
            EscalationState::CallCompleted => "CALL_COMPLETED",
            EscalationState::TimedOut => "TIMED_OUT",
            EscalationState::Cancelled => "CANCELLED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EscalationState::Resolved
                | EscalationState::CallCompleted
                | EscalationState::TimedOut
                | EscalationState::Cancelled
        )
    }

    /// Forward edges of the state machine. Cancellation is accepted from every
    /// non-terminal state; terminal states accept nothing.
    pub fn can_transition_to(&self, next: EscalationState) -> bool {
        use EscalationState::*;
        if self.is_terminal() {
            return false;
        }
        if next == Cancelled {
            return true;
        }
        matches!(
            (self, next),
            (Idle, Detected)
                | (Detected, Assessing)
                | (Assessing, AwaitingConfirmation)
                | (Assessing, Resolved)
                | (AwaitingConfirmation, Escalating)
                | (AwaitingConfirmation, TimedOut)
                | (Escalating, Calling)
                | (Calling, Monitoring)
                | (Calling, CallCompleted)
                | (Monitoring, CallCompleted)
        )
    }
}

impl fmt::Display for EscalationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status reported by the telephony provider (Twilio vocabulary).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CallStatus {
    Queued,
    Initiated,
    Ringing,
    InProgress,
    Completed,
    Busy,
    NoAnswer,
    Failed,
    Canceled,
}

impl CallStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallStatus::Queued => "queued",
            CallStatus::Initiated => "initiated",
            CallStatus::Ringing => "ringing",
            CallStatus::InProgress => "in-progress",
            CallStatus::Completed => "completed",
            CallStatus::Busy => "busy",
            CallStatus::NoAnswer => "no-answer",
            CallStatus::Failed => "failed",
            CallStatus::Canceled => "canceled",
        }
    }

    /// Every terminal status maps to `CALL_COMPLETED`; the status itself goes to the audit record.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CallStatus::Completed
                | CallStatus::Busy
                | CallStatus::NoAnswer
                | CallStatus::Failed
                | CallStatus::Canceled
        )
    }
}

impl FromStr for CallStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "queued" => Ok(CallStatus::Queued),
            "initiated" => Ok(CallStatus::Initiated),
            "ringing" => Ok(CallStatus::Ringing),
            "in-progress" | "answered" => Ok(CallStatus::InProgress),
            "completed" => Ok(CallStatus::Completed),
            "busy" => Ok(CallStatus::Busy),
            "no-answer" => Ok(CallStatus::NoAnswer),
            "failed" => Ok(CallStatus::Failed),
            "canceled" | "cancelled" => Ok(CallStatus::Canceled),
            other => Err(format!("Invalid call status: {}", other)),
        }
    }
}

impl fmt::Display for CallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
