//! Per-conversation emergency session.
//!
//! A `Session` is only ever mutated by the coordinator while it holds the
//! session lock. Every state change goes through [`Session::transition`], which
//! enforces the state machine and the confirmation gate and hands back the
//! audit record describing the step.

use crate::audit::AuditRecord;
use crate::classifier::EmergencyType;
use crate::error::{CrisisError, CrisisResult};
use crate::state::{CallStatus, EscalationState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::time::Instant;
use uuid::Uuid;

/// Opaque session identifier (UUID v4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Handle issued by the telephony gateway for a placed call (Twilio `CallSid`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallId(String);

impl CallId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CallId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Who authorised the outbound call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmationSource {
    /// The user answered the confirmation prompt affirmatively.
    User,
    /// The user stayed silent and the emergency type is pre-authorised to escalate.
    SilencePolicy,
}

#[derive(Debug)]
pub struct Session {
    session_id: SessionId,
    conversation_id: String,
    emergency_type: EmergencyType,
    state: EscalationState,
    step_count: u32,
    silence_count: u32,
    confirmation: Option<ConfirmationSource>,
    call_id: Option<CallId>,
    call_status: Option<CallStatus>,
    call_in_flight: bool,
    transcript: Vec<String>,
    prompts: Vec<String>,
    created_at: DateTime<Utc>,
    last_update_at: DateTime<Utc>,
    last_input_at: DateTime<Utc>,
    last_activity: Instant,
    terminal_since: Option<Instant>,
}

impl Session {
    /// New session in `IDLE`; the coordinator moves it to `DETECTED` right away.
    pub fn new(conversation_id: impl Into<String>, emergency_type: EmergencyType) -> Self {
        let now = Utc::now();
        Self {
            session_id: SessionId::new(),
            conversation_id: conversation_id.into(),
            emergency_type,
            state: EscalationState::Idle,
            step_count: 0,
            silence_count: 0,
            confirmation: None,
            call_id: None,
            call_status: None,
            call_in_flight: false,
            transcript: Vec::new(),
            prompts: Vec::new(),
            created_at: now,
            last_update_at: now,
            last_input_at: now,
            last_activity: Instant::now(),
            terminal_since: None,
        }
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub fn emergency_type(&self) -> EmergencyType {
        self.emergency_type
    }

    pub fn state(&self) -> EscalationState {
        self.state
    }

    pub fn step_count(&self) -> u32 {
        self.step_count
    }

    pub fn silence_count(&self) -> u32 {
        self.silence_count
    }

    pub fn is_confirmed(&self) -> bool {
        self.confirmation.is_some()
    }

    pub fn call_id(&self) -> Option<&CallId> {
        self.call_id.as_ref()
    }

    pub fn call_status(&self) -> Option<CallStatus> {
        self.call_status
    }

    pub fn call_in_flight(&self) -> bool {
        self.call_in_flight
    }

    pub fn transcript(&self) -> &[String] {
        &self.transcript
    }

    /// Last thing the user said, used as the "situation" in the call message.
    pub fn last_utterance(&self) -> Option<&str> {
        self.transcript.last().map(String::as_str)
    }

    /// Monotonic time of the last user input or state change.
    pub fn last_activity(&self) -> Instant {
        self.last_activity
    }

    pub fn terminal_since(&self) -> Option<Instant> {
        self.terminal_since
    }

    /// Move to `to`, returning the audit record for the step.
    ///
    /// Rejects edges the state machine does not have and any attempt to reach
    /// `CALLING` without a recorded confirmation.
    pub fn transition(
        &mut self,
        to: EscalationState,
        reason: impl Into<String>,
    ) -> CrisisResult<AuditRecord> {
        if !self.state.can_transition_to(to) {
            return Err(CrisisError::invalid(self.state, to.as_str()));
        }
        if to == EscalationState::Calling && !self.is_confirmed() {
            return Err(CrisisError::invalid(self.state, "CALLING without confirmation"));
        }
        let from = self.state;
        self.state = to;
        self.step_count += 1;
        self.last_update_at = Utc::now();
        self.last_activity = Instant::now();
        if to.is_terminal() {
            self.terminal_since = Some(self.last_activity);
        }
        Ok(self.record(from, reason))
    }

    /// Audit note that does not change state or step (e.g. a suppressed duplicate call).
    pub fn note(&self, reason: impl Into<String>) -> AuditRecord {
        self.record(self.state, reason)
    }

    fn record(&self, from: EscalationState, reason: impl Into<String>) -> AuditRecord {
        let mut record = AuditRecord::new(
            self.session_id,
            self.conversation_id.clone(),
            self.emergency_type,
            from,
            self.state,
            self.step_count,
            reason,
        );
        if let Some(ref id) = self.call_id {
            record = record.with_call_id(id.clone());
        }
        if let Some(status) = self.call_status {
            record = record.with_call_status(status);
        }
        record
    }

    pub(crate) fn record_input(&mut self, text: &str) {
        self.silence_count = 0;
        self.transcript.push(text.to_string());
        self.last_input_at = Utc::now();
        self.last_activity = Instant::now();
    }

    /// Keeps what the coordinator said, including prompts raised by timers
    /// that no request was waiting for.
    pub(crate) fn record_prompt(&mut self, text: &str) {
        self.prompts.push(text.to_string());
    }

    /// A counted silent turn also resets the silence-watch clock, so a client
    /// reporting silence and the watch never count the same gap twice.
    pub(crate) fn record_silence(&mut self) -> u32 {
        self.silence_count += 1;
        self.last_activity = Instant::now();
        self.silence_count
    }

    pub(crate) fn confirm(&mut self, source: ConfirmationSource) {
        if self.confirmation.is_none() {
            self.confirmation = Some(source);
        }
    }

    pub(crate) fn set_call_in_flight(&mut self, in_flight: bool) {
        self.call_in_flight = in_flight;
    }

    /// Records the call handle. Returns `false` if one was already set.
    pub(crate) fn set_call_id(&mut self, call_id: CallId) -> bool {
        if self.call_id.is_some() {
            return false;
        }
        self.call_id = Some(call_id);
        true
    }

    pub(crate) fn set_call_status(&mut self, status: CallStatus) {
        self.call_status = Some(status);
        self.last_update_at = Utc::now();
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.session_id,
            conversation_id: self.conversation_id.clone(),
            emergency_type: self.emergency_type,
            state: self.state,
            step_count: self.step_count,
            silence_count: self.silence_count,
            confirmed: self.is_confirmed(),
            confirmation_source: self.confirmation,
            call_id: self.call_id.clone(),
            call_status: self.call_status,
            transcript: self.transcript.clone(),
            prompts: self.prompts.clone(),
            created_at: self.created_at,
            last_update_at: self.last_update_at,
            last_input_at: self.last_input_at,
        }
    }
}

/// Read-only copy of a session, safe to hand out after the lock is released.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub session_id: SessionId,
    pub conversation_id: String,
    pub emergency_type: EmergencyType,
    pub state: EscalationState,
    pub step_count: u32,
    pub silence_count: u32,
    pub confirmed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirmation_source: Option<ConfirmationSource>,
    pub call_id: Option<CallId>,
    pub call_status: Option<CallStatus>,
    pub transcript: Vec<String>,
    /// Everything the assistant said in this session, oldest first.
    pub prompts: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub last_update_at: DateTime<Utc>,
    pub last_input_at: DateTime<Utc>,
}
