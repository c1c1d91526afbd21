//! **EscalationCoordinator**: per-conversation escalation state machine.
//!
//! One [`Session`] per conversation, each behind its own `tokio::sync::Mutex`
//! so events for a session are applied one at a time while different sessions
//! run in parallel. The session lock is released around every agent and
//! telephony call; after re-acquiring it the coordinator checks that the
//! session is still where it left it (a cancel may have landed meanwhile).
//!
//! Outbound calls are gated: `CALLING` is only reachable from `ESCALATING`, and
//! only after a confirmation has been recorded (user "yes", or silence for an
//! emergency type that is pre-authorised to escalate).

use crate::agent::fallback_prompt;
use crate::audit::AuditRecord;
use crate::classifier::{classify_emergency, classify_reply, EmergencyType, ReplyIntent};
use crate::config::EscalationPolicy;
use crate::error::{CrisisError, CrisisResult};
use crate::monitor;
use crate::ports::{AuditLog, ConversationAgent, TelephonyGateway};
use crate::session::{CallId, ConfirmationSource, Session, SessionId, SessionSnapshot};
use crate::state::{CallStatus, EscalationState};
use crate::telephony::compose_call_message;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::Instant;

pub(crate) type SessionHandle = Arc<Mutex<Session>>;
type SessionGuard = OwnedMutexGuard<Session>;

const CONFIRMATION_QUESTION: &str =
    "Do you want me to call emergency services now? Say yes to call or no to cancel.";
const REPROMPT_PREFIX: &str = "I need you to confirm this.";
const CALLING_NOW: &str = "Okay, I'm calling emergency services now. Stay on the line.";
const SILENCE_CALLING: &str =
    "I haven't heard from you, so I'm calling emergency services now. Stay on the line.";
const CALL_PLACED: &str = "The call has been placed. Stay on the line and keep your phone close.";
const CALL_FAILED: &str = "I couldn't reach emergency services. If you can, call 911 yourself right away.";
const DECLINED: &str = "Okay, I won't call anyone. I'm still here if you need help.";
const CANCELLED: &str = "Okay, I've cancelled the emergency alert.";
const TIMED_OUT: &str =
    "I haven't heard from you, so I'm closing this alert. If you still need help, just tell me.";
const FIRST_SILENCE: &str = "Hello, can you hear me? Please respond if you need help.";
const STILL_THERE: &str = "Are you still there? Please say yes or no.";

/// What the caller should say back to the user after an event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnOutcome {
    pub conversation_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    pub state: EscalationState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emergency_type: Option<EmergencyType>,
    pub replies: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_id: Option<CallId>,
}

impl TurnOutcome {
    /// No emergency session for the conversation.
    pub fn idle(conversation_id: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            session_id: None,
            state: EscalationState::Idle,
            emergency_type: None,
            replies: Vec::new(),
            call_id: None,
        }
    }

    fn of(session: &Session, replies: Vec<String>) -> Self {
        Self {
            conversation_id: session.conversation_id().to_string(),
            session_id: Some(session.session_id()),
            state: session.state(),
            emergency_type: Some(session.emergency_type()),
            replies,
            call_id: session.call_id().cloned(),
        }
    }
}

/// Result of one silence-watch tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WatchTick {
    Continue,
    Stop,
}

enum Dial {
    Placed(CallId),
    Failed(CrisisError),
    /// The session stopped being `CALLING` between attempts.
    Abandoned,
}

struct Inner {
    policy: EscalationPolicy,
    agent: Arc<dyn ConversationAgent>,
    telephony: Arc<dyn TelephonyGateway>,
    audit: Arc<dyn AuditLog>,
    sessions: DashMap<String, SessionHandle>,
    calls: DashMap<CallId, String>,
    background: AtomicBool,
}

/// Cheap to clone; clones share sessions and collaborators.
#[derive(Clone)]
pub struct EscalationCoordinator {
    inner: Arc<Inner>,
}

impl EscalationCoordinator {
    pub fn new(
        policy: EscalationPolicy,
        agent: Arc<dyn ConversationAgent>,
        telephony: Arc<dyn TelephonyGateway>,
        audit: Arc<dyn AuditLog>,
    ) -> Self {
        tracing::info!(
            agent = agent.name(),
            telephony = telephony.name(),
            max_silence = policy.max_silence_count,
            "🛡️ Escalation coordinator ready"
        );
        Self {
            inner: Arc::new(Inner {
                policy,
                agent,
                telephony,
                audit,
                sessions: DashMap::new(),
                calls: DashMap::new(),
                background: AtomicBool::new(true),
            }),
        }
    }

    /// Turns the silence watch and call monitor tasks on or off (on by default).
    /// With them off, silence and call status are driven only by
    /// `record_silence` and `on_call_status`.
    pub fn with_background_tasks(self, enabled: bool) -> Self {
        self.inner.background.store(enabled, Ordering::SeqCst);
        self
    }

    pub fn policy(&self) -> &EscalationPolicy {
        &self.inner.policy
    }

    pub(crate) fn telephony(&self) -> &Arc<dyn TelephonyGateway> {
        &self.inner.telephony
    }

    pub fn active_sessions(&self) -> usize {
        self.inner.sessions.len()
    }

    fn background(&self) -> bool {
        self.inner.background.load(Ordering::SeqCst)
    }

    fn session(&self, conversation_id: &str) -> Option<SessionHandle> {
        self.inner
            .sessions
            .get(conversation_id)
            .map(|entry| entry.value().clone())
    }

    async fn emit(&self, record: AuditRecord) {
        if record.is_transition() {
            tracing::info!(
                session_id = %record.session_id,
                conversation_id = %record.conversation_id,
                from = %record.from_state,
                to = %record.to_state,
                step = record.step,
                reason = %record.reason,
                "🚨 Escalation step"
            );
        } else {
            tracing::info!(
                session_id = %record.session_id,
                conversation_id = %record.conversation_id,
                state = %record.to_state,
                reason = %record.reason,
                "📝 Escalation note"
            );
        }
        if let Err(e) = self.inner.audit.append(record).await {
            tracing::warn!(error = %e, "📝 Audit append failed; continuing");
        }
    }

    async fn step(
        &self,
        guard: &mut SessionGuard,
        to: EscalationState,
        reason: impl Into<String>,
    ) -> CrisisResult<()> {
        let record = guard.transition(to, reason)?;
        self.emit(record).await;
        Ok(())
    }

    fn respond(guard: &mut SessionGuard, replies: Vec<String>) -> TurnOutcome {
        for reply in &replies {
            guard.record_prompt(reply);
        }
        TurnOutcome::of(&*guard, replies)
    }

    // ---------------------------------------------------------------------
    // Events
    // ---------------------------------------------------------------------

    /// The user said something. Blank input counts as a silent turn.
    pub async fn handle_input(&self, conversation_id: &str, text: &str) -> CrisisResult<TurnOutcome> {
        let text = text.trim();
        if text.is_empty() {
            return self.record_silence(conversation_id).await;
        }

        if let Some(handle) = self.session(conversation_id) {
            let guard = handle.clone().lock_owned().await;
            return self.continue_session(handle, guard, text).await;
        }

        let Some(kind) = classify_emergency(text) else {
            return Ok(TurnOutcome::idle(conversation_id));
        };

        let fresh: SessionHandle = Arc::new(Mutex::new(Session::new(conversation_id, kind)));
        let guard = fresh.clone().lock_owned().await;
        let existing = match self.inner.sessions.entry(conversation_id.to_string()) {
            Entry::Occupied(e) => Some(e.get().clone()),
            Entry::Vacant(v) => {
                v.insert(fresh.clone());
                None
            }
        };
        if let Some(handle) = existing {
            // Lost the race to a concurrent first message.
            drop(guard);
            let guard = handle.clone().lock_owned().await;
            return self.continue_session(handle, guard, text).await;
        }

        self.start_session(fresh, guard, text).await
    }

    async fn start_session(
        &self,
        handle: SessionHandle,
        mut guard: SessionGuard,
        text: &str,
    ) -> CrisisResult<TurnOutcome> {
        guard.record_input(text);
        let kind = guard.emergency_type();
        self.step(&mut guard, EscalationState::Detected, format!("{} emergency detected", kind))
            .await?;
        self.assess(handle, guard).await
    }

    async fn assess(&self, handle: SessionHandle, mut guard: SessionGuard) -> CrisisResult<TurnOutcome> {
        let policy = &self.inner.policy;
        self.step(&mut guard, EscalationState::Assessing, "requesting assessment")
            .await?;
        let kind = guard.emergency_type();
        let transcript = guard.transcript().to_vec();
        let session_id = guard.session_id();
        drop(guard);

        let assessment = match tokio::time::timeout(
            policy.assessment_timeout(),
            self.inner.agent.assess(kind, &transcript),
        )
        .await
        {
            Ok(Ok(assessment)) => Some(assessment),
            Ok(Err(e)) => {
                tracing::warn!(session_id = %session_id, error = %e, "⚠️ Assessment failed; using fallback prompt");
                None
            }
            Err(_) => {
                tracing::warn!(
                    session_id = %session_id,
                    timeout_ms = policy.assessment_timeout_ms,
                    "⚠️ Assessment timed out; using fallback prompt"
                );
                None
            }
        };

        let mut guard = handle.clone().lock_owned().await;
        if guard.state() != EscalationState::Assessing {
            // Cancelled while the agent was thinking.
            return Ok(TurnOutcome::of(&guard, Vec::new()));
        }

        let replies = match assessment {
            Some(a) if a.severity < policy.min_call_severity => {
                self.step(
                    &mut guard,
                    EscalationState::Resolved,
                    format!(
                        "assessed {} (below {} call threshold)",
                        a.severity, policy.min_call_severity
                    ),
                )
                .await?;
                vec![a.message]
            }
            Some(a) => {
                self.step(
                    &mut guard,
                    EscalationState::AwaitingConfirmation,
                    format!("assessed {}; asking for confirmation", a.severity),
                )
                .await?;
                vec![format!("{} {}", a.message, CONFIRMATION_QUESTION)]
            }
            None => {
                self.step(
                    &mut guard,
                    EscalationState::AwaitingConfirmation,
                    "agent unavailable; fallback prompt",
                )
                .await?;
                vec![format!("{} {}", fallback_prompt(kind), CONFIRMATION_QUESTION)]
            }
        };

        if guard.state() == EscalationState::AwaitingConfirmation && self.background() {
            tokio::spawn(monitor::silence_watch(
                self.clone(),
                guard.conversation_id().to_string(),
                session_id,
            ));
        }
        Ok(Self::respond(&mut guard, replies))
    }

    async fn continue_session(
        &self,
        handle: SessionHandle,
        mut guard: SessionGuard,
        text: &str,
    ) -> CrisisResult<TurnOutcome> {
        let state = guard.state();
        if state.is_terminal() {
            tracing::debug!(
                session_id = %guard.session_id(),
                error = %CrisisError::invalid(state, "user input"),
                "Input absorbed by finished session"
            );
            return Ok(TurnOutcome::of(&guard, Vec::new()));
        }

        guard.record_input(text);
        let intent = classify_reply(text);
        if intent == ReplyIntent::Cancel {
            return self.cancel_locked(guard, "user cancelled").await;
        }

        match state {
            EscalationState::AwaitingConfirmation => match intent {
                ReplyIntent::Affirmative => {
                    guard.confirm(ConfirmationSource::User);
                    self.step(&mut guard, EscalationState::Escalating, "user confirmed the call")
                        .await?;
                    self.place_call_locked(handle, guard, vec![CALLING_NOW.to_string()])
                        .await
                }
                ReplyIntent::Negative => {
                    self.step(&mut guard, EscalationState::Cancelled, "user declined the call")
                        .await?;
                    Ok(Self::respond(&mut guard, vec![DECLINED.to_string()]))
                }
                ReplyIntent::Unclear | ReplyIntent::Cancel => Ok(Self::respond(
                    &mut guard,
                    vec![format!("{} {}", REPROMPT_PREFIX, CONFIRMATION_QUESTION)],
                )),
            },
            EscalationState::Escalating | EscalationState::Calling => Ok(Self::respond(
                &mut guard,
                vec!["I'm placing the call now. Stay on the line.".to_string()],
            )),
            EscalationState::Monitoring => Ok(Self::respond(
                &mut guard,
                vec!["Emergency services have been called. Stay on the line.".to_string()],
            )),
            _ => Ok(Self::respond(
                &mut guard,
                vec!["I'm still assessing the situation. Stay with me.".to_string()],
            )),
        }
    }

    /// One turn passed without a response from the user.
    pub async fn record_silence(&self, conversation_id: &str) -> CrisisResult<TurnOutcome> {
        let Some(handle) = self.session(conversation_id) else {
            return Ok(TurnOutcome::idle(conversation_id));
        };
        let guard = handle.clone().lock_owned().await;
        self.apply_silence(handle, guard).await
    }

    async fn apply_silence(
        &self,
        handle: SessionHandle,
        mut guard: SessionGuard,
    ) -> CrisisResult<TurnOutcome> {
        if guard.state() != EscalationState::AwaitingConfirmation {
            tracing::debug!(
                session_id = %guard.session_id(),
                state = %guard.state(),
                "Silence ignored outside confirmation"
            );
            return Ok(TurnOutcome::of(&guard, Vec::new()));
        }

        let policy = &self.inner.policy;
        let kind = guard.emergency_type();
        let count = guard.record_silence();
        let escalate = policy.escalate_on_silence.allows(kind);
        tracing::info!(
            session_id = %guard.session_id(),
            silence_count = count,
            max = policy.max_silence_count,
            "🔇 No response"
        );

        if count >= policy.max_silence_count {
            if escalate {
                guard.confirm(ConfirmationSource::SilencePolicy);
                self.step(
                    &mut guard,
                    EscalationState::Escalating,
                    format!("no response after {} silent turns; {} escalates on silence", count, kind),
                )
                .await?;
                return self
                    .place_call_locked(handle, guard, vec![SILENCE_CALLING.to_string()])
                    .await;
            }
            self.step(
                &mut guard,
                EscalationState::TimedOut,
                format!("no response after {} silent turns", count),
            )
            .await?;
            return Ok(Self::respond(&mut guard, vec![TIMED_OUT.to_string()]));
        }

        let reply = if count + 1 == policy.max_silence_count {
            if escalate {
                format!(
                    "I will wait {} seconds. If you don't respond, I will call emergency services automatically.",
                    policy.silence_check_interval().as_secs()
                )
            } else {
                "If I don't hear from you soon, I'll close this alert.".to_string()
            }
        } else if count == 1 {
            FIRST_SILENCE.to_string()
        } else {
            STILL_THERE.to_string()
        };
        Ok(Self::respond(&mut guard, vec![reply]))
    }

    /// Explicit cancel command. Valid from every non-terminal state.
    pub async fn cancel(&self, conversation_id: &str, reason: &str) -> CrisisResult<TurnOutcome> {
        let handle = self
            .session(conversation_id)
            .ok_or_else(|| CrisisError::SessionNotFound(conversation_id.to_string()))?;
        let guard = handle.lock_owned().await;
        self.cancel_locked(guard, reason).await
    }

    async fn cancel_locked(&self, mut guard: SessionGuard, reason: &str) -> CrisisResult<TurnOutcome> {
        let state = guard.state();
        if state.is_terminal() {
            tracing::debug!(
                session_id = %guard.session_id(),
                error = %CrisisError::invalid(state, "cancel"),
                "Cancel absorbed by finished session"
            );
            return Ok(TurnOutcome::of(&guard, Vec::new()));
        }

        let live_call = if state == EscalationState::Monitoring {
            guard.call_id().cloned()
        } else {
            None
        };
        let reason = if reason.trim().is_empty() { "cancelled" } else { reason.trim() };
        self.step(&mut guard, EscalationState::Cancelled, reason).await?;
        let outcome = Self::respond(&mut guard, vec![CANCELLED.to_string()]);
        drop(guard);

        if let Some(call_id) = live_call {
            self.end_call_best_effort(&call_id).await;
        }
        Ok(outcome)
    }

    async fn end_call_best_effort(&self, call_id: &CallId) {
        match self.inner.telephony.end_call(call_id).await {
            Ok(()) => tracing::info!(call_id = %call_id, "📞 Call ended after cancellation"),
            Err(e) => tracing::warn!(call_id = %call_id, error = %e, "⚠️ Could not end call"),
        }
    }

    // ---------------------------------------------------------------------
    // Call placement
    // ---------------------------------------------------------------------

    /// Places the emergency call for a confirmed session in `ESCALATING`.
    ///
    /// Idempotent: once a call is placed or in flight, further attempts are
    /// recorded as duplicate-call notes and no second call is made.
    pub async fn place_call(&self, conversation_id: &str) -> CrisisResult<TurnOutcome> {
        let handle = self
            .session(conversation_id)
            .ok_or_else(|| CrisisError::SessionNotFound(conversation_id.to_string()))?;
        let guard = handle.clone().lock_owned().await;
        self.place_call_locked(handle, guard, Vec::new()).await
    }

    async fn place_call_locked(
        &self,
        handle: SessionHandle,
        mut guard: SessionGuard,
        mut replies: Vec<String>,
    ) -> CrisisResult<TurnOutcome> {
        if guard.call_id().is_some() || guard.call_in_flight() {
            let note = guard.note(CrisisError::DuplicateCallAttempt(guard.session_id().to_string()).to_string());
            self.emit(note).await;
            return Ok(Self::respond(&mut guard, replies));
        }
        if guard.state() != EscalationState::Escalating {
            return Err(CrisisError::invalid(guard.state(), "place_call"));
        }

        let gateway = self.inner.telephony.name().to_string();
        self.step(&mut guard, EscalationState::Calling, format!("placing call via {}", gateway))
            .await?;
        guard.set_call_in_flight(true);
        let policy = &self.inner.policy;
        let message = compose_call_message(guard.emergency_type(), guard.last_utterance(), Utc::now());
        let session_id = guard.session_id();
        let conversation_id = guard.conversation_id().to_string();
        drop(guard);

        let (dial, attempts) = self
            .dial_with_retries(&handle, &policy.target_number, &message, session_id)
            .await;

        let mut guard = handle.clone().lock_owned().await;
        guard.set_call_in_flight(false);

        let call_id = match dial {
            Dial::Placed(call_id) => call_id,
            Dial::Abandoned => {
                let note = guard.note(format!(
                    "retries abandoned after {} failed attempts; session is {}",
                    attempts,
                    guard.state()
                ));
                self.emit(note).await;
                return Ok(TurnOutcome::of(&guard, Vec::new()));
            }
            Dial::Failed(e) => {
                if guard.state() != EscalationState::Calling {
                    let note = guard.note(format!("call attempt failed after cancellation: {}", e));
                    self.emit(note).await;
                    return Ok(TurnOutcome::of(&guard, Vec::new()));
                }
                guard.set_call_status(CallStatus::Failed);
                self.step(
                    &mut guard,
                    EscalationState::CallCompleted,
                    format!("call failed after {} attempts: {}", attempts, e),
                )
                .await?;
                replies.push(CALL_FAILED.to_string());
                return Ok(Self::respond(&mut guard, replies));
            }
        };

        guard.set_call_id(call_id.clone());
        self.inner.calls.insert(call_id.clone(), conversation_id);

        if guard.state() != EscalationState::Calling {
            let note = guard.note(format!("call {} connected after cancellation; ending it", call_id));
            self.emit(note).await;
            let outcome = TurnOutcome::of(&guard, Vec::new());
            drop(guard);
            self.end_call_best_effort(&call_id).await;
            return Ok(outcome);
        }

        self.step(&mut guard, EscalationState::Monitoring, "call accepted by gateway")
            .await?;
        if self.background() {
            tokio::spawn(monitor::call_monitor(self.clone(), call_id));
        }
        replies.push(CALL_PLACED.to_string());
        Ok(Self::respond(&mut guard, replies))
    }

    /// First attempt plus `call_retries` retries with doubling backoff.
    /// Every retry first checks that the session is still `CALLING`, so a
    /// cancel that lands during the backoff stops further dialling.
    async fn dial_with_retries(
        &self,
        handle: &SessionHandle,
        target: &str,
        message: &str,
        session_id: SessionId,
    ) -> (Dial, u32) {
        let policy = &self.inner.policy;
        let mut backoff = policy.call_retry_backoff();
        let mut attempt = 1;
        loop {
            match self.inner.telephony.place_call(target, message).await {
                Ok(call_id) => return (Dial::Placed(call_id), attempt),
                Err(e) if attempt <= policy.call_retries => {
                    tracing::warn!(
                        session_id = %session_id,
                        attempt,
                        error = %e,
                        "⚠️ Call attempt failed; retrying in {:?}",
                        backoff
                    );
                    tokio::time::sleep(backoff).await;
                    let state = handle.lock().await.state();
                    if state != EscalationState::Calling {
                        tracing::info!(
                            session_id = %session_id,
                            attempts = attempt,
                            state = %state,
                            "Session left CALLING during backoff; not retrying"
                        );
                        return (Dial::Abandoned, attempt);
                    }
                    backoff = backoff.saturating_mul(2);
                    attempt += 1;
                }
                Err(e) => {
                    tracing::error!(session_id = %session_id, attempts = attempt, error = %e, "❌ Emergency call could not be placed");
                    return (Dial::Failed(e), attempt);
                }
            }
        }
    }

    // ---------------------------------------------------------------------
    // Call status
    // ---------------------------------------------------------------------

    /// Status from the gateway (callback or poll). `None` if the call is unknown.
    pub async fn on_call_status(
        &self,
        call_id: &CallId,
        status: CallStatus,
    ) -> CrisisResult<Option<TurnOutcome>> {
        let Some(mut guard) = self.lock_call(call_id).await else {
            tracing::warn!(call_id = %call_id, status = %status, "Status for unknown call");
            return Ok(None);
        };
        guard.set_call_status(status);

        if guard.state() == EscalationState::Monitoring && status.is_terminal() {
            self.step(
                &mut guard,
                EscalationState::CallCompleted,
                format!("call ended: {}", status),
            )
            .await?;
            let reply = format!("The emergency call has ended ({}).", status);
            return Ok(Some(Self::respond(&mut guard, vec![reply])));
        }

        tracing::debug!(call_id = %call_id, status = %status, state = %guard.state(), "Call status update");
        Ok(Some(TurnOutcome::of(&guard, Vec::new())))
    }

    async fn lock_call(&self, call_id: &CallId) -> Option<SessionGuard> {
        let conversation_id = self.inner.calls.get(call_id).map(|e| e.value().clone())?;
        let handle = self.session(&conversation_id)?;
        let guard = handle.lock_owned().await;
        (guard.call_id() == Some(call_id)).then_some(guard)
    }

    /// True while the session owning `call_id` is still monitoring it.
    pub(crate) async fn is_monitoring(&self, call_id: &CallId) -> bool {
        match self.lock_call(call_id).await {
            Some(guard) => guard.state() == EscalationState::Monitoring,
            None => false,
        }
    }

    /// Monitoring window elapsed without a terminal status.
    pub(crate) async fn expire_monitoring(&self, call_id: &CallId) -> CrisisResult<()> {
        let Some(mut guard) = self.lock_call(call_id).await else {
            return Ok(());
        };
        if guard.state() != EscalationState::Monitoring {
            return Ok(());
        }
        let last = guard
            .call_status()
            .map(|s| s.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        self.step(
            &mut guard,
            EscalationState::CallCompleted,
            format!("monitoring window elapsed (last status {})", last),
        )
        .await?;
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Timers and housekeeping
    // ---------------------------------------------------------------------

    /// Silence-watch tick: applies one silent turn if the session is still
    /// awaiting confirmation and nothing happened for a full interval.
    pub(crate) async fn silence_tick(
        &self,
        conversation_id: &str,
        session_id: SessionId,
        interval: Duration,
    ) -> CrisisResult<WatchTick> {
        let Some(handle) = self.session(conversation_id) else {
            return Ok(WatchTick::Stop);
        };
        let guard = handle.clone().lock_owned().await;
        if guard.session_id() != session_id || guard.state() != EscalationState::AwaitingConfirmation {
            return Ok(WatchTick::Stop);
        }
        if guard.last_activity().elapsed() < interval {
            return Ok(WatchTick::Continue);
        }
        let outcome = self.apply_silence(handle, guard).await?;
        Ok(if outcome.state == EscalationState::AwaitingConfirmation {
            WatchTick::Continue
        } else {
            WatchTick::Stop
        })
    }

    pub async fn snapshot(&self, conversation_id: &str) -> Option<SessionSnapshot> {
        let handle = self.session(conversation_id)?;
        let guard = handle.lock().await;
        Some(guard.snapshot())
    }

    /// Drops finished sessions older than the grace window. Sessions that are
    /// busy right now are left for the next sweep.
    pub fn sweep_expired(&self, now: Instant) -> usize {
        let grace = self.inner.policy.grace_window();
        let mut released_calls = Vec::new();
        let mut removed = 0;
        self.inner.sessions.retain(|_, handle| {
            let Ok(session) = handle.try_lock() else {
                return true;
            };
            let expired = session
                .terminal_since()
                .map(|since| now.saturating_duration_since(since) >= grace)
                .unwrap_or(false);
            if expired {
                if let Some(call_id) = session.call_id() {
                    released_calls.push(call_id.clone());
                }
                removed += 1;
            }
            !expired
        });
        for call_id in released_calls {
            self.inner.calls.remove(&call_id);
        }
        if removed > 0 {
            tracing::info!(removed, remaining = self.inner.sessions.len(), "🧹 Swept finished sessions");
        }
        removed
    }
}
