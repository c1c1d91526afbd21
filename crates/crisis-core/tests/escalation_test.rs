//! End-to-end escalation scenarios against scripted collaborators.

use async_trait::async_trait;
use crisis_core::{
    fallback_prompt, Assessment, AuditLog, AuditWriter, CallId, CallStatus, Collaborator,
    ConfirmationSource, ConversationAgent, CrisisError, CrisisResult, EmergencyType,
    EscalationCoordinator, EscalationPolicy, EscalationState, JsonlAuditLog, MemoryAuditLog,
    Severity, SimulatedGateway, TelephonyGateway,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

enum AgentBehavior {
    Reply(Severity, &'static str),
    Fail,
    Hang,
}

struct ScriptedAgent {
    behavior: AgentBehavior,
    calls: AtomicU32,
}

impl ScriptedAgent {
    fn new(behavior: AgentBehavior) -> Self {
        Self {
            behavior,
            calls: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl ConversationAgent for ScriptedAgent {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn assess(&self, _: EmergencyType, _: &[String]) -> CrisisResult<Assessment> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.behavior {
            AgentBehavior::Reply(severity, message) => Ok(Assessment {
                severity,
                message: message.to_string(),
            }),
            AgentBehavior::Fail => Err(CrisisError::unavailable(
                Collaborator::Agent,
                "connection refused",
            )),
            AgentBehavior::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(CrisisError::unavailable(Collaborator::Agent, "too slow"))
            }
        }
    }
}

#[derive(Default)]
struct ScriptedGateway {
    ids: Mutex<VecDeque<&'static str>>,
    failures: AtomicU32,
    attempts: AtomicU32,
    ended: Mutex<Vec<CallId>>,
    hold: bool,
    entered: Notify,
    release: Notify,
}

impl ScriptedGateway {
    fn with_ids(ids: &[&'static str]) -> Self {
        Self {
            ids: Mutex::new(ids.iter().copied().collect()),
            ..Self::default()
        }
    }

    fn failing(times: u32) -> Self {
        let gw = Self::with_ids(&["CA123"]);
        gw.failures.store(times, Ordering::SeqCst);
        gw
    }

    fn holding() -> Self {
        Self {
            hold: true,
            ..Self::with_ids(&["CA123"])
        }
    }

    fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    fn ended(&self) -> Vec<CallId> {
        self.ended.lock().unwrap().clone()
    }
}

#[async_trait]
impl TelephonyGateway for ScriptedGateway {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn place_call(&self, _target: &str, _message: &str) -> CrisisResult<CallId> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if self.hold {
            self.entered.notify_one();
            self.release.notified().await;
        }
        if attempt <= self.failures.load(Ordering::SeqCst) {
            return Err(CrisisError::unavailable(Collaborator::Telephony, "503 from provider"));
        }
        let id = self
            .ids
            .lock()
            .unwrap()
            .pop_front()
            .map(str::to_string)
            .unwrap_or_else(|| format!("CA{}", attempt));
        Ok(CallId::new(id))
    }

    async fn fetch_status(&self, _call_id: &CallId) -> CrisisResult<CallStatus> {
        Ok(CallStatus::InProgress)
    }

    async fn end_call(&self, call_id: &CallId) -> CrisisResult<()> {
        self.ended.lock().unwrap().push(call_id.clone());
        Ok(())
    }
}

struct Harness {
    coordinator: EscalationCoordinator,
    agent: Arc<ScriptedAgent>,
    gateway: Arc<ScriptedGateway>,
    audit: MemoryAuditLog,
}

fn test_policy() -> EscalationPolicy {
    EscalationPolicy {
        call_retry_backoff_ms: 1,
        ..EscalationPolicy::default()
    }
}

fn harness_with(policy: EscalationPolicy, agent: ScriptedAgent, gateway: ScriptedGateway) -> Harness {
    init_tracing();
    let agent = Arc::new(agent);
    let gateway = Arc::new(gateway);
    let audit = MemoryAuditLog::new();
    let coordinator = EscalationCoordinator::new(
        policy,
        agent.clone(),
        gateway.clone(),
        Arc::new(audit.clone()),
    )
    .with_background_tasks(false);
    Harness {
        coordinator,
        agent,
        gateway,
        audit,
    }
}

fn harness() -> Harness {
    harness_with(
        test_policy(),
        ScriptedAgent::new(AgentBehavior::Reply(Severity::Critical, "Get out of the house now.")),
        ScriptedGateway::with_ids(&["CA123"]),
    )
}

fn transitions(audit: &MemoryAuditLog, conversation_id: &str) -> Vec<(EscalationState, EscalationState)> {
    audit
        .records_for(conversation_id)
        .into_iter()
        .filter(|r| r.is_transition())
        .map(|r| (r.from_state, r.to_state))
        .collect()
}

#[tokio::test]
async fn fire_scenario_runs_to_call_completion() {
    use EscalationState::*;
    let h = harness();

    let out = h
        .coordinator
        .handle_input("c1", "there's a fire in my kitchen")
        .await
        .unwrap();
    assert_eq!(out.state, AwaitingConfirmation);
    assert_eq!(out.emergency_type, Some(EmergencyType::Fire));
    assert!(out.replies[0].starts_with("Get out of the house now."));
    assert!(out.replies[0].contains("Do you want me to call emergency services"));
    assert_eq!(h.gateway.attempts(), 0);

    let out = h.coordinator.handle_input("c1", "yes call for help").await.unwrap();
    assert_eq!(out.state, Monitoring);
    assert_eq!(out.call_id, Some(CallId::from("CA123")));

    let out = h
        .coordinator
        .on_call_status(&CallId::from("CA123"), CallStatus::Completed)
        .await
        .unwrap()
        .expect("call is known");
    assert_eq!(out.state, CallCompleted);

    assert_eq!(
        transitions(&h.audit, "c1"),
        vec![
            (Idle, Detected),
            (Detected, Assessing),
            (Assessing, AwaitingConfirmation),
            (AwaitingConfirmation, Escalating),
            (Escalating, Calling),
            (Calling, Monitoring),
            (Monitoring, CallCompleted),
        ]
    );
    let records = h.audit.records_for("c1");
    let steps: Vec<u32> = records.iter().map(|r| r.step).collect();
    assert_eq!(steps, (1..=7).collect::<Vec<_>>());
    let last = records.last().unwrap();
    assert_eq!(last.call_id, Some(CallId::from("CA123")));
    assert_eq!(last.call_status, Some(CallStatus::Completed));

    let snap = h.coordinator.snapshot("c1").await.unwrap();
    assert!(snap.confirmed);
    assert_eq!(snap.confirmation_source, Some(ConfirmationSource::User));
    assert_eq!(snap.step_count, 7);
    assert_eq!(h.gateway.attempts(), 1);
    assert_eq!(h.agent.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn declining_cancels_without_a_call() {
    let h = harness();
    h.coordinator.handle_input("c1", "there's a fire in my kitchen").await.unwrap();

    let out = h.coordinator.handle_input("c1", "no, I'm fine").await.unwrap();
    assert_eq!(out.state, EscalationState::Cancelled);
    assert_eq!(out.call_id, None);

    let snap = h.coordinator.snapshot("c1").await.unwrap();
    assert!(!snap.confirmed);
    assert_eq!(snap.call_id, None);
    assert_eq!(h.gateway.attempts(), 0);
}

#[tokio::test]
async fn ordinary_chat_does_not_open_a_session() {
    let h = harness();
    let out = h.coordinator.handle_input("c1", "what's the weather tomorrow?").await.unwrap();
    assert_eq!(out.state, EscalationState::Idle);
    assert!(out.session_id.is_none());
    assert!(h.coordinator.snapshot("c1").await.is_none());
    assert!(h.audit.records().is_empty());
}

#[tokio::test]
async fn agent_outage_falls_back_to_scripted_prompt() {
    let h = harness_with(
        test_policy(),
        ScriptedAgent::new(AgentBehavior::Fail),
        ScriptedGateway::with_ids(&["CA123"]),
    );
    let out = h.coordinator.handle_input("c1", "my dad has chest pain").await.unwrap();
    assert_eq!(out.state, EscalationState::AwaitingConfirmation);
    assert!(out.replies[0].starts_with(fallback_prompt(EmergencyType::Medical)));

    let reason = &h.audit.records_for("c1")[2].reason;
    assert!(reason.contains("fallback"), "unexpected reason {}", reason);
}

#[tokio::test(start_paused = true)]
async fn slow_agent_times_out_into_fallback() {
    let h = harness_with(
        test_policy(),
        ScriptedAgent::new(AgentBehavior::Hang),
        ScriptedGateway::with_ids(&["CA123"]),
    );
    let out = h.coordinator.handle_input("c1", "someone is following me").await.unwrap();
    assert_eq!(out.state, EscalationState::AwaitingConfirmation);
    assert!(out.replies[0].starts_with(fallback_prompt(EmergencyType::Danger)));
}

#[tokio::test]
async fn low_severity_resolves_below_threshold() {
    let policy = EscalationPolicy {
        min_call_severity: Severity::Serious,
        ..test_policy()
    };
    let h = harness_with(
        policy,
        ScriptedAgent::new(AgentBehavior::Reply(Severity::Minor, "Run the scrape under cool water.")),
        ScriptedGateway::with_ids(&["CA123"]),
    );
    let out = h.coordinator.handle_input("c1", "I hurt my knee a bit").await.unwrap();
    assert_eq!(out.state, EscalationState::Resolved);
    assert_eq!(out.replies, vec!["Run the scrape under cool water.".to_string()]);
    assert_eq!(h.gateway.attempts(), 0);
}

#[tokio::test]
async fn unclear_answer_reprompts_without_transition() {
    let h = harness();
    h.coordinator.handle_input("c1", "there's a fire in my kitchen").await.unwrap();
    let out = h.coordinator.handle_input("c1", "yes, no time to lose").await.unwrap();
    assert_eq!(out.state, EscalationState::AwaitingConfirmation);
    assert!(out.replies[0].starts_with("I need you to confirm this."));
    assert_eq!(h.coordinator.snapshot("c1").await.unwrap().step_count, 3);
}

#[tokio::test]
async fn gateway_failures_are_retried_then_reported() {
    let h = harness_with(
        test_policy(),
        ScriptedAgent::new(AgentBehavior::Fail),
        ScriptedGateway::failing(10),
    );
    h.coordinator.handle_input("c1", "there's a fire in my kitchen").await.unwrap();
    let out = h.coordinator.handle_input("c1", "yes").await.unwrap();

    assert_eq!(h.gateway.attempts(), 3);
    assert_eq!(out.state, EscalationState::CallCompleted);
    assert!(out.replies.iter().any(|r| r.contains("couldn't reach emergency services")));
    let snap = h.coordinator.snapshot("c1").await.unwrap();
    assert_eq!(snap.call_status, Some(CallStatus::Failed));
    assert_eq!(snap.call_id, None);
    let last = h.audit.records_for("c1").pop().unwrap();
    assert_eq!(last.from_state, EscalationState::Calling);
    assert!(last.reason.contains("3 attempts"));
}

#[tokio::test]
async fn transient_gateway_failure_recovers() {
    let h = harness_with(
        test_policy(),
        ScriptedAgent::new(AgentBehavior::Fail),
        ScriptedGateway::failing(1),
    );
    h.coordinator.handle_input("c1", "there's a fire in my kitchen").await.unwrap();
    let out = h.coordinator.handle_input("c1", "go ahead").await.unwrap();
    assert_eq!(h.gateway.attempts(), 2);
    assert_eq!(out.state, EscalationState::Monitoring);
    assert_eq!(out.call_id, Some(CallId::from("CA123")));
}

#[tokio::test]
async fn second_call_attempt_is_suppressed() {
    let h = harness();
    h.coordinator.handle_input("c1", "there's a fire in my kitchen").await.unwrap();
    h.coordinator.handle_input("c1", "yes").await.unwrap();

    let out = h.coordinator.place_call("c1").await.unwrap();
    assert_eq!(out.state, EscalationState::Monitoring);
    let out = h.coordinator.handle_input("c1", "yes, call them").await.unwrap();
    assert_eq!(out.state, EscalationState::Monitoring);

    assert_eq!(h.gateway.attempts(), 1);
    assert_eq!(out.call_id, Some(CallId::from("CA123")));
    let notes: Vec<_> = h
        .audit
        .records_for("c1")
        .into_iter()
        .filter(|r| !r.is_transition())
        .collect();
    assert_eq!(notes.len(), 1);
    assert!(notes[0].reason.contains("duplicate call attempt"));
    assert_eq!(notes[0].step, 6);
}

#[tokio::test]
async fn call_cannot_be_placed_before_confirmation() {
    let h = harness();
    h.coordinator.handle_input("c1", "there's a fire in my kitchen").await.unwrap();
    let err = h.coordinator.place_call("c1").await.unwrap_err();
    assert!(matches!(err, CrisisError::InvalidTransition { .. }));
    assert_eq!(h.gateway.attempts(), 0);
    assert!(matches!(
        h.coordinator.place_call("nobody").await.unwrap_err(),
        CrisisError::SessionNotFound(_)
    ));
}

async fn silence_until_settled(h: &Harness, conversation_id: &str, limit: u32) -> Vec<String> {
    let mut replies = Vec::new();
    for _ in 0..limit {
        let out = h.coordinator.record_silence(conversation_id).await.unwrap();
        replies.extend(out.replies);
    }
    replies
}

#[tokio::test]
async fn silence_outcome_depends_on_type_and_limit() {
    let cases = [
        ("there's a fire in my kitchen", EmergencyType::Fire),
        ("my dad has chest pain", EmergencyType::Medical),
        ("someone is following me", EmergencyType::Danger),
        ("there was a car crash", EmergencyType::General),
    ];
    for max in 1..=4u32 {
        for (text, kind) in cases {
            let policy = EscalationPolicy {
                max_silence_count: max,
                ..test_policy()
            };
            let escalates = policy.escalate_on_silence.allows(kind);
            let h = harness_with(
                policy,
                ScriptedAgent::new(AgentBehavior::Reply(Severity::Critical, "Stay calm.")),
                ScriptedGateway::with_ids(&["CA9"]),
            );
            let conv = format!("{}-{}", kind, max);
            h.coordinator.handle_input(&conv, text).await.unwrap();

            // One short of the limit keeps the session waiting.
            silence_until_settled(&h, &conv, max - 1).await;
            let snap = h.coordinator.snapshot(&conv).await.unwrap();
            assert_eq!(snap.state, EscalationState::AwaitingConfirmation);
            assert_eq!(snap.silence_count, max - 1);

            let out = h.coordinator.record_silence(&conv).await.unwrap();
            let snap = h.coordinator.snapshot(&conv).await.unwrap();
            if escalates {
                assert_eq!(out.state, EscalationState::Monitoring, "{} max={}", kind, max);
                assert_eq!(snap.confirmation_source, Some(ConfirmationSource::SilencePolicy));
                assert_eq!(h.gateway.attempts(), 1);
            } else {
                assert_eq!(out.state, EscalationState::TimedOut, "{} max={}", kind, max);
                assert!(!snap.confirmed);
                assert_eq!(h.gateway.attempts(), 0);
            }
        }
    }
}

#[tokio::test]
async fn silence_warnings_escalate_in_tone() {
    let h = harness();
    h.coordinator.handle_input("c1", "there's a fire in my kitchen").await.unwrap();
    let replies = silence_until_settled(&h, "c1", 2).await;
    assert!(replies[0].contains("can you hear me"));
    assert!(replies[1].contains("call emergency services automatically"));
}

#[tokio::test]
async fn input_resets_silence_count() {
    let h = harness();
    h.coordinator.handle_input("c1", "there was a car crash").await.unwrap();
    silence_until_settled(&h, "c1", 2).await;
    h.coordinator.handle_input("c1", "sorry, what?").await.unwrap();
    silence_until_settled(&h, "c1", 2).await;
    let snap = h.coordinator.snapshot("c1").await.unwrap();
    assert_eq!(snap.state, EscalationState::AwaitingConfirmation);
    assert_eq!(snap.silence_count, 2);

    // Blank input is a silent turn.
    let out = h.coordinator.handle_input("c1", "   ").await.unwrap();
    assert_eq!(out.state, EscalationState::TimedOut);
}

#[tokio::test]
async fn cancellation_is_final() {
    let h = harness();
    h.coordinator.handle_input("c1", "there's a fire in my kitchen").await.unwrap();
    let out = h.coordinator.cancel("c1", "user pressed cancel").await.unwrap();
    assert_eq!(out.state, EscalationState::Cancelled);

    for text in ["yes", "yes call for help", "there's a fire"] {
        let out = h.coordinator.handle_input("c1", text).await.unwrap();
        assert_eq!(out.state, EscalationState::Cancelled);
        assert!(out.replies.is_empty());
    }
    assert_eq!(
        h.coordinator.record_silence("c1").await.unwrap().state,
        EscalationState::Cancelled
    );
    assert_eq!(
        h.coordinator.cancel("c1", "again").await.unwrap().state,
        EscalationState::Cancelled
    );
    assert_eq!(h.gateway.attempts(), 0);
    assert_eq!(h.coordinator.snapshot("c1").await.unwrap().step_count, 4);
    assert!(matches!(
        h.coordinator.cancel("nobody", "x").await.unwrap_err(),
        CrisisError::SessionNotFound(_)
    ));
}

#[tokio::test]
async fn spoken_cancel_command_works_mid_flow() {
    let h = harness();
    h.coordinator.handle_input("c1", "there's a fire in my kitchen").await.unwrap();
    let out = h.coordinator.handle_input("c1", "false alarm, sorry").await.unwrap();
    assert_eq!(out.state, EscalationState::Cancelled);
}

#[tokio::test]
async fn cancelling_a_monitored_call_hangs_up() {
    let h = harness();
    h.coordinator.handle_input("c1", "there's a fire in my kitchen").await.unwrap();
    h.coordinator.handle_input("c1", "yes").await.unwrap();

    let out = h.coordinator.cancel("c1", "user cancelled").await.unwrap();
    assert_eq!(out.state, EscalationState::Cancelled);
    assert_eq!(h.gateway.ended(), vec![CallId::from("CA123")]);

    // A late provider callback no longer moves the session.
    let late = h
        .coordinator
        .on_call_status(&CallId::from("CA123"), CallStatus::Completed)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(late.state, EscalationState::Cancelled);
}

#[tokio::test]
async fn cancel_during_in_flight_call_ends_the_call() {
    let h = harness_with(
        test_policy(),
        ScriptedAgent::new(AgentBehavior::Reply(Severity::Critical, "Stay low.")),
        ScriptedGateway::holding(),
    );
    h.coordinator.handle_input("c1", "there's a fire in my kitchen").await.unwrap();

    let coordinator = h.coordinator.clone();
    let confirm = tokio::spawn(async move { coordinator.handle_input("c1", "yes").await });
    h.gateway.entered.notified().await;

    let out = h.coordinator.cancel("c1", "user cancelled").await.unwrap();
    assert_eq!(out.state, EscalationState::Cancelled);

    h.gateway.release.notify_one();
    let out = confirm.await.unwrap().unwrap();
    assert_eq!(out.state, EscalationState::Cancelled);
    assert_eq!(out.call_id, Some(CallId::from("CA123")));
    assert_eq!(h.gateway.ended(), vec![CallId::from("CA123")]);

    let snap = h.coordinator.snapshot("c1").await.unwrap();
    assert_eq!(snap.state, EscalationState::Cancelled);
    assert_eq!(snap.call_id, Some(CallId::from("CA123")));
}

#[tokio::test(start_paused = true)]
async fn cancel_during_retry_backoff_stops_dialling() {
    let h = harness_with(
        EscalationPolicy {
            call_retry_backoff_ms: 500,
            ..test_policy()
        },
        ScriptedAgent::new(AgentBehavior::Reply(Severity::Critical, "Stay low.")),
        ScriptedGateway::failing(1),
    );
    h.coordinator.handle_input("c1", "there's a fire in my kitchen").await.unwrap();

    let coordinator = h.coordinator.clone();
    let confirm = tokio::spawn(async move { coordinator.handle_input("c1", "yes").await });
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(h.gateway.attempts(), 1);

    let out = h.coordinator.cancel("c1", "user cancelled").await.unwrap();
    assert_eq!(out.state, EscalationState::Cancelled);

    let out = confirm.await.unwrap().unwrap();
    assert_eq!(out.state, EscalationState::Cancelled);
    assert_eq!(out.call_id, None);
    assert_eq!(h.gateway.attempts(), 1);
    assert!(h.gateway.ended().is_empty());

    let snap = h.coordinator.snapshot("c1").await.unwrap();
    assert_eq!(snap.state, EscalationState::Cancelled);
    assert_eq!(snap.call_id, None);
    assert!(h
        .audit
        .records_for("c1")
        .iter()
        .any(|r| !r.is_transition() && r.reason.contains("retries abandoned")));
}

#[tokio::test]
async fn hesitant_or_questioning_replies_do_not_place_a_call() {
    let h = harness();
    h.coordinator.handle_input("c1", "there's a fire in my kitchen").await.unwrap();

    for text in ["I'm not sure", "who will you call?", "maybe", "hold on", "I don't know"] {
        let out = h.coordinator.handle_input("c1", text).await.unwrap();
        assert_eq!(out.state, EscalationState::AwaitingConfirmation, "{}", text);
        assert!(out.replies[0].starts_with("I need you to confirm this."), "{}", text);
    }

    let snap = h.coordinator.snapshot("c1").await.unwrap();
    assert!(!snap.confirmed);
    assert_eq!(snap.step_count, 3);
    assert_eq!(h.gateway.attempts(), 0);
}

#[tokio::test]
async fn status_callbacks_route_by_call_id() {
    let h = harness_with(
        test_policy(),
        ScriptedAgent::new(AgentBehavior::Reply(Severity::Critical, "Stay calm.")),
        ScriptedGateway::with_ids(&["CA1", "CA2"]),
    );
    for conv in ["a", "b"] {
        h.coordinator.handle_input(conv, "there's a fire in my kitchen").await.unwrap();
        h.coordinator.handle_input(conv, "yes").await.unwrap();
    }

    let ringing = h
        .coordinator
        .on_call_status(&CallId::from("CA2"), CallStatus::Ringing)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(ringing.conversation_id, "b");
    assert_eq!(ringing.state, EscalationState::Monitoring);

    let done = h
        .coordinator
        .on_call_status(&CallId::from("CA2"), CallStatus::NoAnswer)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(done.state, EscalationState::CallCompleted);
    assert_eq!(
        h.coordinator.snapshot("a").await.unwrap().state,
        EscalationState::Monitoring
    );
    assert_eq!(
        h.coordinator.snapshot("b").await.unwrap().call_status,
        Some(CallStatus::NoAnswer)
    );
    assert!(h
        .coordinator
        .on_call_status(&CallId::from("CA404"), CallStatus::Completed)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn finished_sessions_are_swept_after_grace_window() {
    let h = harness();
    h.coordinator.handle_input("c1", "there's a fire in my kitchen").await.unwrap();
    let first = h.coordinator.snapshot("c1").await.unwrap().session_id;
    h.coordinator.handle_input("c1", "no").await.unwrap();

    let now = tokio::time::Instant::now();
    assert_eq!(h.coordinator.sweep_expired(now), 0);
    let later = now + h.coordinator.policy().grace_window() + Duration::from_secs(1);
    assert_eq!(h.coordinator.sweep_expired(later), 1);
    assert!(h.coordinator.snapshot("c1").await.is_none());

    let out = h.coordinator.handle_input("c1", "now there is smoke everywhere").await.unwrap();
    assert_eq!(out.state, EscalationState::AwaitingConfirmation);
    assert_ne!(out.session_id, Some(first));
}

#[tokio::test]
async fn sessions_are_independent() {
    let h = harness();
    h.coordinator.handle_input("a", "there's a fire in my kitchen").await.unwrap();
    h.coordinator.handle_input("b", "my dad has chest pain").await.unwrap();
    h.coordinator.handle_input("a", "no").await.unwrap();
    let b = h.coordinator.snapshot("b").await.unwrap();
    assert_eq!(b.state, EscalationState::AwaitingConfirmation);
    assert_eq!(b.emergency_type, EmergencyType::Medical);
    assert_eq!(h.coordinator.active_sessions(), 2);
}

#[tokio::test]
async fn audit_trail_lands_in_jsonl_file() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let jsonl = Arc::new(JsonlAuditLog::new(dir.path().join("emergency_calls.log")));
    let writer = Arc::new(AuditWriter::spawn(jsonl.clone()));
    let coordinator = EscalationCoordinator::new(
        test_policy(),
        Arc::new(ScriptedAgent::new(AgentBehavior::Reply(Severity::Serious, "Leave now."))),
        Arc::new(ScriptedGateway::with_ids(&["CA123"])),
        writer.clone() as Arc<dyn AuditLog>,
    )
    .with_background_tasks(false);

    coordinator.handle_input("c1", "there's a fire in my kitchen").await.unwrap();
    coordinator.handle_input("c1", "yes").await.unwrap();
    coordinator
        .on_call_status(&CallId::from("CA123"), CallStatus::Completed)
        .await
        .unwrap();
    writer.shutdown().await;

    let records = jsonl.read_all().await.unwrap();
    assert_eq!(records.len(), 7);
    assert_eq!(records[0].to_state, EscalationState::Detected);
    assert_eq!(records[6].to_state, EscalationState::CallCompleted);
    assert!(records.iter().all(|r| r.conversation_id == "c1"));
}

// ---------------------------------------------------------------------------
// Timers (paused clock)
// ---------------------------------------------------------------------------

fn timed_coordinator(gateway: SimulatedGateway) -> (EscalationCoordinator, Arc<SimulatedGateway>, MemoryAuditLog) {
    init_tracing();
    let gateway = Arc::new(gateway);
    let audit = MemoryAuditLog::new();
    let coordinator = EscalationCoordinator::new(
        test_policy(),
        Arc::new(ScriptedAgent::new(AgentBehavior::Reply(Severity::Critical, "Stay calm."))),
        gateway.clone(),
        Arc::new(audit.clone()),
    );
    (coordinator, gateway, audit)
}

#[tokio::test(start_paused = true)]
async fn silence_watch_escalates_fire_and_monitor_completes_call() {
    let (coordinator, gateway, audit) = timed_coordinator(SimulatedGateway::new());
    coordinator.handle_input("c1", "there's a fire in my kitchen").await.unwrap();

    tokio::time::sleep(Duration::from_secs(30)).await;

    let snap = coordinator.snapshot("c1").await.unwrap();
    assert_eq!(snap.state, EscalationState::CallCompleted);
    assert_eq!(snap.confirmation_source, Some(ConfirmationSource::SilencePolicy));
    assert_eq!(snap.call_status, Some(CallStatus::Completed));
    assert_eq!(gateway.placed_count(), 1);
    assert!(snap.prompts.iter().any(|p| p.contains("can you hear me")));
    assert!(audit
        .records_for("c1")
        .iter()
        .any(|r| r.to_state == EscalationState::Escalating && r.reason.contains("silent turns")));
}

#[tokio::test(start_paused = true)]
async fn silence_watch_times_out_general_emergency() {
    let (coordinator, gateway, _audit) = timed_coordinator(SimulatedGateway::new());
    coordinator.handle_input("c1", "there was a car crash").await.unwrap();

    tokio::time::sleep(Duration::from_secs(16)).await;

    let snap = coordinator.snapshot("c1").await.unwrap();
    assert_eq!(snap.state, EscalationState::TimedOut);
    assert_eq!(gateway.placed_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn silence_watch_skips_interval_with_recent_input() {
    let (coordinator, _gateway, _audit) = timed_coordinator(SimulatedGateway::new());
    coordinator.handle_input("c1", "there's a fire in my kitchen").await.unwrap();

    tokio::time::sleep(Duration::from_secs(4)).await;
    coordinator.handle_input("c1", "what?").await.unwrap();
    tokio::time::sleep(Duration::from_secs(8)).await;

    let snap = coordinator.snapshot("c1").await.unwrap();
    assert_eq!(snap.state, EscalationState::AwaitingConfirmation);
    assert_eq!(snap.silence_count, 1);
}

#[tokio::test(start_paused = true)]
async fn reported_silence_and_silence_watch_share_one_clock() {
    let (coordinator, gateway, _audit) = timed_coordinator(SimulatedGateway::new());
    coordinator.handle_input("c1", "there's a fire in my kitchen").await.unwrap();

    tokio::time::sleep(Duration::from_secs(3)).await;
    let out = coordinator.record_silence("c1").await.unwrap();
    assert_eq!(out.state, EscalationState::AwaitingConfirmation);

    // The watch skips its 5s tick and counts again at 10s.
    tokio::time::sleep(Duration::from_secs(9)).await;
    let snap = coordinator.snapshot("c1").await.unwrap();
    assert_eq!(snap.state, EscalationState::AwaitingConfirmation);
    assert_eq!(snap.silence_count, 2);
    assert_eq!(gateway.placed_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn call_monitor_gives_up_after_window() {
    let (coordinator, _gateway, audit) =
        timed_coordinator(SimulatedGateway::with_script(vec![CallStatus::Ringing]));
    coordinator.handle_input("c1", "there's a fire in my kitchen").await.unwrap();
    coordinator.handle_input("c1", "yes").await.unwrap();

    tokio::time::sleep(Duration::from_secs(59)).await;
    assert_eq!(
        coordinator.snapshot("c1").await.unwrap().state,
        EscalationState::Monitoring
    );

    tokio::time::sleep(Duration::from_secs(10)).await;
    let snap = coordinator.snapshot("c1").await.unwrap();
    assert_eq!(snap.state, EscalationState::CallCompleted);
    assert_eq!(snap.call_status, Some(CallStatus::Ringing));
    let last = audit.records_for("c1").pop().unwrap();
    assert!(last.reason.contains("monitoring window elapsed"));
}

#[tokio::test(start_paused = true)]
async fn sweeper_removes_finished_sessions() {
    let (coordinator, _gateway, _audit) = timed_coordinator(SimulatedGateway::new());
    coordinator.handle_input("c1", "there's a fire in my kitchen").await.unwrap();
    coordinator.cancel("c1", "test").await.unwrap();

    let sweeper = crisis_core::spawn_sweeper(coordinator.clone(), coordinator.policy().grace_window());
    tokio::time::sleep(Duration::from_secs(601)).await;
    assert_eq!(coordinator.active_sessions(), 0);
    sweeper.abort();
}
