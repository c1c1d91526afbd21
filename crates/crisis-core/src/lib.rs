//! # Crisis Core - Confirmation-Gated Emergency Escalation
//!
//! Detects an emergency in what the user says, asks an LLM for an assessment,
//! and only places a real outbound call once the user (or a pre-authorised
//! silence policy) has confirmed it. Every step lands in an audit trail.
//!
//! ## Architecture
//!
//! ```text
//!  text ──▶ classifier ──▶ EscalationCoordinator ──▶ AuditLog
//!                              │          │
//!                              ▼          ▼
//!                   ConversationAgent   TelephonyGateway
//!                   (OpenAI / fallback) (Twilio / simulated)
//!                              ▲
//!               silence watch · call monitor · sweeper
//! ```

pub mod agent;
pub mod audit;
pub mod classifier;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod monitor;
pub mod ports;
pub mod session;
pub mod state;
pub mod telephony;

pub use agent::{fallback_prompt, OpenAiAgent, PlaceholderAgent};
pub use audit::{AuditRecord, AuditWriter, JsonlAuditLog, MemoryAuditLog};
pub use classifier::{classify_emergency, classify_reply, EmergencyType, ReplyIntent};
pub use config::{AgentSettings, CoreConfig, EscalationPolicy, SilenceEscalation, TwilioSettings};
pub use coordinator::{EscalationCoordinator, TurnOutcome};
pub use error::{Collaborator, CrisisError, CrisisResult};
pub use monitor::spawn_sweeper;
pub use ports::{Assessment, AuditLog, ConversationAgent, Severity, TelephonyGateway};
pub use session::{CallId, ConfirmationSource, SessionId, SessionSnapshot};
pub use state::{CallStatus, EscalationState};
pub use telephony::{build_twiml, compose_call_message, SimulatedGateway, TwilioGateway};
