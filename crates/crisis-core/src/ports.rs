//! Collaborator ports: the conversation agent (LLM), the telephony gateway and
//! the audit log. The coordinator only sees these traits; adapters live in
//! `agent`, `telephony` and `audit`.

use crate::audit::AuditRecord;
use crate::classifier::EmergencyType;
use crate::error::CrisisResult;
use crate::session::CallId;
use crate::state::CallStatus;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How serious the agent judges the situation. Ordered: `Minor < Serious < Critical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Minor,
    Serious,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Minor => "minor",
            Severity::Serious => "serious",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    /// Accepts the usual synonyms models produce ("low", "high", "severe").
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "minor" | "low" | "mild" => Ok(Severity::Minor),
            "serious" | "moderate" | "medium" | "high" => Ok(Severity::Serious),
            "critical" | "severe" | "life-threatening" | "life threatening" => Ok(Severity::Critical),
            other => Err(format!("Invalid severity: {}", other)),
        }
    }
}

/// Advisory output of the agent. Only `severity` affects control flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assessment {
    pub severity: Severity,
    pub message: String,
}

#[async_trait]
pub trait ConversationAgent: Send + Sync {
    fn name(&self) -> &str;

    /// Assess the situation from the emergency type and the user's utterances so far.
    async fn assess(
        &self,
        emergency_type: EmergencyType,
        transcript: &[String],
    ) -> CrisisResult<Assessment>;
}

#[async_trait]
pub trait TelephonyGateway: Send + Sync {
    fn name(&self) -> &str;

    /// Start an outbound call that speaks `message` to `target_number`.
    async fn place_call(&self, target_number: &str, message: &str) -> CrisisResult<CallId>;

    async fn fetch_status(&self, call_id: &CallId) -> CrisisResult<CallStatus>;

    /// Hang up a live call.
    async fn end_call(&self, call_id: &CallId) -> CrisisResult<()>;
}

/// Append-only audit trail. One record per transition.
#[async_trait]
pub trait AuditLog: Send + Sync {
    async fn append(&self, record: AuditRecord) -> CrisisResult<()>;
}
