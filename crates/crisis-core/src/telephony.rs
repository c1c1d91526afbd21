//! Telephony gateway adapters and call message composition.
//!
//! [`TwilioGateway`] talks to the Twilio REST API (create call with inline
//! TwiML, fetch call, hang up). [`SimulatedGateway`] stands in when real calls
//! are disabled (`EMERGENCY_CALL_ENABLED=false`) and is what tests script.

use crate::classifier::EmergencyType;
use crate::config::TwilioSettings;
use crate::error::{Collaborator, CrisisError, CrisisResult};
use crate::ports::TelephonyGateway;
use crate::session::CallId;
use crate::state::CallStatus;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Deserialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Text spoken to the call recipient.
pub fn compose_call_message(
    kind: EmergencyType,
    situation: Option<&str>,
    reported_at: DateTime<Utc>,
) -> String {
    let situation = situation
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or("not described");
    format!(
        "This is an emergency call from the Crisis Guide voice assistant. Emergency type: {}. Situation: {}. Reported at {} UTC. Please stay on the line for guidance.",
        kind,
        situation,
        reported_at.format("%Y-%m-%d %H:%M:%S"),
    )
}

fn escape_xml(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

/// Inline TwiML: the message, a short pause, then a closing notice.
pub fn build_twiml(message: &str) -> String {
    format!(
        "<Response><Say>{}</Say><Pause length=\"2\"/><Say>Emergency services have been notified. Please provide additional details if needed.</Say></Response>",
        escape_xml(message)
    )
}

#[derive(Deserialize)]
struct TwilioCall {
    sid: String,
    status: String,
}

pub struct TwilioGateway {
    account_sid: String,
    auth_token: String,
    from_number: String,
    status_callback_url: Option<String>,
    api_base: String,
    client: reqwest::Client,
}

impl TwilioGateway {
    /// `None` unless real calls are enabled and credentials are complete.
    pub fn from_settings(settings: &TwilioSettings) -> Option<Self> {
        if !settings.is_live() {
            return None;
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Some(Self {
            account_sid: settings.account_sid.clone()?,
            auth_token: settings.auth_token.clone()?,
            from_number: settings.from_number.clone()?,
            status_callback_url: settings.status_callback_url.clone(),
            api_base: settings.api_base.trim_end_matches('/').to_string(),
            client,
        })
    }

    fn calls_url(&self) -> String {
        format!("{}/Accounts/{}/Calls.json", self.api_base, self.account_sid)
    }

    fn call_url(&self, call_id: &CallId) -> String {
        format!(
            "{}/Accounts/{}/Calls/{}.json",
            self.api_base, self.account_sid, call_id
        )
    }

    async fn read_call(&self, res: reqwest::Response) -> CrisisResult<TwilioCall> {
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(CrisisError::unavailable(
                Collaborator::Telephony,
                format!("Twilio API error {}: {}", status, body),
            ));
        }
        res.json::<TwilioCall>()
            .await
            .map_err(|e| CrisisError::unavailable(Collaborator::Telephony, e))
    }
}

#[async_trait]
impl TelephonyGateway for TwilioGateway {
    fn name(&self) -> &str {
        "twilio"
    }

    async fn place_call(&self, target_number: &str, message: &str) -> CrisisResult<CallId> {
        let mut form: Vec<(&str, String)> = vec![
            ("To", target_number.to_string()),
            ("From", self.from_number.clone()),
            ("Twiml", build_twiml(message)),
        ];
        if let Some(ref url) = self.status_callback_url {
            form.push(("StatusCallback", url.clone()));
            for event in ["initiated", "ringing", "answered", "completed"] {
                form.push(("StatusCallbackEvent", event.to_string()));
            }
        }

        let res = self
            .client
            .post(self.calls_url())
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&form)
            .send()
            .await
            .map_err(|e| CrisisError::unavailable(Collaborator::Telephony, e))?;
        let call = self.read_call(res).await?;
        tracing::info!(call_id = %call.sid, status = %call.status, "📞 Twilio call created");
        Ok(CallId::new(call.sid))
    }

    async fn fetch_status(&self, call_id: &CallId) -> CrisisResult<CallStatus> {
        let res = self
            .client
            .get(self.call_url(call_id))
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .send()
            .await
            .map_err(|e| CrisisError::unavailable(Collaborator::Telephony, e))?;
        let call = self.read_call(res).await?;
        call.status
            .parse()
            .map_err(|e: String| CrisisError::unavailable(Collaborator::Telephony, e))
    }

    async fn end_call(&self, call_id: &CallId) -> CrisisResult<()> {
        let res = self
            .client
            .post(self.call_url(call_id))
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&[("Status", "completed")])
            .send()
            .await
            .map_err(|e| CrisisError::unavailable(Collaborator::Telephony, e))?;
        self.read_call(res).await?;
        tracing::info!(call_id = %call_id, "📞 Twilio call ended");
        Ok(())
    }
}

#[derive(Debug)]
struct SimulatedCall {
    pending: VecDeque<CallStatus>,
    last: CallStatus,
}

/// Records calls instead of dialling. Each fetch pops the next scripted status;
/// once the script is exhausted the last status repeats.
#[derive(Debug)]
pub struct SimulatedGateway {
    script: Vec<CallStatus>,
    calls: DashMap<CallId, SimulatedCall>,
    placed: DashMap<CallId, (String, String)>,
    seq: AtomicU64,
}

impl Default for SimulatedGateway {
    fn default() -> Self {
        Self::with_script(vec![CallStatus::Completed])
    }
}

impl SimulatedGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_script(script: Vec<CallStatus>) -> Self {
        Self {
            script,
            calls: DashMap::new(),
            placed: DashMap::new(),
            seq: AtomicU64::new(0),
        }
    }

    pub fn placed_count(&self) -> usize {
        self.placed.len()
    }

    /// Target number and message of a simulated call.
    pub fn placed_call(&self, call_id: &CallId) -> Option<(String, String)> {
        self.placed.get(call_id).map(|entry| entry.value().clone())
    }
}

#[async_trait]
impl TelephonyGateway for SimulatedGateway {
    fn name(&self) -> &str {
        "simulated"
    }

    async fn place_call(&self, target_number: &str, message: &str) -> CrisisResult<CallId> {
        let seq = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        let call_id = CallId::new(format!("sim_{}_{}", Utc::now().format("%Y%m%d_%H%M%S"), seq));
        self.calls.insert(
            call_id.clone(),
            SimulatedCall {
                pending: self.script.iter().copied().collect(),
                last: CallStatus::Queued,
            },
        );
        self.placed
            .insert(call_id.clone(), (target_number.to_string(), message.to_string()));
        tracing::info!(call_id = %call_id, target = %target_number, "🚨 Simulated emergency call");
        Ok(call_id)
    }

    async fn fetch_status(&self, call_id: &CallId) -> CrisisResult<CallStatus> {
        let mut call = self.calls.get_mut(call_id).ok_or_else(|| {
            CrisisError::unavailable(Collaborator::Telephony, format!("unknown call {}", call_id))
        })?;
        if let Some(next) = call.pending.pop_front() {
            call.last = next;
        }
        Ok(call.last)
    }

    async fn end_call(&self, call_id: &CallId) -> CrisisResult<()> {
        let mut call = self.calls.get_mut(call_id).ok_or_else(|| {
            CrisisError::unavailable(Collaborator::Telephony, format!("unknown call {}", call_id))
        })?;
        call.pending.clear();
        call.last = CallStatus::Completed;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_twiml_escapes_user_text() {
        let twiml = build_twiml("smoke & flames <upstairs>");
        assert!(twiml.contains("smoke &amp; flames &lt;upstairs&gt;"));
        assert!(twiml.starts_with("<Response><Say>"));
        assert!(twiml.contains("<Pause length=\"2\"/>"));
    }

    #[test]
    fn test_call_message_names_type_and_situation() {
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 12, 30, 0).unwrap();
        let msg = compose_call_message(EmergencyType::Fire, Some("there's a fire in my kitchen"), at);
        assert!(msg.contains("Emergency type: fire"));
        assert!(msg.contains("Situation: there's a fire in my kitchen"));
        assert!(msg.contains("2026-03-01 12:30:00"));

        let msg = compose_call_message(EmergencyType::Danger, None, at);
        assert!(msg.contains("Situation: not described"));
    }

    #[tokio::test]
    async fn test_simulated_gateway_follows_script() {
        let gw = SimulatedGateway::with_script(vec![CallStatus::Ringing, CallStatus::Busy]);
        let id = gw.place_call("+15550001111", "hello").await.unwrap();
        assert!(id.as_str().starts_with("sim_"));
        assert_eq!(gw.fetch_status(&id).await.unwrap(), CallStatus::Ringing);
        assert_eq!(gw.fetch_status(&id).await.unwrap(), CallStatus::Busy);
        assert_eq!(gw.fetch_status(&id).await.unwrap(), CallStatus::Busy);
        assert_eq!(gw.placed_call(&id).unwrap().0, "+15550001111");

        let other = gw.place_call("+15550001111", "again").await.unwrap();
        assert_ne!(id, other);
        gw.end_call(&other).await.unwrap();
        assert_eq!(gw.fetch_status(&other).await.unwrap(), CallStatus::Completed);
        assert!(gw.fetch_status(&CallId::from("CA404")).await.is_err());
    }

    #[test]
    fn test_twilio_requires_live_settings() {
        let mut settings = TwilioSettings {
            enabled: false,
            account_sid: Some("AC1".into()),
            auth_token: Some("token".into()),
            from_number: Some("+15550002222".into()),
            status_callback_url: None,
            api_base: "https://api.twilio.com/2010-04-01".into(),
        };
        assert!(TwilioGateway::from_settings(&settings).is_none());
        settings.enabled = true;
        assert!(TwilioGateway::from_settings(&settings).is_some());
        settings.auth_token = None;
        assert!(TwilioGateway::from_settings(&settings).is_none());
    }
}
