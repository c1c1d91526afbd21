//! Configuration for the escalation coordinator and its collaborators.
//!
//! `CoreConfig::load()` layers defaults, an optional TOML file and `CRISIS_*`
//! style environment variables (prefix `CRISIS`, separator `__`):
//!
//! ```text
//! CRISIS_PORT=8766
//! CRISIS_ESCALATION__MAX_SILENCE_COUNT=3
//! CRISIS_ESCALATION__ESCALATE_ON_SILENCE__DANGER=true
//! ```
//!
//! The older flat variables (`MAX_SILENCE_COUNT`, `EMERGENCY_ESCALATION_DELAY`,
//! `EMERGENCY_TARGET_PHONE`) are still honoured and win over the layered values.
//! Credentials are never part of `CoreConfig`; they are read by the adapter
//! settings (`TwilioSettings::from_env`, `AgentSettings::from_env`).

use crate::classifier::EmergencyType;
use crate::error::{CrisisError, CrisisResult};
use crate::ports::Severity;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Which emergency types escalate to a call when the user stops responding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SilenceEscalation {
    pub fire: bool,
    pub medical: bool,
    pub danger: bool,
    pub general: bool,
}

impl Default for SilenceEscalation {
    fn default() -> Self {
        Self {
            fire: true,
            medical: true,
            danger: false,
            general: false,
        }
    }
}

impl SilenceEscalation {
    pub fn allows(&self, kind: EmergencyType) -> bool {
        match kind {
            EmergencyType::Fire => self.fire,
            EmergencyType::Medical => self.medical,
            EmergencyType::Danger => self.danger,
            EmergencyType::General => self.general,
        }
    }
}

/// Tunables of the escalation state machine and its timers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EscalationPolicy {
    /// Consecutive silent turns tolerated while awaiting confirmation.
    pub max_silence_count: u32,
    pub escalate_on_silence: SilenceEscalation,
    /// Assessments below this severity resolve without asking to call.
    pub min_call_severity: Severity,
    /// Number dialled for emergency calls.
    pub target_number: String,
    pub assessment_timeout_ms: u64,
    /// Extra attempts after the first failed `place_call`.
    pub call_retries: u32,
    pub call_retry_backoff_ms: u64,
    pub silence_check_interval_ms: u64,
    pub call_poll_interval_ms: u64,
    pub call_monitor_timeout_ms: u64,
    /// How long a finished session lingers before it is swept.
    pub grace_window_secs: u64,
}

impl Default for EscalationPolicy {
    fn default() -> Self {
        Self {
            max_silence_count: 3,
            escalate_on_silence: SilenceEscalation::default(),
            min_call_severity: Severity::Minor,
            target_number: "+1234567890".to_string(),
            assessment_timeout_ms: 10_000,
            call_retries: 2,
            call_retry_backoff_ms: 500,
            silence_check_interval_ms: 5_000,
            call_poll_interval_ms: 2_000,
            call_monitor_timeout_ms: 60_000,
            grace_window_secs: 300,
        }
    }
}

impl EscalationPolicy {
    pub fn assessment_timeout(&self) -> Duration {
        Duration::from_millis(self.assessment_timeout_ms)
    }

    pub fn call_retry_backoff(&self) -> Duration {
        Duration::from_millis(self.call_retry_backoff_ms)
    }

    pub fn silence_check_interval(&self) -> Duration {
        Duration::from_millis(self.silence_check_interval_ms)
    }

    pub fn call_poll_interval(&self) -> Duration {
        Duration::from_millis(self.call_poll_interval_ms)
    }

    pub fn call_monitor_timeout(&self) -> Duration {
        Duration::from_millis(self.call_monitor_timeout_ms)
    }

    pub fn grace_window(&self) -> Duration {
        Duration::from_secs(self.grace_window_secs)
    }

    /// Rejects values that would make the state machine misbehave.
    pub fn validate(&self) -> CrisisResult<()> {
        if self.max_silence_count == 0 {
            return Err(CrisisError::Config(
                "escalation.max_silence_count must be at least 1".to_string(),
            ));
        }
        if self.silence_check_interval_ms == 0 || self.call_poll_interval_ms == 0 {
            return Err(CrisisError::Config(
                "timer intervals must be greater than zero".to_string(),
            ));
        }
        if self.target_number.trim().is_empty() {
            return Err(CrisisError::Config(
                "escalation.target_number must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub app_name: String,
    pub port: u16,
    /// JSON-lines audit file.
    pub audit_log_path: String,
    pub escalation: EscalationPolicy,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            app_name: "Crisis Guide".to_string(),
            port: 8766,
            audit_log_path: "emergency_calls.log".to_string(),
            escalation: EscalationPolicy::default(),
        }
    }
}

impl CoreConfig {
    /// Load config from file and environment. Precedence: legacy flat env vars >
    /// `CRISIS_*` env > `CRISIS_CONFIG` file (default `config/crisis.toml`) > defaults.
    pub fn load() -> CrisisResult<Self> {
        let config_path =
            std::env::var("CRISIS_CONFIG").unwrap_or_else(|_| "config/crisis".to_string());
        let mut cfg = Self::load_from(Some(Path::new(&config_path)))?;
        cfg.apply_overrides(|name| std::env::var(name).ok())?;
        cfg.escalation.validate()?;
        Ok(cfg)
    }

    /// Defaults, then `file` if it exists, then `CRISIS_*` environment variables.
    pub fn load_from(file: Option<&Path>) -> CrisisResult<Self> {
        Self::layered(file, None)
    }

    /// `env` replaces the process environment when set.
    ///
    /// Values stay strings until serde sees the target field, so a phone number
    /// such as `+15550001111` is not coerced into an integer.
    fn layered(file: Option<&Path>, env: Option<config::Map<String, String>>) -> CrisisResult<Self> {
        let defaults = Self::default();
        let mut builder = config::Config::builder()
            .set_default("app_name", defaults.app_name)?
            .set_default("port", i64::from(defaults.port))?
            .set_default("audit_log_path", defaults.audit_log_path)?;

        if let Some(path) = file {
            builder = builder.add_source(config::File::from(path).required(false));
        }

        let built = builder
            .add_source(
                config::Environment::with_prefix("CRISIS")
                    .prefix_separator("_")
                    .separator("__")
                    .source(env),
            )
            .build()?;

        Ok(built.try_deserialize()?)
    }

    /// Applies the flat variables of the voice agent's `.env` files.
    /// `EMERGENCY_ESCALATION_DELAY` is in seconds.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> CrisisResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("MAX_SILENCE_COUNT") {
            self.escalation.max_silence_count = parse_var("MAX_SILENCE_COUNT", &v)?;
        }
        if let Some(v) = lookup("EMERGENCY_ESCALATION_DELAY") {
            let secs: u64 = parse_var("EMERGENCY_ESCALATION_DELAY", &v)?;
            self.escalation.silence_check_interval_ms = secs.saturating_mul(1_000);
        }
        if let Some(v) = lookup("EMERGENCY_TARGET_PHONE") {
            if !v.trim().is_empty() {
                self.escalation.target_number = v.trim().to_string();
            }
        }
        Ok(())
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, value: &str) -> CrisisResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| CrisisError::Config(format!("{} has an invalid value: {:?}", name, value)))
}

fn env_bool(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(v) => {
            let v = v.trim();
            if v.is_empty() {
                default
            } else {
                v.eq_ignore_ascii_case("true") || v == "1" || v.eq_ignore_ascii_case("yes")
            }
        }
        Err(_) => default,
    }
}

fn env_opt_string(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Twilio credentials and the real-call switch.
#[derive(Debug, Clone, Default)]
pub struct TwilioSettings {
    /// `EMERGENCY_CALL_ENABLED`; off means calls are simulated.
    pub enabled: bool,
    pub account_sid: Option<String>,
    pub auth_token: Option<String>,
    /// Caller id (`TWILIO_PHONE_NUMBER`).
    pub from_number: Option<String>,
    /// Public URL of `/api/v1/telephony/status`, if the gateway is reachable from Twilio.
    pub status_callback_url: Option<String>,
    pub api_base: String,
}

impl TwilioSettings {
    pub fn from_env() -> Self {
        Self {
            enabled: env_bool("EMERGENCY_CALL_ENABLED", false),
            account_sid: env_opt_string("TWILIO_ACCOUNT_SID"),
            auth_token: env_opt_string("TWILIO_AUTH_TOKEN"),
            from_number: env_opt_string("TWILIO_PHONE_NUMBER"),
            status_callback_url: env_opt_string("TWILIO_STATUS_CALLBACK_URL"),
            api_base: env_opt_string("TWILIO_API_BASE")
                .unwrap_or_else(|| "https://api.twilio.com/2010-04-01".to_string()),
        }
    }

    /// Real calls need the switch on and all three credentials present.
    pub fn is_live(&self) -> bool {
        self.enabled
            && self.account_sid.is_some()
            && self.auth_token.is_some()
            && self.from_number.is_some()
    }
}

/// OpenAI-compatible chat endpoint used for assessments.
#[derive(Debug, Clone)]
pub struct AgentSettings {
    pub api_key: Option<String>,
    pub model: String,
    pub base_url: String,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            model: "gpt-4o".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
        }
    }
}

impl AgentSettings {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            api_key: env_opt_string("OPENAI_API_KEY"),
            model: env_opt_string("OPENAI_MODEL").unwrap_or(defaults.model),
            base_url: env_opt_string("OPENAI_BASE_URL").unwrap_or(defaults.base_url),
        }
    }
}
