//! Crisis Guide gateway: exposes the escalation coordinator over HTTP and
//! receives Twilio call status callbacks.

mod routes;
mod state;

use anyhow::Context;
use crisis_core::{
    spawn_sweeper, AgentSettings, AuditLog, AuditWriter, ConversationAgent, CoreConfig,
    EscalationCoordinator, JsonlAuditLog, OpenAiAgent, PlaceholderAgent, SimulatedGateway,
    TelephonyGateway, TwilioGateway, TwilioSettings,
};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn select_agent(settings: &AgentSettings) -> Arc<dyn ConversationAgent> {
    match OpenAiAgent::from_settings(settings) {
        Some(agent) => {
            tracing::info!(model = %settings.model, "🧠 Assessments via OpenAI-compatible API");
            Arc::new(agent)
        }
        None => {
            tracing::warn!("🧠 OPENAI_API_KEY not set; assessments use fallback prompts");
            Arc::new(PlaceholderAgent)
        }
    }
}

fn select_telephony(settings: &TwilioSettings) -> Arc<dyn TelephonyGateway> {
    match TwilioGateway::from_settings(settings) {
        Some(gateway) => {
            tracing::warn!("📞 EMERGENCY_CALL_ENABLED: real outbound calls via Twilio");
            Arc::new(gateway)
        }
        None => {
            if settings.enabled {
                tracing::error!("📞 EMERGENCY_CALL_ENABLED is set but Twilio credentials are incomplete; simulating calls");
            } else {
                tracing::info!("📞 Emergency calls are simulated (EMERGENCY_CALL_ENABLED=false)");
            }
            Arc::new(SimulatedGateway::new())
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("[crisis-gateway] .env not loaded: {} (using system environment)", e);
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = CoreConfig::load().context("loading configuration")?;

    let audit_sink = Arc::new(JsonlAuditLog::new(&config.audit_log_path));
    let audit = Arc::new(AuditWriter::spawn(audit_sink));
    tracing::info!(path = %config.audit_log_path, "📝 Audit log");

    let coordinator = EscalationCoordinator::new(
        config.escalation.clone(),
        select_agent(&AgentSettings::from_env()),
        select_telephony(&TwilioSettings::from_env()),
        audit.clone() as Arc<dyn AuditLog>,
    );
    let sweeper = spawn_sweeper(coordinator.clone(), config.escalation.grace_window());

    let app = routes::build_app(state::AppState::new(&config.app_name, coordinator));
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    tracing::info!("{} listening on {}", config.app_name, addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for Ctrl+C: {}", e);
            }
            tracing::info!("Shutdown initiated (Ctrl+C received)");
        })
        .await
        .context("server error")?;

    sweeper.abort();
    audit.shutdown().await;
    tracing::info!("Audit log flushed; bye");
    Ok(())
}
