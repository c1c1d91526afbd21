//! Background timers: silence watch, call monitor and session sweeper.
//!
//! All three are plain tokio tasks that sleep between checks. Whether a tick
//! still applies is decided by the coordinator under the session lock when the
//! timer fires, so a stale timer is harmless.

use crate::coordinator::{EscalationCoordinator, WatchTick};
use crate::session::{CallId, SessionId};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Counts a silent turn every `silence_check_interval` without user input,
/// for as long as the session is awaiting confirmation.
pub(crate) async fn silence_watch(
    coordinator: EscalationCoordinator,
    conversation_id: String,
    session_id: SessionId,
) {
    let interval = coordinator.policy().silence_check_interval();
    tracing::debug!(session_id = %session_id, ?interval, "🔇 Silence watch started");
    loop {
        tokio::time::sleep(interval).await;
        match coordinator
            .silence_tick(&conversation_id, session_id, interval)
            .await
        {
            Ok(WatchTick::Continue) => continue,
            Ok(WatchTick::Stop) => break,
            Err(e) => {
                tracing::warn!(session_id = %session_id, error = %e, "⚠️ Silence watch stopped");
                break;
            }
        }
    }
    tracing::debug!(session_id = %session_id, "🔇 Silence watch finished");
}

/// Polls the gateway until the call reaches a terminal status or the
/// monitoring window closes. Callbacks may finish the call first; the poller
/// then notices the session is no longer monitoring and exits.
pub(crate) async fn call_monitor(coordinator: EscalationCoordinator, call_id: CallId) {
    let poll = coordinator.policy().call_poll_interval();
    let deadline = Instant::now() + coordinator.policy().call_monitor_timeout();
    tracing::info!(call_id = %call_id, ?poll, "📡 Monitoring call");

    loop {
        tokio::time::sleep(poll).await;
        if !coordinator.is_monitoring(&call_id).await {
            return;
        }

        if let Some(true) = poll_once(&coordinator, &call_id).await {
            return;
        }

        if Instant::now() >= deadline {
            tracing::warn!(call_id = %call_id, "⏰ Call monitoring window elapsed");
            if let Some(true) = poll_once(&coordinator, &call_id).await {
                return;
            }
            if let Err(e) = coordinator.expire_monitoring(&call_id).await {
                tracing::warn!(call_id = %call_id, error = %e, "⚠️ Could not close monitored call");
            }
            return;
        }
    }
}

/// One status fetch. `Some(true)` when the status was terminal.
async fn poll_once(coordinator: &EscalationCoordinator, call_id: &CallId) -> Option<bool> {
    match coordinator.telephony().fetch_status(call_id).await {
        Ok(status) => {
            tracing::debug!(call_id = %call_id, status = %status, "📡 Call status");
            if let Err(e) = coordinator.on_call_status(call_id, status).await {
                tracing::warn!(call_id = %call_id, error = %e, "⚠️ Could not apply call status");
            }
            Some(status.is_terminal())
        }
        Err(e) => {
            tracing::warn!(call_id = %call_id, error = %e, "⚠️ Call status poll failed");
            None
        }
    }
}

/// Runs `sweep_expired` every `every` until the task is aborted.
pub fn spawn_sweeper(coordinator: EscalationCoordinator, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            coordinator.sweep_expired(Instant::now());
        }
    })
}
