use crisis_core::EscalationCoordinator;
use std::sync::Arc;

/// Shared handler state. The coordinator is already cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub app_name: Arc<str>,
    pub coordinator: EscalationCoordinator,
}

impl AppState {
    pub fn new(app_name: &str, coordinator: EscalationCoordinator) -> Self {
        Self {
            app_name: Arc::from(app_name),
            coordinator,
        }
    }
}
