use std::sync::Arc;

use crate::core::config::Settings;
use crate::services::assessment_client::AssessmentBackend;
use crate::services::session_controller::SessionTiming;
use crate::services::session_registry::SessionRegistry;

#[derive(Clone)]
pub(crate) struct AppState {
    inner: Arc<InnerState>,
}

struct InnerState {
    settings: Settings,
    registry: Arc<SessionRegistry>,
}

impl AppState {
    pub(crate) fn new(settings: Settings, backend: Arc<dyn AssessmentBackend>) -> Self {
        let capacity =
            usize::try_from(settings.delivery().max_concurrent_sessions).unwrap_or(usize::MAX);
        let timing = SessionTiming::from_settings(&settings);
        let registry = Arc::new(SessionRegistry::new(backend, timing, capacity));
        Self { inner: Arc::new(InnerState { settings, registry }) }
    }

    pub(crate) fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    pub(crate) fn registry(&self) -> &Arc<SessionRegistry> {
        &self.inner.registry
    }
}
