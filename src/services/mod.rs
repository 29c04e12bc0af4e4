pub(crate) mod assessment_client;
pub(crate) mod countdown;
pub(crate) mod proctoring;
pub(crate) mod progress_sync;
pub(crate) mod session_controller;
pub(crate) mod session_registry;
