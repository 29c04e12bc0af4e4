mod handlers;

use axum::{routing::get, routing::post, routing::put, Router};

use crate::core::state::AppState;

pub(crate) fn router() -> Router<AppState> {
    Router::new()
        .route("/:test_id", get(handlers::get_session).delete(handlers::close_session))
        .route("/:test_id/open", post(handlers::open_session))
        .route("/:test_id/answers/:question_id", put(handlers::record_answer))
        .route("/:test_id/signals", post(handlers::report_signal))
        .route("/:test_id/submit", post(handlers::submit_session))
        .route("/:test_id/unload", post(handlers::unload_session))
}
