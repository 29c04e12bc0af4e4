use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::{header, request::Parts};

use crate::api::errors::ApiError;
use crate::core::state::AppState;
use crate::services::assessment_client::CandidateCredential;

/// Candidate bearer token. The gateway does not verify it; the assessment service does
/// on every forwarded call.
pub(crate) struct CandidateToken(pub(crate) CandidateCredential);

#[async_trait]
impl FromRequestParts<AppState> for CandidateToken {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let auth_header = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .ok_or(ApiError::Unauthorized("Invalid authentication credentials"))?;

        let token = auth_header
            .strip_prefix("Bearer ")
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or(ApiError::Unauthorized("Invalid authentication credentials"))?;

        Ok(CandidateToken(CandidateCredential::new(token)))
    }
}
