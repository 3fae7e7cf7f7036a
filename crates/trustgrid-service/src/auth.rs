use crate::{ApiError, ServiceState};
use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use trustgrid_core::Organization;

pub const API_KEY_HEADER: &str = "x-api-key";

/// Organization resolved from the `X-API-Key` header.
#[derive(Debug, Clone)]
pub struct AuthenticatedOrg(pub Organization);

#[async_trait]
impl FromRequestParts<ServiceState> for AuthenticatedOrg {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &ServiceState,
    ) -> Result<Self, Self::Rejection> {
        let presented = parts
            .headers
            .get(API_KEY_HEADER)
            .ok_or_else(|| ApiError::unauthorized("missing X-API-Key header"))?
            .to_str()
            .map_err(|_| ApiError::unauthorized("X-API-Key header is not valid text"))?
            .trim();

        let organization = state.engine.authenticate(presented).await?;
        Ok(Self(organization))
    }
}
