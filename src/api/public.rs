use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Response};
use http::{HeaderMap, StatusCode, Uri};
use tower_sessions::Session;
use tracing::warn;

use crate::entry_point;
use crate::error::GatewayError;
use crate::filter_chain::SessionInvalidated;
use crate::oidc::AuthorizationCallback;
use crate::router::AppState;

pub struct PublicApi;

impl PublicApi {
    /// `GET /oauth2/authorization/{registrationId}`
    pub async fn authorize(
        State(state): State<AppState>,
        Path(registration_id): Path<String>,
        session: Session,
        uri: Uri,
        headers: HeaderMap,
    ) -> Result<Response, GatewayError> {
        let orchestrator = state.filter_chain.orchestrator();
        if registration_id != orchestrator.registration().registration_id {
            return Ok(StatusCode::NOT_FOUND.into_response());
        }

        let base_url = state.filter_chain.base_url(&uri, &headers)?;
        let location = orchestrator.begin(&session, "/", &base_url).await?;
        Ok(entry_point::redirect(&location))
    }

    /// `GET /login/oauth2/code/{registrationId}`
    pub async fn callback(
        State(state): State<AppState>,
        Path(registration_id): Path<String>,
        session: Session,
        Query(callback): Query<AuthorizationCallback>,
    ) -> Result<Response, GatewayError> {
        let orchestrator = state.filter_chain.orchestrator();
        if registration_id != orchestrator.registration().registration_id {
            warn!(registration = %registration_id, "callback for unknown registration");
            return Err(GatewayError::OidcExchangeFailure(
                "unknown registration".to_string(),
            ));
        }

        let target = orchestrator.complete(&session, callback).await?;
        Ok(entry_point::redirect(&target))
    }

    /// `POST /logout`
    pub async fn logout(
        State(state): State<AppState>,
        session: Session,
        uri: Uri,
        headers: HeaderMap,
    ) -> Result<Response, GatewayError> {
        let base_url = state.filter_chain.base_url(&uri, &headers)?;
        let target = state
            .filter_chain
            .orchestrator()
            .logout(&session, &base_url)
            .await?;

        let mut response = entry_point::redirect(&target);
        response.extensions_mut().insert(SessionInvalidated);
        Ok(response)
    }
}
