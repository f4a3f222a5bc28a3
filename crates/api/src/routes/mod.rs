mod realtime;
mod support;

use axum::extract::State;
use axum::{
    Json, Router,
    http::{HeaderMap, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::get,
};
use kedai_domain::error::DomainError;
use kedai_domain::identity::SupportActor;
use kedai_domain::util::non_blank;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::middleware::AuthContext;
use crate::{error::ApiError, middleware as app_middleware, observability, state::AppState};

pub const GUEST_TOKEN_HEADER: &str = "x-guest-token";

pub fn router(state: AppState) -> Router {
    let mut app = Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .merge(support::routes(&state))
        .route("/api/support/ws", get(realtime::support_ws))
        .layer(middleware::from_fn(app_middleware::metrics_layer))
        .layer(app_middleware::timeout_layer())
        .layer(app_middleware::trace_layer())
        .layer(app_middleware::set_request_id_layer())
        .layer(app_middleware::propagate_request_id_layer())
        .layer(middleware::from_fn_with_state(
            state.clone(),
            app_middleware::auth_middleware,
        ))
        .layer(middleware::from_fn(
            app_middleware::correlation_id_middleware,
        ));

    if !state.config.is_test() {
        app = app.layer(app_middleware::rate_limit_layer());
    }

    app.with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    environment: String,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        environment: state.config.app_env.clone(),
    })
}

async fn metrics() -> Response {
    match observability::render_metrics() {
        Some(body) => body.into_response(),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            "metrics recorder not installed",
        )
            .into_response(),
    }
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct GuestTokenQuery {
    #[serde(rename = "guestToken", alias = "guest_token")]
    guest_token: Option<String>,
}

/// Header first, then the `guestToken` query parameter.
pub(crate) fn guest_token(headers: &HeaderMap, query: &GuestTokenQuery) -> Option<String> {
    let header = headers
        .get(GUEST_TOKEN_HEADER)
        .and_then(|value| value.to_str().ok());
    non_blank(header)
        .or_else(|| non_blank(query.guest_token.as_deref()))
        .map(|token| token.trim().to_string())
}

pub(crate) fn customer_or_guest_actor(
    auth: &AuthContext,
    guest_token: Option<String>,
) -> SupportActor {
    match auth.authenticated_username() {
        Some(username) => SupportActor::customer(username),
        None => SupportActor::guest(guest_token),
    }
}

/// Agent-role principals act as agents; everyone else as customer or guest.
pub(crate) fn principal_actor(auth: &AuthContext, guest_token: Option<String>) -> SupportActor {
    match auth.authenticated_username() {
        Some(username) if auth.is_support_agent() => SupportActor::agent(username),
        _ => customer_or_guest_actor(auth, guest_token),
    }
}

pub(crate) fn agent_actor(auth: &AuthContext) -> Result<SupportActor, ApiError> {
    auth.authenticated_username()
        .filter(|_| auth.is_support_agent())
        .map(SupportActor::agent)
        .ok_or(ApiError::Unauthorized)
}

/// Field errors are joined onto one line for the error envelope.
pub(crate) fn validate_input<T: Validate>(value: &T) -> Result<(), ApiError> {
    value
        .validate()
        .map_err(|err| ApiError::Validation(err.to_string().replace('\n', "; ")))
}

pub(crate) fn map_domain_error(err: DomainError) -> ApiError {
    match err {
        DomainError::InvalidRequest(message) => ApiError::Validation(message),
        DomainError::NotFound(entity) => ApiError::NotFound(entity),
        DomainError::AccessDenied(message) => ApiError::Forbidden(message),
        DomainError::Conflict => ApiError::Conflict,
    }
}
