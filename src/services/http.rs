use axum::{
    extract::rejection::{JsonRejection, QueryRejection},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use tokio::sync::{mpsc, oneshot};
use tower_http::trace::TraceLayer;

use super::{
    commissions::CommissionRequest, purchases::PurchaseRequest, users::UserRequest,
    ProgramOptions, ServiceChannels, ServiceError,
};
use crate::models::users::User;

mod admin;
mod program;
mod purchases;
mod users;

/// Header carrying the caller's user id, set by the authenticating gateway.
pub const USER_ID_HEADER: &str = "x-user-id";

#[derive(Clone)]
struct AppState {
    user_channel: mpsc::Sender<UserRequest>,
    purchase_channel: mpsc::Sender<PurchaseRequest>,
    commission_channel: mpsc::Sender<CommissionRequest>,
    options: ProgramOptions,
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let (status, error, details) = match &self {
            ServiceError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone(), None),
            ServiceError::NotFound(what) => {
                (StatusCode::NOT_FOUND, format!("{} not found", what), None)
            }
            ServiceError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone(), None),
            ServiceError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg.clone(), None),
            ServiceError::Repository(..)
            | ServiceError::Communication(..)
            | ServiceError::Internal(_) => {
                log::error!("Request failed: {}", self);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                    Some(self.to_string()),
                )
            }
        };

        (
            status,
            Json(json!({
                "error": error,
                "details": details
            })),
        )
            .into_response()
    }
}

impl From<JsonRejection> for ServiceError {
    fn from(rejection: JsonRejection) -> Self {
        ServiceError::Validation(rejection.body_text())
    }
}

impl From<QueryRejection> for ServiceError {
    fn from(rejection: QueryRejection) -> Self {
        ServiceError::Validation(rejection.body_text())
    }
}

/// Sends a request to a service and waits for its answer.
async fn dispatch<R, T, F>(
    channel: &mpsc::Sender<R>,
    service: &str,
    build: F,
) -> Result<T, ServiceError>
where
    F: FnOnce(oneshot::Sender<Result<T, ServiceError>>) -> R,
{
    let (response_tx, response_rx) = oneshot::channel();

    channel
        .send(build(response_tx))
        .await
        .map_err(|e| ServiceError::Communication(service.to_string(), e.to_string()))?;

    response_rx
        .await
        .map_err(|e| ServiceError::Communication(service.to_string(), e.to_string()))?
}

async fn require_admin(state: &AppState, headers: &HeaderMap) -> Result<User, ServiceError> {
    let id = headers
        .get(USER_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ServiceError::Forbidden("Admin access required".to_string()))?
        .to_string();

    dispatch(&state.user_channel, "UserService", |response| {
        UserRequest::RequireAdmin { id, response }
    })
    .await
}

pub fn router(channels: ServiceChannels, options: ProgramOptions) -> Router {
    let app_state = AppState {
        user_channel: channels.users,
        purchase_channel: channels.purchases,
        commission_channel: channels.commissions,
        options,
    };

    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/program", get(program::get_program))
        .route("/program/potential", get(program::get_potential))
        .route("/register", post(users::register))
        .route("/users/{id}", get(users::get_user))
        .route("/users/{id}/stats", get(users::get_stats))
        .route("/users/{id}/transactions", get(purchases::list_transactions))
        .route("/users/{id}/commissions", get(users::list_commissions))
        .route("/users/{id}/referrals", get(users::get_referrals))
        .route("/users/{id}/referral-link", get(users::get_referral_link))
        .route("/purchases", post(purchases::purchase))
        .route("/admin/overview", get(admin::overview))
        .route("/admin/users", get(admin::search_users))
        .route("/admin/tree", get(admin::tree))
        .route("/admin/commissions", get(admin::list_commissions))
        .route("/admin/commissions/{id}/pay", post(admin::mark_paid))
        .with_state(app_state)
        .layer(TraceLayer::new_for_http())
}

pub async fn start_http_server(
    listen: &str,
    channels: ServiceChannels,
    options: ProgramOptions,
) -> Result<(), anyhow::Error> {
    let app = router(channels, options);

    let listener = tokio::net::TcpListener::bind(listen).await?;
    log::info!("Listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;

    Ok(())
}
