use axum::{
    Json, Router,
    extract::{Query, State, WebSocketUpgrade, ws::rejection::WebSocketUpgradeRejection},
    middleware,
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use escrow_notify::connection;

use crate::error::{ApiError, blocking};
use crate::middleware::{decode_token, load_caller, require_admin, require_auth};
use crate::state::AppState;
use crate::{admin, auth, payments, transactions};

/// Assemble the full HTTP surface. Tracing and CORS layers are added by the
/// binary so tests can drive the bare router.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/api/health", get(health))
        .route("/api/auth/register", post(auth::register))
        .route("/api/auth/login", post(auth::login))
        .route("/api/auth/forgot-password", post(auth::forgot_password))
        .route("/api/auth/reset-password", post(auth::reset_password))
        .route("/api/payfast/notify", post(payments::handle_notify))
        .route("/api/payfast/return", get(payments::payment_return))
        .route("/api/payfast/cancel", get(payments::payment_cancel));

    let admin_routes = Router::new()
        .route("/api/admin/users", get(admin::list_users))
        .route("/api/admin/users/{id}", delete(admin::delete_user))
        .route("/api/admin/users/{id}/role", put(admin::update_user_role))
        .route("/api/admin/transactions", get(admin::list_transactions))
        .route(
            "/api/admin/transactions/{id}/status",
            put(admin::override_transaction_status),
        )
        .route("/api/admin/stats", get(admin::system_stats))
        .route_layer(middleware::from_fn(require_admin));

    let protected_routes = Router::new()
        .route("/api/transactions", post(transactions::create_transaction))
        .route("/api/transactions/buyer", get(transactions::buyer_transactions))
        .route("/api/transactions/seller", get(transactions::seller_transactions))
        .route("/api/transactions/{id}", get(transactions::transaction_details))
        .route(
            "/api/transactions/{id}/confirm-delivery",
            post(transactions::confirm_delivery),
        )
        .route("/api/payfast/initiate", post(payments::initiate_payment))
        .merge(admin_routes)
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    let ws_route = Router::new().route("/api/notifications", get(ws_upgrade));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .merge(ws_route)
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    blocking(move || Ok(db.health_check()?)).await?;
    Ok(Json(json!({ "status": "ok" })))
}

#[derive(Debug, Deserialize)]
struct WsQuery {
    token: String,
}

/// Browsers cannot set headers on a WebSocket handshake, so the token rides
/// in the query string. The caller is checked before the handshake is.
async fn ws_upgrade(
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Result<Response, ApiError> {
    let claims = decode_token(&query.token, &state.jwt_secret)?;
    let caller = load_caller(&state, claims.sub).await?;
    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return Ok(rejection.into_response()),
    };

    let dispatcher = state.dispatcher.clone();
    info!("Notification stream opened for user {}", caller.id);

    Ok(ws.on_upgrade(move |socket| connection::handle_connection(socket, dispatcher, caller.id)))
}
