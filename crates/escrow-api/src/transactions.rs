use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::warn;
use uuid::Uuid;

use escrow_types::api::{CreateTransactionRequest, CreateTransactionResponse};

use crate::error::ApiError;
use crate::middleware::Caller;
use crate::state::AppState;

/// POST /api/transactions. The caller is always the buyer.
pub async fn create_transaction(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Json(req): Json<CreateTransactionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let transaction = state
        .transactions
        .create(caller.id, req.seller_id, req.amount, &req.description)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(CreateTransactionResponse {
            msg: "Transaction created successfully".into(),
            transaction,
        }),
    ))
}

pub async fn buyer_transactions(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.transactions.list_by_buyer(caller.id).await?))
}

pub async fn seller_transactions(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.transactions.list_by_seller(caller.id).await?))
}

pub async fn transaction_details(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Extension(caller): Extension<Caller>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.transactions.get_for(&caller, id).await?))
}

/// POST /api/transactions/{id}/confirm-delivery. The buyer releases held funds.
pub async fn confirm_delivery(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Extension(caller): Extension<Caller>,
) -> Result<impl IntoResponse, ApiError> {
    let transaction = state.transactions.get(id).await?;
    if transaction.buyer_id != caller.id {
        warn!("User {} tried to confirm delivery of transaction {}", caller.id, id);
        return Err(ApiError::Forbidden);
    }

    let transition = state.transactions.mark_completed(id).await?;
    Ok(Json(transition.transaction().clone()))
}
