use axum::{
    Extension, Json,
    extract::{Path, State},
    response::IntoResponse,
};
use tracing::info;
use uuid::Uuid;

use escrow_types::api::{
    AdminTransaction, MessageResponse, RoleCount, StatusCount, SystemStats, UpdateRoleRequest,
    UpdateStatusRequest, UserSummary,
};
use escrow_types::models::{Amount, Role, TransactionStatus};

use crate::auth::user_summary;
use crate::error::{ApiError, blocking};
use crate::lifecycle::to_response;
use crate::middleware::Caller;
use crate::state::AppState;

pub async fn list_users(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let users = blocking(move || {
        let rows = db.list_users()?;
        let users = rows
            .iter()
            .map(user_summary)
            .collect::<anyhow::Result<Vec<UserSummary>>>()?;
        Ok(users)
    })
    .await?;

    Ok(Json(users))
}

pub async fn list_transactions(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let transactions = blocking(move || {
        let rows = db.list_all_transactions()?;
        let transactions = rows
            .into_iter()
            .map(|row| {
                Ok(AdminTransaction {
                    transaction: to_response(&row.transaction)?,
                    buyer_username: row.buyer_username,
                    seller_username: row.seller_username,
                })
            })
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok(transactions)
    })
    .await?;

    Ok(Json(transactions))
}

pub async fn system_stats(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let stats = blocking(move || Ok(db.stats()?)).await?;

    let users = stats
        .users_by_role
        .into_iter()
        .map(|(role, count)| {
            Ok(RoleCount {
                role: role.parse()?,
                count: count as u64,
            })
        })
        .collect::<anyhow::Result<Vec<_>>>()?;
    let transactions = stats
        .transactions_by_status
        .into_iter()
        .map(|(status, count)| {
            Ok(StatusCount {
                status: status.parse()?,
                count: count as u64,
            })
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    Ok(Json(SystemStats {
        users,
        transactions,
        total_amount: Amount::from_cents(stats.total_amount_cents),
    }))
}

/// PUT /api/admin/users/{id}/role
pub async fn update_user_role(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateRoleRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let role: Role = req
        .role
        .parse()
        .map_err(|e: escrow_types::models::UnknownRole| ApiError::Validation(e.to_string()))?;

    let db = state.db.clone();
    let updated = blocking(move || Ok(db.update_user_role(&id.to_string(), role)?)).await?;
    if !updated {
        return Err(ApiError::NotFound("User"));
    }

    info!("User {} role set to {}", id, role);
    Ok(Json(MessageResponse::new(format!(
        "User role updated to {} successfully",
        role
    ))))
}

/// DELETE /api/admin/users/{id}. Cascades to the user's transactions and reset codes.
pub async fn delete_user(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Extension(caller): Extension<Caller>,
) -> Result<impl IntoResponse, ApiError> {
    if id == caller.id {
        return Err(ApiError::Validation("Admins cannot delete their own account".into()));
    }

    let db = state.db.clone();
    let deleted = blocking(move || Ok(db.delete_user(&id.to_string())?)).await?;
    if !deleted {
        return Err(ApiError::NotFound("User"));
    }

    info!("User {} deleted by admin {}", id, caller.id);
    Ok(Json(MessageResponse::new("User deleted successfully")))
}

/// PUT /api/admin/transactions/{id}/status. Manual override.
pub async fn override_transaction_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Extension(caller): Extension<Caller>,
    Json(req): Json<UpdateStatusRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let status: TransactionStatus = req
        .status
        .parse()
        .map_err(|e: escrow_types::models::UnknownStatus| ApiError::Validation(e.to_string()))?;

    let transition = state.transactions.override_status(id, status).await?;
    info!("Admin {} set transaction {} to {}", caller.id, id, status);
    Ok(Json(transition.transaction().clone()))
}
