use axum::{
    Extension, Form, Json,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
};

use escrow_types::api::{InitiatePaymentRequest, InitiatePaymentResponse, PaymentReturnQuery};

use crate::error::ApiError;
use crate::middleware::Caller;
use crate::payfast::encode_value;
use crate::state::AppState;

/// POST /api/payfast/initiate
pub async fn initiate_payment(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Json(req): Json<InitiatePaymentRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let redirect_url = state
        .payments
        .initiate(&caller, req.transaction_id, req.buyer_email.as_deref())
        .await?;

    Ok(Json(InitiatePaymentResponse {
        message: "Payment initiated".into(),
        transaction_id: req.transaction_id,
        redirect_url,
    }))
}

/// POST /api/payfast/notify. Called by the processor, unauthenticated.
/// A non-200 answer makes the processor retry on its own schedule.
pub async fn handle_notify(
    State(state): State<AppState>,
    Form(payload): Form<Vec<(String, String)>>,
) -> Response {
    match state.payments.handle_notify(&payload).await {
        Ok(_) => (StatusCode::OK, "OK").into_response(),
        Err(ApiError::VerificationFailed | ApiError::Validation(_)) => {
            (StatusCode::BAD_REQUEST, "Invalid ITN").into_response()
        }
        Err(e) => e.into_response(),
    }
}

/// GET /api/payfast/return. The browser lands here after paying. Display only;
/// the notification is what moves the transaction.
pub async fn payment_return(
    State(state): State<AppState>,
    Query(query): Query<PaymentReturnQuery>,
) -> Redirect {
    let id = query.m_payment_id.unwrap_or_default();
    Redirect::to(&format!(
        "{}/success?transaction_id={}",
        state.frontend_url,
        encode_value(&id)
    ))
}

/// GET /api/payfast/cancel
pub async fn payment_cancel(State(state): State<AppState>) -> Redirect {
    Redirect::to(&format!("{}/cancelled", state.frontend_url))
}
