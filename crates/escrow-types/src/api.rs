use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Amount, Role, TransactionStatus};

// -- JWT Claims --

/// Bearer token claims. The role is a snapshot at issue time; the auth
/// middleware reloads the current role from the database on every request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub username: String,
    pub role: Role,
    pub exp: usize,
}

// -- Auth --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct UserSummary {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub message: String,
    pub user: UserSummary,
    pub token: String,
}

// -- Password reset --

#[derive(Debug, Deserialize)]
pub struct ForgotPasswordRequest {
    pub email: String,
}

#[derive(Debug, Serialize)]
pub struct ForgotPasswordResponse {
    pub message: String,
    /// Only populated outside production so the flow can be exercised locally.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug_code: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ResetPasswordRequest {
    pub email: String,
    pub code: String,
    #[serde(rename = "newPassword")]
    pub new_password: String,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

// -- Transactions --

#[derive(Debug, Deserialize)]
pub struct CreateTransactionRequest {
    #[serde(rename = "sellerId")]
    pub seller_id: Uuid,
    pub amount: Amount,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TransactionResponse {
    pub id: Uuid,
    pub buyer_id: Uuid,
    pub seller_id: Uuid,
    pub amount: Amount,
    pub description: String,
    pub status: TransactionStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct CreateTransactionResponse {
    pub msg: String,
    pub transaction: TransactionResponse,
}

// -- Payments --

#[derive(Debug, Deserialize)]
pub struct InitiatePaymentRequest {
    #[serde(rename = "transactionId")]
    pub transaction_id: Uuid,
    pub buyer_email: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct InitiatePaymentResponse {
    pub message: String,
    pub transaction_id: Uuid,
    #[serde(rename = "redirectUrl")]
    pub redirect_url: String,
}

#[derive(Debug, Deserialize)]
pub struct PaymentReturnQuery {
    pub m_payment_id: Option<String>,
}

// -- Admin --

#[derive(Debug, Deserialize)]
pub struct UpdateRoleRequest {
    pub role: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: String,
}

#[derive(Debug, Serialize)]
pub struct AdminTransaction {
    #[serde(flatten)]
    pub transaction: TransactionResponse,
    pub buyer_username: Option<String>,
    pub seller_username: Option<String>,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct RoleCount {
    pub role: Role,
    pub count: u64,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct StatusCount {
    pub status: TransactionStatus,
    pub count: u64,
}

#[derive(Debug, Serialize)]
pub struct SystemStats {
    pub users: Vec<RoleCount>,
    pub transactions: Vec<StatusCount>,
    #[serde(rename = "totalAmount")]
    pub total_amount: Amount,
}
