use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use chrono::{DateTime, Utc};
use jsonwebtoken::{EncodingKey, Header, encode};
use tracing::{info, warn};
use uuid::Uuid;

use escrow_db::Database;
use escrow_db::models::{UserRow, format_timestamp, parse_timestamp};
use escrow_db::queries::is_unique_violation;
use escrow_types::api::{
    AuthResponse, Claims, ForgotPasswordRequest, ForgotPasswordResponse, LoginRequest,
    MessageResponse, RegisterRequest, ResetPasswordRequest, UserSummary,
};
use escrow_types::models::Role;

use crate::credentials::{hash_secret, verify_secret};
use crate::error::{ApiError, blocking};
use crate::state::AppState;

pub const MIN_PASSWORD_LEN: usize = 8;

pub fn normalize_email(email: &str) -> String {
    email.trim().to_ascii_lowercase()
}

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let username = req.username.trim().to_string();
    let email = normalize_email(&req.email);

    // Validate input
    if username.len() < 3 || username.len() > 50 {
        return Err(ApiError::Validation("Username must be 3-50 characters".into()));
    }
    if !email.contains('@') || email.len() > 100 {
        return Err(ApiError::Validation("A valid email is required".into()));
    }
    if req.password.len() < MIN_PASSWORD_LEN {
        return Err(ApiError::Validation(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }

    let db = state.db.clone();
    let created_at = format_timestamp(state.clock.now());
    let user = blocking(move || {
        create_user_checked(&db, &username, &email, &req.password, Role::User, &created_at)
    })
    .await?;

    info!("User {} registered", user.id);
    let token = create_token(&state, &user)?;

    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            message: "User registered successfully".into(),
            user,
            token,
        }),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let email = normalize_email(&req.email);
    let db = state.db.clone();

    let user = blocking(move || {
        let user = db
            .get_user_by_email(&email)?
            .ok_or(ApiError::Authentication("Invalid credentials"))?;

        // Verify password
        if !verify_secret(&req.password, &user.password)? {
            return Err(ApiError::Authentication("Invalid credentials"));
        }
        Ok(user_summary(&user)?)
    })
    .await?;

    let token = create_token(&state, &user)?;

    Ok(Json(AuthResponse {
        message: "Login successful".into(),
        user,
        token,
    }))
}

pub async fn forgot_password(
    State(state): State<AppState>,
    Json(req): Json<ForgotPasswordRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let outcome = state.resets.request_reset(&req.email).await?;

    Ok(Json(ForgotPasswordResponse {
        message: "If the email exists, a reset code has been sent".into(),
        debug_code: outcome.debug_code,
    }))
}

pub async fn reset_password(
    State(state): State<AppState>,
    Json(req): Json<ResetPasswordRequest>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .resets
        .reset_password(&req.email, &req.code, &req.new_password)
        .await
        .map_err(|e| match e {
            // Don't reveal which emails have accounts
            ApiError::NotFound(_) => ApiError::InvalidCode,
            other => other,
        })?;

    Ok(Json(MessageResponse::new("Password reset successfully")))
}

/// Create the configured admin account unless that email is already taken.
pub fn bootstrap_admin(db: &Database, email: &str, password: &str, now: DateTime<Utc>) -> anyhow::Result<()> {
    if password.len() < MIN_PASSWORD_LEN {
        anyhow::bail!("Admin password must be at least {} characters", MIN_PASSWORD_LEN);
    }
    let email = normalize_email(email);
    if db.get_user_by_email(&email)?.is_some() {
        return Ok(());
    }
    let username = email.split('@').next().unwrap_or("admin").to_string();
    match create_user_checked(db, &username, &email, password, Role::Admin, &format_timestamp(now)) {
        Ok(user) => {
            info!("Bootstrapped admin account {}", user.id);
            Ok(())
        }
        Err(ApiError::Internal(e)) => Err(e),
        Err(e) => {
            warn!("Admin bootstrap skipped: {}", e);
            Ok(())
        }
    }
}

fn create_user_checked(
    db: &Database,
    username: &str,
    email: &str,
    password: &str,
    role: Role,
    created_at: &str,
) -> Result<UserSummary, ApiError> {
    if db.get_user_by_email(email)?.is_some() {
        return Err(ApiError::Conflict("User already exists".into()));
    }
    if db.get_user_by_username(username)?.is_some() {
        return Err(ApiError::Conflict("Username already taken".into()));
    }

    // Hash password with Argon2id
    let password_hash = hash_secret(password)?;
    let id = Uuid::new_v4();

    match db.create_user(&id.to_string(), username, email, &password_hash, role, created_at) {
        Ok(()) => {}
        // Lost a race with a concurrent registration
        Err(e) if is_unique_violation(&e) => {
            return Err(ApiError::Conflict("User already exists".into()));
        }
        Err(e) => return Err(e.into()),
    }

    Ok(UserSummary {
        id,
        username: username.to_string(),
        email: email.to_string(),
        role,
        created_at: parse_timestamp(created_at)?,
    })
}

pub(crate) fn user_summary(row: &UserRow) -> anyhow::Result<UserSummary> {
    Ok(UserSummary {
        id: row.id.parse()?,
        username: row.username.clone(),
        email: row.email.clone(),
        role: row.role.parse()?,
        created_at: parse_timestamp(&row.created_at)?,
    })
}

fn create_token(state: &AppState, user: &UserSummary) -> anyhow::Result<String> {
    let claims = Claims {
        sub: user.id,
        username: user.username.clone(),
        role: user.role,
        exp: (state.clock.now() + state.token_ttl).timestamp() as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(state.jwt_secret.as_bytes()),
    )?;

    Ok(token)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emails_are_trimmed_and_lowercased() {
        assert_eq!(normalize_email("  Riley@Example.COM "), "riley@example.com");
    }

    #[test]
    fn bootstrap_admin_runs_once() {
        let db = Database::open_in_memory().unwrap();
        bootstrap_admin(&db, "Ops@Example.com", "long-enough", Utc::now()).unwrap();
        bootstrap_admin(&db, "ops@example.com", "different-pass", Utc::now()).unwrap();

        let users = db.list_users().unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].role, "admin");
        assert_eq!(users[0].username, "ops");
        assert!(verify_secret("long-enough", &users[0].password).unwrap());
    }

    #[test]
    fn bootstrap_admin_yields_to_a_taken_username() {
        let db = Database::open_in_memory().unwrap();
        crate::testing::seed_user(&db, "ops", Role::User);
        bootstrap_admin(&db, "ops@elsewhere.com", "long-enough", Utc::now()).unwrap();
        assert!(db.get_user_by_email("ops@elsewhere.com").unwrap().is_none());
    }

    #[test]
    fn bootstrap_admin_refuses_a_short_password() {
        let db = Database::open_in_memory().unwrap();
        assert!(bootstrap_admin(&db, "ops@example.com", "short", Utc::now()).is_err());
        assert!(db.list_users().unwrap().is_empty());
    }
}
