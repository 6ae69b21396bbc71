use axum::{
    Extension,
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{DecodingKey, Validation, decode};
use tracing::warn;
use uuid::Uuid;

use escrow_types::api::Claims;
use escrow_types::models::Role;

use crate::error::{ApiError, blocking};
use crate::state::AppState;

/// The authenticated user, with the role as currently stored.
#[derive(Debug, Clone)]
pub struct Caller {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub role: Role,
}

pub fn decode_token(token: &str, secret: &str) -> Result<Claims, ApiError> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|_| ApiError::Authentication("Invalid or expired token"))
}

/// Extract and validate the bearer token, then reload the user so a deleted
/// account or a changed role takes effect immediately.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or(ApiError::Authentication("Authentication token is required"))?;

    let claims = decode_token(token, &state.jwt_secret)?;
    let caller = load_caller(&state, claims.sub).await?;

    req.extensions_mut().insert(caller);
    Ok(next.run(req).await)
}

/// Current record for a token's subject. Fails once the account is gone.
pub async fn load_caller(state: &AppState, user_id: Uuid) -> Result<Caller, ApiError> {
    let db = state.db.clone();
    let user = blocking(move || Ok(db.get_user_by_id(&user_id.to_string())?))
        .await?
        .ok_or(ApiError::Authentication("User no longer exists"))?;

    Ok(Caller {
        id: user.id.parse().map_err(anyhow::Error::from)?,
        role: user.role.parse().map_err(anyhow::Error::from)?,
        username: user.username,
        email: user.email,
    })
}

/// Must run inside `require_auth`.
pub async fn require_admin(
    Extension(caller): Extension<Caller>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if caller.role != Role::Admin {
        warn!("User {} denied admin access", caller.id);
        return Err(ApiError::Forbidden);
    }
    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{EncodingKey, Header, encode};

    fn token(secret: &str, exp: i64) -> String {
        let claims = Claims {
            sub: Uuid::new_v4(),
            username: "riley".into(),
            role: Role::User,
            exp: exp as usize,
        };
        encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_bytes())).unwrap()
    }

    #[test]
    fn valid_token_decodes() {
        let exp = (chrono::Utc::now() + chrono::Duration::hours(1)).timestamp();
        let claims = decode_token(&token("s3cret", exp), "s3cret").unwrap();
        assert_eq!(claims.username, "riley");
        assert_eq!(claims.role, Role::User);
    }

    #[test]
    fn wrong_secret_or_expiry_is_rejected() {
        let exp = (chrono::Utc::now() + chrono::Duration::hours(1)).timestamp();
        assert!(matches!(
            decode_token(&token("s3cret", exp), "other"),
            Err(ApiError::Authentication(_))
        ));

        let past = (chrono::Utc::now() - chrono::Duration::hours(1)).timestamp();
        assert!(matches!(
            decode_token(&token("s3cret", past), "s3cret"),
            Err(ApiError::Authentication(_))
        ));
    }
}
