//! Password Reset Engine: issues, verifies and retires one-time codes.

use std::sync::{Arc, LazyLock};

use chrono::Duration;
use rand::Rng;
use tracing::{error, info, warn};
use uuid::Uuid;

use escrow_db::Database;
use escrow_db::models::{format_timestamp, parse_timestamp};
use escrow_notify::otp::OtpSink;

use crate::auth::{MIN_PASSWORD_LEN, normalize_email};
use crate::clock::Clock;
use crate::credentials::{hash_secret, verify_secret};
use crate::error::{ApiError, blocking};

/// Wrong guesses allowed against a single code before it is burned.
const MAX_ATTEMPTS: u32 = 5;

/// Stand-in hash verified when there is no live code to check against.
static DUMMY_CODE_HASH: LazyLock<Option<String>> =
    LazyLock::new(|| hash_secret("no-active-reset-code").ok());

fn dummy_code_hash() -> Result<&'static str, ApiError> {
    DUMMY_CODE_HASH
        .as_deref()
        .ok_or_else(|| ApiError::Internal(anyhow::anyhow!("Failed to prepare dummy reset hash")))
}

#[derive(Debug, Clone)]
pub struct ResetConfig {
    pub ttl: Duration,
    pub code_length: u32,
    /// Return the code in the response. Never enabled in production.
    pub expose_code: bool,
}

impl Default for ResetConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::seconds(60),
            code_length: 6,
            expose_code: false,
        }
    }
}

/// Outcome of a reset request. Identical for known and unknown emails
/// apart from `debug_code`.
#[derive(Debug)]
pub struct ResetRequested {
    pub debug_code: Option<String>,
}

#[derive(Clone)]
pub struct PasswordResetEngine {
    db: Arc<Database>,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn OtpSink>,
    config: ResetConfig,
}

/// Uniform numeric code of exactly `length` digits. `rand::rng()` is a
/// CSPRNG reseeded from the operating system.
pub fn generate_code(length: u32) -> String {
    let upper = 10u64.pow(length);
    let n = rand::rng().random_range(0..upper);
    format!("{:0width$}", n, width = length as usize)
}

impl PasswordResetEngine {
    pub fn new(
        db: Arc<Database>,
        clock: Arc<dyn Clock>,
        sink: Arc<dyn OtpSink>,
        config: ResetConfig,
    ) -> Self {
        Self {
            db,
            clock,
            sink,
            config,
        }
    }

    pub async fn request_reset(&self, email: &str) -> Result<ResetRequested, ApiError> {
        let email = normalize_email(email);
        if email.is_empty() {
            return Err(ApiError::Validation("Email is required".into()));
        }

        let code = generate_code(self.config.code_length);
        let now = self.clock.now();
        let expires_at = now + self.config.ttl;

        let db = self.db.clone();
        let lookup_email = email.clone();
        let hashed_code = code.clone();
        let user_id = blocking(move || {
            // Hash even on a miss so both paths cost the same
            let otp_hash = hash_secret(&hashed_code)?;
            let Some(user) = db.get_user_by_email(&lookup_email)? else {
                return Ok(None);
            };
            db.replace_reset_token(
                &Uuid::new_v4().to_string(),
                &user.id,
                &otp_hash,
                &format_timestamp(expires_at),
                &format_timestamp(now),
            )?;
            Ok(Some(user.id))
        })
        .await?;

        let Some(user_id) = user_id else {
            info!("Password reset requested for an unknown account");
            return Ok(ResetRequested { debug_code: None });
        };
        info!("Password reset code issued for user {}", user_id);

        // Delivery stays off the response path so its latency can't reveal
        // which emails have accounts
        let sink = self.sink.clone();
        let delivered_code = code.clone();
        let ttl_secs = self.config.ttl.num_seconds().max(0) as u64;
        tokio::spawn(async move {
            if let Err(e) = sink.deliver(&email, &delivered_code, ttl_secs).await {
                error!("Failed to deliver reset code for user {}: {:#}", user_id, e);
            }
        });

        Ok(ResetRequested {
            debug_code: self.config.expose_code.then_some(code),
        })
    }

    pub async fn reset_password(
        &self,
        email: &str,
        code: &str,
        new_password: &str,
    ) -> Result<(), ApiError> {
        if new_password.len() < MIN_PASSWORD_LEN {
            return Err(ApiError::Validation(format!(
                "Password must be at least {} characters",
                MIN_PASSWORD_LEN
            )));
        }

        let email = normalize_email(email);
        let code = code.trim().to_string();
        let new_password = new_password.to_string();
        let now = self.clock.now();
        let db = self.db.clone();

        let user_id = blocking(move || {
            let user = db.get_user_by_email(&email)?;
            let token = match &user {
                Some(user) => db.get_unused_reset_token(&user.id)?,
                None => None,
            };

            // Always pay for one verification, token or not
            let stored_hash = match &token {
                Some(token) => token.otp_hash.as_str(),
                None => dummy_code_hash()?,
            };
            let code_matches = verify_secret(&code, stored_hash)?;

            let user = user.ok_or(ApiError::NotFound("User"))?;
            let token = token.ok_or(ApiError::NoActiveToken)?;

            if now >= parse_timestamp(&token.expires_at)? {
                return Err(ApiError::Expired);
            }

            if !code_matches {
                db.record_failed_reset_attempt(&token.id, MAX_ATTEMPTS)?;
                return Err(ApiError::InvalidCode);
            }

            let password_hash = hash_secret(&new_password)?;
            // A concurrent redemption of the same code loses here
            if !db.redeem_reset_token(&token.id, &user.id, &password_hash)? {
                return Err(ApiError::NoActiveToken);
            }
            Ok(user.id)
        })
        .await
        .inspect_err(|e| {
            if !matches!(e, ApiError::Internal(_)) {
                warn!("Password reset rejected: {}", e);
            }
        })?;

        info!("Password reset completed for user {}", user_id);
        Ok(())
    }
}
