use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, bail};

use escrow_api::auth::MIN_PASSWORD_LEN;
use escrow_api::password_reset::ResetConfig;
use escrow_api::payfast::{PayFastConfig, SANDBOX_PROCESS_URL, SANDBOX_VALIDATE_URL};

/// Placeholder JWT secrets that MUST NOT be used.
const PLACEHOLDER_SECRETS: &[&str] = &[
    "change-me-to-a-random-string",
    "dev-secret-change-me",
    "your_jwt_secret",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub addr: SocketAddr,
    pub db_path: PathBuf,
    pub jwt_secret: String,
    pub token_ttl_hours: i64,
    pub environment: Environment,
    pub reset: ResetConfig,
    pub mail_relay_url: Option<String>,
    pub payfast: PayFastConfig,
    pub frontend_url: String,
    pub hold_funds: bool,
    /// Bootstrap admin account (email, password).
    pub admin: Option<(String, String)>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let jwt_secret = var("ESCROW_JWT_SECRET").unwrap_or_default();
        if jwt_secret.is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            bail!("ESCROW_JWT_SECRET is unset or still a placeholder");
        }

        let host = var("ESCROW_HOST").unwrap_or_else(|| "0.0.0.0".into());
        let port: u16 = parse_or(&var, "ESCROW_PORT", 5000)?;
        let addr: SocketAddr = format!("{}:{}", host, port)
            .parse()
            .with_context(|| format!("invalid listen address {}:{}", host, port))?;

        let environment = match var("ESCROW_ENV").as_deref() {
            None | Some("development") => Environment::Development,
            Some("production") => Environment::Production,
            Some(other) => bail!("ESCROW_ENV must be development or production, got {:?}", other),
        };

        let code_length: u32 = parse_or(&var, "OTP_LENGTH", 6)?;
        if !(4..=9).contains(&code_length) {
            bail!("OTP_LENGTH must be between 4 and 9, got {}", code_length);
        }
        let otp_ttl: i64 = parse_or(&var, "OTP_TTL_SECONDS", 60)?;
        if otp_ttl <= 0 {
            bail!("OTP_TTL_SECONDS must be positive");
        }

        let token_ttl_hours: i64 = parse_or(&var, "ESCROW_TOKEN_TTL_HOURS", 24)?;
        if token_ttl_hours <= 0 {
            bail!("ESCROW_TOKEN_TTL_HOURS must be positive");
        }

        let payfast = PayFastConfig {
            merchant_id: var("PAYFAST_MERCHANT_ID").unwrap_or_default(),
            merchant_key: var("PAYFAST_MERCHANT_KEY").unwrap_or_default(),
            passphrase: var("PAYFAST_PASSPHRASE"),
            return_url: var("PAYFAST_RETURN_URL").unwrap_or_default(),
            cancel_url: var("PAYFAST_CANCEL_URL").unwrap_or_default(),
            notify_url: var("PAYFAST_NOTIFY_URL").unwrap_or_default(),
            process_url: var("PAYFAST_PROCESS_URL").unwrap_or_else(|| SANDBOX_PROCESS_URL.into()),
            validate_url: var("PAYFAST_VALIDATE_URL")
                .unwrap_or_else(|| SANDBOX_VALIDATE_URL.into()),
            validate_timeout: Duration::from_secs(parse_or(&var, "PAYFAST_VALIDATE_TIMEOUT_SECS", 10)?),
        };

        let admin = match (var("ESCROW_ADMIN_EMAIL"), var("ESCROW_ADMIN_PASSWORD")) {
            (Some(_), Some(password)) if password.len() < MIN_PASSWORD_LEN => {
                bail!("ESCROW_ADMIN_PASSWORD must be at least {} characters", MIN_PASSWORD_LEN)
            }
            (Some(email), Some(password)) => Some((email, password)),
            (None, None) => None,
            _ => bail!("ESCROW_ADMIN_EMAIL and ESCROW_ADMIN_PASSWORD must be set together"),
        };

        Ok(Self {
            addr,
            db_path: var("ESCROW_DB_PATH").unwrap_or_else(|| "escrow.db".into()).into(),
            jwt_secret,
            token_ttl_hours,
            environment,
            reset: ResetConfig {
                ttl: chrono::Duration::seconds(otp_ttl),
                code_length,
                expose_code: environment != Environment::Production,
            },
            mail_relay_url: var("ESCROW_MAIL_RELAY_URL"),
            payfast,
            frontend_url: var("ESCROW_FRONTEND_URL")
                .unwrap_or_else(|| "http://localhost:5173".into())
                .trim_end_matches('/')
                .to_string(),
            hold_funds: parse_or(&var, "ESCROW_HOLD_FUNDS", false)?,
            admin,
        })
    }
}

fn parse_or<T>(var: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match var(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{} has an invalid value {:?}", key, raw)),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(pairs: &[(&str, &str)]) -> anyhow::Result<Config> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply() {
        let config = config(&[("ESCROW_JWT_SECRET", "s3cret")]).unwrap();
        assert_eq!(config.addr.port(), 5000);
        assert_eq!(config.db_path, PathBuf::from("escrow.db"));
        assert_eq!(config.environment, Environment::Development);
        assert_eq!(config.reset.code_length, 6);
        assert_eq!(config.reset.ttl, chrono::Duration::seconds(60));
        assert!(config.reset.expose_code);
        assert!(!config.hold_funds);
        assert_eq!(config.payfast.process_url, SANDBOX_PROCESS_URL);
        assert_eq!(config.payfast.validate_timeout, Duration::from_secs(10));
        assert!(config.admin.is_none());
    }

    #[test]
    fn placeholder_secret_is_refused() {
        assert!(config(&[]).is_err());
        assert!(config(&[("ESCROW_JWT_SECRET", "dev-secret-change-me")]).is_err());
    }

    #[test]
    fn production_hides_debug_codes() {
        let config = config(&[("ESCROW_JWT_SECRET", "s3cret"), ("ESCROW_ENV", "production")]).unwrap();
        assert!(!config.reset.expose_code);
    }

    #[test]
    fn otp_length_is_bounded() {
        assert!(config(&[("ESCROW_JWT_SECRET", "s3cret"), ("OTP_LENGTH", "3")]).is_err());
        assert!(config(&[("ESCROW_JWT_SECRET", "s3cret"), ("OTP_LENGTH", "10")]).is_err());
        let config = config(&[("ESCROW_JWT_SECRET", "s3cret"), ("OTP_LENGTH", "8")]).unwrap();
        assert_eq!(config.reset.code_length, 8);
    }

    #[test]
    fn malformed_values_are_errors() {
        assert!(config(&[("ESCROW_JWT_SECRET", "s3cret"), ("ESCROW_PORT", "http")]).is_err());
        assert!(config(&[("ESCROW_JWT_SECRET", "s3cret"), ("ESCROW_HOLD_FUNDS", "maybe")]).is_err());
    }

    #[test]
    fn admin_bootstrap_needs_both_halves() {
        assert!(config(&[("ESCROW_JWT_SECRET", "s3cret"), ("ESCROW_ADMIN_EMAIL", "a@b.c")]).is_err());
        let config = config(&[
            ("ESCROW_JWT_SECRET", "s3cret"),
            ("ESCROW_ADMIN_EMAIL", "a@b.c"),
            ("ESCROW_ADMIN_PASSWORD", "long-enough"),
        ])
        .unwrap();
        assert_eq!(config.admin, Some(("a@b.c".into(), "long-enough".into())));
    }

    #[test]
    fn short_admin_password_is_refused() {
        let err = config(&[
            ("ESCROW_JWT_SECRET", "s3cret"),
            ("ESCROW_ADMIN_EMAIL", "a@b.c"),
            ("ESCROW_ADMIN_PASSWORD", "short"),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("ESCROW_ADMIN_PASSWORD"));
    }

    #[test]
    fn frontend_url_loses_trailing_slash() {
        let config = config(&[
            ("ESCROW_JWT_SECRET", "s3cret"),
            ("ESCROW_FRONTEND_URL", "https://shop.example/"),
        ])
        .unwrap();
        assert_eq!(config.frontend_url, "https://shop.example");
    }
}
