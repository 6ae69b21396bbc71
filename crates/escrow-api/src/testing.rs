//! Test doubles shared by the unit tests in this crate.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::Notify;
use uuid::Uuid;

use escrow_db::Database;
use escrow_db::models::format_timestamp;
use escrow_notify::otp::OtpSink;
use escrow_types::models::Role;

use crate::clock::Clock;
use crate::credentials::hash_secret;
use crate::payfast::ItnValidator;

pub struct ManualClock(Mutex<DateTime<Utc>>);

impl ManualClock {
    pub fn new() -> Arc<Self> {
        Arc::new(Self(Mutex::new(Utc::now())))
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.0.lock().unwrap();
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.0.lock().unwrap()
    }
}

/// Records every delivered code instead of sending it anywhere.
#[derive(Default)]
pub struct CapturingSink {
    sent: Mutex<Vec<(String, String)>>,
    delivered: Notify,
}

impl CapturingSink {
    /// Latest code once at least `deliveries` have arrived. Delivery runs on
    /// its own task, so callers wait for it here.
    pub async fn code_after(&self, deliveries: usize) -> String {
        let wait = async {
            loop {
                let notified = self.delivered.notified();
                if let Some(code) = self.latest_if(deliveries) {
                    return code;
                }
                notified.await;
            }
        };
        tokio::time::timeout(std::time::Duration::from_secs(5), wait)
            .await
            .expect("reset code was never delivered")
    }

    fn latest_if(&self, deliveries: usize) -> Option<String> {
        let sent = self.sent.lock().unwrap();
        (sent.len() >= deliveries)
            .then(|| sent.last().map(|(_, code)| code.clone()))
            .flatten()
    }

    pub fn count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl OtpSink for CapturingSink {
    async fn deliver(&self, email: &str, code: &str, _ttl_secs: u64) -> anyhow::Result<()> {
        self.sent.lock().unwrap().push((email.to_string(), code.to_string()));
        self.delivered.notify_waiters();
        Ok(())
    }
}

/// Answers every validation request with a fixed verdict and counts calls.
pub struct ScriptedValidator {
    verdict: bool,
    calls: AtomicUsize,
}

impl ScriptedValidator {
    pub fn valid() -> Arc<Self> {
        Arc::new(Self {
            verdict: true,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn invalid() -> Arc<Self> {
        Arc::new(Self {
            verdict: false,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ItnValidator for ScriptedValidator {
    async fn validate(&self, _payload: &[(String, String)]) -> anyhow::Result<bool> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.verdict)
    }
}

pub const TEST_PASSWORD: &str = "old-password";

pub fn seed_user(db: &Database, username: &str, role: Role) -> Uuid {
    let id = Uuid::new_v4();
    db.create_user(
        &id.to_string(),
        username,
        &format!("{}@example.com", username),
        &hash_secret(TEST_PASSWORD).unwrap(),
        role,
        &format_timestamp(Utc::now()),
    )
    .unwrap();
    id
}
