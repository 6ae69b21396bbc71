use std::sync::Arc;

use escrow_db::Database;
use escrow_notify::dispatcher::Dispatcher;

use crate::clock::Clock;
use crate::gateway::PaymentGateway;
use crate::lifecycle::TransactionManager;
use crate::password_reset::PasswordResetEngine;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub clock: Arc<dyn Clock>,
    pub jwt_secret: String,
    pub token_ttl: chrono::Duration,
    pub dispatcher: Dispatcher,
    pub resets: PasswordResetEngine,
    pub transactions: TransactionManager,
    pub payments: PaymentGateway,
    /// Browser-facing app that the processor's return/cancel redirects land on.
    pub frontend_url: String,
}
