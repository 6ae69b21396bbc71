//! Payment Reconciliation Gateway: signed redirects out, verified
//! notifications in, status transitions applied through the lifecycle manager.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use escrow_types::models::{Amount, TransactionStatus};

use crate::error::ApiError;
use crate::lifecycle::{Transition, TransactionManager};
use crate::middleware::Caller;
use crate::payfast::{ItnValidator, PayFastConfig, field, payment_url};

/// What a verified notification did to its transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifyOutcome {
    Applied(TransactionStatus),
    Unchanged(TransactionStatus),
    /// Authentic, but nothing to do (intermediate status, or the
    /// transaction already reached a conflicting terminal state).
    Ignored,
}

#[derive(Clone)]
pub struct PaymentGateway {
    config: Arc<PayFastConfig>,
    validator: Arc<dyn ItnValidator>,
    transactions: TransactionManager,
    /// Hold funds in `pending_delivery` after payment instead of completing.
    hold_funds: bool,
}

impl PaymentGateway {
    pub fn new(
        config: PayFastConfig,
        validator: Arc<dyn ItnValidator>,
        transactions: TransactionManager,
        hold_funds: bool,
    ) -> Self {
        Self {
            config: Arc::new(config),
            validator,
            transactions,
            hold_funds,
        }
    }

    /// Build the processor redirect for a transaction the caller is buying.
    /// Amount and description always come from the stored transaction.
    pub async fn initiate(
        &self,
        caller: &Caller,
        transaction_id: Uuid,
        buyer_email: Option<&str>,
    ) -> Result<String, ApiError> {
        let transaction = self.transactions.get(transaction_id).await?;
        if transaction.buyer_id != caller.id {
            warn!("User {} tried to pay for transaction {}", caller.id, transaction_id);
            return Err(ApiError::Forbidden);
        }
        if transaction.status != TransactionStatus::PendingPayment {
            return Err(ApiError::Conflict("Transaction is not awaiting payment".into()));
        }

        let email = buyer_email
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .unwrap_or(caller.email.as_str());
        let item_name = if transaction.description.is_empty() {
            "Escrow transaction".to_string()
        } else {
            transaction.description.clone()
        };

        let params = BTreeMap::from([
            ("merchant_id", self.config.merchant_id.clone()),
            ("merchant_key", self.config.merchant_key.clone()),
            ("return_url", self.config.return_url.clone()),
            ("cancel_url", self.config.cancel_url.clone()),
            ("notify_url", self.config.notify_url.clone()),
            ("name_first", caller.username.clone()),
            ("email_address", email.to_string()),
            ("m_payment_id", transaction.id.to_string()),
            ("amount", transaction.amount.to_string()),
            ("item_name", item_name),
        ]);

        info!("Payment initiated for transaction {}", transaction.id);
        Ok(payment_url(&self.config, &params))
    }

    /// Handle an asynchronous notification. Nothing in the payload is
    /// trusted until the processor confirms it; replays are no-ops.
    pub async fn handle_notify(&self, payload: &[(String, String)]) -> Result<NotifyOutcome, ApiError> {
        let claimed_id = field(payload, "m_payment_id").unwrap_or_default().to_string();

        match self.validator.validate(payload).await {
            Ok(true) => {}
            Ok(false) => {
                warn!("ITN verification failed for payment id {:?}", claimed_id);
                return Err(ApiError::VerificationFailed);
            }
            Err(e) => {
                warn!("ITN verification call failed for payment id {:?}: {:#}", claimed_id, e);
                return Err(ApiError::VerificationFailed);
            }
        }

        let Ok(transaction_id) = claimed_id.parse::<Uuid>() else {
            warn!("Verified ITN carries unusable payment id {:?}", claimed_id);
            return Err(ApiError::VerificationFailed);
        };

        let transaction = match self.transactions.get(transaction_id).await {
            Ok(t) => t,
            Err(ApiError::NotFound(_)) => {
                warn!("Verified ITN for unknown transaction {}", transaction_id);
                return Err(ApiError::VerificationFailed);
            }
            Err(e) => return Err(e),
        };

        let paid = field(payload, "amount_gross").and_then(|a| a.parse::<Amount>().ok());
        if paid != Some(transaction.amount) {
            warn!(
                "ITN amount mismatch for transaction {}: expected {}, got {:?}",
                transaction_id,
                transaction.amount,
                field(payload, "amount_gross")
            );
            return Err(ApiError::VerificationFailed);
        }

        let status = field(payload, "payment_status").unwrap_or_default().trim();
        let result = if status.eq_ignore_ascii_case("COMPLETE") {
            if self.hold_funds {
                self.transactions.mark_paid(transaction_id).await
            } else {
                self.transactions.mark_payment_completed(transaction_id).await
            }
        } else if status.eq_ignore_ascii_case("FAILED") || status.eq_ignore_ascii_case("CANCELLED") {
            self.transactions.mark_failed(transaction_id).await
        } else {
            info!("Ignoring ITN status {:?} for transaction {}", status, transaction_id);
            return Ok(NotifyOutcome::Ignored);
        };

        match result {
            Ok(Transition::Applied(t)) => {
                info!("Transaction {} marked {} by ITN", t.id, t.status);
                Ok(NotifyOutcome::Applied(t.status))
            }
            Ok(Transition::Unchanged(t)) => {
                info!("Duplicate ITN for transaction {} ({})", t.id, t.status);
                Ok(NotifyOutcome::Unchanged(t.status))
            }
            Err(ApiError::InvalidTransition { from, to }) => {
                warn!(
                    "ITN for transaction {} wants {} but it is already {}",
                    transaction_id, to, from
                );
                Ok(NotifyOutcome::Ignored)
            }
            Err(e) => Err(e),
        }
    }
}
