use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::Amount;

/// Dashboard notifications pushed to transaction participants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum EscrowEvent {
    /// A buyer opened a transaction with this seller
    TransactionCreated {
        transaction_id: Uuid,
        buyer_id: Uuid,
        seller_id: Uuid,
        amount: Amount,
    },

    /// The processor confirmed payment for the transaction
    PaymentReceived {
        transaction_id: Uuid,
        seller_id: Uuid,
        amount: Amount,
    },

    /// The processor reported a failed or cancelled payment
    PaymentFailed {
        transaction_id: Uuid,
        seller_id: Uuid,
    },

    /// The buyer confirmed delivery and the funds are released
    DeliveryConfirmed {
        transaction_id: Uuid,
        seller_id: Uuid,
    },
}

impl EscrowEvent {
    /// The user this notification is addressed to.
    pub fn recipient(&self) -> Uuid {
        match self {
            Self::TransactionCreated { seller_id, .. }
            | Self::PaymentReceived { seller_id, .. }
            | Self::PaymentFailed { seller_id, .. }
            | Self::DeliveryConfirmed { seller_id, .. } => *seller_id,
        }
    }

    pub fn transaction_id(&self) -> Uuid {
        match self {
            Self::TransactionCreated { transaction_id, .. }
            | Self::PaymentReceived { transaction_id, .. }
            | Self::PaymentFailed { transaction_id, .. }
            | Self::DeliveryConfirmed { transaction_id, .. } => *transaction_id,
        }
    }
}
