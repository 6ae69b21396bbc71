//! Transaction Lifecycle Manager: creation, participant checks, queries
//! and the guarded status transitions.

use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use escrow_db::Database;
use escrow_db::models::{TransactionRow, format_timestamp, parse_timestamp};
use escrow_notify::dispatcher::Dispatcher;
use escrow_types::api::TransactionResponse;
use escrow_types::events::EscrowEvent;
use escrow_types::models::{Amount, Role, TransactionStatus};

use crate::clock::Clock;
use crate::error::{ApiError, blocking};
use crate::middleware::Caller;

const MAX_DESCRIPTION_LEN: usize = 1000;

/// Result of a transition request that did not fail.
#[derive(Debug, Clone)]
pub enum Transition {
    /// The row moved to the requested state just now.
    Applied(TransactionResponse),
    /// The row was already at (or past) the requested state; nothing changed.
    Unchanged(TransactionResponse),
}

impl Transition {
    pub fn transaction(&self) -> &TransactionResponse {
        match self {
            Self::Applied(t) | Self::Unchanged(t) => t,
        }
    }

    pub fn applied(&self) -> bool {
        matches!(self, Self::Applied(_))
    }
}

#[derive(Clone)]
pub struct TransactionManager {
    db: Arc<Database>,
    clock: Arc<dyn Clock>,
    dispatcher: Dispatcher,
}

impl TransactionManager {
    pub fn new(db: Arc<Database>, clock: Arc<dyn Clock>, dispatcher: Dispatcher) -> Self {
        Self {
            db,
            clock,
            dispatcher,
        }
    }

    /// Open a new transaction in `pending_payment` on behalf of `buyer_id`.
    pub async fn create(
        &self,
        buyer_id: Uuid,
        seller_id: Uuid,
        amount: Amount,
        description: &str,
    ) -> Result<TransactionResponse, ApiError> {
        if !amount.is_positive() {
            return Err(ApiError::InvalidAmount);
        }
        if buyer_id == seller_id {
            return Err(ApiError::Validation(
                "Buyer and seller must be different users".into(),
            ));
        }
        let description = description.trim().to_string();
        if description.chars().count() > MAX_DESCRIPTION_LEN {
            return Err(ApiError::Validation("Description is too long".into()));
        }

        let row = TransactionRow {
            id: Uuid::new_v4().to_string(),
            buyer_id: buyer_id.to_string(),
            seller_id: seller_id.to_string(),
            amount_cents: amount.cents(),
            description,
            status: TransactionStatus::PendingPayment.as_str().to_string(),
            created_at: format_timestamp(self.clock.now()),
        };

        let db = self.db.clone();
        let row = blocking(move || {
            if db.get_user_by_id(&row.seller_id)?.is_none() {
                return Err(ApiError::InvalidParticipant);
            }
            db.insert_transaction(&row)?;
            Ok(row)
        })
        .await?;

        let transaction = to_response(&row)?;
        info!(
            "Transaction {} created: buyer {} seller {} amount {}",
            transaction.id, buyer_id, seller_id, amount
        );

        self.dispatcher
            .notify(EscrowEvent::TransactionCreated {
                transaction_id: transaction.id,
                buyer_id,
                seller_id,
                amount,
            })
            .await;

        Ok(transaction)
    }

    pub async fn get(&self, id: Uuid) -> Result<TransactionResponse, ApiError> {
        let db = self.db.clone();
        let row = blocking(move || Ok(db.get_transaction(&id.to_string())?))
            .await?
            .ok_or(ApiError::NotFound("Transaction"))?;
        Ok(to_response(&row)?)
    }

    /// Fetch a transaction the caller is a party to (or any, for admins).
    pub async fn get_for(&self, caller: &Caller, id: Uuid) -> Result<TransactionResponse, ApiError> {
        let transaction = self.get(id).await?;
        let is_party = transaction.buyer_id == caller.id || transaction.seller_id == caller.id;
        if !is_party && caller.role != Role::Admin {
            warn!("User {} denied access to transaction {}", caller.id, id);
            return Err(ApiError::Forbidden);
        }
        Ok(transaction)
    }

    pub async fn list_by_buyer(&self, buyer_id: Uuid) -> Result<Vec<TransactionResponse>, ApiError> {
        let db = self.db.clone();
        let rows = blocking(move || Ok(db.list_transactions_by_buyer(&buyer_id.to_string())?)).await?;
        rows.iter().map(|r| to_response(r).map_err(ApiError::from)).collect()
    }

    pub async fn list_by_seller(&self, seller_id: Uuid) -> Result<Vec<TransactionResponse>, ApiError> {
        let db = self.db.clone();
        let rows = blocking(move || Ok(db.list_transactions_by_seller(&seller_id.to_string())?)).await?;
        rows.iter().map(|r| to_response(r).map_err(ApiError::from)).collect()
    }

    /// Payment confirmed, funds held until delivery. Idempotent.
    pub async fn mark_paid(&self, id: Uuid) -> Result<Transition, ApiError> {
        let transition = self
            .apply(
                id,
                &[TransactionStatus::PendingPayment],
                TransactionStatus::PendingDelivery,
                &[TransactionStatus::PendingDelivery, TransactionStatus::Completed],
            )
            .await?;
        if let Transition::Applied(t) = &transition {
            self.dispatcher
                .notify(EscrowEvent::PaymentReceived {
                    transaction_id: t.id,
                    seller_id: t.seller_id,
                    amount: t.amount,
                })
                .await;
        }
        Ok(transition)
    }

    /// Payment confirmed and released in one step. Idempotent.
    pub async fn mark_payment_completed(&self, id: Uuid) -> Result<Transition, ApiError> {
        let transition = self
            .apply(
                id,
                &[TransactionStatus::PendingPayment, TransactionStatus::PendingDelivery],
                TransactionStatus::Completed,
                &[TransactionStatus::Completed],
            )
            .await?;
        if let Transition::Applied(t) = &transition {
            self.dispatcher
                .notify(EscrowEvent::PaymentReceived {
                    transaction_id: t.id,
                    seller_id: t.seller_id,
                    amount: t.amount,
                })
                .await;
        }
        Ok(transition)
    }

    /// Delivery confirmed by the buyer. Idempotent.
    pub async fn mark_completed(&self, id: Uuid) -> Result<Transition, ApiError> {
        let transition = self
            .apply(
                id,
                &[TransactionStatus::PendingDelivery],
                TransactionStatus::Completed,
                &[TransactionStatus::Completed],
            )
            .await?;
        if let Transition::Applied(t) = &transition {
            self.dispatcher
                .notify(EscrowEvent::DeliveryConfirmed {
                    transaction_id: t.id,
                    seller_id: t.seller_id,
                })
                .await;
        }
        Ok(transition)
    }

    /// Payment failed or was cancelled. Idempotent.
    pub async fn mark_failed(&self, id: Uuid) -> Result<Transition, ApiError> {
        let transition = self
            .apply(
                id,
                &[TransactionStatus::PendingPayment, TransactionStatus::PendingDelivery],
                TransactionStatus::Failed,
                &[TransactionStatus::Failed],
            )
            .await?;
        if let Transition::Applied(t) = &transition {
            self.dispatcher
                .notify(EscrowEvent::PaymentFailed {
                    transaction_id: t.id,
                    seller_id: t.seller_id,
                })
                .await;
        }
        Ok(transition)
    }

    /// Administrative override. Any non-terminal state may be moved anywhere;
    /// terminal states stay put.
    pub async fn override_status(&self, id: Uuid, to: TransactionStatus) -> Result<Transition, ApiError> {
        let from: Vec<TransactionStatus> = TransactionStatus::ALL
            .into_iter()
            .filter(|s| !s.is_terminal() && *s != to)
            .collect();

        let transition = self.apply(id, &from, to, &[to]).await?;
        if transition.applied() {
            info!("Transaction {} status overridden to {}", id, to);
        }
        Ok(transition)
    }

    /// Conditional update `from -> to`. When no row moves, re-read to tell
    /// an idempotent repeat (`already`) apart from an illegal transition.
    async fn apply(
        &self,
        id: Uuid,
        from: &[TransactionStatus],
        to: TransactionStatus,
        already: &[TransactionStatus],
    ) -> Result<Transition, ApiError> {
        let db = self.db.clone();
        let from = from.to_vec();
        let now = format_timestamp(self.clock.now());
        let tid = id.to_string();
        let (moved, row) = blocking(move || {
            let moved = db.transition_status(&tid, &from, to, &now)?;
            let row = db.get_transaction(&tid)?;
            Ok((moved, row))
        })
        .await?;

        let transaction = to_response(&row.ok_or(ApiError::NotFound("Transaction"))?)?;

        if moved {
            info!("Transaction {} moved to {}", id, to);
            return Ok(Transition::Applied(transaction));
        }
        if already.contains(&transaction.status) {
            return Ok(Transition::Unchanged(transaction));
        }
        Err(ApiError::InvalidTransition {
            from: transaction.status,
            to,
        })
    }
}

pub(crate) fn to_response(row: &TransactionRow) -> anyhow::Result<TransactionResponse> {
    Ok(TransactionResponse {
        id: row.id.parse()?,
        buyer_id: row.buyer_id.parse()?,
        seller_id: row.seller_id.parse()?,
        amount: Amount::from_cents(row.amount_cents),
        description: row.description.clone(),
        status: row.status.parse()?,
        created_at: parse_timestamp(&row.created_at)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ManualClock, seed_user};
    use chrono::Duration;

    struct Fixture {
        manager: TransactionManager,
        dispatcher: Dispatcher,
        clock: Arc<ManualClock>,
        buyer: Uuid,
        seller: Uuid,
    }

    fn fixture() -> Fixture {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let buyer = seed_user(&db, "buyer", Role::User);
        let seller = seed_user(&db, "seller", Role::Seller);
        let clock = ManualClock::new();
        let dispatcher = Dispatcher::new();
        Fixture {
            manager: TransactionManager::new(db, clock.clone(), dispatcher.clone()),
            dispatcher,
            clock,
            buyer,
            seller,
        }
    }

    fn caller(id: Uuid, role: Role) -> Caller {
        Caller {
            id,
            username: "someone".into(),
            email: "someone@example.com".into(),
            role,
        }
    }

    #[tokio::test]
    async fn create_starts_in_pending_payment() {
        let f = fixture();
        let t = f
            .manager
            .create(f.buyer, f.seller, Amount::from_cents(10_000), "  widget ")
            .await
            .unwrap();
        assert_eq!(t.status, TransactionStatus::PendingPayment);
        assert_eq!(t.buyer_id, f.buyer);
        assert_eq!(t.seller_id, f.seller);
        assert_eq!(t.description, "widget");
        assert_eq!(t.amount.to_string(), "100.00");
    }

    #[tokio::test]
    async fn create_notifies_the_seller() {
        let f = fixture();
        let (_, mut rx) = f.dispatcher.register_user_channel(f.seller).await;
        let t = f.manager.create(f.buyer, f.seller, Amount::from_cents(500), "pen").await.unwrap();
        match rx.recv().await.unwrap() {
            EscrowEvent::TransactionCreated { transaction_id, .. } => assert_eq!(transaction_id, t.id),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn unknown_seller_persists_nothing() {
        let f = fixture();
        let err = f
            .manager
            .create(f.buyer, Uuid::new_v4(), Amount::from_cents(100), "x")
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::InvalidParticipant));
        assert!(f.manager.list_by_buyer(f.buyer).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn non_positive_amounts_are_rejected() {
        let f = fixture();
        for cents in [0, -100] {
            let err = f
                .manager
                .create(f.buyer, f.seller, Amount::from_cents(cents), "x")
                .await
                .unwrap_err();
            assert!(matches!(err, ApiError::InvalidAmount));
        }
    }

    #[tokio::test]
    async fn buyer_cannot_sell_to_themself() {
        let f = fixture();
        let err = f
            .manager
            .create(f.buyer, f.buyer, Amount::from_cents(100), "x")
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
    }

    #[tokio::test]
    async fn mark_paid_is_idempotent() {
        let f = fixture();
        let mut events = f.dispatcher.subscribe();
        let t = f.manager.create(f.buyer, f.seller, Amount::from_cents(100), "x").await.unwrap();
        let _created = events.recv().await.unwrap();

        let first = f.manager.mark_paid(t.id).await.unwrap();
        let second = f.manager.mark_paid(t.id).await.unwrap();

        assert!(first.applied());
        assert!(!second.applied());
        assert_eq!(second.transaction().status, TransactionStatus::PendingDelivery);
        assert!(matches!(events.recv().await.unwrap(), EscrowEvent::PaymentReceived { .. }));
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn terminal_states_never_regress() {
        let f = fixture();
        let t = f.manager.create(f.buyer, f.seller, Amount::from_cents(100), "x").await.unwrap();
        f.manager.mark_failed(t.id).await.unwrap();

        let err = f.manager.mark_paid(t.id).await.unwrap_err();
        assert!(matches!(err, ApiError::InvalidTransition { from: TransactionStatus::Failed, .. }));
        let err = f.manager.override_status(t.id, TransactionStatus::PendingPayment).await.unwrap_err();
        assert!(matches!(err, ApiError::InvalidTransition { .. }));
        assert!(!f.manager.mark_failed(t.id).await.unwrap().applied());
        assert_eq!(f.manager.get(t.id).await.unwrap().status, TransactionStatus::Failed);
    }

    #[tokio::test]
    async fn delivery_confirmation_completes_a_paid_transaction() {
        let f = fixture();
        let t = f.manager.create(f.buyer, f.seller, Amount::from_cents(100), "x").await.unwrap();

        let err = f.manager.mark_completed(t.id).await.unwrap_err();
        assert!(matches!(err, ApiError::InvalidTransition { .. }));

        f.manager.mark_paid(t.id).await.unwrap();
        assert!(f.manager.mark_completed(t.id).await.unwrap().applied());
        assert!(!f.manager.mark_paid(t.id).await.unwrap().applied());
    }

    #[tokio::test]
    async fn unknown_transaction_is_not_found() {
        let f = fixture();
        let err = f.manager.mark_paid(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }

    #[tokio::test]
    async fn listings_are_newest_first() {
        let f = fixture();
        let older = f.manager.create(f.buyer, f.seller, Amount::from_cents(100), "a").await.unwrap();
        f.clock.advance(Duration::seconds(5));
        let newer = f.manager.create(f.buyer, f.seller, Amount::from_cents(200), "b").await.unwrap();

        let ids: Vec<Uuid> = f.manager.list_by_seller(f.seller).await.unwrap().iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![newer.id, older.id]);
        assert_eq!(f.manager.list_by_buyer(f.buyer).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn only_parties_and_admins_can_read() {
        let f = fixture();
        let t = f.manager.create(f.buyer, f.seller, Amount::from_cents(100), "x").await.unwrap();

        assert!(f.manager.get_for(&caller(f.buyer, Role::User), t.id).await.is_ok());
        assert!(f.manager.get_for(&caller(f.seller, Role::Seller), t.id).await.is_ok());
        assert!(f.manager.get_for(&caller(Uuid::new_v4(), Role::Admin), t.id).await.is_ok());
        let err = f.manager.get_for(&caller(Uuid::new_v4(), Role::User), t.id).await.unwrap_err();
        assert!(matches!(err, ApiError::Forbidden));
    }

    #[tokio::test]
    async fn override_moves_any_open_state_but_never_a_settled_one() {
        let f = fixture();
        let t = f.manager.create(f.buyer, f.seller, Amount::from_cents(100), "x").await.unwrap();

        let disputed = f.manager.override_status(t.id, TransactionStatus::Disputed).await.unwrap();
        assert!(disputed.applied());
        let again = f.manager.override_status(t.id, TransactionStatus::Disputed).await.unwrap();
        assert!(!again.applied());

        let done = f.manager.override_status(t.id, TransactionStatus::Completed).await.unwrap();
        assert_eq!(done.transaction().status, TransactionStatus::Completed);

        for status in TransactionStatus::ALL.into_iter().filter(|s| *s != TransactionStatus::Completed) {
            let err = f.manager.override_status(t.id, status).await.unwrap_err();
            assert!(matches!(err, ApiError::InvalidTransition { from: TransactionStatus::Completed, .. }));
        }
    }
}
