//! Outbound notification seam. Delivery failures never affect ledger state.

use chrono::NaiveDate;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::services::alert_service::BalanceAlert;
use crate::currency::Money;
use crate::ledger::{PaymentStatus, Transaction};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerEvent {
    TransactionPosted {
        account_id: Uuid,
        owner_id: Uuid,
        transaction: Transaction,
    },
    PaymentSucceeded {
        schedule_id: Uuid,
        owner_id: Uuid,
        amount: Money,
        status: PaymentStatus,
        reference: Option<String>,
    },
    PaymentFailed {
        schedule_id: Uuid,
        owner_id: Uuid,
        scheduled_for: NaiveDate,
        reason: String,
    },
    Alert(BalanceAlert),
}

pub trait Notifier: Send + Sync {
    fn notify(&self, event: &LedgerEvent);
}

/// Writes every event to the tracing pipeline.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, event: &LedgerEvent) {
        match event {
            LedgerEvent::TransactionPosted {
                account_id,
                transaction,
                ..
            } => tracing::info!(
                account = %account_id,
                kind = ?transaction.kind,
                amount = %transaction.amount,
                balance = %transaction.resulting_balance,
                "transaction posted"
            ),
            LedgerEvent::PaymentSucceeded {
                schedule_id,
                amount,
                status,
                reference,
                ..
            } => tracing::info!(
                schedule = %schedule_id,
                %amount,
                ?status,
                reference = reference.as_deref().unwrap_or("-"),
                "scheduled payment executed"
            ),
            LedgerEvent::PaymentFailed {
                schedule_id,
                scheduled_for,
                reason,
                ..
            } => tracing::warn!(
                schedule = %schedule_id,
                %scheduled_for,
                %reason,
                "scheduled payment failed"
            ),
            LedgerEvent::Alert(alert) => tracing::info!(
                owner = %alert.owner_id,
                account = %alert.account_id,
                alert = %alert.kind,
                "alert raised"
            ),
        }
    }
}

/// Captures events for inspection in tests.
#[derive(Debug, Default)]
pub struct InMemoryNotifier {
    events: RwLock<Vec<LedgerEvent>>,
}

impl InMemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<LedgerEvent> {
        self.events.read().clone()
    }

    pub fn alerts(&self) -> Vec<BalanceAlert> {
        self.events
            .read()
            .iter()
            .filter_map(|event| match event {
                LedgerEvent::Alert(alert) => Some(alert.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.events.write().clear();
    }
}

impl Notifier for InMemoryNotifier {
    fn notify(&self, event: &LedgerEvent) {
        self.events.write().push(event.clone());
    }
}
