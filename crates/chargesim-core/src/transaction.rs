//! # Transaction Lifecycle
//!
//! This module tracks a single charging session on one connector. The
//! transaction id stays unset until the central system confirms the start;
//! the collaborator assigns it asynchronously via the connector aggregate.

use chargesim_types::TransactionId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A charging session record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// Server-assigned id; `None` until the start has been confirmed
    pub transaction_id: Option<TransactionId>,
    /// ID tag used for authorization
    pub id_tag: String,
    /// Meter register at transaction start in Wh
    pub meter_start_wh: i64,
    /// Start timestamp
    pub started_at: DateTime<Utc>,
    /// Stop timestamp (if finished)
    pub stopped_at: Option<DateTime<Utc>>,
}

impl Transaction {
    /// Begin a new, unconfirmed transaction
    pub fn new(id_tag: impl Into<String>, meter_start_wh: i64) -> Self {
        Self {
            transaction_id: None,
            id_tag: id_tag.into(),
            meter_start_wh,
            started_at: Utc::now(),
            stopped_at: None,
        }
    }

    /// Record the id assigned by the central system
    pub fn confirm(&mut self, transaction_id: TransactionId) {
        self.transaction_id = Some(transaction_id);
    }

    /// Whether the central system has confirmed the start
    pub fn is_confirmed(&self) -> bool {
        self.transaction_id.is_some()
    }

    /// Whether the transaction has ended
    pub fn is_stopped(&self) -> bool {
        self.stopped_at.is_some()
    }

    /// Stamp the stop time; stopping twice keeps the first timestamp
    pub fn stop(&mut self) {
        if self.stopped_at.is_none() {
            self.stopped_at = Some(Utc::now());
        }
    }

    /// Energy delivered so far given the current meter register
    pub fn energy_wh(&self, current_meter_wh: i64) -> i64 {
        current_meter_wh - self.meter_start_wh
    }

    /// Session duration (up to now while running)
    pub fn duration(&self) -> chrono::Duration {
        let end = self.stopped_at.unwrap_or_else(Utc::now);
        end.signed_duration_since(self.started_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transaction_starts_unconfirmed() {
        let transaction = Transaction::new("tag-1", 1000);

        assert!(!transaction.is_confirmed());
        assert!(!transaction.is_stopped());
        assert_eq!(transaction.meter_start_wh, 1000);
    }

    #[test]
    fn test_confirm_assigns_id() {
        let mut transaction = Transaction::new("tag-1", 0);
        transaction.confirm(TransactionId::new(77));

        assert!(transaction.is_confirmed());
        assert_eq!(transaction.transaction_id, Some(TransactionId::new(77)));
    }

    #[test]
    fn test_stop_is_idempotent() {
        let mut transaction = Transaction::new("tag-1", 500);
        transaction.stop();
        let first = transaction.stopped_at;
        transaction.stop();

        assert_eq!(transaction.stopped_at, first);
        assert!(transaction.is_stopped());
    }

    #[test]
    fn test_energy_accounting() {
        let transaction = Transaction::new("tag-1", 1200);
        assert_eq!(transaction.energy_wh(1500), 300);
        assert_eq!(transaction.energy_wh(1200), 0);
    }
}
