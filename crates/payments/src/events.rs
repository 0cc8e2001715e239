//! Payment events and sinks

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use strum_macros::Display;
use tokio::sync::broadcast;

use bipay_core::Transaction;
use bipay_ledger::Block;

use crate::error::PublishError;
use crate::ports::EventSink;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    TransactionCreated,
    TransactionFlagged,
    BlockMined,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentEvent {
    pub event_type: EventType,
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
}

impl PaymentEvent {
    pub fn transaction_created(tx: &Transaction) -> Self {
        Self {
            event_type: EventType::TransactionCreated,
            payload: json!({
                "transaction_id": tx.id,
                "from_account": tx.from_account,
                "to_account": tx.to_account,
                "amount": tx.amount,
                "transaction_type": tx.transaction_type,
                "status": tx.status,
                "created_at": tx.created_at,
            }),
            timestamp: Utc::now(),
        }
    }

    /// Flag notice for the sender's own channel; carries no score
    pub fn transaction_flagged(tx: &Transaction) -> Self {
        Self {
            event_type: EventType::TransactionFlagged,
            payload: json!({
                "transaction_id": tx.id,
                "from_account": tx.from_account,
                "status": tx.status,
            }),
            timestamp: Utc::now(),
        }
    }

    pub fn block_mined(block: &Block) -> Self {
        Self {
            event_type: EventType::BlockMined,
            payload: json!({
                "index": block.index,
                "hash": block.hash,
                "previous_hash": block.previous_hash,
                "nonce": block.nonce,
                "transactions": block.transactions.len(),
            }),
            timestamp: Utc::now(),
        }
    }
}

/// In-process fan-out over a tokio broadcast channel
#[derive(Debug, Clone)]
pub struct BroadcastEventSink {
    sender: broadcast::Sender<PaymentEvent>,
}

impl BroadcastEventSink {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PaymentEvent> {
        self.sender.subscribe()
    }
}

#[async_trait]
impl EventSink for BroadcastEventSink {
    async fn publish(&self, event: PaymentEvent) -> Result<(), PublishError> {
        if self.sender.receiver_count() == 0 {
            tracing::trace!(event_type = %event.event_type, "No subscribers, event dropped");
            return Ok(());
        }
        self.sender
            .send(event)
            .map(|_| ())
            .map_err(|e| PublishError(e.to_string()))
    }
}

/// Writes every event to the log
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventSink;

#[async_trait]
impl EventSink for TracingEventSink {
    async fn publish(&self, event: PaymentEvent) -> Result<(), PublishError> {
        tracing::info!(event_type = %event.event_type, payload = %event.payload, "Event published");
        Ok(())
    }
}

/// Publishes to several sinks; fails if any of them fails
#[derive(Clone, Default)]
pub struct FanoutEventSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl FanoutEventSink {
    pub fn new(sinks: Vec<Arc<dyn EventSink>>) -> Self {
        Self { sinks }
    }
}

#[async_trait]
impl EventSink for FanoutEventSink {
    async fn publish(&self, event: PaymentEvent) -> Result<(), PublishError> {
        let mut failures = Vec::new();
        for sink in &self.sinks {
            if let Err(e) = sink.publish(event.clone()).await {
                failures.push(e.0);
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(PublishError(failures.join("; ")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bipay_core::{Amount, TransactionType};
    use rust_decimal_macros::dec;

    fn sample_tx() -> Transaction {
        Transaction::new(
            "alice",
            "bob",
            Amount::new(dec!(12.50)).unwrap(),
            TransactionType::P2p,
            Utc::now(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_broadcast_delivers_to_subscriber() {
        let sink = BroadcastEventSink::new(8);
        let mut rx = sink.subscribe();
        let tx = sample_tx();

        sink.publish(PaymentEvent::transaction_created(&tx)).await.unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(event.event_type, EventType::TransactionCreated);
        assert_eq!(event.payload["transaction_id"], tx.id);
        assert_eq!(event.payload["amount"], "12.50");
    }

    #[tokio::test]
    async fn test_broadcast_without_subscribers_is_ok() {
        let sink = BroadcastEventSink::new(8);
        assert!(sink.publish(PaymentEvent::transaction_created(&sample_tx())).await.is_ok());
    }

    #[test]
    fn test_flagged_event_has_no_score() {
        let event = PaymentEvent::transaction_flagged(&sample_tx());
        assert!(event.payload.get("risk_score").is_none());
        assert_eq!(event.event_type.to_string(), "transaction_flagged");
    }
}
