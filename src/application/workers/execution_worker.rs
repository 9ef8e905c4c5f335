//! Execution worker.
//!
//! Consumes order commands from the broker, resolves the owner's
//! credentials, executes against the exchange, persists the outcome and
//! publishes the resulting event. Each command is handled on its own
//! task so one slow exchange call never delays unrelated commands.
//!
//! The broker is at-most-once with possible redelivery, so processing
//! is guarded twice: an in-process claim set suppresses concurrent
//! duplicates before the exchange call, and the event store's unique
//! `order_id` constraint is the durable backstop. Redelivery therefore
//! produces no second exchange call and no second event.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::application::messages::{OrderCommandMessage, OrderEventMessage};
use crate::domain::entities::order::OrderEvent;
use crate::domain::repositories::exchange_client::ExchangeClient;
use crate::infrastructure::broker::{Broker, BrokerError, COMMAND_CHANNEL, EVENT_CHANNEL};
use crate::persistence::repository::{CommandRepository, EventRepository, UserRepository};
use crate::persistence::DatabaseError;
use crate::vault::{CredentialVault, VaultError};

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("User not found: {0}")]
    UserNotFound(String),

    #[error("Credential decryption failed for user {user_id}: {source}")]
    Decryption {
        user_id: String,
        source: VaultError,
    },

    #[error("Order {0} already processed or in flight")]
    DuplicateProcessing(String),

    #[error(transparent)]
    Store(#[from] DatabaseError),

    #[error("Invalid command payload: {0}")]
    InvalidPayload(String),

    #[error(transparent)]
    Broker(#[from] BrokerError),
}

/// Removes the claim when a handling attempt ends, however it ends.
struct ClaimGuard {
    in_flight: Arc<Mutex<HashSet<String>>>,
    order_id: String,
}

impl Drop for ClaimGuard {
    fn drop(&mut self) {
        self.in_flight
            .lock()
            .expect("in-flight set poisoned")
            .remove(&self.order_id);
    }
}

pub struct ExecutionWorker {
    users: UserRepository,
    commands: CommandRepository,
    events: EventRepository,
    vault: Arc<CredentialVault>,
    exchange: Arc<dyn ExchangeClient>,
    broker: Arc<Broker>,
    in_flight: Arc<Mutex<HashSet<String>>>,
}

impl ExecutionWorker {
    pub fn new(
        users: UserRepository,
        commands: CommandRepository,
        events: EventRepository,
        vault: Arc<CredentialVault>,
        exchange: Arc<dyn ExchangeClient>,
        broker: Arc<Broker>,
    ) -> Self {
        Self {
            users,
            commands,
            events,
            vault,
            exchange,
            broker,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Run the consume loop until the broker shuts down.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        let mut rx = self.broker.subscribe(COMMAND_CHANNEL);
        info!(
            "Execution worker listening on channel: {}",
            COMMAND_CHANNEL
        );

        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(payload) => {
                        let worker = self.clone();
                        tokio::spawn(async move {
                            if let Err(e) = worker.handle_payload(&payload).await {
                                // Post-submission errors are never surfaced
                                // to the caller; they end here.
                                warn!("Command processing failed: {}", e);
                            }
                        });
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Execution worker fell behind, commands dropped");
                    }
                    Err(RecvError::Closed) => {
                        info!("Command channel closed, execution worker stopping");
                        break;
                    }
                }
            }
        })
    }

    /// Parse and process one raw command payload.
    pub async fn handle_payload(&self, payload: &str) -> Result<(), WorkerError> {
        let message: OrderCommandMessage = serde_json::from_str(payload)
            .map_err(|e| WorkerError::InvalidPayload(e.to_string()))?;
        self.handle_command(message).await
    }

    /// Process one command through the full pipeline.
    pub async fn handle_command(&self, message: OrderCommandMessage) -> Result<(), WorkerError> {
        let order_id = message.order_id.clone();
        debug!(%order_id, "Received order command");

        // Claim the order for this process before touching the exchange.
        let _claim = self.claim(&order_id)?;

        // Durable half of the guard: an event means the order already
        // settled, even if the claim set was empty (fresh process).
        if self.events.exists(&order_id).await? {
            info!(%order_id, "Order already processed, redelivery suppressed");
            return Err(WorkerError::DuplicateProcessing(order_id));
        }

        let order = message
            .to_command()
            .map_err(|e| WorkerError::InvalidPayload(e.to_string()))?;

        let credentials = self
            .users
            .get_credentials(&message.user_id)
            .await?
            .ok_or_else(|| {
                // Known liveness gap: the command stays PENDING forever.
                error!(%order_id, user_id = %message.user_id, "User not found, dropping command");
                WorkerError::UserNotFound(message.user_id.clone())
            })?;

        let api_key = self
            .vault
            .open_str(&credentials.api_key_enc)
            .map_err(|source| self.decryption_failure(&order_id, &message.user_id, source))?;
        let api_secret = self
            .vault
            .open_str(&credentials.api_secret_enc)
            .map_err(|source| self.decryption_failure(&order_id, &message.user_id, source))?;

        let outcome = self
            .exchange
            .submit_order(&api_key, &api_secret, &order)
            .await;

        info!(%order_id, status = %outcome.status, "Execution attempt settled");

        let event = OrderEvent {
            order_id: order_id.clone(),
            user_id: message.user_id.clone(),
            status: outcome.status,
            symbol: message.symbol.clone(),
            side: message.side,
            quantity: message.quantity,
            price: if outcome.status.is_fill() {
                outcome.fill_price.or(message.price)
            } else {
                None
            },
            timestamp: chrono::Utc::now(),
            error: outcome.error,
        };

        match self.events.append(&event).await {
            Ok(()) => {}
            Err(DatabaseError::DuplicateProcessing(id)) => {
                // Lost a race against another worker after the exchange
                // call; its outcome stands.
                warn!(order_id = %id, "Concurrent duplicate suppressed at event store");
                return Err(WorkerError::DuplicateProcessing(id));
            }
            Err(e) => return Err(e.into()),
        }

        if let Err(e) = self
            .commands
            .update_status(&order_id, event.status.into())
            .await
        {
            // The event is durable; a failed status write is logged and
            // the event still goes out.
            error!(%order_id, "Failed to settle command status: {}", e);
        }

        let event_message = OrderEventMessage::from_event(&event);
        let payload = serde_json::to_string(&event_message)
            .map_err(|e| WorkerError::InvalidPayload(e.to_string()))?;
        self.broker.publish(EVENT_CHANNEL, payload)?;

        debug!(%order_id, "Event published");
        Ok(())
    }

    fn claim(&self, order_id: &str) -> Result<ClaimGuard, WorkerError> {
        let mut in_flight = self.in_flight.lock().expect("in-flight set poisoned");
        if !in_flight.insert(order_id.to_string()) {
            info!(%order_id, "Order already in flight, redelivery suppressed");
            return Err(WorkerError::DuplicateProcessing(order_id.to_string()));
        }
        Ok(ClaimGuard {
            in_flight: self.in_flight.clone(),
            order_id: order_id.to_string(),
        })
    }

    fn decryption_failure(
        &self,
        order_id: &str,
        user_id: &str,
        source: VaultError,
    ) -> WorkerError {
        // Same treatment as a missing user: drop and log, the command
        // stays PENDING.
        error!(%order_id, %user_id, "Credential decryption failed, dropping command: {}", source);
        WorkerError::Decryption {
            user_id: user_id.to_string(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::order::{
        EventStatus, OrderCommand, OrderSide, OrderStatus, OrderType,
    };
    use crate::domain::repositories::exchange_client::ExecutionOutcome;
    use crate::persistence::init_database;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct MockExchange {
        calls: AtomicUsize,
        outcome: ExecutionOutcome,
    }

    impl MockExchange {
        fn filled_at(price: f64) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                outcome: ExecutionOutcome {
                    status: EventStatus::Filled,
                    fill_price: Some(price),
                    error: None,
                },
            }
        }

        fn rejecting(message: &str) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                outcome: ExecutionOutcome::rejected(message),
            }
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ExchangeClient for MockExchange {
        fn name(&self) -> &str {
            "Mock"
        }

        async fn submit_order(
            &self,
            _api_key: &str,
            _api_secret: &str,
            _order: &OrderCommand,
        ) -> ExecutionOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.outcome.clone()
        }
    }

    struct Fixture {
        worker: Arc<ExecutionWorker>,
        exchange: Arc<MockExchange>,
        commands: CommandRepository,
        events: EventRepository,
        broker: Arc<Broker>,
    }

    async fn fixture(exchange: MockExchange) -> Fixture {
        let pool = init_database("sqlite::memory:").await.unwrap();
        let vault =
            Arc::new(CredentialVault::new(b"0123456789abcdef0123456789abcdef").unwrap());
        let broker = Arc::new(Broker::new());
        let exchange = Arc::new(exchange);

        let users = UserRepository::new(pool.clone());
        users
            .insert(
                "user-1",
                &vault.seal_str("api-key"),
                &vault.seal_str("api-secret"),
            )
            .await
            .unwrap();

        let worker = Arc::new(ExecutionWorker::new(
            UserRepository::new(pool.clone()),
            CommandRepository::new(pool.clone()),
            EventRepository::new(pool.clone()),
            vault,
            exchange.clone(),
            broker.clone(),
        ));

        Fixture {
            worker,
            exchange,
            commands: CommandRepository::new(pool.clone()),
            events: EventRepository::new(pool),
            broker,
        }
    }

    async fn submitted_command(fixture: &Fixture, order_id: &str) -> OrderCommandMessage {
        let command = OrderCommand::new(
            order_id.to_string(),
            "user-1".to_string(),
            "BTCUSDT".to_string(),
            OrderSide::Buy,
            OrderType::Market,
            1.0,
            None,
        )
        .unwrap();
        fixture.commands.create(&command).await.unwrap();
        OrderCommandMessage::from_command(&command)
    }

    #[tokio::test]
    async fn test_command_reaches_terminal_status() {
        let fixture = fixture(MockExchange::filled_at(30000.0)).await;
        let message = submitted_command(&fixture, "ord-1").await;

        fixture.worker.handle_command(message).await.unwrap();

        let record = fixture.commands.get("ord-1").await.unwrap().unwrap();
        assert_eq!(record.status().unwrap(), OrderStatus::Filled);
        assert!(fixture.events.exists("ord-1").await.unwrap());
        assert_eq!(fixture.exchange.call_count(), 1);
    }

    #[tokio::test]
    async fn test_event_carries_fill_price() {
        let fixture = fixture(MockExchange::filled_at(30000.0)).await;
        let message = submitted_command(&fixture, "ord-1").await;
        fixture.worker.handle_command(message).await.unwrap();

        let fills = fixture.events.list_filled_by_user("user-1").await.unwrap();
        assert_eq!(fills.len(), 1);
        assert_eq!(fills[0].price, Some(30000.0));
        assert!(fills[0].error.is_none());
    }

    #[tokio::test]
    async fn test_redelivery_is_idempotent() {
        let fixture = fixture(MockExchange::filled_at(30000.0)).await;
        let message = submitted_command(&fixture, "ord-1").await;

        fixture.worker.handle_command(message.clone()).await.unwrap();
        let second = fixture.worker.handle_command(message).await;

        assert!(matches!(second, Err(WorkerError::DuplicateProcessing(_))));
        assert_eq!(fixture.exchange.call_count(), 1);

        let fills = fixture.events.list_filled_by_user("user-1").await.unwrap();
        assert_eq!(fills.len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_redelivery_single_exchange_call() {
        let fixture = fixture(MockExchange::filled_at(30000.0)).await;
        let message = submitted_command(&fixture, "ord-1").await;

        let (a, b) = tokio::join!(
            fixture.worker.handle_command(message.clone()),
            fixture.worker.handle_command(message)
        );

        assert!(a.is_ok() != b.is_ok(), "exactly one attempt must win");
        assert_eq!(fixture.exchange.call_count(), 1);
    }

    #[tokio::test]
    async fn test_rejection_persists_error_and_status() {
        let fixture = fixture(MockExchange::rejecting("Insufficient balance")).await;
        let message = submitted_command(&fixture, "ord-1").await;
        fixture.worker.handle_command(message).await.unwrap();

        let record = fixture.commands.get("ord-1").await.unwrap().unwrap();
        assert_eq!(record.status().unwrap(), OrderStatus::Rejected);

        let events = fixture.events.list_by_user("user-1").await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].status, "REJECTED");
        assert_eq!(events[0].error.as_deref(), Some("Insufficient balance"));
        // No fill happened, so no price on the event.
        assert!(events[0].price.is_none());
    }

    #[tokio::test]
    async fn test_unknown_user_drops_command_as_pending() {
        let fixture = fixture(MockExchange::filled_at(30000.0)).await;
        let mut message = submitted_command(&fixture, "ord-1").await;
        message.user_id = "ghost".to_string();

        let result = fixture.worker.handle_command(message).await;
        assert!(matches!(result, Err(WorkerError::UserNotFound(_))));
        assert_eq!(fixture.exchange.call_count(), 0);

        let record = fixture.commands.get("ord-1").await.unwrap().unwrap();
        assert_eq!(record.status().unwrap(), OrderStatus::Pending);
    }

    #[tokio::test]
    async fn test_undecryptable_credentials_drop_command() {
        let pool = init_database("sqlite::memory:").await.unwrap();
        let vault =
            Arc::new(CredentialVault::new(b"0123456789abcdef0123456789abcdef").unwrap());
        let other_vault =
            CredentialVault::new(b"ffffffffffffffffffffffffffffffff").unwrap();
        let broker = Arc::new(Broker::new());
        let exchange = Arc::new(MockExchange::filled_at(1.0));

        // Credentials sealed under a different key than the worker's.
        UserRepository::new(pool.clone())
            .insert(
                "user-1",
                &other_vault.seal_str("api-key"),
                &other_vault.seal_str("api-secret"),
            )
            .await
            .unwrap();

        let commands = CommandRepository::new(pool.clone());
        let command = OrderCommand::new(
            "ord-1".to_string(),
            "user-1".to_string(),
            "BTCUSDT".to_string(),
            OrderSide::Buy,
            OrderType::Market,
            1.0,
            None,
        )
        .unwrap();
        commands.create(&command).await.unwrap();

        let worker = Arc::new(ExecutionWorker::new(
            UserRepository::new(pool.clone()),
            CommandRepository::new(pool.clone()),
            EventRepository::new(pool.clone()),
            vault,
            exchange.clone(),
            broker,
        ));

        let result = worker
            .handle_command(OrderCommandMessage::from_command(&command))
            .await;
        assert!(matches!(result, Err(WorkerError::Decryption { .. })));
        assert_eq!(exchange.call_count(), 0);
        assert_eq!(
            commands.get("ord-1").await.unwrap().unwrap().status,
            "PENDING"
        );
    }

    #[tokio::test]
    async fn test_event_published_to_broker() {
        let fixture = fixture(MockExchange::filled_at(30000.0)).await;
        let mut rx = fixture.broker.subscribe(EVENT_CHANNEL);
        let message = submitted_command(&fixture, "ord-1").await;

        fixture.worker.handle_command(message).await.unwrap();

        let payload = rx.recv().await.unwrap();
        let event: OrderEventMessage = serde_json::from_str(&payload).unwrap();
        assert_eq!(event.order_id, "ord-1");
        assert_eq!(event.user_id, "user-1");
        assert_eq!(event.status, EventStatus::Filled);
        assert_eq!(event.price, Some(30000.0));
    }

    #[tokio::test]
    async fn test_malformed_payload_rejected() {
        let fixture = fixture(MockExchange::filled_at(30000.0)).await;
        let result = fixture.worker.handle_payload("{oops").await;
        assert!(matches!(result, Err(WorkerError::InvalidPayload(_))));
        assert_eq!(fixture.exchange.call_count(), 0);
    }

    #[tokio::test]
    async fn test_spawned_worker_consumes_commands() {
        let fixture = fixture(MockExchange::filled_at(30000.0)).await;
        let message = submitted_command(&fixture, "ord-1").await;
        let _handle = fixture.worker.clone().spawn();

        fixture
            .broker
            .publish(COMMAND_CHANNEL, serde_json::to_string(&message).unwrap())
            .unwrap();

        // Liveness: the submitted command settles without intervention.
        let deadline = std::time::Duration::from_secs(2);
        let settled = tokio::time::timeout(deadline, async {
            loop {
                let record = fixture.commands.get("ord-1").await.unwrap().unwrap();
                if record.status().unwrap().is_terminal() {
                    return record;
                }
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("command should settle");

        assert_eq!(settled.status().unwrap(), OrderStatus::Filled);
    }
}
