//! End-to-end pipeline tests: submission through execution to fan-out,
//! against an in-memory database, the in-process broker, and a mocked
//! exchange.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use tradepipe::application::messages::{OrderCommandMessage, OrderEventMessage};
use tradepipe::application::services::order_service::{CreateOrderRequest, OrderService};
use tradepipe::application::session_registry::SessionRegistry;
use tradepipe::application::workers::execution_worker::ExecutionWorker;
use tradepipe::application::workers::fanout_service::FanoutService;
use tradepipe::domain::entities::order::{
    EventStatus, OrderCommand, OrderSide, OrderStatus, OrderType,
};
use tradepipe::domain::repositories::exchange_client::{ExchangeClient, ExecutionOutcome};
use tradepipe::infrastructure::broker::{Broker, COMMAND_CHANNEL};
use tradepipe::persistence::repository::{CommandRepository, EventRepository, UserRepository};
use tradepipe::persistence::init_database;
use tradepipe::vault::CredentialVault;

const VAULT_KEY: &[u8] = b"0123456789abcdef0123456789abcdef";

/// Exchange double that records every call and the credentials used.
struct MockExchange {
    calls: AtomicUsize,
    fill_price: f64,
    expected_key: String,
}

impl MockExchange {
    fn new(fill_price: f64, expected_key: &str) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fill_price,
            expected_key: expected_key.to_string(),
        }
    }
}

#[async_trait]
impl ExchangeClient for MockExchange {
    fn name(&self) -> &str {
        "Mock"
    }

    async fn submit_order(
        &self,
        api_key: &str,
        _api_secret: &str,
        _order: &OrderCommand,
    ) -> ExecutionOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        // The worker must hand over the decrypted credential.
        assert_eq!(api_key, self.expected_key);
        ExecutionOutcome {
            status: EventStatus::Filled,
            fill_price: Some(self.fill_price),
            error: None,
        }
    }
}

struct Pipeline {
    orders: OrderService,
    commands: CommandRepository,
    events: EventRepository,
    sessions: Arc<SessionRegistry>,
    broker: Arc<Broker>,
    exchange: Arc<MockExchange>,
}

/// Wire the whole pipeline the way `main` does, with the mock exchange.
async fn start_pipeline(fill_price: f64) -> Pipeline {
    let pool = init_database("sqlite::memory:").await.unwrap();
    let vault = Arc::new(CredentialVault::new(VAULT_KEY).unwrap());
    let broker = Arc::new(Broker::new());
    let exchange = Arc::new(MockExchange::new(fill_price, "plain-api-key"));

    UserRepository::new(pool.clone())
        .insert(
            "user-1",
            &vault.seal_str("plain-api-key"),
            &vault.seal_str("plain-api-secret"),
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
    worker.spawn();

    let sessions = Arc::new(SessionRegistry::new());
    let fanout = Arc::new(FanoutService::new(sessions.clone(), broker.clone()));
    fanout.spawn();

    Pipeline {
        orders: OrderService::new(
            CommandRepository::new(pool.clone()),
            EventRepository::new(pool.clone()),
            broker.clone(),
        ),
        commands: CommandRepository::new(pool.clone()),
        events: EventRepository::new(pool),
        sessions,
        broker,
        exchange,
    }
}

fn market_buy(symbol: &str, quantity: f64) -> CreateOrderRequest {
    serde_json::from_value(serde_json::json!({
        "symbol": symbol,
        "side": "BUY",
        "type": "MARKET",
        "quantity": quantity,
    }))
    .unwrap()
}

async fn wait_until_settled(commands: &CommandRepository, order_id: &str) -> OrderStatus {
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let record = commands.get(order_id).await.unwrap().unwrap();
            let status = record.status().unwrap();
            if status.is_terminal() {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("submitted command should reach a terminal status")
}

#[tokio::test]
async fn test_submitted_order_settles_and_fans_out() {
    let pipeline = start_pipeline(30000.0).await;
    let (_session, mut events) = pipeline.sessions.register("user-1").await;

    let response = pipeline
        .orders
        .submit_order("user-1", market_buy("BTCUSDT", 0.5))
        .await
        .unwrap();
    assert_eq!(response.status, OrderStatus::Pending);

    // Liveness: the command reaches a terminal status on its own.
    let settled = wait_until_settled(&pipeline.commands, &response.order_id).await;
    assert_eq!(settled, OrderStatus::Filled);

    // The owning user's session receives the event.
    let pushed: OrderEventMessage =
        tokio::time::timeout(Duration::from_secs(2), events.recv())
            .await
            .expect("event should be pushed to the live session")
            .unwrap();
    assert_eq!(pushed.order_id, response.order_id);
    assert_eq!(pushed.status, EventStatus::Filled);
    assert_eq!(pushed.price, Some(30000.0));

    // Exactly one execution and one event.
    assert_eq!(pipeline.exchange.calls.load(Ordering::SeqCst), 1);
    let listed = pipeline.orders.list_orders("user-1").await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(
        listed[0].latest_event.as_ref().unwrap().status,
        "FILLED"
    );
}

#[tokio::test]
async fn test_redelivered_command_executes_once() {
    let pipeline = start_pipeline(100.0).await;

    let response = pipeline
        .orders
        .submit_order("user-1", market_buy("BTCUSDT", 1.0))
        .await
        .unwrap();
    wait_until_settled(&pipeline.commands, &response.order_id).await;

    // Simulate broker redelivery of the already-processed command.
    let record = pipeline
        .commands
        .get(&response.order_id)
        .await
        .unwrap()
        .unwrap();
    let replay = OrderCommandMessage {
        order_id: record.order_id.clone(),
        user_id: record.user_id.clone(),
        symbol: record.symbol.clone(),
        side: OrderSide::Buy,
        order_type: OrderType::Market,
        quantity: record.quantity,
        price: record.price,
        timestamp: Utc::now(),
    };
    pipeline
        .broker
        .publish(COMMAND_CHANNEL, serde_json::to_string(&replay).unwrap())
        .unwrap();

    // Give the worker time to (not) act on the duplicate.
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(pipeline.exchange.calls.load(Ordering::SeqCst), 1);
    let fills = pipeline.events.list_filled_by_user("user-1").await.unwrap();
    assert_eq!(fills.len(), 1);
}

#[tokio::test]
async fn test_positions_derived_from_settled_orders() {
    let pipeline = start_pipeline(100.0).await;

    let response = pipeline
        .orders
        .submit_order("user-1", market_buy("BTCUSDT", 1.5))
        .await
        .unwrap();
    wait_until_settled(&pipeline.commands, &response.order_id).await;

    let positions = pipeline.orders.list_positions("user-1").await.unwrap();
    assert_eq!(positions.len(), 1);
    assert_eq!(positions[0].symbol, "BTCUSDT");
    assert!((positions[0].quantity - 1.5).abs() < 1e-12);
    assert!((positions[0].average_price - 100.0).abs() < 1e-12);
}

#[tokio::test]
async fn test_fanout_scoped_to_owning_user() {
    let pipeline = start_pipeline(100.0).await;
    let (_a1, mut rx_a1) = pipeline.sessions.register("user-1").await;
    let (_a2, mut rx_a2) = pipeline.sessions.register("user-1").await;
    let (_b, mut rx_b) = pipeline.sessions.register("user-2").await;

    let response = pipeline
        .orders
        .submit_order("user-1", market_buy("BTCUSDT", 1.0))
        .await
        .unwrap();
    wait_until_settled(&pipeline.commands, &response.order_id).await;

    for rx in [&mut rx_a1, &mut rx_a2] {
        let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("both of the owner's sessions receive the event")
            .unwrap();
        assert_eq!(event.user_id, "user-1");
    }

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(rx_b.try_recv().is_err(), "other users receive nothing");
}

#[tokio::test]
async fn test_validation_rejected_before_any_command_exists() {
    let pipeline = start_pipeline(100.0).await;

    let invalid: CreateOrderRequest = serde_json::from_value(serde_json::json!({
        "symbol": "BTCUSDT",
        "side": "SELL",
        "type": "LIMIT",
        "quantity": 1.0,
    }))
    .unwrap();

    assert!(pipeline.orders.submit_order("user-1", invalid).await.is_err());
    assert!(pipeline.orders.list_orders("user-1").await.unwrap().is_empty());
    assert_eq!(pipeline.exchange.calls.load(Ordering::SeqCst), 0);
}
