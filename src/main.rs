use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Extension, Json, Router,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tradepipe::application::services::order_service::{
    CreateOrderRequest, OrderService, SubmissionError,
};
use tradepipe::application::session_registry::SessionRegistry;
use tradepipe::application::workers::execution_worker::ExecutionWorker;
use tradepipe::application::workers::fanout_service::FanoutService;
use tradepipe::auth::{require_auth, AuthUser, TokenRegistry};
use tradepipe::config::AppConfig;
use tradepipe::infrastructure::binance_client::{BinanceClient, BinanceConfig};
use tradepipe::infrastructure::broker::Broker;
use tradepipe::persistence::repository::{CommandRepository, EventRepository, UserRepository};
use tradepipe::vault::CredentialVault;

#[derive(Clone)]
struct AppState {
    orders: Arc<OrderService>,
    sessions: Arc<SessionRegistry>,
    tokens: Arc<TokenRegistry>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tradepipe=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Tradepipe starting...");

    let config = AppConfig::from_env();

    let pool = tradepipe::persistence::init_database(&config.database_url).await?;

    let vault = Arc::new(CredentialVault::new(config.encryption_key.as_bytes())?);
    let broker = Arc::new(Broker::new());
    let exchange = Arc::new(BinanceClient::new(BinanceConfig::new(
        config.exchange_api_base.clone(),
        config.exchange_timeout,
    ))?);
    info!("Exchange target: {}", config.exchange_api_base);

    // Background pipeline: worker consumes commands, fan-out pushes
    // events to live sessions.
    let worker = Arc::new(ExecutionWorker::new(
        UserRepository::new(pool.clone()),
        CommandRepository::new(pool.clone()),
        EventRepository::new(pool.clone()),
        vault,
        exchange,
        broker.clone(),
    ));
    let worker_handle = worker.spawn();

    let sessions = Arc::new(SessionRegistry::new());
    let fanout = Arc::new(FanoutService::new(sessions.clone(), broker.clone()));
    let fanout_handle = fanout.spawn();

    let orders = Arc::new(OrderService::new(
        CommandRepository::new(pool.clone()),
        EventRepository::new(pool.clone()),
        broker.clone(),
    ));

    let tokens = Arc::new(TokenRegistry::new(config.api_tokens.clone()));
    if config.api_tokens.is_empty() {
        warn!("No API_TOKENS configured; every request will be rejected");
    }

    let state = AppState {
        orders,
        sessions,
        tokens: tokens.clone(),
    };

    let protected = Router::new()
        .route("/orders", post(submit_order).get(list_orders))
        .route("/positions", get(list_positions))
        .route_layer(middleware::from_fn_with_state(tokens, require_auth));

    let app = Router::new()
        .route("/health", get(health_check))
        .route("/ws", get(ws_handler))
        .merge(protected)
        .with_state(state);

    let addr: SocketAddr = config.bind_addr;
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let server = axum::serve(listener, app);

    let shutdown_signal = async move {
        let ctrl_c = async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Received Ctrl+C signal"),
                Err(e) => error!("Failed to install Ctrl+C handler: {}", e),
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut sig) => {
                    sig.recv().await;
                    info!("Received SIGTERM signal");
                }
                Err(e) => error!("Failed to install SIGTERM handler: {}", e),
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {},
            _ = terminate => {},
        }
    };

    info!("Server started successfully. Press Ctrl+C to stop.");
    server.with_graceful_shutdown(shutdown_signal).await?;

    info!("Server shutting down gracefully...");
    worker_handle.abort();
    fanout_handle.abort();

    info!("Shutdown complete");
    Ok(())
}

async fn health_check() -> Json<serde_json::Value> {
    Json(json!({ "status": "running" }))
}

/// Create an order. Validation errors reject synchronously; execution
/// happens asynchronously and the outcome arrives as an event.
async fn submit_order(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Json(request): Json<CreateOrderRequest>,
) -> Response {
    match state.orders.submit_order(&user_id, request).await {
        Ok(response) => Json(response).into_response(),
        Err(e) => {
            let status = match &e {
                SubmissionError::Validation(_) => StatusCode::BAD_REQUEST,
                SubmissionError::DuplicateOrder(_) => StatusCode::CONFLICT,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            (status, Json(json!({ "error": e.to_string() }))).into_response()
        }
    }
}

async fn list_orders(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
) -> Response {
    match state.orders.list_orders(&user_id).await {
        Ok(orders) => Json(orders).into_response(),
        Err(e) => {
            error!("Failed to list orders: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "Failed to fetch orders" })),
            )
                .into_response()
        }
    }
}

async fn list_positions(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
) -> Response {
    match state.orders.list_positions(&user_id).await {
        Ok(positions) => Json(positions).into_response(),
        Err(e) => {
            error!("Failed to list positions: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "Failed to fetch positions" })),
            )
                .into_response()
        }
    }
}

#[derive(Deserialize)]
struct WsAuthQuery {
    token: String,
}

/// Upgrade to the session push channel. Browsers cannot set headers on
/// WebSocket requests, so the token travels as a query parameter.
async fn ws_handler(
    State(state): State<AppState>,
    Query(query): Query<WsAuthQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    match state.tokens.resolve(&query.token) {
        Some(user_id) => {
            let user_id = user_id.to_string();
            let sessions = state.sessions.clone();
            ws.on_upgrade(move |socket| session_loop(sessions, user_id, socket))
        }
        None => {
            warn!("WebSocket connection with invalid token rejected");
            StatusCode::UNAUTHORIZED.into_response()
        }
    }
}

/// One live session: registered on connect, fed from the fan-out
/// service, unregistered when either side hangs up.
async fn session_loop(sessions: Arc<SessionRegistry>, user_id: String, socket: WebSocket) {
    let (session_id, mut events) = sessions.register(&user_id).await;
    info!(%session_id, user_id, "Session connected");

    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                let envelope = json!({ "type": "ORDER_UPDATE", "data": event });
                if sink.send(Message::Text(envelope.to_string())).await.is_err() {
                    break;
                }
            }
            incoming = stream.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    // Pings are answered by axum; other client frames
                    // are ignored, the channel is push-only.
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    sessions.unregister(&user_id, session_id).await;
    info!(%session_id, user_id, "Session disconnected");
}
