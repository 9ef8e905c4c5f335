//! Session fan-out service.
//!
//! Subscribes to the event channel and pushes each event to every live
//! session of the owning user. Delivery is best-effort and independent
//! per session: a dead session never blocks the others. Events for
//! users with no live sessions are dropped — connecting clients pull
//! current orders and positions instead of replaying.

use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::application::messages::OrderEventMessage;
use crate::application::session_registry::SessionRegistry;
use crate::infrastructure::broker::{Broker, EVENT_CHANNEL};

pub struct FanoutService {
    registry: Arc<SessionRegistry>,
    broker: Arc<Broker>,
}

impl FanoutService {
    pub fn new(registry: Arc<SessionRegistry>, broker: Arc<Broker>) -> Self {
        Self { registry, broker }
    }

    /// Run the fan-out loop until the broker shuts down.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        let mut rx = self.broker.subscribe(EVENT_CHANNEL);
        info!("Fan-out service listening on channel: {}", EVENT_CHANNEL);

        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(payload) => self.dispatch(&payload).await,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Fan-out fell behind, events dropped");
                    }
                    Err(RecvError::Closed) => {
                        info!("Event channel closed, fan-out service stopping");
                        break;
                    }
                }
            }
        })
    }

    /// Deliver one raw event payload to the owner's live sessions.
    pub async fn dispatch(&self, payload: &str) {
        let event: OrderEventMessage = match serde_json::from_str(payload) {
            Ok(event) => event,
            Err(e) => {
                error!("Discarding malformed event payload: {}", e);
                return;
            }
        };

        let sessions = self.registry.senders_for(&event.user_id).await;
        if sessions.is_empty() {
            debug!(user_id = %event.user_id, order_id = %event.order_id, "No live sessions, event not delivered");
            return;
        }

        for (session_id, sender) in sessions {
            // A send error means the session hung up between lookup and
            // delivery; the registry entry is cleaned by the connection
            // handler, and remaining sessions still get the event.
            if sender.send(event.clone()).is_err() {
                debug!(%session_id, "Session gone, skipping delivery");
            }
        }
    }
}
