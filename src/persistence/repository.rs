//! Data access layer for users, order commands, and order events.

use sqlx::Row;
use tracing::{debug, error};

use super::models::*;
use super::{DatabaseError, DbPool};
use crate::domain::entities::order::{OrderCommand, OrderEvent, OrderStatus};

fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.is_unique_violation())
}

/// Read access to the identity subsystem's credential rows.
pub struct UserRepository {
    pool: DbPool,
}

impl UserRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Seed a user with vault-sealed credentials. The identity subsystem
    /// owns registration; this exists for tests and operational seeding.
    pub async fn insert(
        &self,
        id: &str,
        api_key_enc: &str,
        api_secret_enc: &str,
    ) -> Result<(), DatabaseError> {
        sqlx::query("INSERT INTO users (id, api_key_enc, api_secret_enc) VALUES (?1, ?2, ?3)")
            .bind(id)
            .bind(api_key_enc)
            .bind(api_secret_enc)
            .execute(&self.pool)
            .await
            .map_err(|e| DatabaseError::QueryError(format!("Failed to insert user: {}", e)))?;
        Ok(())
    }

    /// Encrypted credential pair for a user, or `None` if absent.
    pub async fn get_credentials(
        &self,
        user_id: &str,
    ) -> Result<Option<UserCredentials>, DatabaseError> {
        let record = sqlx::query_as::<_, UserCredentials>(
            "SELECT id, api_key_enc, api_secret_enc FROM users WHERE id = ?1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to get credentials for {}: {}", user_id, e);
            DatabaseError::QueryError(format!("Failed to get credentials: {}", e))
        })?;

        Ok(record)
    }
}

/// Command store: durable order intents and their status.
pub struct CommandRepository {
    pool: DbPool,
}

impl CommandRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Persist a new PENDING command. Fails with `DuplicateOrder` if the
    /// order id is already taken.
    pub async fn create(&self, command: &OrderCommand) -> Result<(), DatabaseError> {
        let record = OrderCommandRecord::from_command(command);
        let result = sqlx::query(
            r#"
            INSERT INTO order_commands
                (order_id, user_id, symbol, side, type, quantity, price, status, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
        )
        .bind(&record.order_id)
        .bind(&record.user_id)
        .bind(&record.symbol)
        .bind(&record.side)
        .bind(&record.order_type)
        .bind(record.quantity)
        .bind(record.price)
        .bind(&record.status)
        .bind(record.created_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => {
                debug!("Created command: {} for {}", record.order_id, record.symbol);
                Ok(())
            }
            Err(e) if is_unique_violation(&e) => {
                Err(DatabaseError::DuplicateOrder(record.order_id))
            }
            Err(e) => {
                error!("Failed to create command {}: {}", record.order_id, e);
                Err(DatabaseError::QueryError(format!(
                    "Failed to create command: {}",
                    e
                )))
            }
        }
    }

    /// Settle a command. The single mutation path: one atomic write that
    /// only succeeds while the command is still PENDING, so a command
    /// transitions exactly once.
    pub async fn update_status(
        &self,
        order_id: &str,
        status: OrderStatus,
    ) -> Result<(), DatabaseError> {
        if !status.is_terminal() {
            return Err(DatabaseError::QueryError(format!(
                "Refusing to set non-terminal status {} on {}",
                status, order_id
            )));
        }

        let rows_affected = sqlx::query(
            "UPDATE order_commands SET status = ?1 WHERE order_id = ?2 AND status = 'PENDING'",
        )
        .bind(status.to_string())
        .bind(order_id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to update command {}: {}", order_id, e);
            DatabaseError::QueryError(format!("Failed to update command: {}", e))
        })?
        .rows_affected();

        if rows_affected == 0 {
            return match self.get(order_id).await? {
                Some(_) => Err(DatabaseError::TerminalTransition(order_id.to_string())),
                None => Err(DatabaseError::QueryError(format!(
                    "Command not found: {}",
                    order_id
                ))),
            };
        }

        debug!("Command {} settled as {}", order_id, status);
        Ok(())
    }

    pub async fn get(&self, order_id: &str) -> Result<Option<OrderCommandRecord>, DatabaseError> {
        let record = sqlx::query_as::<_, OrderCommandRecord>(
            "SELECT * FROM order_commands WHERE order_id = ?1",
        )
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| DatabaseError::QueryError(format!("Failed to get command: {}", e)))?;

        Ok(record)
    }

    /// A user's commands, most recent first.
    pub async fn list_by_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<OrderCommandRecord>, DatabaseError> {
        let records = sqlx::query_as::<_, OrderCommandRecord>(
            "SELECT * FROM order_commands WHERE user_id = ?1 ORDER BY created_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to list commands for {}: {}", user_id, e);
            DatabaseError::QueryError(format!("Failed to list commands: {}", e))
        })?;

        Ok(records)
    }
}

/// Event store: append-only execution outcomes.
pub struct EventRepository {
    pool: DbPool,
}

impl EventRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Append an execution outcome. The UNIQUE constraint on `order_id`
    /// makes this the durable idempotency guard: a redelivered command
    /// that raced past the in-flight check still cannot produce a second
    /// event.
    pub async fn append(&self, event: &OrderEvent) -> Result<(), DatabaseError> {
        let result = sqlx::query(
            r#"
            INSERT INTO order_events
                (order_id, user_id, status, symbol, side, quantity, price, error, timestamp)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
        )
        .bind(&event.order_id)
        .bind(&event.user_id)
        .bind(event.status.to_string())
        .bind(&event.symbol)
        .bind(event.side.to_string())
        .bind(event.quantity)
        .bind(event.price)
        .bind(&event.error)
        .bind(event.timestamp)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => {
                debug!("Appended event for {}: {}", event.order_id, event.status);
                Ok(())
            }
            Err(e) if is_unique_violation(&e) => {
                Err(DatabaseError::DuplicateProcessing(event.order_id.clone()))
            }
            Err(e) => {
                error!("Failed to append event for {}: {}", event.order_id, e);
                Err(DatabaseError::QueryError(format!(
                    "Failed to append event: {}",
                    e
                )))
            }
        }
    }

    /// Whether an outcome has already been recorded for this order.
    pub async fn exists(&self, order_id: &str) -> Result<bool, DatabaseError> {
        let row = sqlx::query("SELECT COUNT(*) as count FROM order_events WHERE order_id = ?1")
            .bind(order_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| DatabaseError::QueryError(format!("Failed to count events: {}", e)))?;

        let count: i64 = row.get("count");
        Ok(count > 0)
    }

    /// All fill events for a user, in no particular order. The position
    /// aggregation downstream is order-insensitive.
    pub async fn list_filled_by_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<OrderEventRecord>, DatabaseError> {
        let records = sqlx::query_as::<_, OrderEventRecord>(
            "SELECT * FROM order_events WHERE user_id = ?1 AND status IN ('FILLED', 'PARTIALLY_FILLED')",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to list fill events for {}: {}", user_id, e);
            DatabaseError::QueryError(format!("Failed to list fill events: {}", e))
        })?;

        Ok(records)
    }

    /// All of a user's events, keyed for joining against their commands.
    pub async fn list_by_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<OrderEventRecord>, DatabaseError> {
        let records = sqlx::query_as::<_, OrderEventRecord>(
            "SELECT * FROM order_events WHERE user_id = ?1",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| DatabaseError::QueryError(format!("Failed to list events: {}", e)))?;

        Ok(records)
    }
}
