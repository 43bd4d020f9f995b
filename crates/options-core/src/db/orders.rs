//! Order store implementations.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use sqlx::{PgPool, Row};
use tracing::debug;
use uuid::Uuid;

use crate::traits::OrderStore;
use crate::types::{OrderRecord, OrderSide, OrderStatus};
use crate::{Error, Result};

/// PostgreSQL-backed order store.
pub struct PgOrderStore {
    pool: PgPool,
}

impl PgOrderStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_record(row: &sqlx::postgres::PgRow) -> Result<OrderRecord> {
        let side: String = row.get("side");
        let status: String = row.get("status");
        Ok(OrderRecord {
            order_id: row.get("order_id"),
            instrument: row.get("instrument"),
            side: side_from_str(&side)?,
            quantity: row.get::<i32, _>("quantity") as u32,
            price: row.get("price"),
            executed_price: row.get("executed_price"),
            status: OrderStatus::parse(&status).ok_or_else(|| Error::Order {
                message: format!("unknown stored order status: {status}"),
            })?,
            linked_position_id: row.get::<Option<Uuid>, _>("linked_position_id"),
            placed_at: row.get::<DateTime<Utc>, _>("placed_at"),
            updated_at: row.get::<DateTime<Utc>, _>("updated_at"),
            retry_count: row.get::<i32, _>("retry_count") as u32,
        })
    }
}

fn side_to_str(side: OrderSide) -> &'static str {
    match side {
        OrderSide::Buy => "buy",
        OrderSide::Sell => "sell",
    }
}

fn side_from_str(raw: &str) -> Result<OrderSide> {
    match raw {
        "buy" => Ok(OrderSide::Buy),
        "sell" => Ok(OrderSide::Sell),
        _ => Err(Error::Order {
            message: format!("unknown stored order side: {raw}"),
        }),
    }
}

const SELECT_COLUMNS: &str = r#"
    SELECT order_id, instrument, side, quantity, price, executed_price,
           status, linked_position_id, placed_at, updated_at, retry_count
    FROM order_records
"#;

#[async_trait]
impl OrderStore for PgOrderStore {
    async fn insert(&self, record: &OrderRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO order_records (
                order_id, instrument, side, quantity, price, executed_price,
                status, linked_position_id, placed_at, updated_at, retry_count
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(&record.order_id)
        .bind(&record.instrument)
        .bind(side_to_str(record.side))
        .bind(record.quantity as i32)
        .bind(record.price)
        .bind(record.executed_price)
        .bind(record.status.as_str())
        .bind(record.linked_position_id)
        .bind(record.placed_at)
        .bind(record.updated_at)
        .bind(record.retry_count as i32)
        .execute(&self.pool)
        .await?;

        debug!(order_id = %record.order_id, "Inserted order record");
        Ok(())
    }

    async fn active_orders(&self) -> Result<Vec<OrderRecord>> {
        let rows = sqlx::query(&format!(
            "{SELECT_COLUMNS} WHERE status IN ('pending', 'placed', 'executed') ORDER BY placed_at ASC"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_record).collect()
    }

    async fn update_status(
        &self,
        order_id: &str,
        status: OrderStatus,
        executed_price: Option<Decimal>,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE order_records SET
                status = $2,
                executed_price = COALESCE($3, executed_price),
                updated_at = NOW()
            WHERE order_id = $1
            "#,
        )
        .bind(order_id)
        .bind(status.as_str())
        .bind(executed_price)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::Order {
                message: format!("order {order_id} not found for status update"),
            });
        }
        debug!(order_id, status = status.as_str(), "Updated order status");
        Ok(())
    }

    async fn import_broker_order(&self, record: OrderRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO order_records (
                order_id, instrument, side, quantity, price, executed_price,
                status, linked_position_id, placed_at, updated_at, retry_count
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (order_id) DO NOTHING
            "#,
        )
        .bind(&record.order_id)
        .bind(&record.instrument)
        .bind(side_to_str(record.side))
        .bind(record.quantity as i32)
        .bind(record.price)
        .bind(record.executed_price)
        .bind(record.status.as_str())
        .bind(record.linked_position_id)
        .bind(record.placed_at)
        .bind(record.updated_at)
        .bind(record.retry_count as i32)
        .execute(&self.pool)
        .await?;

        debug!(order_id = %record.order_id, "Imported broker order");
        Ok(())
    }

    async fn get_order(&self, order_id: &str) -> Result<Option<OrderRecord>> {
        let row = sqlx::query(&format!("{SELECT_COLUMNS} WHERE order_id = $1"))
            .bind(order_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::row_to_record).transpose()
    }
}

/// In-memory order store used by tests and paper mode.
#[derive(Default)]
pub struct MemoryOrderStore {
    orders: DashMap<String, OrderRecord>,
}

impl MemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }
}

#[async_trait]
impl OrderStore for MemoryOrderStore {
    async fn insert(&self, record: &OrderRecord) -> Result<()> {
        if self.orders.contains_key(&record.order_id) {
            return Err(Error::Order {
                message: format!("duplicate order id {}", record.order_id),
            });
        }
        self.orders.insert(record.order_id.clone(), record.clone());
        Ok(())
    }

    async fn active_orders(&self) -> Result<Vec<OrderRecord>> {
        let mut active: Vec<OrderRecord> = self
            .orders
            .iter()
            .filter(|e| {
                matches!(
                    e.value().status,
                    OrderStatus::Pending | OrderStatus::Placed | OrderStatus::Executed
                )
            })
            .map(|e| e.value().clone())
            .collect();
        active.sort_by_key(|r| r.placed_at);
        Ok(active)
    }

    async fn update_status(
        &self,
        order_id: &str,
        status: OrderStatus,
        executed_price: Option<Decimal>,
    ) -> Result<()> {
        let mut entry = self.orders.get_mut(order_id).ok_or_else(|| Error::Order {
            message: format!("order {order_id} not found for status update"),
        })?;
        entry.status = status;
        if executed_price.is_some() {
            entry.executed_price = executed_price;
        }
        entry.updated_at = Utc::now();
        Ok(())
    }

    async fn import_broker_order(&self, record: OrderRecord) -> Result<()> {
        self.orders.entry(record.order_id.clone()).or_insert(record);
        Ok(())
    }

    async fn get_order(&self, order_id: &str) -> Result<Option<OrderRecord>> {
        Ok(self.orders.get(order_id).map(|r| r.clone()))
    }
}
