use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{postgres::PgPoolOptions, PgPool, Row};
use uuid::Uuid;

use crate::models::{OptionDirection, Position, PositionStatus, Trade};
use crate::Result;

/// Postgres persistence for positions and archived trades.
///
/// Open positions are saved on every monitor transition and on shutdown, so a
/// restarted orchestrator can resume them instead of abandoning them.
pub struct PostgresPersistence {
    pool: PgPool,
}

impl PostgresPersistence {
    /// Connect and ensure the schema exists.
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS positions (
                id UUID PRIMARY KEY,
                direction TEXT NOT NULL,
                strike DOUBLE PRECISION NOT NULL,
                expiry DATE NOT NULL,
                quantity DOUBLE PRECISION NOT NULL,
                entry_price DOUBLE PRECISION NOT NULL,
                entry_time TIMESTAMPTZ NOT NULL,
                stop_loss DOUBLE PRECISION NOT NULL,
                trail_anchor DOUBLE PRECISION NOT NULL,
                target1 DOUBLE PRECISION NOT NULL,
                target2 DOUBLE PRECISION NOT NULL,
                booked_quantity DOUBLE PRECISION NOT NULL,
                remaining_quantity DOUBLE PRECISION NOT NULL,
                capital_required DOUBLE PRECISION NOT NULL,
                status TEXT NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS trades (
                id UUID PRIMARY KEY,
                position_id UUID NOT NULL,
                direction TEXT NOT NULL,
                strike DOUBLE PRECISION NOT NULL,
                quantity DOUBLE PRECISION NOT NULL,
                entry_price DOUBLE PRECISION NOT NULL,
                exit_price DOUBLE PRECISION NOT NULL,
                entry_time TIMESTAMPTZ NOT NULL,
                exit_time TIMESTAMPTZ NOT NULL,
                exit_reason TEXT NOT NULL,
                realized_pnl DOUBLE PRECISION NOT NULL,
                capital_required DOUBLE PRECISION NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;

        tracing::info!("Connected to Postgres");

        Ok(Self { pool })
    }

    /// Upsert a position snapshot.
    pub async fn save_position(&self, position: &Position) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO positions (
                id, direction, strike, expiry, quantity, entry_price, entry_time,
                stop_loss, trail_anchor, target1, target2,
                booked_quantity, remaining_quantity, capital_required, status
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            ON CONFLICT (id) DO UPDATE SET
                stop_loss = EXCLUDED.stop_loss,
                trail_anchor = EXCLUDED.trail_anchor,
                booked_quantity = EXCLUDED.booked_quantity,
                remaining_quantity = EXCLUDED.remaining_quantity,
                status = EXCLUDED.status,
                updated_at = NOW()
            "#,
        )
        .bind(position.id)
        .bind(position.direction.as_str())
        .bind(position.strike)
        .bind(position.expiry)
        .bind(position.quantity)
        .bind(position.entry_price)
        .bind(position.entry_time)
        .bind(position.stop_loss)
        .bind(position.trail_anchor)
        .bind(position.target1)
        .bind(position.target2)
        .bind(position.booked_quantity)
        .bind(position.remaining_quantity)
        .bind(position.capital_required)
        .bind(status_str(position.status))
        .execute(&self.pool)
        .await?;

        tracing::debug!(position = %position.id, "saved position");
        Ok(())
    }

    /// Load positions that were still open when the process stopped.
    pub async fn load_open_positions(&self) -> Result<Vec<Position>> {
        let rows = sqlx::query(
            r#"
            SELECT id, direction, strike, expiry, quantity, entry_price, entry_time,
                   stop_loss, trail_anchor, target1, target2,
                   booked_quantity, remaining_quantity, capital_required, status
            FROM positions
            WHERE status != 'Closed'
            ORDER BY entry_time ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut positions = Vec::with_capacity(rows.len());
        for row in rows {
            let direction: String = row.get("direction");
            let status: String = row.get("status");
            positions.push(Position {
                id: row.get::<Uuid, _>("id"),
                direction: parse_direction(&direction)?,
                strike: row.get("strike"),
                expiry: row.get::<NaiveDate, _>("expiry"),
                quantity: row.get("quantity"),
                entry_price: row.get("entry_price"),
                entry_time: row.get::<DateTime<Utc>, _>("entry_time"),
                stop_loss: row.get("stop_loss"),
                trail_anchor: row.get("trail_anchor"),
                target1: row.get("target1"),
                target2: row.get("target2"),
                booked_quantity: row.get("booked_quantity"),
                remaining_quantity: row.get("remaining_quantity"),
                capital_required: row.get("capital_required"),
                status: parse_status(&status)?,
            });
        }

        tracing::info!("Loaded {} open positions from Postgres", positions.len());
        Ok(positions)
    }

    /// Append an archived trade.
    pub async fn save_trade(&self, trade: &Trade) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO trades (
                id, position_id, direction, strike, quantity,
                entry_price, exit_price, entry_time, exit_time,
                exit_reason, realized_pnl, capital_required
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(trade.id)
        .bind(trade.position_id)
        .bind(trade.direction.as_str())
        .bind(trade.strike)
        .bind(trade.quantity)
        .bind(trade.entry_price)
        .bind(trade.exit_price)
        .bind(trade.entry_time)
        .bind(trade.exit_time)
        .bind(trade.exit_reason.as_str())
        .bind(trade.realized_pnl)
        .bind(trade.capital_required)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn status_str(status: PositionStatus) -> &'static str {
    match status {
        PositionStatus::Open => "Open",
        PositionStatus::PartialBooked => "PartialBooked",
        PositionStatus::Closed => "Closed",
    }
}

fn parse_status(s: &str) -> Result<PositionStatus> {
    match s {
        "Open" => Ok(PositionStatus::Open),
        "PartialBooked" => Ok(PositionStatus::PartialBooked),
        "Closed" => Ok(PositionStatus::Closed),
        other => Err(format!("unknown position status: {}", other).into()),
    }
}

fn parse_direction(s: &str) -> Result<OptionDirection> {
    match s {
        "CE" => Ok(OptionDirection::CE),
        "PE" => Ok(OptionDirection::PE),
        other => Err(format!("unknown option direction: {}", other).into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for status in [
            PositionStatus::Open,
            PositionStatus::PartialBooked,
            PositionStatus::Closed,
        ] {
            assert_eq!(parse_status(status_str(status)).unwrap(), status);
        }
        assert!(parse_status("Bogus").is_err());
    }

    #[test]
    fn test_direction_round_trip() {
        for direction in [OptionDirection::CE, OptionDirection::PE] {
            assert_eq!(
                parse_direction(direction.as_str()).unwrap(),
                direction
            );
        }
        assert!(parse_direction("XX").is_err());
    }
}
