//! Persistence model (C8): read-mostly reference data plus the write-heavy
//! audit stream. A single `rusqlite::Connection` guarded by a
//! `parking_lot::Mutex` stands in for a connection pool at this scale —
//! exactly the guard the teacher's own storage layer uses around its
//! connection — with lock-acquisition bounded by a timeout rather than a
//! literal pool of connections.

use crate::domain::{BrokerConfig, FeeType, LendStatus, Security};
use anyhow::{Context, Result};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use rusqlite::{params, Connection, OptionalExtension};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA cache_size = -16000;
PRAGMA temp_store = MEMORY;

CREATE TABLE IF NOT EXISTS securities (
    ticker TEXT PRIMARY KEY,
    lend_status TEXT NOT NULL,
    min_borrow_rate TEXT NOT NULL,
    last_updated TEXT NOT NULL
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS broker_configs (
    client_id TEXT PRIMARY KEY,
    markup_pct TEXT NOT NULL,
    fee_type TEXT NOT NULL,
    fee_amount TEXT NOT NULL,
    active INTEGER NOT NULL,
    last_updated TEXT NOT NULL
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS min_borrow_rates (
    ticker TEXT PRIMARY KEY,
    min_rate TEXT NOT NULL,
    last_updated TEXT NOT NULL
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS audit_records (
    record_id INTEGER NOT NULL,
    partition TEXT NOT NULL,
    timestamp TEXT NOT NULL,
    prev_hash TEXT NOT NULL,
    self_hash TEXT NOT NULL,
    payload_json TEXT NOT NULL,
    PRIMARY KEY (partition, record_id)
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_audit_partition_record
    ON audit_records(partition, record_id);
"#;

pub struct Db {
    conn: Arc<Mutex<Connection>>,
}

impl Db {
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path).context("opening sqlite database")?;
        conn.execute_batch(SCHEMA_SQL).context("applying schema")?;
        Ok(Db {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn get_security(&self, ticker: &str) -> Result<Option<Security>> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT ticker, lend_status, min_borrow_rate FROM securities WHERE ticker = ?1",
                params![ticker],
                |row| {
                    let ticker: String = row.get(0)?;
                    let lend_status: String = row.get(1)?;
                    let min_borrow_rate: String = row.get(2)?;
                    Ok((ticker, lend_status, min_borrow_rate))
                },
            )
            .optional()
            .context("querying security")?;

        Ok(row.map(|(ticker, lend_status, min_borrow_rate)| Security {
            ticker,
            lend_status: match lend_status.as_str() {
                "EASY" => LendStatus::Easy,
                "HARD" => LendStatus::Hard,
                _ => LendStatus::Medium,
            },
            min_borrow_rate: Decimal::from_str(&min_borrow_rate).unwrap_or(Decimal::ZERO),
        }))
    }

    pub fn upsert_min_borrow_rate(&self, ticker: &str, min_rate: Decimal) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO min_borrow_rates (ticker, min_rate, last_updated)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(ticker) DO UPDATE SET
                min_rate = excluded.min_rate,
                last_updated = excluded.last_updated",
            params![ticker, min_rate.to_string(), chrono::Utc::now().to_rfc3339()],
        )
        .context("upserting min borrow rate")?;
        Ok(())
    }

    pub fn get_min_borrow_rate(&self, ticker: &str) -> Result<Option<Decimal>> {
        let conn = self.conn.lock();
        let value: Option<String> = conn
            .query_row(
                "SELECT min_rate FROM min_borrow_rates WHERE ticker = ?1",
                params![ticker],
                |row| row.get(0),
            )
            .optional()
            .context("querying min borrow rate")?;
        Ok(value.and_then(|v| Decimal::from_str(&v).ok()))
    }

    pub fn get_broker_config(&self, client_id: &str) -> Result<Option<BrokerConfig>> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT client_id, markup_pct, fee_type, fee_amount, active
                 FROM broker_configs WHERE client_id = ?1",
                params![client_id],
                |row| {
                    let client_id: String = row.get(0)?;
                    let markup_pct: String = row.get(1)?;
                    let fee_type: String = row.get(2)?;
                    let fee_amount: String = row.get(3)?;
                    let active: i64 = row.get(4)?;
                    Ok((client_id, markup_pct, fee_type, fee_amount, active))
                },
            )
            .optional()
            .context("querying broker config")?;

        Ok(row.map(
            |(client_id, markup_pct, fee_type, fee_amount, active)| BrokerConfig {
                client_id,
                markup_pct: Decimal::from_str(&markup_pct).unwrap_or(Decimal::ZERO),
                fee_type: if fee_type == "FLAT" {
                    FeeType::Flat
                } else {
                    FeeType::Percentage
                },
                fee_amount: Decimal::from_str(&fee_amount).unwrap_or(Decimal::ZERO),
                active: active != 0,
            },
        ))
    }

    pub fn upsert_security(&self, security: &Security) -> Result<()> {
        let conn = self.conn.lock();
        let status = match security.lend_status {
            LendStatus::Easy => "EASY",
            LendStatus::Medium => "MEDIUM",
            LendStatus::Hard => "HARD",
        };
        conn.execute(
            "INSERT INTO securities (ticker, lend_status, min_borrow_rate, last_updated)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(ticker) DO UPDATE SET
                lend_status = excluded.lend_status,
                min_borrow_rate = excluded.min_borrow_rate,
                last_updated = excluded.last_updated",
            params![
                security.ticker,
                status,
                security.min_borrow_rate.to_string(),
                chrono::Utc::now().to_rfc3339(),
            ],
        )
        .context("upserting security")?;
        Ok(())
    }

    pub fn upsert_broker_config(&self, config: &BrokerConfig) -> Result<()> {
        let conn = self.conn.lock();
        let fee_type = match config.fee_type {
            FeeType::Flat => "FLAT",
            FeeType::Percentage => "PERCENTAGE",
        };
        conn.execute(
            "INSERT INTO broker_configs
                (client_id, markup_pct, fee_type, fee_amount, active, last_updated)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(client_id) DO UPDATE SET
                markup_pct = excluded.markup_pct,
                fee_type = excluded.fee_type,
                fee_amount = excluded.fee_amount,
                active = excluded.active,
                last_updated = excluded.last_updated",
            params![
                config.client_id,
                config.markup_pct.to_string(),
                fee_type,
                config.fee_amount.to_string(),
                config.active as i64,
                chrono::Utc::now().to_rfc3339(),
            ],
        )
        .context("upserting broker config")?;
        Ok(())
    }

    /// Allocates the next `record_id` for `partition`, reads the current
    /// chain head, lets `build` compute the record's hash from them, and
    /// inserts the row — all under one lock acquisition bounded by
    /// `deadline` (§5: "audit 1 s"). This is what makes the hash chain's
    /// "sequential within a partition" guarantee hold under concurrent
    /// requests: allocating the id and reading the chain head as separate
    /// lock acquisitions would let two callers observe the same
    /// `(record_id, prev_hash)` pair before either writes.
    pub fn append_audit_record<F>(
        &self,
        partition: &str,
        deadline: Duration,
        build: F,
    ) -> Result<(i64, String, String)>
    where
        F: FnOnce(i64, &str) -> Result<(String, String, String)>,
    {
        let conn = self
            .conn
            .try_lock_for(deadline)
            .context("audit lock acquisition timed out")?;
        let max_id: Option<i64> = conn
            .query_row(
                "SELECT MAX(record_id) FROM audit_records WHERE partition = ?1",
                params![partition],
                |row| row.get(0),
            )
            .optional()
            .context("querying max record id")?
            .flatten();
        let record_id = max_id.unwrap_or(0) + 1;

        let prev_hash: Option<String> = conn
            .query_row(
                "SELECT self_hash FROM audit_records
                 WHERE partition = ?1 ORDER BY record_id DESC LIMIT 1",
                params![partition],
                |row| row.get(0),
            )
            .optional()
            .context("querying latest audit hash")?;
        let prev_hash = prev_hash.unwrap_or_else(|| "GENESIS".to_string());

        let (timestamp, self_hash, payload_json) = build(record_id, &prev_hash)?;

        conn.execute(
            "INSERT INTO audit_records
                (record_id, partition, timestamp, prev_hash, self_hash, payload_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![record_id, partition, &timestamp, &prev_hash, &self_hash, &payload_json],
        )
        .context("inserting audit record")?;

        Ok((record_id, prev_hash, self_hash))
    }

    pub fn latest_audit_hash(&self, partition: &str) -> Result<Option<String>> {
        let conn = self.conn.lock();
        let hash: Option<String> = conn
            .query_row(
                "SELECT self_hash FROM audit_records
                 WHERE partition = ?1 ORDER BY record_id DESC LIMIT 1",
                params![partition],
                |row| row.get(0),
            )
            .optional()
            .context("querying latest audit hash")?;
        Ok(hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_security_and_broker_config() {
        let db = Db::open(":memory:").unwrap();
        db.upsert_security(&Security {
            ticker: "AAPL".into(),
            lend_status: LendStatus::Easy,
            min_borrow_rate: Decimal::from_str("0.01").unwrap(),
        })
        .unwrap();
        let security = db.get_security("AAPL").unwrap().unwrap();
        assert_eq!(security.ticker, "AAPL");

        db.upsert_broker_config(&BrokerConfig {
            client_id: "client-1".into(),
            markup_pct: Decimal::from_str("0.05").unwrap(),
            fee_type: FeeType::Flat,
            fee_amount: Decimal::from_str("25.00").unwrap(),
            active: true,
        })
        .unwrap();
        let config = db.get_broker_config("client-1").unwrap().unwrap();
        assert!(config.active);
    }

    #[test]
    fn min_borrow_rate_round_trips_independently_of_securities() {
        let db = Db::open(":memory:").unwrap();
        assert!(db.get_min_borrow_rate("GME").unwrap().is_none());
        db.upsert_min_borrow_rate("GME", Decimal::from_str("0.30").unwrap())
            .unwrap();
        assert_eq!(
            db.get_min_borrow_rate("GME").unwrap(),
            Some(Decimal::from_str("0.30").unwrap())
        );
    }
}
