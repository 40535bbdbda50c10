// ==========================================
// 定制产品配置报价系统 - 快照与报价仓储
// ==========================================
// 红线: configuration_snapshot 只追加 —
//       本仓储不提供任何 UPDATE/DELETE 方法, 价格保护依赖此约束
// 红线: 报价与快照的创建必须在同一事务内完成
// ==========================================

use crate::db::open_sqlite_connection;
use crate::domain::snapshot::{ConfigurationSnapshot, Quote};
use crate::domain::types::{ConfigStatus, QuoteStatus, SnapshotType};
use crate::repository::error::{RepositoryError, RepositoryResult};
use chrono::{NaiveDate, Utc};
use rusqlite::{params, Connection};
use std::sync::{Arc, Mutex};

const SNAPSHOT_COLUMNS: &str = r#"snapshot_id, configuration_id, quote_id,
    base_price, total_price, price_breakdown, weight_breakdown, technical_snapshot,
    snapshot_type, valid_until, created_at"#;

// ==========================================
// SnapshotRepository - 配置快照仓储（只追加）
// ==========================================
pub struct SnapshotRepository {
    conn: Arc<Mutex<Connection>>,
}

impl SnapshotRepository {
    /// 创建新的 SnapshotRepository 实例
    pub fn new(db_path: &str) -> RepositoryResult<Self> {
        let conn = open_sqlite_connection(db_path)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 从已有连接创建仓储实例
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// 获取数据库连接
    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 追加快照
    pub fn append(&self, snapshot: &ConfigurationSnapshot) -> RepositoryResult<String> {
        let conn = self.get_conn()?;
        insert_snapshot(&conn, snapshot)?;
        Ok(snapshot.snapshot_id.clone())
    }

    /// 原子追加快照并推进配置状态（订单确认快照使用）
    pub fn append_with_status(
        &self,
        snapshot: &ConfigurationSnapshot,
        new_status: ConfigStatus,
    ) -> RepositoryResult<String> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;

        insert_snapshot(&tx, snapshot)?;
        tx.execute(
            "UPDATE configuration SET status = ?, updated_at = ? WHERE configuration_id = ?",
            params![
                new_status.to_string(),
                Utc::now().to_rfc3339(),
                &snapshot.configuration_id,
            ],
        )?;

        tx.commit()?;
        Ok(snapshot.snapshot_id.clone())
    }

    /// 按 snapshot_id 查询
    pub fn find_by_id(&self, snapshot_id: &str) -> RepositoryResult<Option<ConfigurationSnapshot>> {
        let conn = self.get_conn()?;

        match conn.query_row(
            &format!(
                "SELECT {} FROM configuration_snapshot WHERE snapshot_id = ?",
                SNAPSHOT_COLUMNS
            ),
            params![snapshot_id],
            map_snapshot_row,
        ) {
            Ok(snapshot) => Ok(Some(snapshot)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// 查询配置的全部快照（按时间降序）
    pub fn find_by_configuration(
        &self,
        configuration_id: &str,
    ) -> RepositoryResult<Vec<ConfigurationSnapshot>> {
        let conn = self.get_conn()?;

        let mut stmt = conn.prepare(&format!(
            r#"SELECT {} FROM configuration_snapshot
               WHERE configuration_id = ?
               ORDER BY created_at DESC"#,
            SNAPSHOT_COLUMNS
        ))?;

        let snapshots = stmt
            .query_map(params![configuration_id], map_snapshot_row)?
            .collect::<Result<Vec<ConfigurationSnapshot>, _>>()?;

        Ok(snapshots)
    }
}

// ==========================================
// QuoteRepository - 报价仓储
// ==========================================
pub struct QuoteRepository {
    conn: Arc<Mutex<Connection>>,
}

impl QuoteRepository {
    /// 创建新的 QuoteRepository 实例
    pub fn new(db_path: &str) -> RepositoryResult<Self> {
        let conn = open_sqlite_connection(db_path)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 从已有连接创建仓储实例
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// 获取数据库连接
    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 原子创建报价 + 快照, 并推进配置状态
    ///
    /// # 红线
    /// - 报价与快照要么同时存在, 要么都不存在;
    ///   并发读取者不可能观察到指向未提交快照的报价行
    ///
    /// # 参数
    /// - quote: 报价单（snapshot_id 须等于 snapshot.snapshot_id）
    /// - snapshot: 冻结快照（quote_id 须等于 quote.quote_id）
    /// - new_status: 配置状态推进目标（报价 -> QUOTED, 订单确认 -> ORDERED）
    pub fn create_with_snapshot(
        &self,
        quote: &Quote,
        snapshot: &ConfigurationSnapshot,
        new_status: ConfigStatus,
    ) -> RepositoryResult<String> {
        // 互链校验: 两行必须彼此引用
        if quote.snapshot_id.as_deref() != Some(snapshot.snapshot_id.as_str())
            || snapshot.quote_id.as_deref() != Some(quote.quote_id.as_str())
        {
            return Err(RepositoryError::FieldValueError {
                field: "snapshot_id".to_string(),
                message: "报价与快照必须互相链接".to_string(),
            });
        }

        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;

        insert_snapshot(&tx, snapshot)?;

        tx.execute(
            r#"INSERT INTO quote (
                quote_id, configuration_id, customer_id, quote_no,
                subtotal, tax_amount, discount_amount, total,
                status, valid_until, snapshot_id, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
            params![
                &quote.quote_id,
                &quote.configuration_id,
                &quote.customer_id,
                &quote.quote_no,
                &quote.subtotal,
                &quote.tax_amount,
                &quote.discount_amount,
                &quote.total,
                quote.status.to_string(),
                quote.valid_until.map(|d| d.format("%Y-%m-%d").to_string()),
                &quote.snapshot_id,
                quote.created_at.to_rfc3339(),
            ],
        )?;

        tx.execute(
            "UPDATE configuration SET status = ?, updated_at = ? WHERE configuration_id = ?",
            params![
                new_status.to_string(),
                Utc::now().to_rfc3339(),
                &quote.configuration_id,
            ],
        )?;

        tx.commit()?;
        Ok(quote.quote_id.clone())
    }

    /// 按 quote_id 查询
    pub fn find_by_id(&self, quote_id: &str) -> RepositoryResult<Option<Quote>> {
        let conn = self.get_conn()?;

        match conn.query_row(
            r#"SELECT quote_id, configuration_id, customer_id, quote_no,
                      subtotal, tax_amount, discount_amount, total,
                      status, valid_until, snapshot_id, created_at
               FROM quote
               WHERE quote_id = ?"#,
            params![quote_id],
            map_quote_row,
        ) {
            Ok(quote) => Ok(Some(quote)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// 将有效期已过的 ISSUED 报价批量置为 EXPIRED
    ///
    /// # 说明
    /// - 只改报价状态, 绝不触碰快照行
    /// - valid_until 为 NULL 的报价视为长期有效, 跳过
    pub fn expire_quotes(&self, today: NaiveDate) -> RepositoryResult<usize> {
        let conn = self.get_conn()?;

        let rows = conn.execute(
            r#"UPDATE quote
               SET status = 'EXPIRED'
               WHERE status = 'ISSUED'
                 AND valid_until IS NOT NULL
                 AND valid_until < ?"#,
            params![today.format("%Y-%m-%d").to_string()],
        )?;

        Ok(rows)
    }

    /// 报价被客户接受
    pub fn mark_accepted(&self, quote_id: &str) -> RepositoryResult<()> {
        let conn = self.get_conn()?;

        let rows = conn.execute(
            "UPDATE quote SET status = 'ACCEPTED' WHERE quote_id = ? AND status = 'ISSUED'",
            params![quote_id],
        )?;

        if rows == 0 {
            return Err(RepositoryError::NotFound {
                entity: "Quote".to_string(),
                id: quote_id.to_string(),
            });
        }

        Ok(())
    }
}

/// 插入快照行（append / create_with_snapshot 共用）
fn insert_snapshot(conn: &Connection, snapshot: &ConfigurationSnapshot) -> RepositoryResult<()> {
    conn.execute(
        r#"INSERT INTO configuration_snapshot (
            snapshot_id, configuration_id, quote_id,
            base_price, total_price, price_breakdown, weight_breakdown, technical_snapshot,
            snapshot_type, valid_until, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        params![
            &snapshot.snapshot_id,
            &snapshot.configuration_id,
            &snapshot.quote_id,
            &snapshot.base_price,
            &snapshot.total_price,
            serde_json::to_string(&snapshot.price_breakdown)?,
            serde_json::to_string(&snapshot.weight_breakdown)?,
            serde_json::to_string(&snapshot.technical_snapshot)?,
            snapshot.snapshot_type.to_string(),
            snapshot.valid_until.map(|d| d.format("%Y-%m-%d").to_string()),
            snapshot.created_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

/// 映射数据库行到 ConfigurationSnapshot 对象
fn map_snapshot_row(row: &rusqlite::Row) -> rusqlite::Result<ConfigurationSnapshot> {
    let type_raw: String = row.get(8)?;

    Ok(ConfigurationSnapshot {
        snapshot_id: row.get(0)?,
        configuration_id: row.get(1)?,
        quote_id: row.get(2)?,
        base_price: row.get(3)?,
        total_price: row.get(4)?,
        price_breakdown: parse_json(row, 5)?,
        weight_breakdown: parse_json(row, 6)?,
        technical_snapshot: parse_json(row, 7)?,
        snapshot_type: SnapshotType::parse(&type_raw).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                8,
                rusqlite::types::Type::Text,
                format!("非法快照类型: {}", type_raw).into(),
            )
        })?,
        valid_until: row
            .get::<_, Option<String>>(9)?
            .and_then(|s| NaiveDate::parse_from_str(&s, "%Y-%m-%d").ok()),
        created_at: crate::repository::manufacturing_type_repo::parse_utc(row, 10)?,
    })
}

/// 映射数据库行到 Quote 对象
fn map_quote_row(row: &rusqlite::Row) -> rusqlite::Result<Quote> {
    let status_raw: String = row.get(8)?;

    Ok(Quote {
        quote_id: row.get(0)?,
        configuration_id: row.get(1)?,
        customer_id: row.get(2)?,
        quote_no: row.get(3)?,
        subtotal: row.get(4)?,
        tax_amount: row.get(5)?,
        discount_amount: row.get(6)?,
        total: row.get(7)?,
        status: QuoteStatus::parse(&status_raw).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                8,
                rusqlite::types::Type::Text,
                format!("非法报价状态: {}", status_raw).into(),
            )
        })?,
        valid_until: row
            .get::<_, Option<String>>(9)?
            .and_then(|s| NaiveDate::parse_from_str(&s, "%Y-%m-%d").ok()),
        snapshot_id: row.get(10)?,
        created_at: crate::repository::manufacturing_type_repo::parse_utc(row, 11)?,
    })
}

/// 解析 JSON map 列
fn parse_json(
    row: &rusqlite::Row,
    idx: usize,
) -> rusqlite::Result<std::collections::BTreeMap<String, f64>> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}
