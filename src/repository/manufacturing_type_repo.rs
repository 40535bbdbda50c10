// ==========================================
// 定制产品配置报价系统 - 产品类别仓储
// ==========================================
// 红线: Repository 不含业务逻辑
// ==========================================

use crate::db::open_sqlite_connection;
use crate::domain::node::ManufacturingType;
use crate::repository::error::{RepositoryError, RepositoryResult};
use rusqlite::{params, Connection};
use std::sync::{Arc, Mutex};

// ==========================================
// ManufacturingTypeRepository - 产品类别仓储
// ==========================================
pub struct ManufacturingTypeRepository {
    conn: Arc<Mutex<Connection>>,
}

impl ManufacturingTypeRepository {
    /// 创建新的 ManufacturingTypeRepository 实例
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

    /// 创建产品类别
    pub fn create(&self, mt: &ManufacturingType) -> RepositoryResult<String> {
        let conn = self.get_conn()?;

        conn.execute(
            r#"INSERT INTO manufacturing_type (
                type_id, name, base_price, base_weight, is_active,
                created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?)"#,
            params![
                &mt.type_id,
                &mt.name,
                &mt.base_price,
                &mt.base_weight,
                if mt.is_active { 1 } else { 0 },
                mt.created_at.to_rfc3339(),
                mt.updated_at.to_rfc3339(),
            ],
        )?;

        Ok(mt.type_id.clone())
    }

    /// 按 type_id 查询
    pub fn find_by_id(&self, type_id: &str) -> RepositoryResult<Option<ManufacturingType>> {
        let conn = self.get_conn()?;

        match conn.query_row(
            r#"SELECT type_id, name, base_price, base_weight, is_active,
                      created_at, updated_at
               FROM manufacturing_type
               WHERE type_id = ?"#,
            params![type_id],
            map_row,
        ) {
            Ok(mt) => Ok(Some(mt)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// 查询所有启用的产品类别
    pub fn list_active(&self) -> RepositoryResult<Vec<ManufacturingType>> {
        let conn = self.get_conn()?;

        let mut stmt = conn.prepare(
            r#"SELECT type_id, name, base_price, base_weight, is_active,
                      created_at, updated_at
               FROM manufacturing_type
               WHERE is_active = 1
               ORDER BY name"#,
        )?;

        let types = stmt
            .query_map([], map_row)?
            .collect::<Result<Vec<ManufacturingType>, _>>()?;

        Ok(types)
    }

    /// 更新产品类别（基准价/重量变更不影响既有快照）
    pub fn update(&self, mt: &ManufacturingType) -> RepositoryResult<()> {
        let conn = self.get_conn()?;

        let rows = conn.execute(
            r#"UPDATE manufacturing_type
               SET name = ?, base_price = ?, base_weight = ?, is_active = ?,
                   updated_at = ?
               WHERE type_id = ?"#,
            params![
                &mt.name,
                &mt.base_price,
                &mt.base_weight,
                if mt.is_active { 1 } else { 0 },
                mt.updated_at.to_rfc3339(),
                &mt.type_id,
            ],
        )?;

        if rows == 0 {
            return Err(RepositoryError::NotFound {
                entity: "ManufacturingType".to_string(),
                id: mt.type_id.clone(),
            });
        }

        Ok(())
    }
}

/// 映射数据库行到 ManufacturingType 对象
fn map_row(row: &rusqlite::Row) -> rusqlite::Result<ManufacturingType> {
    Ok(ManufacturingType {
        type_id: row.get(0)?,
        name: row.get(1)?,
        base_price: row.get(2)?,
        base_weight: row.get(3)?,
        is_active: row.get::<_, i32>(4)? == 1,
        created_at: parse_utc(row, 5)?,
        updated_at: parse_utc(row, 6)?,
    })
}

/// 解析 RFC3339 时间列
pub(crate) fn parse_utc(
    row: &rusqlite::Row,
    idx: usize,
) -> rusqlite::Result<chrono::DateTime<chrono::Utc>> {
    let raw: String = row.get(idx)?;
    raw.parse::<chrono::DateTime<chrono::Utc>>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}
