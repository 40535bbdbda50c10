// ==========================================
// 定制产品配置报价系统 - 配置与选择仓储
// ==========================================
// 红线: Repository 不含业务逻辑
// 红线: 聚合值写回必须带乐观锁检查 (revision)
// ==========================================

use crate::db::open_sqlite_connection;
use crate::domain::configuration::{Configuration, ConfigurationSelection, SelectionValue};
use crate::domain::node::NodePath;
use crate::domain::types::ConfigStatus;
use crate::repository::error::{RepositoryError, RepositoryResult};
use chrono::Utc;
use rusqlite::{params, Connection};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

/// 单项选择的计算影响（聚合写回时同事务更新）
#[derive(Debug, Clone)]
pub struct SelectionImpact {
    pub selection_id: String,
    pub price_impact: f64,
    pub weight_impact: f64,
}

// ==========================================
// ConfigurationRepository - 配置仓储
// ==========================================
pub struct ConfigurationRepository {
    conn: Arc<Mutex<Connection>>,
}

impl ConfigurationRepository {
    /// 创建新的 ConfigurationRepository 实例
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

    /// 创建配置
    pub fn create(&self, config: &Configuration) -> RepositoryResult<String> {
        let conn = self.get_conn()?;

        conn.execute(
            r#"INSERT INTO configuration (
                configuration_id, manufacturing_type_id, customer_id, name, status,
                base_price, total_price, calculated_weight, calculated_technical_data,
                revision, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
            params![
                &config.configuration_id,
                &config.manufacturing_type_id,
                &config.customer_id,
                &config.name,
                config.status.to_string(),
                &config.base_price,
                &config.total_price,
                &config.calculated_weight,
                serde_json::to_string(&config.calculated_technical_data)?,
                &config.revision,
                config.created_at.to_rfc3339(),
                config.updated_at.to_rfc3339(),
            ],
        )?;

        Ok(config.configuration_id.clone())
    }

    /// 按 configuration_id 查询
    pub fn find_by_id(&self, configuration_id: &str) -> RepositoryResult<Option<Configuration>> {
        let conn = self.get_conn()?;

        match conn.query_row(
            r#"SELECT configuration_id, manufacturing_type_id, customer_id, name, status,
                      base_price, total_price, calculated_weight, calculated_technical_data,
                      revision, created_at, updated_at
               FROM configuration
               WHERE configuration_id = ?"#,
            params![configuration_id],
            map_configuration_row,
        ) {
            Ok(config) => Ok(Some(config)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// 状态推进（单向性由引擎层校验后调用）
    pub fn update_status(
        &self,
        configuration_id: &str,
        status: ConfigStatus,
    ) -> RepositoryResult<()> {
        let conn = self.get_conn()?;

        let rows = conn.execute(
            "UPDATE configuration SET status = ?, updated_at = ? WHERE configuration_id = ?",
            params![status.to_string(), Utc::now().to_rfc3339(), configuration_id],
        )?;

        if rows == 0 {
            return Err(RepositoryError::NotFound {
                entity: "Configuration".to_string(),
                id: configuration_id.to_string(),
            });
        }

        Ok(())
    }

    /// 写回计算聚合值（带乐观锁检查, 与选择影响缓存同事务）
    ///
    /// # 并发控制
    /// 使用乐观锁 (revision 字段) 防止并发重算互相覆盖
    ///
    /// # 返回
    /// - Ok(new_revision): 写回成功后的新版本号
    ///
    /// # 错误
    /// - `RepositoryError::OptimisticLockFailure`: revision 不匹配（其他事务已更新）
    /// - `RepositoryError::NotFound`: configuration_id 不存在
    pub fn apply_calculation(
        &self,
        configuration_id: &str,
        expected_revision: i32,
        total_price: f64,
        calculated_weight: f64,
        technical_data: &BTreeMap<String, f64>,
        impacts: &[SelectionImpact],
    ) -> RepositoryResult<i32> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;

        let new_revision = write_aggregates(
            &tx,
            configuration_id,
            expected_revision,
            total_price,
            calculated_weight,
            technical_data,
            impacts,
        )?;

        tx.commit()?;
        Ok(new_revision)
    }

    /// 选择写入与聚合写回的原子组合: upsert 选择行 + 聚合值 + 影响缓存同事务
    ///
    /// 引擎基于含待写选择的内存视图预先完成推导;
    /// 推导一旦失败, 事务不会开启, 选择行不会落库。
    pub fn upsert_selection_with_calculation(
        &self,
        selection: &ConfigurationSelection,
        expected_revision: i32,
        total_price: f64,
        calculated_weight: f64,
        technical_data: &BTreeMap<String, f64>,
        impacts: &[SelectionImpact],
    ) -> RepositoryResult<i32> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;

        // 命中已有行时保留原 selection_id, 影响缓存随本语句一并写入
        tx.execute(
            r#"INSERT INTO configuration_selection (
                selection_id, configuration_id, attribute_node_id, value_json,
                calculated_price_impact, calculated_weight_impact, selection_path,
                created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (configuration_id, attribute_node_id) DO UPDATE SET
                value_json = excluded.value_json,
                calculated_price_impact = excluded.calculated_price_impact,
                calculated_weight_impact = excluded.calculated_weight_impact,
                selection_path = excluded.selection_path,
                updated_at = excluded.updated_at"#,
            params![
                &selection.selection_id,
                &selection.configuration_id,
                &selection.attribute_node_id,
                serde_json::to_string(&selection.value)?,
                &selection.calculated_price_impact,
                &selection.calculated_weight_impact,
                selection.selection_path.to_string(),
                selection.created_at.to_rfc3339(),
                selection.updated_at.to_rfc3339(),
            ],
        )?;

        let new_revision = write_aggregates(
            &tx,
            &selection.configuration_id,
            expected_revision,
            total_price,
            calculated_weight,
            technical_data,
            impacts,
        )?;

        tx.commit()?;
        Ok(new_revision)
    }

    /// 选择删除与聚合写回的原子组合
    pub fn delete_selection_with_calculation(
        &self,
        configuration_id: &str,
        attribute_node_id: &str,
        expected_revision: i32,
        total_price: f64,
        calculated_weight: f64,
        technical_data: &BTreeMap<String, f64>,
        impacts: &[SelectionImpact],
    ) -> RepositoryResult<i32> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;

        tx.execute(
            r#"DELETE FROM configuration_selection
               WHERE configuration_id = ? AND attribute_node_id = ?"#,
            params![configuration_id, attribute_node_id],
        )?;

        let new_revision = write_aggregates(
            &tx,
            configuration_id,
            expected_revision,
            total_price,
            calculated_weight,
            technical_data,
            impacts,
        )?;

        tx.commit()?;
        Ok(new_revision)
    }

}

/// 聚合值写回的事务体（乐观锁检查 + 影响缓存更新）
fn write_aggregates(
    tx: &rusqlite::Transaction,
    configuration_id: &str,
    expected_revision: i32,
    total_price: f64,
    calculated_weight: f64,
    technical_data: &BTreeMap<String, f64>,
    impacts: &[SelectionImpact],
) -> RepositoryResult<i32> {
    let now = Utc::now().to_rfc3339();

    // 1. 聚合值写回, 带 revision 检查
    let rows = tx.execute(
        r#"UPDATE configuration
           SET total_price = ?, calculated_weight = ?, calculated_technical_data = ?,
               revision = revision + 1, updated_at = ?
           WHERE configuration_id = ? AND revision = ?"#,
        params![
            total_price,
            calculated_weight,
            serde_json::to_string(technical_data)?,
            &now,
            configuration_id,
            expected_revision,
        ],
    )?;

    if rows == 0 {
        // 判断是记录不存在还是 revision 冲突
        let exists: Result<i32, _> = tx.query_row(
            "SELECT revision FROM configuration WHERE configuration_id = ?",
            params![configuration_id],
            |row| row.get(0),
        );

        return match exists {
            Ok(actual_revision) => Err(RepositoryError::OptimisticLockFailure {
                configuration_id: configuration_id.to_string(),
                expected: expected_revision,
                actual: actual_revision,
            }),
            Err(_) => Err(RepositoryError::NotFound {
                entity: "Configuration".to_string(),
                id: configuration_id.to_string(),
            }),
        };
    }

    // 2. 同事务更新各选择的影响缓存
    for impact in impacts {
        tx.execute(
            r#"UPDATE configuration_selection
               SET calculated_price_impact = ?, calculated_weight_impact = ?, updated_at = ?
               WHERE selection_id = ?"#,
            params![
                impact.price_impact,
                impact.weight_impact,
                &now,
                &impact.selection_id,
            ],
        )?;
    }

    Ok(expected_revision + 1)
}

/// 映射数据库行到 Configuration 对象
fn map_configuration_row(row: &rusqlite::Row) -> rusqlite::Result<Configuration> {
    let status_raw: String = row.get(4)?;
    let technical_raw: String = row.get(8)?;

    Ok(Configuration {
        configuration_id: row.get(0)?,
        manufacturing_type_id: row.get(1)?,
        customer_id: row.get(2)?,
        name: row.get(3)?,
        status: ConfigStatus::parse(&status_raw).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                4,
                rusqlite::types::Type::Text,
                format!("非法配置状态: {}", status_raw).into(),
            )
        })?,
        base_price: row.get(5)?,
        total_price: row.get(6)?,
        calculated_weight: row.get(7)?,
        calculated_technical_data: serde_json::from_str(&technical_raw).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(8, rusqlite::types::Type::Text, Box::new(e))
        })?,
        revision: row.get(9)?,
        created_at: crate::repository::manufacturing_type_repo::parse_utc(row, 10)?,
        updated_at: crate::repository::manufacturing_type_repo::parse_utc(row, 11)?,
    })
}

// ==========================================
// SelectionRepository - 选择 (EAV) 仓储
// ==========================================
// 约束: (configuration_id, attribute_node_id) 唯一
pub struct SelectionRepository {
    conn: Arc<Mutex<Connection>>,
}

impl SelectionRepository {
    /// 创建新的 SelectionRepository 实例
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

    /// 插入或更新选择（同节点重复提交按更新处理）
    pub fn upsert(&self, selection: &ConfigurationSelection) -> RepositoryResult<()> {
        let conn = self.get_conn()?;

        conn.execute(
            r#"INSERT INTO configuration_selection (
                selection_id, configuration_id, attribute_node_id, value_json,
                calculated_price_impact, calculated_weight_impact, selection_path,
                created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (configuration_id, attribute_node_id) DO UPDATE SET
                value_json = excluded.value_json,
                selection_path = excluded.selection_path,
                updated_at = excluded.updated_at"#,
            params![
                &selection.selection_id,
                &selection.configuration_id,
                &selection.attribute_node_id,
                serde_json::to_string(&selection.value)?,
                &selection.calculated_price_impact,
                &selection.calculated_weight_impact,
                selection.selection_path.to_string(),
                selection.created_at.to_rfc3339(),
                selection.updated_at.to_rfc3339(),
            ],
        )?;

        Ok(())
    }

    /// 查询配置的全部选择
    pub fn find_by_configuration(
        &self,
        configuration_id: &str,
    ) -> RepositoryResult<Vec<ConfigurationSelection>> {
        let conn = self.get_conn()?;

        let mut stmt = conn.prepare(
            r#"SELECT selection_id, configuration_id, attribute_node_id, value_json,
                      calculated_price_impact, calculated_weight_impact, selection_path,
                      created_at, updated_at
               FROM configuration_selection
               WHERE configuration_id = ?
               ORDER BY selection_path"#,
        )?;

        let selections = stmt
            .query_map(params![configuration_id], map_selection_row)?
            .collect::<Result<Vec<ConfigurationSelection>, _>>()?;

        Ok(selections)
    }

    /// 查询单个节点的选择
    pub fn find_one(
        &self,
        configuration_id: &str,
        attribute_node_id: &str,
    ) -> RepositoryResult<Option<ConfigurationSelection>> {
        let conn = self.get_conn()?;

        match conn.query_row(
            r#"SELECT selection_id, configuration_id, attribute_node_id, value_json,
                      calculated_price_impact, calculated_weight_impact, selection_path,
                      created_at, updated_at
               FROM configuration_selection
               WHERE configuration_id = ? AND attribute_node_id = ?"#,
            params![configuration_id, attribute_node_id],
            map_selection_row,
        ) {
            Ok(selection) => Ok(Some(selection)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

}

/// 映射数据库行到 ConfigurationSelection 对象
fn map_selection_row(row: &rusqlite::Row) -> rusqlite::Result<ConfigurationSelection> {
    let value_raw: String = row.get(3)?;
    let value: SelectionValue = serde_json::from_str(&value_raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(ConfigurationSelection {
        selection_id: row.get(0)?,
        configuration_id: row.get(1)?,
        attribute_node_id: row.get(2)?,
        value,
        calculated_price_impact: row.get(4)?,
        calculated_weight_impact: row.get(5)?,
        selection_path: NodePath::parse(&row.get::<_, String>(6)?),
        created_at: crate::repository::manufacturing_type_repo::parse_utc(row, 7)?,
        updated_at: crate::repository::manufacturing_type_repo::parse_utc(row, 8)?,
    })
}
