// ==========================================
// 定制产品配置报价系统 - 配置模板仓储
// ==========================================
// 红线: Repository 不含业务逻辑
// ==========================================

use crate::db::open_sqlite_connection;
use crate::domain::snapshot::ConfigurationTemplate;
use crate::repository::error::{RepositoryError, RepositoryResult};
use rusqlite::{params, Connection};
use std::sync::{Arc, Mutex};

// ==========================================
// ConfigurationTemplateRepository - 配置模板仓储
// ==========================================
pub struct ConfigurationTemplateRepository {
    conn: Arc<Mutex<Connection>>,
}

impl ConfigurationTemplateRepository {
    /// 创建新的 ConfigurationTemplateRepository 实例
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

    /// 创建模板
    pub fn create(&self, template: &ConfigurationTemplate) -> RepositoryResult<String> {
        let conn = self.get_conn()?;

        conn.execute(
            r#"INSERT INTO configuration_template (
                template_id, manufacturing_type_id, name, preset_selections,
                is_active, created_at
            ) VALUES (?, ?, ?, ?, ?, ?)"#,
            params![
                &template.template_id,
                &template.manufacturing_type_id,
                &template.name,
                serde_json::to_string(&template.preset_selections)?,
                if template.is_active { 1 } else { 0 },
                template.created_at.to_rfc3339(),
            ],
        )?;

        Ok(template.template_id.clone())
    }

    /// 按 template_id 查询
    pub fn find_by_id(&self, template_id: &str) -> RepositoryResult<Option<ConfigurationTemplate>> {
        let conn = self.get_conn()?;

        match conn.query_row(
            r#"SELECT template_id, manufacturing_type_id, name, preset_selections,
                      is_active, created_at
               FROM configuration_template
               WHERE template_id = ?"#,
            params![template_id],
            map_row,
        ) {
            Ok(template) => Ok(Some(template)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// 查询类别下启用的模板
    pub fn list_active(
        &self,
        manufacturing_type_id: &str,
    ) -> RepositoryResult<Vec<ConfigurationTemplate>> {
        let conn = self.get_conn()?;

        let mut stmt = conn.prepare(
            r#"SELECT template_id, manufacturing_type_id, name, preset_selections,
                      is_active, created_at
               FROM configuration_template
               WHERE manufacturing_type_id = ? AND is_active = 1
               ORDER BY name"#,
        )?;

        let templates = stmt
            .query_map(params![manufacturing_type_id], map_row)?
            .collect::<Result<Vec<ConfigurationTemplate>, _>>()?;

        Ok(templates)
    }
}

/// 映射数据库行到 ConfigurationTemplate 对象
fn map_row(row: &rusqlite::Row) -> rusqlite::Result<ConfigurationTemplate> {
    let presets_raw: String = row.get(3)?;

    Ok(ConfigurationTemplate {
        template_id: row.get(0)?,
        manufacturing_type_id: row.get(1)?,
        name: row.get(2)?,
        preset_selections: serde_json::from_str(&presets_raw).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
        })?,
        is_active: row.get::<_, i32>(4)? == 1,
        created_at: crate::repository::manufacturing_type_repo::parse_utc(row, 5)?,
    })
}
