// ==========================================
// 定制产品配置报价系统 - 属性树节点仓储
// ==========================================
// 红线: Repository 不含业务逻辑（路径计算/环检测由 HierarchyEngine 负责）
// 红线: 子树路径改写必须在单一事务内完成
// ==========================================

use crate::db::open_sqlite_connection;
use crate::domain::node::{AttributeNode, NodePath};
use crate::domain::types::{DataType, NodeType, PriceImpactType};
use crate::repository::error::{RepositoryError, RepositoryResult};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use std::sync::{Arc, Mutex};

const NODE_COLUMNS: &str = r#"node_id, manufacturing_type_id, parent_id, name,
    node_type, data_type, price_impact_type, price_impact_value, price_formula,
    weight_impact, weight_formula, technical_impact_formula,
    display_condition, validation_rules, path, depth, sort_order,
    created_at, updated_at"#;

/// LIKE 模式转义（下划线/百分号是 LIKE 通配符, 净化段中的下划线需转义）
fn like_escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}

// ==========================================
// AttributeNodeRepository - 属性树节点仓储
// ==========================================
pub struct AttributeNodeRepository {
    conn: Arc<Mutex<Connection>>,
}

impl AttributeNodeRepository {
    /// 创建新的 AttributeNodeRepository 实例
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

    /// 插入节点（path/depth 由引擎预先计算）
    pub fn insert(&self, node: &AttributeNode) -> RepositoryResult<String> {
        let conn = self.get_conn()?;

        conn.execute(
            r#"INSERT INTO attribute_node (
                node_id, manufacturing_type_id, parent_id, name,
                node_type, data_type, price_impact_type, price_impact_value, price_formula,
                weight_impact, weight_formula, technical_impact_formula,
                display_condition, validation_rules, path, depth, sort_order,
                created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
            params![
                &node.node_id,
                &node.manufacturing_type_id,
                &node.parent_id,
                &node.name,
                node.node_type.to_string(),
                node.data_type.to_string(),
                node.price_impact_type.to_string(),
                &node.price_impact_value,
                &node.price_formula,
                &node.weight_impact,
                &node.weight_formula,
                &node.technical_impact_formula,
                node.display_condition
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?,
                node.validation_rules
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?,
                node.path.to_string(),
                &node.depth,
                &node.sort_order,
                node.created_at.to_rfc3339(),
                node.updated_at.to_rfc3339(),
            ],
        )?;

        Ok(node.node_id.clone())
    }

    /// 按 node_id 查询节点
    pub fn find_by_id(&self, node_id: &str) -> RepositoryResult<Option<AttributeNode>> {
        let conn = self.get_conn()?;

        match conn.query_row(
            &format!("SELECT {} FROM attribute_node WHERE node_id = ?", NODE_COLUMNS),
            params![node_id],
            map_row,
        ) {
            Ok(node) => Ok(Some(node)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// 查询直接子节点
    pub fn find_children(&self, parent_id: &str) -> RepositoryResult<Vec<AttributeNode>> {
        let conn = self.get_conn()?;

        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM attribute_node WHERE parent_id = ? ORDER BY sort_order, name",
            NODE_COLUMNS
        ))?;

        let nodes = stmt
            .query_map(params![parent_id], map_row)?
            .collect::<Result<Vec<AttributeNode>, _>>()?;

        Ok(nodes)
    }

    /// 查询类别树的根节点
    pub fn find_roots(&self, manufacturing_type_id: &str) -> RepositoryResult<Vec<AttributeNode>> {
        let conn = self.get_conn()?;

        let mut stmt = conn.prepare(&format!(
            r#"SELECT {} FROM attribute_node
               WHERE manufacturing_type_id = ? AND parent_id IS NULL
               ORDER BY sort_order, name"#,
            NODE_COLUMNS
        ))?;

        let nodes = stmt
            .query_map(params![manufacturing_type_id], map_row)?
            .collect::<Result<Vec<AttributeNode>, _>>()?;

        Ok(nodes)
    }

    /// 查询类别树的全部节点
    pub fn find_by_type(&self, manufacturing_type_id: &str) -> RepositoryResult<Vec<AttributeNode>> {
        let conn = self.get_conn()?;

        let mut stmt = conn.prepare(&format!(
            r#"SELECT {} FROM attribute_node
               WHERE manufacturing_type_id = ?
               ORDER BY path"#,
            NODE_COLUMNS
        ))?;

        let nodes = stmt
            .query_map(params![manufacturing_type_id], map_row)?
            .collect::<Result<Vec<AttributeNode>, _>>()?;

        Ok(nodes)
    }

    /// 按精确路径查询节点（路径仅在类别树内唯一）
    pub fn find_by_path(
        &self,
        manufacturing_type_id: &str,
        path: &NodePath,
    ) -> RepositoryResult<Option<AttributeNode>> {
        let conn = self.get_conn()?;

        match conn.query_row(
            &format!(
                "SELECT {} FROM attribute_node WHERE manufacturing_type_id = ? AND path = ?",
                NODE_COLUMNS
            ),
            params![manufacturing_type_id, path.to_string()],
            map_row,
        ) {
            Ok(node) => Ok(Some(node)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// 按路径前缀查询严格后代（不含前缀节点自身）
    ///
    /// # 参数
    /// - manufacturing_type_id: 所属类别（路径仅在类别树内唯一）
    /// - prefix: 祖先路径
    pub fn find_descendants_by_prefix(
        &self,
        manufacturing_type_id: &str,
        prefix: &NodePath,
    ) -> RepositoryResult<Vec<AttributeNode>> {
        let conn = self.get_conn()?;

        let mut stmt = conn.prepare(&format!(
            r#"SELECT {} FROM attribute_node
               WHERE manufacturing_type_id = ?
                 AND path LIKE ? ESCAPE '\'
               ORDER BY path"#,
            NODE_COLUMNS
        ))?;

        let pattern = format!("{}/%", like_escape(&prefix.to_string()));
        let nodes = stmt
            .query_map(params![manufacturing_type_id, pattern], map_row)?
            .collect::<Result<Vec<AttributeNode>, _>>()?;

        Ok(nodes)
    }

    /// 统计路径前缀下的节点数（含前缀节点自身）
    pub fn count_by_prefix(
        &self,
        manufacturing_type_id: &str,
        prefix: &NodePath,
    ) -> RepositoryResult<i64> {
        let conn = self.get_conn()?;

        let pattern = format!("{}/%", like_escape(&prefix.to_string()));
        let count: i64 = conn.query_row(
            r#"SELECT COUNT(*) FROM attribute_node
               WHERE manufacturing_type_id = ?
                 AND (path = ? OR path LIKE ? ESCAPE '\')"#,
            params![manufacturing_type_id, prefix.to_string(), pattern],
            |row| row.get(0),
        )?;

        Ok(count)
    }

    /// 更新节点业务字段（不改变 parent/path/depth; 移动与重命名走专用方法）
    pub fn update_fields(&self, node: &AttributeNode) -> RepositoryResult<()> {
        let conn = self.get_conn()?;

        let rows = conn.execute(
            r#"UPDATE attribute_node
               SET node_type = ?, data_type = ?, price_impact_type = ?,
                   price_impact_value = ?, price_formula = ?,
                   weight_impact = ?, weight_formula = ?, technical_impact_formula = ?,
                   display_condition = ?, validation_rules = ?, sort_order = ?,
                   updated_at = ?
               WHERE node_id = ?"#,
            params![
                node.node_type.to_string(),
                node.data_type.to_string(),
                node.price_impact_type.to_string(),
                &node.price_impact_value,
                &node.price_formula,
                &node.weight_impact,
                &node.weight_formula,
                &node.technical_impact_formula,
                node.display_condition
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?,
                node.validation_rules
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?,
                &node.sort_order,
                node.updated_at.to_rfc3339(),
                &node.node_id,
            ],
        )?;

        if rows == 0 {
            return Err(RepositoryError::NotFound {
                entity: "AttributeNode".to_string(),
                id: node.node_id.clone(),
            });
        }

        Ok(())
    }

    /// 子树路径改写（移动/重命名共用）
    ///
    /// # 参数
    /// - node_id: 被移动/重命名的节点
    /// - new_parent_id: 新父节点（None = 提升为根; 重命名时传原 parent_id）
    /// - new_name: 新名称（移动时传原名称）
    /// - old_path / new_path: 引擎计算好的新旧路径
    ///
    /// # 红线
    /// - 节点自身与全部严格后代的改写在同一事务内完成,
    ///   并发读取者不可能观察到半改写的子树
    pub fn rewrite_subtree(
        &self,
        node_id: &str,
        new_parent_id: Option<&str>,
        new_name: &str,
        old_path: &NodePath,
        new_path: &NodePath,
    ) -> RepositoryResult<usize> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;
        let now = Utc::now().to_rfc3339();

        // 1. 改写节点自身
        let rows = tx.execute(
            r#"UPDATE attribute_node
               SET parent_id = ?, name = ?, path = ?, depth = ?, updated_at = ?
               WHERE node_id = ?"#,
            params![
                new_parent_id,
                new_name,
                new_path.to_string(),
                new_path.depth(),
                &now,
                node_id,
            ],
        )?;
        if rows == 0 {
            return Err(RepositoryError::NotFound {
                entity: "AttributeNode".to_string(),
                id: node_id.to_string(),
            });
        }

        // 2. 改写全部严格后代: 前缀替换 + 深度平移
        let old_prefix = old_path.to_string();
        let depth_delta = new_path.depth() - old_path.depth();
        let pattern = format!("{}/%", like_escape(&old_prefix));
        // substr 为 1 起始且按字符计数（净化段可含中文等多字节字符, 不能用字节长度）
        let skip_chars = old_prefix.chars().count() as i64 + 1;
        let descendant_rows = tx.execute(
            r#"UPDATE attribute_node
               SET path = ? || substr(path, ?),
                   depth = depth + ?,
                   updated_at = ?
               WHERE manufacturing_type_id =
                     (SELECT manufacturing_type_id FROM attribute_node WHERE node_id = ?)
                 AND path LIKE ? ESCAPE '\'"#,
            params![
                new_path.to_string(),
                skip_chars,
                depth_delta,
                &now,
                node_id,
                pattern,
            ],
        )?;

        tx.commit()?;
        Ok(1 + descendant_rows)
    }

    /// 删除节点（被选择引用时由外键约束拒绝）
    pub fn delete(&self, node_id: &str) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute("DELETE FROM attribute_node WHERE node_id = ?", params![node_id])?;
        Ok(())
    }
}

/// 映射数据库行到 AttributeNode 对象
fn map_row(row: &rusqlite::Row) -> rusqlite::Result<AttributeNode> {
    let node_type_raw: String = row.get(4)?;
    let data_type_raw: String = row.get(5)?;
    let impact_type_raw: String = row.get(6)?;

    Ok(AttributeNode {
        node_id: row.get(0)?,
        manufacturing_type_id: row.get(1)?,
        parent_id: row.get(2)?,
        name: row.get(3)?,
        node_type: NodeType::parse(&node_type_raw)
            .ok_or_else(|| invalid_text(4, &node_type_raw))?,
        data_type: DataType::parse(&data_type_raw)
            .ok_or_else(|| invalid_text(5, &data_type_raw))?,
        price_impact_type: PriceImpactType::parse(&impact_type_raw)
            .ok_or_else(|| invalid_text(6, &impact_type_raw))?,
        price_impact_value: row.get(7)?,
        price_formula: row.get(8)?,
        weight_impact: row.get(9)?,
        weight_formula: row.get(10)?,
        technical_impact_formula: row.get(11)?,
        display_condition: parse_json_column(row, 12)?,
        validation_rules: parse_json_column(row, 13)?,
        path: NodePath::parse(&row.get::<_, String>(14)?),
        depth: row.get(15)?,
        sort_order: row.get(16)?,
        created_at: parse_utc(row, 17)?,
        updated_at: parse_utc(row, 18)?,
    })
}

/// 解析可空 JSON 列
fn parse_json_column<T: serde::de::DeserializeOwned>(
    row: &rusqlite::Row,
    idx: usize,
) -> rusqlite::Result<Option<T>> {
    match row.get::<_, Option<String>>(idx)? {
        Some(raw) => serde_json::from_str(&raw).map(Some).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        }),
        None => Ok(None),
    }
}

/// 非法枚举文本错误
fn invalid_text(idx: usize, raw: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        rusqlite::types::Type::Text,
        format!("非法枚举值: {}", raw).into(),
    )
}

/// 解析 RFC3339 时间列
fn parse_utc(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    crate::repository::manufacturing_type_repo::parse_utc(row, idx)
}
