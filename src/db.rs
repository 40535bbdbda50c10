// ==========================================
// 定制产品配置报价系统 - SQLite 连接初始化
// ==========================================
// 目标:
// - 统一所有 Connection::open 的 PRAGMA 行为，避免"部分模块外键开启/部分不开启"
// - 统一 busy_timeout，减少并发写入时的偶发 busy 错误
// - 提供进程内建库 (init_schema)，迁移工具链不在本库范围内
// ==========================================

use rusqlite::Connection;
use rusqlite::OptionalExtension;
use std::time::Duration;

/// 默认 busy_timeout（毫秒）
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// 当前代码所期望的 schema_version
///
/// 说明：版本号用于**提示/告警**（不做自动迁移），避免静默在旧库上运行导致隐性错误。
pub const CURRENT_SCHEMA_VERSION: i64 = 1;

/// 配置 SQLite 连接的统一 PRAGMA
///
/// 说明：
/// - foreign_keys 需要"每个连接"单独开启
/// - busy_timeout 需要"每个连接"单独配置
pub fn configure_sqlite_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS))?;
    Ok(())
}

/// 打开 SQLite 连接并应用统一配置
pub fn open_sqlite_connection(db_path: &str) -> rusqlite::Result<Connection> {
    let conn = Connection::open(db_path)?;
    configure_sqlite_connection(&conn)?;
    Ok(conn)
}

/// 读取 schema_version（若表不存在则返回 None）
pub fn read_schema_version(conn: &Connection) -> rusqlite::Result<Option<i64>> {
    let has_table: bool = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version' LIMIT 1",
            [],
            |_row| Ok(true),
        )
        .optional()?
        .unwrap_or(false);

    if !has_table {
        return Ok(None);
    }

    let v: Option<i64> =
        conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))?;
    Ok(v)
}

/// 初始化数据库 schema（幂等）
///
/// # 约束
/// - 所有建表语句使用 IF NOT EXISTS，可在已有库上重复执行
/// - configuration_snapshot 为只追加表：代码层不提供 UPDATE/DELETE 入口
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS config_kv (
            scope_id TEXT NOT NULL DEFAULT 'global',
            key TEXT NOT NULL,
            value TEXT NOT NULL,
            updated_at TEXT NOT NULL DEFAULT (datetime('now')),
            PRIMARY KEY (scope_id, key)
        );

        CREATE TABLE IF NOT EXISTS manufacturing_type (
            type_id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            base_price REAL NOT NULL,
            base_weight REAL NOT NULL,
            is_active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS attribute_node (
            node_id TEXT PRIMARY KEY,
            manufacturing_type_id TEXT NOT NULL REFERENCES manufacturing_type(type_id),
            parent_id TEXT REFERENCES attribute_node(node_id),
            name TEXT NOT NULL,
            node_type TEXT NOT NULL,
            data_type TEXT NOT NULL,
            price_impact_type TEXT NOT NULL,
            price_impact_value REAL,
            price_formula TEXT,
            weight_impact REAL,
            weight_formula TEXT,
            technical_impact_formula TEXT,
            display_condition TEXT,
            validation_rules TEXT,
            path TEXT NOT NULL,
            depth INTEGER NOT NULL,
            sort_order INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_attribute_node_type
            ON attribute_node(manufacturing_type_id);
        CREATE INDEX IF NOT EXISTS idx_attribute_node_parent
            ON attribute_node(parent_id);
        CREATE INDEX IF NOT EXISTS idx_attribute_node_path
            ON attribute_node(manufacturing_type_id, path);

        CREATE TABLE IF NOT EXISTS configuration (
            configuration_id TEXT PRIMARY KEY,
            manufacturing_type_id TEXT NOT NULL REFERENCES manufacturing_type(type_id),
            customer_id TEXT,
            name TEXT NOT NULL,
            status TEXT NOT NULL,
            base_price REAL NOT NULL,
            total_price REAL NOT NULL,
            calculated_weight REAL NOT NULL,
            calculated_technical_data TEXT NOT NULL DEFAULT '{}',
            revision INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS configuration_selection (
            selection_id TEXT PRIMARY KEY,
            configuration_id TEXT NOT NULL
                REFERENCES configuration(configuration_id) ON DELETE CASCADE,
            attribute_node_id TEXT NOT NULL REFERENCES attribute_node(node_id),
            value_json TEXT NOT NULL,
            calculated_price_impact REAL NOT NULL DEFAULT 0,
            calculated_weight_impact REAL NOT NULL DEFAULT 0,
            selection_path TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE (configuration_id, attribute_node_id)
        );

        CREATE TABLE IF NOT EXISTS configuration_snapshot (
            snapshot_id TEXT PRIMARY KEY,
            configuration_id TEXT NOT NULL REFERENCES configuration(configuration_id),
            quote_id TEXT,
            base_price REAL NOT NULL,
            total_price REAL NOT NULL,
            price_breakdown TEXT NOT NULL,
            weight_breakdown TEXT NOT NULL,
            technical_snapshot TEXT NOT NULL,
            snapshot_type TEXT NOT NULL,
            valid_until TEXT,
            created_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_snapshot_configuration
            ON configuration_snapshot(configuration_id);

        CREATE TABLE IF NOT EXISTS quote (
            quote_id TEXT PRIMARY KEY,
            configuration_id TEXT NOT NULL REFERENCES configuration(configuration_id),
            customer_id TEXT,
            quote_no TEXT NOT NULL UNIQUE,
            subtotal REAL NOT NULL,
            tax_amount REAL NOT NULL,
            discount_amount REAL NOT NULL,
            total REAL NOT NULL,
            status TEXT NOT NULL,
            valid_until TEXT,
            snapshot_id TEXT REFERENCES configuration_snapshot(snapshot_id),
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS configuration_template (
            template_id TEXT PRIMARY KEY,
            manufacturing_type_id TEXT NOT NULL REFERENCES manufacturing_type(type_id),
            name TEXT NOT NULL,
            preset_selections TEXT NOT NULL,
            is_active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL
        );

        INSERT OR IGNORE INTO schema_version (version) VALUES (1);
        "#,
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_schema_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        configure_sqlite_connection(&conn).unwrap();
        init_schema(&conn).unwrap();
        // 第二次执行不应失败
        init_schema(&conn).unwrap();

        let version = read_schema_version(&conn).unwrap();
        assert_eq!(version, Some(CURRENT_SCHEMA_VERSION));
    }
}
