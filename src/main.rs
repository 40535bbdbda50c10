// ==========================================
// 定制产品配置报价系统 - 主入口
// ==========================================
// 技术栈: Rust + SQLite
// 职责: 初始化日志/数据库，校验 schema 版本
// 说明: HTTP/管理界面属于外围系统，不在本引擎范围内
// ==========================================

use product_configurator::db;

fn main() -> anyhow::Result<()> {
    // 初始化日志系统
    product_configurator::logging::init();

    tracing::info!("==================================================");
    tracing::info!("{}", product_configurator::APP_NAME);
    tracing::info!("系统版本: {}", product_configurator::VERSION);
    tracing::info!("==================================================");

    // 数据库路径: 第一个命令行参数，或 PC_DB_PATH 环境变量，默认当前目录
    let db_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("PC_DB_PATH").ok())
        .unwrap_or_else(|| "product_configurator.db".to_string());
    tracing::info!("使用数据库: {}", db_path);

    let conn = db::open_sqlite_connection(&db_path)?;
    db::init_schema(&conn)?;

    match db::read_schema_version(&conn)? {
        Some(v) if v == db::CURRENT_SCHEMA_VERSION => {
            tracing::info!("schema_version = {} (OK)", v);
        }
        Some(v) => {
            tracing::warn!(
                "schema_version = {} 与代码期望的 {} 不一致，请检查数据库",
                v,
                db::CURRENT_SCHEMA_VERSION
            );
        }
        None => {
            tracing::warn!("数据库缺少 schema_version 表");
        }
    }

    tracing::info!("数据库初始化完成，引擎就绪");
    Ok(())
}
