// ==========================================
// 定制产品配置报价系统 - 数据仓储层
// ==========================================
// 红线: Repository 不含业务逻辑
// ==========================================
// 职责: 提供数据访问接口,屏蔽数据库细节
// 约束: 所有查询使用参数化,防止 SQL 注入
// 约束: configuration_snapshot 只追加, 仓储不提供 UPDATE/DELETE
// ==========================================

pub mod configuration_repo;
pub mod error;
pub mod manufacturing_type_repo;
pub mod node_repo;
pub mod snapshot_repo;
pub mod template_repo;

// 重导出核心仓储
pub use configuration_repo::{
    ConfigurationRepository, SelectionImpact, SelectionRepository,
};
pub use error::{RepositoryError, RepositoryResult};
pub use manufacturing_type_repo::ManufacturingTypeRepository;
pub use node_repo::AttributeNodeRepository;
pub use snapshot_repo::{QuoteRepository, SnapshotRepository};
pub use template_repo::ConfigurationTemplateRepository;
