// ==========================================
// 定制产品配置报价系统 - 领域模型层
// ==========================================
// 职责: 定义领域实体、类型、条件表达式
// 红线: 不含数据访问逻辑,不含引擎逻辑
// ==========================================

pub mod condition;
pub mod configuration;
pub mod node;
pub mod snapshot;
pub mod types;

// 重导出核心类型
pub use condition::{Comparison, ComparisonOp, DisplayCondition, ValidationRules};
pub use configuration::{Configuration, ConfigurationSelection, SelectionValue};
pub use node::{sanitize_name, AttributeNode, ManufacturingType, NodePath};
pub use snapshot::{ConfigurationSnapshot, ConfigurationTemplate, PresetSelection, Quote};
pub use types::{
    ConfigStatus, DataType, NodeType, PriceImpactType, QuoteStatus, SnapshotType,
};
