// ==========================================
// 定制产品配置报价系统 - API层
// ==========================================
// 职责: 对外门面与错误转换
// ==========================================

pub mod configurator_api;
pub mod error;

pub use configurator_api::{ConfigurationDetail, ConfiguratorApi, PricingPreview};
pub use error::{ApiError, ApiResult};
