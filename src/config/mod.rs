// ==========================================
// 定制产品配置报价系统 - 配置层
// ==========================================
// 职责: 系统配置的读取接口与 config_kv 实现
// 红线: 引擎只依赖 trait, 不直接读表
// ==========================================

pub mod calc_config_trait;
pub mod config_manager;

pub use calc_config_trait::CalcConfigReader;
pub use config_manager::ConfigManager;

/// 配置键常量
pub mod config_keys {
    /// 税率（0.13 = 13%）
    pub const TAX_RATE: &str = "pricing/tax_rate";
    /// 报价默认有效天数
    pub const QUOTE_DEFAULT_VALID_DAYS: &str = "quote/default_valid_days";
    /// 公式文本最大长度
    pub const FORMULA_MAX_LENGTH: &str = "formula/max_length";
}
