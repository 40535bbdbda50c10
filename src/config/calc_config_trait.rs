// ==========================================
// 定制产品配置报价系统 - 计算配置读取 Trait
// ==========================================
// 职责: 定义计算/报价模块所需的配置读取接口（不包含实现）
// 红线: 不包含配置写入、不包含业务逻辑
// ==========================================

use async_trait::async_trait;
use std::error::Error;

// ==========================================
// CalcConfigReader Trait
// ==========================================
// 实现者: ConfigManager（从 config_kv 表读取）
#[async_trait]
pub trait CalcConfigReader: Send + Sync {
    /// 获取税率
    ///
    /// # 返回
    /// - f64: 税率（0.13 = 13%）
    ///
    /// # 默认值
    /// - 0.13
    async fn get_tax_rate(&self) -> Result<f64, Box<dyn Error>>;

    /// 获取报价默认有效天数（调用方未指定 valid_until 时使用）
    ///
    /// # 默认值
    /// - 30
    async fn get_quote_default_valid_days(&self) -> Result<i64, Box<dyn Error>>;

    /// 获取公式文本最大长度（超长公式按格式错误拒绝）
    ///
    /// # 默认值
    /// - 512
    async fn get_formula_max_length(&self) -> Result<usize, Box<dyn Error>>;
}
