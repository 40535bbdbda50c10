// ==========================================
// 定制产品配置报价系统 - 配置领域模型
// ==========================================
// 红线: total/weight/technical 聚合值只能由计算引擎写入
// 红线: 同一 (configuration_id, attribute_node_id) 至多一条选择
// ==========================================

use crate::domain::node::NodePath;
use crate::domain::types::{ConfigStatus, DataType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;

// ==========================================
// SelectionValue - 选择取值（标签联合）
// ==========================================
// 以节点 data_type 判别; 取代"多个可空列"的多态存储
// JSON 形态: {"kind": "NUMERIC", "value": 48.0}
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SelectionValue {
    String(String),
    Numeric(f64),
    Boolean(bool),
    Json(JsonValue),
}

impl SelectionValue {
    /// 数值视图（仅 NUMERIC 有值）
    pub fn as_number(&self) -> Option<f64> {
        match self {
            SelectionValue::Numeric(n) => Some(*n),
            _ => None,
        }
    }

    /// 字符串视图（仅 STRING 有值）
    pub fn as_str(&self) -> Option<&str> {
        match self {
            SelectionValue::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// 布尔视图（仅 BOOLEAN 有值）
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            SelectionValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// 值槽与节点 data_type 是否匹配
    pub fn matches_data_type(&self, data_type: DataType) -> bool {
        match (self, data_type) {
            (SelectionValue::String(_), DataType::String | DataType::Selection) => true,
            (
                SelectionValue::Numeric(_),
                DataType::Number | DataType::Dimension | DataType::Formula,
            ) => true,
            (SelectionValue::Boolean(_), DataType::Boolean) => true,
            // JSON 槽仅用于无更精确槽位的结构化取值
            (SelectionValue::Json(_), DataType::String | DataType::Selection) => true,
            _ => false,
        }
    }

    /// 条件求值使用的 JSON 视图
    pub fn to_json(&self) -> JsonValue {
        match self {
            SelectionValue::String(s) => JsonValue::String(s.clone()),
            SelectionValue::Numeric(n) => serde_json::json!(n),
            SelectionValue::Boolean(b) => JsonValue::Bool(*b),
            SelectionValue::Json(v) => v.clone(),
        }
    }
}

// ==========================================
// Configuration - 客户产品配置
// ==========================================
// 对齐: configuration 表
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Configuration {
    // ===== 主键与关联 =====
    pub configuration_id: String,          // 配置ID
    pub manufacturing_type_id: String,     // 所属产品类别
    pub customer_id: Option<String>,       // 客户ID（匿名配置为 None）

    // ===== 基础信息 =====
    pub name: String,                      // 配置名称
    pub status: ConfigStatus,              // 状态（单向推进）

    // ===== 聚合值（计算引擎输出, 不可手改）=====
    pub base_price: f64,                   // 基准价格（类别快照）
    pub total_price: f64,                  // 总价
    pub calculated_weight: f64,            // 总重量
    pub calculated_technical_data: BTreeMap<String, f64>, // 技术参数名 -> 计算值

    // ===== 并发控制 =====
    pub revision: i32,                     // 乐观锁版本号

    // ===== 审计字段 =====
    pub created_at: DateTime<Utc>,         // 创建时间
    pub updated_at: DateTime<Utc>,         // 更新时间
}

// ==========================================
// ConfigurationSelection - 单项选择 (EAV 行)
// ==========================================
// 对齐: configuration_selection 表
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigurationSelection {
    // ===== 主键与关联 =====
    pub selection_id: String,              // 选择ID
    pub configuration_id: String,          // 所属配置
    pub attribute_node_id: String,         // 对应属性节点

    // ===== 取值 =====
    pub value: SelectionValue,             // 取值（标签联合）

    // ===== 计算缓存（计算引擎输出）=====
    pub calculated_price_impact: f64,      // 本选择的价格影响
    pub calculated_weight_impact: f64,     // 本选择的重量影响

    // ===== 历史上下文 =====
    pub selection_path: NodePath,          // 选择时刻的节点路径快照（节点后续移动不回写）

    // ===== 审计字段 =====
    pub created_at: DateTime<Utc>,         // 创建时间
    pub updated_at: DateTime<Utc>,         // 更新时间
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selection_value_tagged_json() {
        let v = SelectionValue::Numeric(48.0);
        let raw = serde_json::to_string(&v).unwrap();
        assert_eq!(raw, r#"{"kind":"NUMERIC","value":48.0}"#);
        let back: SelectionValue = serde_json::from_str(&raw).unwrap();
        assert_eq!(back, v);
    }

    #[test]
    fn test_matches_data_type() {
        assert!(SelectionValue::String("Aluminum".into()).matches_data_type(DataType::Selection));
        assert!(SelectionValue::Numeric(60.0).matches_data_type(DataType::Dimension));
        assert!(SelectionValue::Boolean(true).matches_data_type(DataType::Boolean));
        // 类型不匹配: 数值不能写入字符串节点
        assert!(!SelectionValue::Numeric(1.0).matches_data_type(DataType::String));
        assert!(!SelectionValue::String("yes".into()).matches_data_type(DataType::Boolean));
    }

    #[test]
    fn test_value_views() {
        assert_eq!(SelectionValue::Numeric(2.5).as_number(), Some(2.5));
        assert_eq!(SelectionValue::String("x".into()).as_number(), None);
        assert_eq!(SelectionValue::Boolean(false).as_bool(), Some(false));
    }
}
