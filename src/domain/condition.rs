// ==========================================
// 定制产品配置报价系统 - 条件表达式模型
// ==========================================
// 红线: 封闭标签变体树, 不在求值期解释任意 JSON
// 用途: display_condition / validation_rules 的结构化表示
// ==========================================

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

// ==========================================
// ComparisonOp - 比较算子
// ==========================================
// 序列化格式: camelCase (与管理端存储的 JSON 一致)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ComparisonOp {
    Equals,         // 相等
    NotEquals,      // 不等
    Contains,       // 字符串包含 / 数组包含
    Exists,         // 字段已有取值
    GreaterThan,    // 大于（数值）
    GreaterOrEqual, // 大于等于（数值）
    LessThan,       // 小于（数值）
    LessOrEqual,    // 小于等于（数值）
    In,             // 取值在候选集中
}

// ==========================================
// Comparison - 单个比较
// ==========================================
// field 引用同一配置中另一节点的净化名
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comparison {
    pub field: String,              // 被引用节点的净化名
    pub operator: ComparisonOp,     // 比较算子
    #[serde(default, skip_serializing_if = "JsonValue::is_null")]
    pub value: JsonValue,           // 比较常量（EXISTS 时可省略）
}

// ==========================================
// DisplayCondition - 显示条件树
// ==========================================
// JSON 形态（untagged）:
// - {"field": "frame_quality", "operator": "equals", "value": "premium"}
// - {"all": [...]} / {"any": [...]}
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DisplayCondition {
    /// 所有子条件均满足（AND）
    All { all: Vec<DisplayCondition> },
    /// 任一子条件满足（OR）
    Any { any: Vec<DisplayCondition> },
    /// 叶子比较
    Comparison(Comparison),
}

impl DisplayCondition {
    /// 构造叶子比较的便捷方法
    pub fn comparison(field: &str, operator: ComparisonOp, value: JsonValue) -> Self {
        DisplayCondition::Comparison(Comparison {
            field: field.to_string(),
            operator,
            value,
        })
    }
}

// ==========================================
// ValidationRules - 取值校验规则
// ==========================================
// 全部字段可选; 缺省即不校验
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationRules {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required: Option<bool>,     // 是否必填
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,           // 数值下限（含）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,           // 数值上限（含）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,  // 字符串最大长度
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_comparison_json_shape() {
        // 管理端存储的扁平比较 JSON 可直接反序列化
        let raw = r#"{"field": "frame_quality", "operator": "equals", "value": "premium"}"#;
        let cond: DisplayCondition = serde_json::from_str(raw).unwrap();
        assert_eq!(
            cond,
            DisplayCondition::comparison("frame_quality", ComparisonOp::Equals, json!("premium"))
        );
    }

    #[test]
    fn test_combinator_json_shape() {
        let raw = r#"{
            "all": [
                {"field": "frame_material", "operator": "equals", "value": "aluminum"},
                {"any": [
                    {"field": "width", "operator": "greaterThan", "value": 1000},
                    {"field": "reinforced", "operator": "exists"}
                ]}
            ]
        }"#;
        let cond: DisplayCondition = serde_json::from_str(raw).unwrap();
        match cond {
            DisplayCondition::All { all } => {
                assert_eq!(all.len(), 2);
                assert!(matches!(all[1], DisplayCondition::Any { .. }));
            }
            _ => panic!("应解析为 All 组合节点"),
        }
    }

    #[test]
    fn test_roundtrip() {
        let cond = DisplayCondition::Any {
            any: vec![
                DisplayCondition::comparison("glass_type", ComparisonOp::In, json!(["双层", "三层"])),
                DisplayCondition::comparison("width", ComparisonOp::LessOrEqual, json!(2400)),
            ],
        };
        let raw = serde_json::to_string(&cond).unwrap();
        let back: DisplayCondition = serde_json::from_str(&raw).unwrap();
        assert_eq!(back, cond);
    }

    #[test]
    fn test_validation_rules_defaults() {
        let rules: ValidationRules = serde_json::from_str(r#"{"min": 300, "max": 3000}"#).unwrap();
        assert_eq!(rules.min, Some(300.0));
        assert_eq!(rules.max, Some(3000.0));
        assert_eq!(rules.required, None);
        assert_eq!(rules.max_length, None);
    }
}
