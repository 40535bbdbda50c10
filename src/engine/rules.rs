// ==========================================
// 定制产品配置报价系统 - 业务规则引擎
// ==========================================
// 红线: 条件树封闭求值, 引用字段缺失时判 false（EXISTS 除外*）, 绝不抛异常中断
// 红线: 规则引擎只读配置取值, 不产生任何写入
// 职责: display_condition 适用性判定 + validation_rules 取值校验
// ==========================================

use crate::domain::condition::{Comparison, ComparisonOp, DisplayCondition, ValidationRules};
use crate::domain::configuration::SelectionValue;
use crate::domain::node::AttributeNode;
use crate::engine::error::{EngineError, EngineResult};
use serde_json::Value as JsonValue;
use std::collections::HashMap;

// ==========================================
// RuleEngine - 业务规则引擎
// ==========================================
pub struct RuleEngine;

impl RuleEngine {
    pub fn new() -> Self {
        RuleEngine
    }

    /// 判定节点对当前配置是否适用
    ///
    /// - 无 display_condition 的节点恒适用
    /// - 条件引用的字段在 field_values 中缺失时, 该比较判 false（EXISTS 同样判 false）
    pub fn is_applicable(
        &self,
        node: &AttributeNode,
        field_values: &HashMap<String, JsonValue>,
    ) -> bool {
        match &node.display_condition {
            None => true,
            Some(condition) => self.eval_condition(condition, field_values),
        }
    }

    /// 递归求值条件树
    pub fn eval_condition(
        &self,
        condition: &DisplayCondition,
        field_values: &HashMap<String, JsonValue>,
    ) -> bool {
        match condition {
            // 空 all 组合判 true（AND 的单位元）
            DisplayCondition::All { all } => {
                all.iter().all(|c| self.eval_condition(c, field_values))
            }
            // 空 any 组合判 false（OR 的单位元）
            DisplayCondition::Any { any } => {
                any.iter().any(|c| self.eval_condition(c, field_values))
            }
            DisplayCondition::Comparison(cmp) => self.eval_comparison(cmp, field_values),
        }
    }

    fn eval_comparison(
        &self,
        cmp: &Comparison,
        field_values: &HashMap<String, JsonValue>,
    ) -> bool {
        let actual = match field_values.get(&cmp.field) {
            Some(v) => v,
            // 字段未取值: EXISTS 判 false, 其余比较同样判 false
            None => return false,
        };

        match cmp.operator {
            ComparisonOp::Exists => true,
            ComparisonOp::Equals => json_loose_eq(actual, &cmp.value),
            ComparisonOp::NotEquals => !json_loose_eq(actual, &cmp.value),
            ComparisonOp::Contains => match (actual, &cmp.value) {
                (JsonValue::String(hay), JsonValue::String(needle)) => hay.contains(needle),
                (JsonValue::Array(items), needle) => {
                    items.iter().any(|item| json_loose_eq(item, needle))
                }
                _ => false,
            },
            ComparisonOp::In => match &cmp.value {
                JsonValue::Array(candidates) => {
                    candidates.iter().any(|c| json_loose_eq(actual, c))
                }
                _ => false,
            },
            ComparisonOp::GreaterThan => numeric_cmp(actual, &cmp.value, |a, b| a > b),
            ComparisonOp::GreaterOrEqual => numeric_cmp(actual, &cmp.value, |a, b| a >= b),
            ComparisonOp::LessThan => numeric_cmp(actual, &cmp.value, |a, b| a < b),
            ComparisonOp::LessOrEqual => numeric_cmp(actual, &cmp.value, |a, b| a <= b),
        }
    }

    /// 校验取值: 类型槽匹配 + validation_rules
    ///
    /// # 错误
    /// - `ValidationError`: 类型不匹配 / 越界 / 超长
    pub fn validate_value(&self, node: &AttributeNode, value: &SelectionValue) -> EngineResult<()> {
        let field = node.path.leaf().to_string();

        if !value.matches_data_type(node.data_type) {
            return Err(EngineError::ValidationError {
                field,
                message: format!("取值类型与节点 data_type {} 不匹配", node.data_type),
            });
        }

        let rules = match &node.validation_rules {
            Some(r) => r,
            None => return Ok(()),
        };

        self.check_rules(&field, rules, value)
    }

    fn check_rules(
        &self,
        field: &str,
        rules: &ValidationRules,
        value: &SelectionValue,
    ) -> EngineResult<()> {
        if let Some(n) = value.as_number() {
            if let Some(min) = rules.min {
                if n < min {
                    return Err(EngineError::ValidationError {
                        field: field.to_string(),
                        message: format!("取值 {} 低于下限 {}", n, min),
                    });
                }
            }
            if let Some(max) = rules.max {
                if n > max {
                    return Err(EngineError::ValidationError {
                        field: field.to_string(),
                        message: format!("取值 {} 超过上限 {}", n, max),
                    });
                }
            }
        }

        if let Some(s) = value.as_str() {
            if let Some(max_length) = rules.max_length {
                if s.chars().count() > max_length {
                    return Err(EngineError::ValidationError {
                        field: field.to_string(),
                        message: format!("字符串长度超过上限 {}", max_length),
                    });
                }
            }
        }

        Ok(())
    }
}

impl Default for RuleEngine {
    fn default() -> Self {
        RuleEngine::new()
    }
}

/// 宽松相等: 数值按 f64 比较（1 == 1.0）, 其余按结构相等
fn json_loose_eq(a: &JsonValue, b: &JsonValue) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

/// 数值比较; 任一侧非数值判 false
fn numeric_cmp(a: &JsonValue, b: &JsonValue, op: impl Fn(f64, f64) -> bool) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => op(x, y),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::node::NodePath;
    use crate::domain::types::{DataType, NodeType, PriceImpactType};
    use chrono::Utc;
    use serde_json::json;

    fn node_with(
        name: &str,
        data_type: DataType,
        display_condition: Option<DisplayCondition>,
        validation_rules: Option<ValidationRules>,
    ) -> AttributeNode {
        let now = Utc::now();
        AttributeNode {
            node_id: "n-1".to_string(),
            manufacturing_type_id: "mt-1".to_string(),
            parent_id: Some("root".to_string()),
            name: name.to_string(),
            node_type: NodeType::Attribute,
            data_type,
            price_impact_type: PriceImpactType::Fixed,
            price_impact_value: None,
            price_formula: None,
            weight_impact: None,
            weight_formula: None,
            technical_impact_formula: None,
            display_condition,
            validation_rules,
            path: NodePath::parse(&format!("root/{}", name)),
            depth: 1,
            sort_order: 0,
            created_at: now,
            updated_at: now,
        }
    }

    fn values(pairs: &[(&str, JsonValue)]) -> HashMap<String, JsonValue> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_no_condition_always_applicable() {
        let engine = RuleEngine::new();
        let node = node_with("color", DataType::String, None, None);
        assert!(engine.is_applicable(&node, &HashMap::new()));
    }

    #[test]
    fn test_equals_comparison() {
        let engine = RuleEngine::new();
        let cond = DisplayCondition::comparison("frame_quality", ComparisonOp::Equals, json!("premium"));
        let node = node_with("upgrade", DataType::Boolean, Some(cond), None);

        assert!(engine.is_applicable(&node, &values(&[("frame_quality", json!("premium"))])));
        assert!(!engine.is_applicable(&node, &values(&[("frame_quality", json!("standard"))])));
        // 引用字段缺失: 判 false, 不报错
        assert!(!engine.is_applicable(&node, &HashMap::new()));
    }

    #[test]
    fn test_exists_comparison() {
        let engine = RuleEngine::new();
        let cond = DisplayCondition::comparison("reinforced", ComparisonOp::Exists, JsonValue::Null);
        let node = node_with("brace", DataType::Boolean, Some(cond), None);

        assert!(engine.is_applicable(&node, &values(&[("reinforced", json!(true))])));
        assert!(!engine.is_applicable(&node, &HashMap::new()));
    }

    #[test]
    fn test_numeric_loose_equality() {
        let engine = RuleEngine::new();
        let cond = DisplayCondition::comparison("panes", ComparisonOp::Equals, json!(2));
        let node = node_with("argon_fill", DataType::Boolean, Some(cond), None);
        // 选择取值序列化为浮点 2.0, 与条件常量 2 宽松相等
        assert!(engine.is_applicable(&node, &values(&[("panes", json!(2.0))])));
    }

    #[test]
    fn test_ordering_comparisons() {
        let engine = RuleEngine::new();
        let cond = DisplayCondition::comparison("width", ComparisonOp::GreaterThan, json!(1000));
        let node = node_with("mullion", DataType::Boolean, Some(cond), None);

        assert!(engine.is_applicable(&node, &values(&[("width", json!(1200))])));
        assert!(!engine.is_applicable(&node, &values(&[("width", json!(800))])));
        // 非数值与数值比较判 false
        assert!(!engine.is_applicable(&node, &values(&[("width", json!("wide"))])));
    }

    #[test]
    fn test_in_and_contains() {
        let engine = RuleEngine::new();

        let cond = DisplayCondition::comparison(
            "glass_type",
            ComparisonOp::In,
            json!(["double", "triple"]),
        );
        let node = node_with("low_e", DataType::Boolean, Some(cond), None);
        assert!(engine.is_applicable(&node, &values(&[("glass_type", json!("triple"))])));
        assert!(!engine.is_applicable(&node, &values(&[("glass_type", json!("single"))])));

        let cond = DisplayCondition::comparison("finish", ComparisonOp::Contains, json!("matte"));
        let node = node_with("coating", DataType::Boolean, Some(cond), None);
        assert!(engine.is_applicable(&node, &values(&[("finish", json!("matte-black"))])));
        assert!(engine.is_applicable(&node, &values(&[("finish", json!(["matte", "gloss"]))])));
        assert!(!engine.is_applicable(&node, &values(&[("finish", json!("gloss"))])));
    }

    #[test]
    fn test_combinators() {
        let engine = RuleEngine::new();
        let cond = DisplayCondition::All {
            all: vec![
                DisplayCondition::comparison("frame_material", ComparisonOp::Equals, json!("aluminum")),
                DisplayCondition::Any {
                    any: vec![
                        DisplayCondition::comparison("width", ComparisonOp::GreaterThan, json!(1000)),
                        DisplayCondition::comparison("reinforced", ComparisonOp::Exists, JsonValue::Null),
                    ],
                },
            ],
        };
        let node = node_with("heavy_hinge", DataType::Boolean, Some(cond), None);

        assert!(engine.is_applicable(
            &node,
            &values(&[("frame_material", json!("aluminum")), ("width", json!(1500))])
        ));
        assert!(engine.is_applicable(
            &node,
            &values(&[("frame_material", json!("aluminum")), ("reinforced", json!(true))])
        ));
        assert!(!engine.is_applicable(
            &node,
            &values(&[("frame_material", json!("vinyl")), ("width", json!(1500))])
        ));
        assert!(!engine.is_applicable(
            &node,
            &values(&[("frame_material", json!("aluminum"))])
        ));
    }

    #[test]
    fn test_empty_combinators() {
        let engine = RuleEngine::new();
        let empty = HashMap::new();
        assert!(engine.eval_condition(&DisplayCondition::All { all: vec![] }, &empty));
        assert!(!engine.eval_condition(&DisplayCondition::Any { any: vec![] }, &empty));
    }

    #[test]
    fn test_validate_value_type_mismatch() {
        let engine = RuleEngine::new();
        let node = node_with("width", DataType::Dimension, None, None);
        assert!(engine
            .validate_value(&node, &SelectionValue::Numeric(48.0))
            .is_ok());
        let err = engine
            .validate_value(&node, &SelectionValue::String("wide".into()))
            .unwrap_err();
        assert!(matches!(err, EngineError::ValidationError { .. }));
    }

    #[test]
    fn test_validate_value_numeric_bounds() {
        let engine = RuleEngine::new();
        let rules = ValidationRules {
            min: Some(300.0),
            max: Some(3000.0),
            ..Default::default()
        };
        let node = node_with("width", DataType::Dimension, None, Some(rules));

        assert!(engine.validate_value(&node, &SelectionValue::Numeric(300.0)).is_ok());
        assert!(engine.validate_value(&node, &SelectionValue::Numeric(3000.0)).is_ok());
        assert!(engine.validate_value(&node, &SelectionValue::Numeric(299.9)).is_err());
        assert!(engine.validate_value(&node, &SelectionValue::Numeric(3000.1)).is_err());
    }

    #[test]
    fn test_validate_value_max_length() {
        let engine = RuleEngine::new();
        let rules = ValidationRules {
            max_length: Some(4),
            ..Default::default()
        };
        let node = node_with("label", DataType::String, None, Some(rules));

        assert!(engine
            .validate_value(&node, &SelectionValue::String("abcd".into()))
            .is_ok());
        assert!(engine
            .validate_value(&node, &SelectionValue::String("abcde".into()))
            .is_err());
    }
}
