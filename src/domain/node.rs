// ==========================================
// 定制产品配置报价系统 - 属性树领域模型
// ==========================================
// 红线: path(node) == path(parent) ++ [sanitize(name)]
// 红线: depth == len(path) - 1
// 用途: 管理端写入, 引擎层只读
// ==========================================

use crate::domain::condition::{DisplayCondition, ValidationRules};
use crate::domain::types::{DataType, NodeType, PriceImpactType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// 物化路径的段分隔符（数据库 TEXT 存储格式）
pub const PATH_SEPARATOR: char = '/';

/// 名称净化: 小写化, 保留字母数字, 其余字符段折叠为单个下划线
///
/// # 返回
/// - Some(segment): 净化后的路径段
/// - None: 名称净化后为空（非法名称）
pub fn sanitize_name(name: &str) -> Option<String> {
    let mut out = String::with_capacity(name.len());
    let mut pending_sep = false;

    for ch in name.trim().chars() {
        if ch.is_alphanumeric() {
            if pending_sep && !out.is_empty() {
                out.push('_');
            }
            pending_sep = false;
            for lower in ch.to_lowercase() {
                out.push(lower);
            }
        } else {
            pending_sep = true;
        }
    }

    if out.is_empty() {
        None
    } else {
        Some(out)
    }
}

// ==========================================
// NodePath - 物化路径
// ==========================================
// 从根到自身的净化段序列, 支持前缀匹配的祖先/后代查询
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodePath(Vec<String>);

impl NodePath {
    /// 根路径（单段）
    pub fn root(segment: String) -> Self {
        NodePath(vec![segment])
    }

    /// 由段序列构造
    pub fn from_segments(segments: Vec<String>) -> Self {
        NodePath(segments)
    }

    /// 解析数据库 TEXT 表示（"a/b/c"）
    pub fn parse(s: &str) -> Self {
        NodePath(s.split(PATH_SEPARATOR).map(str::to_string).collect())
    }

    /// 段序列
    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// 深度 = 段数 - 1
    pub fn depth(&self) -> i32 {
        self.0.len() as i32 - 1
    }

    /// 末段（自身的净化名）
    pub fn leaf(&self) -> &str {
        // 不变量: 路径至少一段
        self.0.last().map(String::as_str).unwrap_or("")
    }

    /// 追加子段, 得到子节点路径
    pub fn child(&self, segment: String) -> Self {
        let mut segments = self.0.clone();
        segments.push(segment);
        NodePath(segments)
    }

    /// 是否为 other 的严格前缀（即 self 是 other 的祖先路径）
    pub fn is_strict_prefix_of(&self, other: &NodePath) -> bool {
        other.0.len() > self.0.len() && other.0[..self.0.len()] == self.0[..]
    }

    /// 前缀替换: 将 old_prefix 替换为 new_prefix, 保留后缀
    ///
    /// # 返回
    /// - Some(path): self 以 old_prefix 开头时的替换结果
    /// - None: self 不在 old_prefix 之下
    pub fn replace_prefix(&self, old_prefix: &NodePath, new_prefix: &NodePath) -> Option<NodePath> {
        if self.0.len() < old_prefix.0.len() || self.0[..old_prefix.0.len()] != old_prefix.0[..] {
            return None;
        }
        let mut segments = new_prefix.0.clone();
        segments.extend_from_slice(&self.0[old_prefix.0.len()..]);
        Some(NodePath(segments))
    }

    /// 末段替换（重命名自身, 不改变祖先前缀）
    pub fn with_leaf(&self, segment: String) -> Self {
        let mut segments = self.0.clone();
        *segments.last_mut().unwrap_or(&mut String::new()) = segment;
        NodePath(segments)
    }
}

impl fmt::Display for NodePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("/"))
    }
}

// ==========================================
// ManufacturingType - 产品类别
// ==========================================
// 用途: 每个产品类别拥有唯一一棵属性树
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManufacturingType {
    pub type_id: String,              // 类别ID
    pub name: String,                 // 类别名称（如: 铝合金窗）
    pub base_price: f64,              // 基准价格
    pub base_weight: f64,             // 基准重量
    pub is_active: bool,              // 是否启用
    pub created_at: DateTime<Utc>,    // 创建时间
    pub updated_at: DateTime<Utc>,    // 更新时间
}

// ==========================================
// AttributeNode - 属性树节点
// ==========================================
// 对齐: attribute_node 表
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributeNode {
    // ===== 主键与关联 =====
    pub node_id: String,                   // 节点ID
    pub manufacturing_type_id: String,     // 所属产品类别
    pub parent_id: Option<String>,         // 父节点ID（根节点为 None）

    // ===== 基础信息 =====
    pub name: String,                      // 节点名称（原始, 未净化）
    pub node_type: NodeType,               // 节点类型
    pub data_type: DataType,               // 取值类型

    // ===== 价格影响 =====
    pub price_impact_type: PriceImpactType, // 价格影响类型
    pub price_impact_value: Option<f64>,    // FIXED/PERCENTAGE 取值
    pub price_formula: Option<String>,      // FORMULA 表达式

    // ===== 重量影响 =====
    pub weight_impact: Option<f64>,         // FIXED/PERCENTAGE 取值
    pub weight_formula: Option<String>,     // FORMULA 表达式

    // ===== 技术参数 =====
    pub technical_impact_formula: Option<String>, // TECHNICAL_SPEC 节点的派生公式

    // ===== 业务规则 =====
    pub display_condition: Option<DisplayCondition>, // 显示/可用条件（无条件=恒可用）
    pub validation_rules: Option<ValidationRules>,   // 取值校验规则

    // ===== 物化路径 =====
    pub path: NodePath,                    // 物化路径（净化段）
    pub depth: i32,                        // 深度 = len(path) - 1
    pub sort_order: i32,                   // 同级排序

    // ===== 审计字段 =====
    pub created_at: DateTime<Utc>,         // 创建时间
    pub updated_at: DateTime<Utc>,         // 更新时间
}

impl AttributeNode {
    /// 路径不变量自检: path 末段与净化名一致, depth 与段数一致
    pub fn path_invariant_holds(&self) -> bool {
        let leaf_ok = match sanitize_name(&self.name) {
            Some(segment) => self.path.leaf() == segment,
            None => false,
        };
        leaf_ok && self.depth == self.path.depth()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_name_basic() {
        assert_eq!(sanitize_name("Frame Material"), Some("frame_material".to_string()));
        assert_eq!(sanitize_name("Glass-Type (outer)"), Some("glass_type_outer".to_string()));
        assert_eq!(sanitize_name("  Width  "), Some("width".to_string()));
        assert_eq!(sanitize_name("TriplePane"), Some("triplepane".to_string()));
    }

    #[test]
    fn test_sanitize_name_collapses_runs() {
        // 连续非法字符折叠为单个下划线
        assert_eq!(sanitize_name("a --- b"), Some("a_b".to_string()));
        // 首尾非法字符不产生下划线
        assert_eq!(sanitize_name("--abc--"), Some("abc".to_string()));
    }

    #[test]
    fn test_sanitize_name_empty() {
        assert_eq!(sanitize_name("---"), None);
        assert_eq!(sanitize_name(""), None);
        assert_eq!(sanitize_name("   "), None);
    }

    #[test]
    fn test_path_prefix_replace() {
        let old_prefix = NodePath::parse("root/frame");
        let new_prefix = NodePath::parse("root/hardware/frame");
        let path = NodePath::parse("root/frame/material/aluminum");

        let replaced = path.replace_prefix(&old_prefix, &new_prefix).unwrap();
        assert_eq!(replaced.to_string(), "root/hardware/frame/material/aluminum");
        assert_eq!(replaced.depth(), 4);

        // 不在前缀下的路径不可替换
        let other = NodePath::parse("root/glass/type");
        assert!(other.replace_prefix(&old_prefix, &new_prefix).is_none());
    }

    #[test]
    fn test_strict_prefix() {
        let parent = NodePath::parse("root/frame");
        let child = NodePath::parse("root/frame/material");
        assert!(parent.is_strict_prefix_of(&child));
        assert!(!child.is_strict_prefix_of(&parent));
        // 自身不是自身的严格前缀
        assert!(!parent.is_strict_prefix_of(&parent));
        // 段级前缀, 非字符串前缀: "root/fra" 不匹配
        let lookalike = NodePath::parse("root/framework");
        assert!(!parent.is_strict_prefix_of(&lookalike));
    }

    #[test]
    fn test_path_display_parse_roundtrip() {
        let path = NodePath::parse("root/frame/material");
        assert_eq!(path.segments().len(), 3);
        assert_eq!(path.depth(), 2);
        assert_eq!(path.leaf(), "material");
        assert_eq!(NodePath::parse(&path.to_string()), path);
    }
}
