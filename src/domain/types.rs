// ==========================================
// 定制产品配置报价系统 - 领域类型定义
// ==========================================
// 序列化格式: SCREAMING_SNAKE_CASE (与数据库一致)
// ==========================================

use serde::{Deserialize, Serialize};
use std::fmt;

// ==========================================
// 节点类型 (Node Type)
// ==========================================
// 属性树中节点的角色分类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeType {
    Category,      // 分类节点（组织结构，无取值）
    Attribute,     // 属性节点（客户可填值）
    Option,        // 选项节点（枚举型取值）
    Component,     // 部件节点（附带价格/重量影响）
    TechnicalSpec, // 技术参数节点（公式派生值）
}

impl NodeType {
    /// 从数据库 TEXT 解析
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "CATEGORY" => Some(NodeType::Category),
            "ATTRIBUTE" => Some(NodeType::Attribute),
            "OPTION" => Some(NodeType::Option),
            "COMPONENT" => Some(NodeType::Component),
            "TECHNICAL_SPEC" => Some(NodeType::TechnicalSpec),
            _ => None,
        }
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeType::Category => write!(f, "CATEGORY"),
            NodeType::Attribute => write!(f, "ATTRIBUTE"),
            NodeType::Option => write!(f, "OPTION"),
            NodeType::Component => write!(f, "COMPONENT"),
            NodeType::TechnicalSpec => write!(f, "TECHNICAL_SPEC"),
        }
    }
}

// ==========================================
// 取值类型 (Data Type)
// ==========================================
// 决定 ConfigurationSelection 值槽的判别标签
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataType {
    String,    // 自由文本
    Number,    // 数值
    Boolean,   // 布尔
    Formula,   // 数值（参与公式求值的输入）
    Dimension, // 尺寸数值（mm/inch 等）
    Selection, // 枚举选择（存字符串）
}

impl DataType {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "STRING" => Some(DataType::String),
            "NUMBER" => Some(DataType::Number),
            "BOOLEAN" => Some(DataType::Boolean),
            "FORMULA" => Some(DataType::Formula),
            "DIMENSION" => Some(DataType::Dimension),
            "SELECTION" => Some(DataType::Selection),
            _ => None,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::String => write!(f, "STRING"),
            DataType::Number => write!(f, "NUMBER"),
            DataType::Boolean => write!(f, "BOOLEAN"),
            DataType::Formula => write!(f, "FORMULA"),
            DataType::Dimension => write!(f, "DIMENSION"),
            DataType::Selection => write!(f, "SELECTION"),
        }
    }
}

// ==========================================
// 价格影响类型 (Price Impact Type)
// ==========================================
// 红线: PERCENTAGE 以 base_price 为基数，与选择顺序无关
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PriceImpactType {
    Fixed,      // 固定加价
    Percentage, // 按基准价百分比加价
    Formula,    // 公式求值加价
}

impl PriceImpactType {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "FIXED" => Some(PriceImpactType::Fixed),
            "PERCENTAGE" => Some(PriceImpactType::Percentage),
            "FORMULA" => Some(PriceImpactType::Formula),
            _ => None,
        }
    }
}

impl fmt::Display for PriceImpactType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PriceImpactType::Fixed => write!(f, "FIXED"),
            PriceImpactType::Percentage => write!(f, "PERCENTAGE"),
            PriceImpactType::Formula => write!(f, "FORMULA"),
        }
    }
}

// ==========================================
// 配置状态 (Configuration Status)
// ==========================================
// 红线: 状态单向推进; ORDERED 为终态，修改必须另起新配置
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConfigStatus {
    Draft,   // 草稿
    Saved,   // 已保存
    Quoted,  // 已报价
    Ordered, // 已下单（终态）
}

impl ConfigStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "DRAFT" => Some(ConfigStatus::Draft),
            "SAVED" => Some(ConfigStatus::Saved),
            "QUOTED" => Some(ConfigStatus::Quoted),
            "ORDERED" => Some(ConfigStatus::Ordered),
            _ => None,
        }
    }

    /// 是否为终态（禁止任何选择修改/重算）
    pub fn is_terminal(self) -> bool {
        matches!(self, ConfigStatus::Ordered)
    }

    /// 状态是否允许单向推进到 next
    pub fn can_transition_to(self, next: ConfigStatus) -> bool {
        !self.is_terminal() && next >= self
    }
}

impl fmt::Display for ConfigStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigStatus::Draft => write!(f, "DRAFT"),
            ConfigStatus::Saved => write!(f, "SAVED"),
            ConfigStatus::Quoted => write!(f, "QUOTED"),
            ConfigStatus::Ordered => write!(f, "ORDERED"),
        }
    }
}

// ==========================================
// 快照类型 (Snapshot Type)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SnapshotType {
    PriceQuote,           // 报价快照（价格保护）
    TechnicalCalculation, // 技术参数快照
    OrderConfirmation,    // 订单确认快照
}

impl SnapshotType {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PRICE_QUOTE" => Some(SnapshotType::PriceQuote),
            "TECHNICAL_CALCULATION" => Some(SnapshotType::TechnicalCalculation),
            "ORDER_CONFIRMATION" => Some(SnapshotType::OrderConfirmation),
            _ => None,
        }
    }
}

impl fmt::Display for SnapshotType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SnapshotType::PriceQuote => write!(f, "PRICE_QUOTE"),
            SnapshotType::TechnicalCalculation => write!(f, "TECHNICAL_CALCULATION"),
            SnapshotType::OrderConfirmation => write!(f, "ORDER_CONFIRMATION"),
        }
    }
}

// ==========================================
// 报价状态 (Quote Status)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QuoteStatus {
    Issued,   // 已出具
    Accepted, // 已接受
    Expired,  // 已过期
}

impl QuoteStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ISSUED" => Some(QuoteStatus::Issued),
            "ACCEPTED" => Some(QuoteStatus::Accepted),
            "EXPIRED" => Some(QuoteStatus::Expired),
            _ => None,
        }
    }
}

impl fmt::Display for QuoteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QuoteStatus::Issued => write!(f, "ISSUED"),
            QuoteStatus::Accepted => write!(f, "ACCEPTED"),
            QuoteStatus::Expired => write!(f, "EXPIRED"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_forward_only() {
        assert!(ConfigStatus::Draft.can_transition_to(ConfigStatus::Saved));
        assert!(ConfigStatus::Saved.can_transition_to(ConfigStatus::Quoted));
        assert!(ConfigStatus::Quoted.can_transition_to(ConfigStatus::Ordered));
        // 不允许回退
        assert!(!ConfigStatus::Quoted.can_transition_to(ConfigStatus::Draft));
        // ORDERED 为终态
        assert!(!ConfigStatus::Ordered.can_transition_to(ConfigStatus::Ordered));
        assert!(ConfigStatus::Ordered.is_terminal());
    }

    #[test]
    fn test_parse_roundtrip() {
        assert_eq!(NodeType::parse("TECHNICAL_SPEC"), Some(NodeType::TechnicalSpec));
        assert_eq!(NodeType::parse("UNKNOWN"), None);
        assert_eq!(
            SnapshotType::parse(&SnapshotType::PriceQuote.to_string()),
            Some(SnapshotType::PriceQuote)
        );
        assert_eq!(DataType::parse(&DataType::Dimension.to_string()), Some(DataType::Dimension));
    }
}
