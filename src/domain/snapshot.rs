// ==========================================
// 定制产品配置报价系统 - 快照与报价领域模型
// ==========================================
// 红线: 快照一经创建不可修改; "更正"只能追加新快照行
// 用途: 价格保护 - 报价/订单引用冻结的快照, 不做实时重算
// ==========================================

use crate::domain::configuration::SelectionValue;
use crate::domain::types::{QuoteStatus, SnapshotType};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ==========================================
// ConfigurationSnapshot - 配置计算快照
// ==========================================
// 对齐: configuration_snapshot 表（只追加）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigurationSnapshot {
    // ===== 主键与关联 =====
    pub snapshot_id: String,               // 快照ID
    pub configuration_id: String,          // 来源配置
    pub quote_id: Option<String>,          // 关联报价（报价快照才有）

    // ===== 冻结的计算结果 =====
    pub base_price: f64,                   // 基准价格
    pub total_price: f64,                  // 总价
    pub price_breakdown: BTreeMap<String, f64>,  // 价格分解: 构件名 -> 金额
    pub weight_breakdown: BTreeMap<String, f64>, // 重量分解: 构件名 -> 重量
    pub technical_snapshot: BTreeMap<String, f64>, // 技术参数快照

    // ===== 元数据 =====
    pub snapshot_type: SnapshotType,       // 快照类型
    pub valid_until: Option<NaiveDate>,    // 有效期（仅报价快照）
    pub created_at: DateTime<Utc>,         // 创建时间
}

// ==========================================
// Quote - 报价单
// ==========================================
// 对齐: quote 表
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quote {
    // ===== 主键与关联 =====
    pub quote_id: String,                  // 报价ID
    pub configuration_id: String,          // 来源配置
    pub customer_id: Option<String>,       // 客户ID
    pub quote_no: String,                  // 报价编号（Q-yyyymmdd-xxxxxxxx）

    // ===== 金额 =====
    pub subtotal: f64,                     // 小计（= 快照 total_price）
    pub tax_amount: f64,                   // 税额
    pub discount_amount: f64,              // 折扣
    pub total: f64,                        // 合计

    // ===== 状态与有效期 =====
    pub status: QuoteStatus,               // 报价状态
    pub valid_until: Option<NaiveDate>,    // 有效期（None = 长期有效）

    // ===== 价格保护 =====
    pub snapshot_id: Option<String>,       // 冻结快照ID（报价以快照为准）

    // ===== 元数据 =====
    pub created_at: DateTime<Utc>,         // 创建时间
}

// ==========================================
// PresetSelection - 模板预置选择
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresetSelection {
    pub attribute_node_id: String,         // 预置的属性节点
    pub value: SelectionValue,             // 预置取值
}

// ==========================================
// ConfigurationTemplate - 配置模板
// ==========================================
// 用途: createConfigurationFromTemplate 的数据来源
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigurationTemplate {
    pub template_id: String,               // 模板ID
    pub manufacturing_type_id: String,     // 所属产品类别
    pub name: String,                      // 模板名称
    pub preset_selections: Vec<PresetSelection>, // 预置选择列表（JSON 列）
    pub is_active: bool,                   // 是否启用
    pub created_at: DateTime<Utc>,         // 创建时间
}
