// ==========================================
// 定制产品配置报价系统 - 计算引擎
// ==========================================
// 红线: 每次重算从基准值全量推导, 绝不增量修补聚合值
// 红线: 任何公式求值失败都中止本次重算, 保留上次成功的聚合值
// 红线: 聚合写回带乐观锁 (revision), 并发重算后写者失败
// 职责: 选择提交校验 / 技术参数派生 / 价格与重量聚合 / 状态推进
// ==========================================

use crate::config::calc_config_trait::CalcConfigReader;
use crate::domain::configuration::{Configuration, ConfigurationSelection, SelectionValue};
use crate::domain::node::AttributeNode;
use crate::domain::types::{ConfigStatus, NodeType, PriceImpactType};
use crate::engine::error::{EngineError, EngineResult};
use crate::engine::formula::FormulaEngine;
use crate::engine::rules::RuleEngine;
use crate::repository::{
    AttributeNodeRepository, ConfigurationRepository, ManufacturingTypeRepository,
    SelectionImpact, SelectionRepository,
};
use chrono::Utc;
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

// ==========================================
// CalcResult - 单次重算的完整输出
// ==========================================
#[derive(Debug, Clone)]
pub struct CalcResult {
    pub total_price: f64,                        // 总价 = 基准价 + Σ选择影响
    pub calculated_weight: f64,                  // 总重量 = 基准重量 + Σ选择影响
    pub technical_data: BTreeMap<String, f64>,   // 技术参数名 -> 派生值
    pub price_breakdown: BTreeMap<String, f64>,  // "base" + 净化名 -> 价格贡献
    pub weight_breakdown: BTreeMap<String, f64>, // "base" + 净化名 -> 重量贡献
    pub impacts: Vec<SelectionImpact>,           // 各选择的影响（写回缓存用）
}

/// 价格/重量分解中基准值的键名
pub const BREAKDOWN_BASE_KEY: &str = "base";

// ==========================================
// CalcEngine - 计算引擎
// ==========================================
pub struct CalcEngine {
    type_repo: Arc<ManufacturingTypeRepository>,
    node_repo: Arc<AttributeNodeRepository>,
    config_repo: Arc<ConfigurationRepository>,
    selection_repo: Arc<SelectionRepository>,
    config_reader: Arc<dyn CalcConfigReader>,
    rule_engine: RuleEngine,
}

impl CalcEngine {
    pub fn new(
        type_repo: Arc<ManufacturingTypeRepository>,
        node_repo: Arc<AttributeNodeRepository>,
        config_repo: Arc<ConfigurationRepository>,
        selection_repo: Arc<SelectionRepository>,
        config_reader: Arc<dyn CalcConfigReader>,
    ) -> Self {
        Self {
            type_repo,
            node_repo,
            config_repo,
            selection_repo,
            config_reader,
            rule_engine: RuleEngine::new(),
        }
    }

    // ==========================================
    // 配置生命周期
    // ==========================================

    /// 创建配置（基准价随类别当前值快照; 类别日后调价不影响已有配置）
    #[instrument(skip(self))]
    pub async fn create_configuration(
        &self,
        manufacturing_type_id: &str,
        customer_id: Option<String>,
        name: &str,
    ) -> EngineResult<Configuration> {
        let mt = self
            .type_repo
            .find_by_id(manufacturing_type_id)?
            .ok_or_else(|| EngineError::NotFound {
                entity: "ManufacturingType".to_string(),
                id: manufacturing_type_id.to_string(),
            })?;
        if !mt.is_active {
            return Err(EngineError::ValidationError {
                field: "manufacturing_type_id".to_string(),
                message: format!("产品类别 {} 已停用", manufacturing_type_id),
            });
        }

        let now = Utc::now();
        let config = Configuration {
            configuration_id: Uuid::new_v4().to_string(),
            manufacturing_type_id: manufacturing_type_id.to_string(),
            customer_id,
            name: name.to_string(),
            status: ConfigStatus::Draft,
            base_price: mt.base_price,
            total_price: mt.base_price,
            calculated_weight: mt.base_weight,
            calculated_technical_data: BTreeMap::new(),
            revision: 0,
            created_at: now,
            updated_at: now,
        };
        self.config_repo.create(&config)?;
        info!(configuration_id = %config.configuration_id, "配置已创建");
        Ok(config)
    }

    /// 状态推进（单向: DRAFT -> SAVED -> QUOTED -> ORDERED, 终态后拒绝一切变更）
    pub fn advance_status(
        &self,
        configuration_id: &str,
        next: ConfigStatus,
    ) -> EngineResult<Configuration> {
        let config = self.require_configuration(configuration_id)?;
        if !config.status.can_transition_to(next) {
            return Err(EngineError::InvalidStateTransition {
                from: config.status.to_string(),
                to: next.to_string(),
            });
        }
        self.config_repo.update_status(configuration_id, next)?;
        self.require_configuration(configuration_id)
    }

    // ==========================================
    // 选择写入
    // ==========================================

    /// 提交选择（重复提交同节点按更新处理）
    ///
    /// 推导在写库前基于含本次提交值的内存视图完成,
    /// 选择行与聚合值在同一事务落库 — 公式失败时选择行不落库。
    ///
    /// # 错误
    /// - `FieldNotApplicable`: 节点的 display_condition 当前不满足
    /// - `ValidationError`: 取值类型/范围校验失败
    /// - `InvalidStateTransition`: 配置处于终态
    /// - 公式类错误: 本次提交整体回绝, 库中选择与聚合值均保持原状
    #[instrument(skip(self, value))]
    pub async fn submit_selection(
        &self,
        configuration_id: &str,
        attribute_node_id: &str,
        value: SelectionValue,
    ) -> EngineResult<ConfigurationSelection> {
        let config = self.require_configuration(configuration_id)?;
        self.reject_terminal(&config)?;

        let node = self.require_node(attribute_node_id)?;
        if node.manufacturing_type_id != config.manufacturing_type_id {
            return Err(EngineError::ValidationError {
                field: "attribute_node_id".to_string(),
                message: "节点不属于该配置的产品类别".to_string(),
            });
        }

        // 适用性判定基于当前已有选择（不含本次提交值）
        let selections = self.selection_repo.find_by_configuration(configuration_id)?;
        let nodes = self.load_type_nodes(&config.manufacturing_type_id)?;
        let field_values = build_field_values(&selections, &nodes);
        if !self.rule_engine.is_applicable(&node, &field_values) {
            return Err(EngineError::FieldNotApplicable {
                node_id: node.node_id.clone(),
                field: node.path.leaf().to_string(),
            });
        }

        self.rule_engine.validate_value(&node, &value)?;

        let now = Utc::now();
        let mut pending = ConfigurationSelection {
            selection_id: Uuid::new_v4().to_string(),
            configuration_id: configuration_id.to_string(),
            attribute_node_id: attribute_node_id.to_string(),
            value,
            calculated_price_impact: 0.0,
            calculated_weight_impact: 0.0,
            selection_path: node.path.clone(),
            created_at: now,
            updated_at: now,
        };

        // 写库前先在内存视图上推导: 同节点旧选择被本次提交替换
        let mut working = selections;
        working.retain(|s| s.attribute_node_id != attribute_node_id);
        working.push(pending.clone());
        let result = self.calculate_from(&config, &working).await?;

        if let Some(impact) = result.impacts.iter().find(|i| i.selection_id == pending.selection_id) {
            pending.calculated_price_impact = impact.price_impact;
            pending.calculated_weight_impact = impact.weight_impact;
        }

        self.config_repo.upsert_selection_with_calculation(
            &pending,
            config.revision,
            result.total_price,
            result.calculated_weight,
            &result.technical_data,
            &result.impacts,
        )?;
        info!(configuration_id, attribute_node_id, total_price = result.total_price, "选择已提交");

        // upsert 可能命中已有行, 返回数据库中的实际记录
        self.selection_repo
            .find_one(configuration_id, attribute_node_id)?
            .ok_or_else(|| EngineError::NotFound {
                entity: "ConfigurationSelection".to_string(),
                id: format!("{}/{}", configuration_id, attribute_node_id),
            })
    }

    /// 移除选择, 删除与聚合写回同事务
    ///
    /// # 错误
    /// - `ValidationError`: 节点标记 required 且当前适用, 拒绝移除
    #[instrument(skip(self))]
    pub async fn remove_selection(
        &self,
        configuration_id: &str,
        attribute_node_id: &str,
    ) -> EngineResult<bool> {
        let config = self.require_configuration(configuration_id)?;
        self.reject_terminal(&config)?;

        let selections = self.selection_repo.find_by_configuration(configuration_id)?;
        if !selections.iter().any(|s| s.attribute_node_id == attribute_node_id) {
            return Ok(false);
        }

        let nodes = self.load_type_nodes(&config.manufacturing_type_id)?;
        if let Some(node) = nodes.get(attribute_node_id) {
            let required = node
                .validation_rules
                .as_ref()
                .and_then(|r| r.required)
                .unwrap_or(false);
            let field_values = build_field_values(&selections, &nodes);
            if required && self.rule_engine.is_applicable(node, &field_values) {
                return Err(EngineError::ValidationError {
                    field: node.path.leaf().to_string(),
                    message: "必填字段的选择不可移除".to_string(),
                });
            }
        }

        let mut working = selections;
        working.retain(|s| s.attribute_node_id != attribute_node_id);
        let result = self.calculate_from(&config, &working).await?;

        self.config_repo.delete_selection_with_calculation(
            configuration_id,
            attribute_node_id,
            config.revision,
            result.total_price,
            result.calculated_weight,
            &result.technical_data,
            &result.impacts,
        )?;
        Ok(true)
    }

    /// 适用且必填但尚无选择的字段（净化名, 按字典序）
    pub fn missing_required_selections(
        &self,
        configuration_id: &str,
    ) -> EngineResult<Vec<String>> {
        let config = self.require_configuration(configuration_id)?;
        let nodes = self.load_type_nodes(&config.manufacturing_type_id)?;
        let selections = self.selection_repo.find_by_configuration(configuration_id)?;
        let field_values = build_field_values(&selections, &nodes);
        let selected: HashSet<&str> = selections
            .iter()
            .map(|s| s.attribute_node_id.as_str())
            .collect();

        let mut missing: Vec<String> = nodes
            .values()
            .filter(|n| {
                n.validation_rules
                    .as_ref()
                    .and_then(|r| r.required)
                    .unwrap_or(false)
            })
            .filter(|n| !selected.contains(n.node_id.as_str()))
            .filter(|n| self.rule_engine.is_applicable(n, &field_values))
            .map(|n| n.path.leaf().to_string())
            .collect();
        missing.sort();
        Ok(missing)
    }

    /// 节点对当前配置是否适用（display_condition 判定）
    pub fn is_field_applicable(
        &self,
        configuration_id: &str,
        attribute_node_id: &str,
    ) -> EngineResult<bool> {
        let config = self.require_configuration(configuration_id)?;
        let node = self.require_node(attribute_node_id)?;
        if node.manufacturing_type_id != config.manufacturing_type_id {
            return Ok(false);
        }
        let nodes = self.load_type_nodes(&config.manufacturing_type_id)?;
        let selections = self.selection_repo.find_by_configuration(configuration_id)?;
        let field_values = build_field_values(&selections, &nodes);
        Ok(self.rule_engine.is_applicable(&node, &field_values))
    }

    // ==========================================
    // 全量重算
    // ==========================================

    /// 计算聚合值（纯推导, 不写库）
    ///
    /// 求值顺序:
    /// 1. TECHNICAL_SPEC 公式按路径序求值, 结果并入变量表
    /// 2. 各选择的价格/重量影响（可引用第 1 步的技术参数）
    ///
    /// display_condition 不满足的节点对应的选择不参与聚合。
    #[instrument(skip(self))]
    pub async fn calculate(&self, configuration_id: &str) -> EngineResult<CalcResult> {
        let config = self.require_configuration(configuration_id)?;
        let selections = self.selection_repo.find_by_configuration(configuration_id)?;
        self.calculate_from(&config, &selections).await
    }

    /// 对给定选择视图推导聚合值（选择写入路径在落库前用内存视图调用）
    async fn calculate_from(
        &self,
        config: &Configuration,
        selections: &[ConfigurationSelection],
    ) -> EngineResult<CalcResult> {
        let mt = self
            .type_repo
            .find_by_id(&config.manufacturing_type_id)?
            .ok_or_else(|| EngineError::NotFound {
                entity: "ManufacturingType".to_string(),
                id: config.manufacturing_type_id.clone(),
            })?;

        let max_length = self
            .config_reader
            .get_formula_max_length()
            .await
            .map_err(|e| EngineError::ConfigError(e.to_string()))?;
        let formula = FormulaEngine::new(max_length);

        let nodes = self.load_type_nodes(&config.manufacturing_type_id)?;
        let field_values = build_field_values(selections, &nodes);

        // 变量表: 内置绑定在先, 同名选择值覆盖之
        let mut context: HashMap<String, f64> = HashMap::new();
        context.insert("base_price".to_string(), config.base_price);
        context.insert("base_weight".to_string(), mt.base_weight);
        for selection in selections {
            if let (Some(node), Some(n)) =
                (nodes.get(&selection.attribute_node_id), selection.value.as_number())
            {
                context.insert(node.path.leaf().to_string(), n);
            }
        }

        // 第 1 步: 技术参数派生（按路径序, 深层参数可引用浅层结果）
        let mut technical_data = BTreeMap::new();
        let mut technical_nodes: Vec<&AttributeNode> = nodes
            .values()
            .filter(|n| n.node_type == NodeType::TechnicalSpec)
            .collect();
        technical_nodes.sort_by(|a, b| a.path.to_string().cmp(&b.path.to_string()));

        for node in technical_nodes {
            let expr = match &node.technical_impact_formula {
                Some(f) => f,
                None => continue,
            };
            if !self.rule_engine.is_applicable(node, &field_values) {
                continue;
            }
            let value = formula.evaluate(expr, &context)?;
            let key = node.path.leaf().to_string();
            context.insert(key.clone(), value);
            technical_data.insert(key, value);
        }

        // 第 2 步: 逐选择聚合价格与重量影响
        let mut price_breakdown = BTreeMap::new();
        let mut weight_breakdown = BTreeMap::new();
        price_breakdown.insert(BREAKDOWN_BASE_KEY.to_string(), config.base_price);
        weight_breakdown.insert(BREAKDOWN_BASE_KEY.to_string(), mt.base_weight);

        let mut total_price = config.base_price;
        let mut calculated_weight = mt.base_weight;
        let mut impacts = Vec::with_capacity(selections.len());

        for selection in selections {
            let node = match nodes.get(&selection.attribute_node_id) {
                Some(n) => n,
                None => {
                    warn!(selection_id = %selection.selection_id, "选择引用的节点已不存在, 跳过");
                    continue;
                }
            };

            // 条件不满足的选择保留在库中, 但不参与聚合
            if !self.rule_engine.is_applicable(node, &field_values) {
                impacts.push(SelectionImpact {
                    selection_id: selection.selection_id.clone(),
                    price_impact: 0.0,
                    weight_impact: 0.0,
                });
                continue;
            }

            let (price_impact, weight_impact) =
                self.selection_impacts(&formula, node, selection, &context, config.base_price, mt.base_weight)?;

            total_price += price_impact;
            calculated_weight += weight_impact;
            if price_impact != 0.0 {
                price_breakdown.insert(node.path.leaf().to_string(), price_impact);
            }
            if weight_impact != 0.0 {
                weight_breakdown.insert(node.path.leaf().to_string(), weight_impact);
            }
            impacts.push(SelectionImpact {
                selection_id: selection.selection_id.clone(),
                price_impact,
                weight_impact,
            });
        }

        Ok(CalcResult {
            total_price,
            calculated_weight,
            technical_data,
            price_breakdown,
            weight_breakdown,
            impacts,
        })
    }

    /// 重算并写回（乐观锁保护; 公式失败时不触碰已存聚合值）
    ///
    /// 返回写回后的配置与本次推导结果, 调用方冻结快照时直接取用,
    /// 不另做第二次推导。
    #[instrument(skip(self))]
    pub async fn recalculate(
        &self,
        configuration_id: &str,
    ) -> EngineResult<(Configuration, CalcResult)> {
        let config = self.require_configuration(configuration_id)?;
        let result = self.calculate(configuration_id).await?;

        let new_revision = self.config_repo.apply_calculation(
            configuration_id,
            config.revision,
            result.total_price,
            result.calculated_weight,
            &result.technical_data,
            &result.impacts,
        )?;
        info!(
            configuration_id,
            new_revision,
            total_price = result.total_price,
            "聚合值已写回"
        );

        let config = self.require_configuration(configuration_id)?;
        Ok((config, result))
    }

    /// 单个选择的价格/重量影响
    ///
    /// 价格与重量共用 price_impact_type 判别:
    /// - FIXED: 固定加项
    /// - PERCENTAGE: 基准值的百分比（不按累计值复利）
    /// - FORMULA: 求值对应公式, "value" 绑定为本选择的数值
    fn selection_impacts(
        &self,
        formula: &FormulaEngine,
        node: &AttributeNode,
        selection: &ConfigurationSelection,
        context: &HashMap<String, f64>,
        base_price: f64,
        base_weight: f64,
    ) -> EngineResult<(f64, f64)> {
        let eval_with_value = |expr: &str| -> EngineResult<f64> {
            let mut scoped = context.clone();
            if let Some(n) = selection.value.as_number() {
                scoped.insert("value".to_string(), n);
            }
            formula.evaluate(expr, &scoped)
        };

        let price_impact = match node.price_impact_type {
            PriceImpactType::Fixed => node.price_impact_value.unwrap_or(0.0),
            PriceImpactType::Percentage => {
                base_price * node.price_impact_value.unwrap_or(0.0) / 100.0
            }
            PriceImpactType::Formula => match &node.price_formula {
                Some(expr) => eval_with_value(expr)?,
                None => 0.0,
            },
        };

        let weight_impact = match node.price_impact_type {
            PriceImpactType::Fixed => node.weight_impact.unwrap_or(0.0),
            PriceImpactType::Percentage => {
                base_weight * node.weight_impact.unwrap_or(0.0) / 100.0
            }
            PriceImpactType::Formula => match &node.weight_formula {
                Some(expr) => eval_with_value(expr)?,
                None => 0.0,
            },
        };

        Ok((price_impact, weight_impact))
    }

    // ==========================================
    // 内部工具
    // ==========================================

    fn require_configuration(&self, configuration_id: &str) -> EngineResult<Configuration> {
        self.config_repo
            .find_by_id(configuration_id)?
            .ok_or_else(|| EngineError::NotFound {
                entity: "Configuration".to_string(),
                id: configuration_id.to_string(),
            })
    }

    fn require_node(&self, node_id: &str) -> EngineResult<AttributeNode> {
        self.node_repo
            .find_by_id(node_id)?
            .ok_or_else(|| EngineError::NotFound {
                entity: "AttributeNode".to_string(),
                id: node_id.to_string(),
            })
    }

    // 终态配置不可能回到可编辑状态, 选择写入按非法转换拒绝
    fn reject_terminal(&self, config: &Configuration) -> EngineResult<()> {
        if config.status.is_terminal() {
            return Err(EngineError::InvalidStateTransition {
                from: config.status.to_string(),
                to: ConfigStatus::Draft.to_string(),
            });
        }
        Ok(())
    }

    fn load_type_nodes(
        &self,
        manufacturing_type_id: &str,
    ) -> EngineResult<HashMap<String, AttributeNode>> {
        Ok(self
            .node_repo
            .find_by_type(manufacturing_type_id)?
            .into_iter()
            .map(|n| (n.node_id.clone(), n))
            .collect())
    }
}

/// 条件求值用的字段视图: 净化名 -> 选择值的 JSON 形态
fn build_field_values(
    selections: &[ConfigurationSelection],
    nodes: &HashMap<String, AttributeNode>,
) -> HashMap<String, JsonValue> {
    selections
        .iter()
        .filter_map(|s| {
            nodes
                .get(&s.attribute_node_id)
                .map(|n| (n.path.leaf().to_string(), s.value.to_json()))
        })
        .collect()
}
