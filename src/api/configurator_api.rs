// ==========================================
// 定制产品配置报价系统 - 配置器 API 门面
// ==========================================
// 职责: 组装仓储与引擎, 对外提供配置器全部操作的统一入口
// 红线: API 层只做参数整形与错误转换, 业务语义全部在引擎层
// ==========================================

use std::sync::{Arc, Mutex};

use chrono::{NaiveDate, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::api::error::{ApiError, ApiResult};
use crate::config::config_manager::ConfigManager;
use crate::db::open_sqlite_connection;
use crate::domain::configuration::{Configuration, ConfigurationSelection, SelectionValue};
use crate::domain::node::{AttributeNode, ManufacturingType};
use crate::domain::snapshot::{ConfigurationSnapshot, ConfigurationTemplate, PresetSelection, Quote};
use crate::domain::types::ConfigStatus;
use crate::engine::calc::CalcEngine;
use crate::engine::hierarchy::{HierarchyEngine, NewNode};
use crate::engine::quote::QuoteEngine;
use crate::repository::{
    AttributeNodeRepository, ConfigurationRepository, ConfigurationTemplateRepository,
    ManufacturingTypeRepository, QuoteRepository, SelectionRepository, SnapshotRepository,
};

// ==========================================
// ConfigurationDetail - 配置 + 选择组合视图
// ==========================================
/// 用于前端展示的配置完整信息（聚合值 + 全部选择）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigurationDetail {
    pub configuration: Configuration,
    pub selections: Vec<ConfigurationSelection>,
}

// ==========================================
// PricingPreview - 重算预览视图
// ==========================================
/// calculate 的只读输出, 不落库
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingPreview {
    pub total_price: f64,
    pub calculated_weight: f64,
    pub technical_data: std::collections::BTreeMap<String, f64>,
    pub price_breakdown: std::collections::BTreeMap<String, f64>,
    pub weight_breakdown: std::collections::BTreeMap<String, f64>,
}

// ==========================================
// ConfiguratorApi - 配置器 API 门面
// ==========================================
pub struct ConfiguratorApi {
    type_repo: Arc<ManufacturingTypeRepository>,
    config_repo: Arc<ConfigurationRepository>,
    selection_repo: Arc<SelectionRepository>,
    template_repo: Arc<ConfigurationTemplateRepository>,
    hierarchy_engine: HierarchyEngine,
    calc_engine: Arc<CalcEngine>,
    quote_engine: QuoteEngine,
}

impl ConfiguratorApi {
    /// 打开数据库并完成全部装配
    pub fn new(db_path: &str) -> ApiResult<Self> {
        let conn = open_sqlite_connection(db_path)
            .map_err(|e| ApiError::InternalError(e.to_string()))?;
        Self::from_connection(Arc::new(Mutex::new(conn)))
    }

    /// 从共享连接装配（测试与嵌入场景）
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> ApiResult<Self> {
        let type_repo = Arc::new(ManufacturingTypeRepository::from_connection(conn.clone()));
        let node_repo = Arc::new(AttributeNodeRepository::from_connection(conn.clone()));
        let config_repo = Arc::new(ConfigurationRepository::from_connection(conn.clone()));
        let selection_repo = Arc::new(SelectionRepository::from_connection(conn.clone()));
        let snapshot_repo = Arc::new(SnapshotRepository::from_connection(conn.clone()));
        let quote_repo = Arc::new(QuoteRepository::from_connection(conn.clone()));
        let template_repo = Arc::new(ConfigurationTemplateRepository::from_connection(conn.clone()));
        let config_manager = Arc::new(
            ConfigManager::from_connection(conn)
                .map_err(|e| ApiError::InternalError(e.to_string()))?,
        );

        let hierarchy_engine = HierarchyEngine::new(node_repo.clone());
        let calc_engine = Arc::new(CalcEngine::new(
            type_repo.clone(),
            node_repo,
            config_repo.clone(),
            selection_repo.clone(),
            config_manager.clone(),
        ));
        let quote_engine = QuoteEngine::new(
            config_repo.clone(),
            selection_repo.clone(),
            snapshot_repo,
            quote_repo,
            template_repo.clone(),
            calc_engine.clone(),
            config_manager,
        );

        Ok(Self {
            type_repo,
            config_repo,
            selection_repo,
            template_repo,
            hierarchy_engine,
            calc_engine,
            quote_engine,
        })
    }

    // ==========================================
    // 产品类别管理
    // ==========================================

    pub fn create_manufacturing_type(
        &self,
        name: &str,
        base_price: f64,
        base_weight: f64,
    ) -> ApiResult<ManufacturingType> {
        if name.trim().is_empty() {
            return Err(ApiError::InvalidInput {
                field: "name".to_string(),
                message: "类别名称不能为空".to_string(),
            });
        }
        let now = Utc::now();
        let mt = ManufacturingType {
            type_id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            base_price,
            base_weight,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        self.type_repo.create(&mt)?;
        Ok(mt)
    }

    pub fn list_manufacturing_types(&self) -> ApiResult<Vec<ManufacturingType>> {
        Ok(self.type_repo.list_active()?)
    }

    pub fn update_manufacturing_type(&self, mt: &ManufacturingType) -> ApiResult<()> {
        let mut updated = mt.clone();
        updated.updated_at = Utc::now();
        Ok(self.type_repo.update(&updated)?)
    }

    // ==========================================
    // 属性树管理
    // ==========================================

    pub fn create_node(&self, input: NewNode) -> ApiResult<AttributeNode> {
        debug!(name = %input.name, "创建属性节点");
        Ok(self.hierarchy_engine.insert_node(input)?)
    }

    pub fn update_node(&self, node: &AttributeNode) -> ApiResult<()> {
        Ok(self.hierarchy_engine.update_node(node)?)
    }

    pub fn move_node(
        &self,
        node_id: &str,
        new_parent_id: Option<&str>,
    ) -> ApiResult<AttributeNode> {
        Ok(self.hierarchy_engine.move_node(node_id, new_parent_id)?)
    }

    pub fn rename_node(&self, node_id: &str, new_name: &str) -> ApiResult<AttributeNode> {
        Ok(self.hierarchy_engine.rename_node(node_id, new_name)?)
    }

    pub fn delete_node(&self, node_id: &str) -> ApiResult<()> {
        Ok(self.hierarchy_engine.delete_node(node_id)?)
    }

    pub fn get_tree(&self, manufacturing_type_id: &str) -> ApiResult<Vec<AttributeNode>> {
        Ok(self.hierarchy_engine.tree_of(manufacturing_type_id)?)
    }

    pub fn get_children(&self, node_id: &str) -> ApiResult<Vec<AttributeNode>> {
        Ok(self.hierarchy_engine.children_of(node_id)?)
    }

    pub fn get_descendants(&self, node_id: &str) -> ApiResult<Vec<AttributeNode>> {
        Ok(self.hierarchy_engine.descendants_of(node_id)?)
    }

    pub fn get_ancestors(&self, node_id: &str) -> ApiResult<Vec<AttributeNode>> {
        Ok(self.hierarchy_engine.ancestors_of(node_id)?)
    }

    // ==========================================
    // 配置生命周期
    // ==========================================

    pub async fn create_configuration(
        &self,
        manufacturing_type_id: &str,
        customer_id: Option<String>,
        name: &str,
    ) -> ApiResult<Configuration> {
        Ok(self
            .calc_engine
            .create_configuration(manufacturing_type_id, customer_id, name)
            .await?)
    }

    pub fn get_configuration(&self, configuration_id: &str) -> ApiResult<ConfigurationDetail> {
        let configuration = self
            .config_repo
            .find_by_id(configuration_id)?
            .ok_or_else(|| {
                ApiError::NotFound(format!("Configuration (id={})", configuration_id))
            })?;
        let selections = self.selection_repo.find_by_configuration(configuration_id)?;
        Ok(ConfigurationDetail {
            configuration,
            selections,
        })
    }

    pub async fn submit_selection(
        &self,
        configuration_id: &str,
        attribute_node_id: &str,
        value: SelectionValue,
    ) -> ApiResult<ConfigurationSelection> {
        Ok(self
            .calc_engine
            .submit_selection(configuration_id, attribute_node_id, value)
            .await?)
    }

    pub async fn remove_selection(
        &self,
        configuration_id: &str,
        attribute_node_id: &str,
    ) -> ApiResult<bool> {
        Ok(self
            .calc_engine
            .remove_selection(configuration_id, attribute_node_id)
            .await?)
    }

    pub async fn recalculate(&self, configuration_id: &str) -> ApiResult<Configuration> {
        let (config, _) = self.calc_engine.recalculate(configuration_id).await?;
        Ok(config)
    }

    /// 节点在当前配置下是否适用（display_condition 判定, 跨类别恒为 false）
    pub fn is_field_applicable(
        &self,
        configuration_id: &str,
        attribute_node_id: &str,
    ) -> ApiResult<bool> {
        Ok(self
            .calc_engine
            .is_field_applicable(configuration_id, attribute_node_id)?)
    }

    /// 只读重算预览（不落库, 不推进 revision）
    pub async fn preview_pricing(&self, configuration_id: &str) -> ApiResult<PricingPreview> {
        let result = self.calc_engine.calculate(configuration_id).await?;
        Ok(PricingPreview {
            total_price: result.total_price,
            calculated_weight: result.calculated_weight,
            technical_data: result.technical_data,
            price_breakdown: result.price_breakdown,
            weight_breakdown: result.weight_breakdown,
        })
    }

    pub fn advance_status(
        &self,
        configuration_id: &str,
        next: ConfigStatus,
    ) -> ApiResult<Configuration> {
        Ok(self.calc_engine.advance_status(configuration_id, next)?)
    }

    pub async fn fork_configuration(
        &self,
        configuration_id: &str,
        new_name: &str,
    ) -> ApiResult<Configuration> {
        Ok(self
            .quote_engine
            .fork_configuration(configuration_id, new_name)
            .await?)
    }

    // ==========================================
    // 模板
    // ==========================================

    pub fn create_template(
        &self,
        manufacturing_type_id: &str,
        name: &str,
        preset_selections: Vec<PresetSelection>,
    ) -> ApiResult<ConfigurationTemplate> {
        let template = ConfigurationTemplate {
            template_id: Uuid::new_v4().to_string(),
            manufacturing_type_id: manufacturing_type_id.to_string(),
            name: name.to_string(),
            preset_selections,
            is_active: true,
            created_at: Utc::now(),
        };
        self.template_repo.create(&template)?;
        Ok(template)
    }

    pub fn list_templates(
        &self,
        manufacturing_type_id: &str,
    ) -> ApiResult<Vec<ConfigurationTemplate>> {
        Ok(self.template_repo.list_active(manufacturing_type_id)?)
    }

    pub async fn create_from_template(
        &self,
        template_id: &str,
        customer_id: Option<String>,
        name: &str,
    ) -> ApiResult<Configuration> {
        Ok(self
            .quote_engine
            .create_from_template(template_id, customer_id, name)
            .await?)
    }

    // ==========================================
    // 报价与快照
    // ==========================================

    /// 生成报价并冻结快照; customer_id 为 None 时沿用配置上的客户
    pub async fn create_quote(
        &self,
        configuration_id: &str,
        customer_id: Option<String>,
        discount_amount: f64,
        valid_until: Option<NaiveDate>,
    ) -> ApiResult<(Quote, ConfigurationSnapshot)> {
        Ok(self
            .quote_engine
            .create_quote(configuration_id, customer_id, discount_amount, valid_until)
            .await?)
    }

    pub fn accept_quote(&self, quote_id: &str) -> ApiResult<Quote> {
        Ok(self
            .quote_engine
            .accept_quote(quote_id, Utc::now().date_naive())?)
    }

    pub async fn confirm_order(
        &self,
        configuration_id: &str,
    ) -> ApiResult<ConfigurationSnapshot> {
        Ok(self.quote_engine.confirm_order(configuration_id).await?)
    }

    /// 定时任务入口: 过期所有已过有效期的 ISSUED 报价
    pub fn expire_quotes(&self) -> ApiResult<usize> {
        Ok(self.quote_engine.expire_quotes(Utc::now().date_naive())?)
    }

    /// 技术参数留痕快照（不改配置状态）
    pub async fn snapshot_technical(
        &self,
        configuration_id: &str,
    ) -> ApiResult<ConfigurationSnapshot> {
        Ok(self.quote_engine.snapshot_technical(configuration_id).await?)
    }

    pub fn get_quote(&self, quote_id: &str) -> ApiResult<Quote> {
        Ok(self.quote_engine.get_quote(quote_id)?)
    }

    pub fn get_snapshot(&self, snapshot_id: &str) -> ApiResult<ConfigurationSnapshot> {
        Ok(self.quote_engine.get_snapshot(snapshot_id)?)
    }

    pub fn list_snapshots(
        &self,
        configuration_id: &str,
    ) -> ApiResult<Vec<ConfigurationSnapshot>> {
        Ok(self.quote_engine.list_snapshots(configuration_id)?)
    }
}
