// ==========================================
// 定制产品配置报价系统 - 报价与快照引擎
// ==========================================
// 红线: 报价金额以冻结快照为准; 属性树/类别价后续变动不影响已出报价
// 红线: 快照一经写入不可修改; 报价过期只改报价状态, 不触碰快照
// 职责: 报价生成 / 订单确认 / 模板实例化 / 配置复制 / 报价过期
// ==========================================

use crate::config::calc_config_trait::CalcConfigReader;
use crate::domain::configuration::{Configuration, ConfigurationSelection};
use crate::domain::snapshot::{ConfigurationSnapshot, Quote};
use crate::domain::types::{ConfigStatus, QuoteStatus, SnapshotType};
use crate::engine::calc::CalcEngine;
use crate::engine::error::{EngineError, EngineResult};
use crate::repository::{
    ConfigurationRepository, ConfigurationTemplateRepository, QuoteRepository,
    SelectionRepository, SnapshotRepository,
};
use chrono::{Duration, NaiveDate, Utc};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

// ==========================================
// QuoteEngine - 报价与快照引擎
// ==========================================
pub struct QuoteEngine {
    config_repo: Arc<ConfigurationRepository>,
    selection_repo: Arc<SelectionRepository>,
    snapshot_repo: Arc<SnapshotRepository>,
    quote_repo: Arc<QuoteRepository>,
    template_repo: Arc<ConfigurationTemplateRepository>,
    calc_engine: Arc<CalcEngine>,
    config_reader: Arc<dyn CalcConfigReader>,
}

impl QuoteEngine {
    pub fn new(
        config_repo: Arc<ConfigurationRepository>,
        selection_repo: Arc<SelectionRepository>,
        snapshot_repo: Arc<SnapshotRepository>,
        quote_repo: Arc<QuoteRepository>,
        template_repo: Arc<ConfigurationTemplateRepository>,
        calc_engine: Arc<CalcEngine>,
        config_reader: Arc<dyn CalcConfigReader>,
    ) -> Self {
        Self {
            config_repo,
            selection_repo,
            snapshot_repo,
            quote_repo,
            template_repo,
            calc_engine,
            config_reader,
        }
    }

    // ==========================================
    // 报价生成
    // ==========================================

    /// 生成报价: 全量重算 -> 冻结快照 -> 报价单, 三者同一事务落库
    ///
    /// 配置状态推进为 QUOTED。重算中的任何公式错误都中止报价,
    /// 不产生快照行, 不改变配置状态。
    ///
    /// # 参数
    /// - customer_id: 报价单客户; None 时沿用配置上的客户
    /// - valid_until: 显式有效期; None 时按 quote/default_valid_days 推算
    #[instrument(skip(self))]
    pub async fn create_quote(
        &self,
        configuration_id: &str,
        customer_id: Option<String>,
        discount_amount: f64,
        valid_until: Option<NaiveDate>,
    ) -> EngineResult<(Quote, ConfigurationSnapshot)> {
        let config = self.require_configuration(configuration_id)?;
        if !config.status.can_transition_to(ConfigStatus::Quoted) {
            return Err(EngineError::InvalidStateTransition {
                from: config.status.to_string(),
                to: ConfigStatus::Quoted.to_string(),
            });
        }

        let missing = self.calc_engine.missing_required_selections(configuration_id)?;
        if !missing.is_empty() {
            return Err(EngineError::ValidationError {
                field: missing.join(", "),
                message: "必填字段尚未取值, 不能出具报价".to_string(),
            });
        }

        // 报价前必做全量重算; 快照冻结的正是写回配置的那一份推导结果
        let (config, result) = self.calc_engine.recalculate(configuration_id).await?;

        let tax_rate = self
            .config_reader
            .get_tax_rate()
            .await
            .map_err(|e| EngineError::ConfigError(e.to_string()))?;
        let now = Utc::now();
        // 未显式指定有效期时按配置项推算; valid_days <= 0 配置为长期有效
        let valid_until = match valid_until {
            Some(date) => Some(date),
            None => {
                let valid_days = self
                    .config_reader
                    .get_quote_default_valid_days()
                    .await
                    .map_err(|e| EngineError::ConfigError(e.to_string()))?;
                if valid_days > 0 {
                    Some(now.date_naive() + Duration::days(valid_days))
                } else {
                    None
                }
            }
        };

        let quote_id = Uuid::new_v4().to_string();
        let snapshot_id = Uuid::new_v4().to_string();
        self.ensure_snapshot_absent(&snapshot_id)?;

        let snapshot = ConfigurationSnapshot {
            snapshot_id: snapshot_id.clone(),
            configuration_id: configuration_id.to_string(),
            quote_id: Some(quote_id.clone()),
            base_price: config.base_price,
            total_price: result.total_price,
            price_breakdown: result.price_breakdown,
            weight_breakdown: result.weight_breakdown,
            technical_snapshot: result.technical_data,
            snapshot_type: SnapshotType::PriceQuote,
            valid_until,
            created_at: now,
        };

        let subtotal = result.total_price;
        let tax_amount = subtotal * tax_rate;
        let quote = Quote {
            quote_id: quote_id.clone(),
            configuration_id: configuration_id.to_string(),
            customer_id: customer_id.or_else(|| config.customer_id.clone()),
            quote_no: generate_quote_no(),
            subtotal,
            tax_amount,
            discount_amount,
            total: subtotal + tax_amount - discount_amount,
            status: QuoteStatus::Issued,
            valid_until,
            snapshot_id: Some(snapshot_id),
            created_at: now,
        };

        self.quote_repo
            .create_with_snapshot(&quote, &snapshot, ConfigStatus::Quoted)?;
        info!(quote_id = %quote.quote_id, quote_no = %quote.quote_no, total = quote.total, "报价已生成");

        Ok((quote, snapshot))
    }

    /// 报价被客户接受（仅 ISSUED 且未过期的报价可接受）
    #[instrument(skip(self))]
    pub fn accept_quote(&self, quote_id: &str, today: NaiveDate) -> EngineResult<Quote> {
        let quote = self
            .quote_repo
            .find_by_id(quote_id)?
            .ok_or_else(|| EngineError::NotFound {
                entity: "Quote".to_string(),
                id: quote_id.to_string(),
            })?;

        if quote.status != QuoteStatus::Issued {
            return Err(EngineError::ValidationError {
                field: "status".to_string(),
                message: format!("报价状态为 {}, 不可接受", quote.status),
            });
        }
        if let Some(valid_until) = quote.valid_until {
            if valid_until < today {
                return Err(EngineError::ValidationError {
                    field: "valid_until".to_string(),
                    message: format!("报价已于 {} 过期", valid_until),
                });
            }
        }

        self.quote_repo.mark_accepted(quote_id)?;
        self.quote_repo
            .find_by_id(quote_id)?
            .ok_or_else(|| EngineError::NotFound {
                entity: "Quote".to_string(),
                id: quote_id.to_string(),
            })
    }

    /// 批量过期报价（定时任务入口; 只改报价状态, 快照行永不触碰）
    pub fn expire_quotes(&self, today: NaiveDate) -> EngineResult<usize> {
        Ok(self.quote_repo.expire_quotes(today)?)
    }

    // ==========================================
    // 订单确认
    // ==========================================

    /// 订单确认: 追加 ORDER_CONFIRMATION 快照并推进为 ORDERED（终态）
    ///
    /// 前置条件: 配置处于 QUOTED 状态。
    #[instrument(skip(self))]
    pub async fn confirm_order(
        &self,
        configuration_id: &str,
    ) -> EngineResult<ConfigurationSnapshot> {
        let config = self.require_configuration(configuration_id)?;
        if config.status != ConfigStatus::Quoted {
            return Err(EngineError::InvalidStateTransition {
                from: config.status.to_string(),
                to: ConfigStatus::Ordered.to_string(),
            });
        }

        let result = self.calc_engine.calculate(configuration_id).await?;
        let snapshot_id = Uuid::new_v4().to_string();
        self.ensure_snapshot_absent(&snapshot_id)?;

        let snapshot = ConfigurationSnapshot {
            snapshot_id,
            configuration_id: configuration_id.to_string(),
            quote_id: None,
            base_price: config.base_price,
            total_price: result.total_price,
            price_breakdown: result.price_breakdown,
            weight_breakdown: result.weight_breakdown,
            technical_snapshot: result.technical_data,
            snapshot_type: SnapshotType::OrderConfirmation,
            valid_until: None,
            created_at: Utc::now(),
        };

        self.snapshot_repo
            .append_with_status(&snapshot, ConfigStatus::Ordered)?;
        info!(configuration_id, snapshot_id = %snapshot.snapshot_id, "订单已确认");

        Ok(snapshot)
    }

    /// 技术参数留痕快照（生产交底用; 不触碰配置状态与报价）
    #[instrument(skip(self))]
    pub async fn snapshot_technical(
        &self,
        configuration_id: &str,
    ) -> EngineResult<ConfigurationSnapshot> {
        let config = self.require_configuration(configuration_id)?;
        let result = self.calc_engine.calculate(configuration_id).await?;
        let snapshot_id = Uuid::new_v4().to_string();
        self.ensure_snapshot_absent(&snapshot_id)?;

        let snapshot = ConfigurationSnapshot {
            snapshot_id,
            configuration_id: configuration_id.to_string(),
            quote_id: None,
            base_price: config.base_price,
            total_price: result.total_price,
            price_breakdown: result.price_breakdown,
            weight_breakdown: result.weight_breakdown,
            technical_snapshot: result.technical_data,
            snapshot_type: SnapshotType::TechnicalCalculation,
            valid_until: None,
            created_at: Utc::now(),
        };
        self.snapshot_repo.append(&snapshot)?;
        Ok(snapshot)
    }

    // ==========================================
    // 模板与复制
    // ==========================================

    /// 从模板实例化配置: 新建 DRAFT 配置并依序提交预置选择
    #[instrument(skip(self))]
    pub async fn create_from_template(
        &self,
        template_id: &str,
        customer_id: Option<String>,
        name: &str,
    ) -> EngineResult<Configuration> {
        let template = self
            .template_repo
            .find_by_id(template_id)?
            .ok_or_else(|| EngineError::NotFound {
                entity: "ConfigurationTemplate".to_string(),
                id: template_id.to_string(),
            })?;
        if !template.is_active {
            return Err(EngineError::ValidationError {
                field: "template_id".to_string(),
                message: format!("模板 {} 已停用", template_id),
            });
        }

        let config = self
            .calc_engine
            .create_configuration(&template.manufacturing_type_id, customer_id, name)
            .await?;

        // 预置选择按模板顺序提交; 条件字段依赖在前的选择先行落库
        for preset in &template.preset_selections {
            self.calc_engine
                .submit_selection(
                    &config.configuration_id,
                    &preset.attribute_node_id,
                    preset.value.clone(),
                )
                .await?;
        }

        self.require_configuration(&config.configuration_id)
    }

    /// 复制配置: 终态配置（ORDERED）的唯一修改途径是复制出新 DRAFT
    ///
    /// 新配置保留源配置的基准价快照与全部选择, revision 归零。
    #[instrument(skip(self))]
    pub async fn fork_configuration(
        &self,
        configuration_id: &str,
        new_name: &str,
    ) -> EngineResult<Configuration> {
        let source = self.require_configuration(configuration_id)?;
        let selections = self.selection_repo.find_by_configuration(configuration_id)?;

        let now = Utc::now();
        let fork = Configuration {
            configuration_id: Uuid::new_v4().to_string(),
            manufacturing_type_id: source.manufacturing_type_id.clone(),
            customer_id: source.customer_id.clone(),
            name: new_name.to_string(),
            status: ConfigStatus::Draft,
            base_price: source.base_price,
            total_price: source.base_price,
            calculated_weight: 0.0,
            calculated_technical_data: Default::default(),
            revision: 0,
            created_at: now,
            updated_at: now,
        };
        self.config_repo.create(&fork)?;

        for selection in &selections {
            let copied = ConfigurationSelection {
                selection_id: Uuid::new_v4().to_string(),
                configuration_id: fork.configuration_id.clone(),
                calculated_price_impact: 0.0,
                calculated_weight_impact: 0.0,
                created_at: now,
                updated_at: now,
                ..selection.clone()
            };
            self.selection_repo.upsert(&copied)?;
        }

        // 复制后全量重算, 聚合值由当前属性树推导而非照抄源配置
        let (fork, _) = self.calc_engine.recalculate(&fork.configuration_id).await?;
        info!(source = configuration_id, fork = %fork.configuration_id, "配置已复制");
        Ok(fork)
    }

    // ==========================================
    // 快照查询
    // ==========================================

    pub fn get_snapshot(&self, snapshot_id: &str) -> EngineResult<ConfigurationSnapshot> {
        self.snapshot_repo
            .find_by_id(snapshot_id)?
            .ok_or_else(|| EngineError::NotFound {
                entity: "ConfigurationSnapshot".to_string(),
                id: snapshot_id.to_string(),
            })
    }

    pub fn list_snapshots(
        &self,
        configuration_id: &str,
    ) -> EngineResult<Vec<ConfigurationSnapshot>> {
        Ok(self.snapshot_repo.find_by_configuration(configuration_id)?)
    }

    pub fn get_quote(&self, quote_id: &str) -> EngineResult<Quote> {
        self.quote_repo
            .find_by_id(quote_id)?
            .ok_or_else(|| EngineError::NotFound {
                entity: "Quote".to_string(),
                id: quote_id.to_string(),
            })
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

    // 追加前的防御性检查: 新快照 ID 不得命中已有行
    fn ensure_snapshot_absent(&self, snapshot_id: &str) -> EngineResult<()> {
        if self.snapshot_repo.find_by_id(snapshot_id)?.is_some() {
            return Err(EngineError::SnapshotImmutabilityViolation(format!(
                "快照 {} 已存在, 拒绝覆盖写入",
                snapshot_id
            )));
        }
        Ok(())
    }
}

/// 报价编号: Q-yyyymmdd-xxxxxxxx（UUID 前 8 位）
fn generate_quote_no() -> String {
    let uuid = Uuid::new_v4().to_string();
    format!("Q-{}-{}", Utc::now().format("%Y%m%d"), &uuid[..8])
}
