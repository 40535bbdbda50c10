// ==========================================
// 报价与快照端到端测试
// ==========================================
// 职责: 验证价格保护链路 — 报价冻结快照, 后续调价不影响已出报价
// 场景: 报价生成、过期、接受、订单确认、模板与复制
// ==========================================


use product_configurator::api::ConfiguratorApi;
use product_configurator::config::ConfigManager;
use product_configurator::domain::configuration::SelectionValue;
use product_configurator::domain::snapshot::PresetSelection;
use product_configurator::domain::types::{ConfigStatus, DataType, QuoteStatus, SnapshotType};
use product_configurator::ApiError;
use chrono::NaiveDate;
use rusqlite::Connection;
use std::sync::{Arc, Mutex};
use test_helpers::{create_test_db, new_node};

struct Ctx {
    _db: tempfile::NamedTempFile,
    conn: Arc<Mutex<Connection>>,
    api: ConfiguratorApi,
    type_id: String,
}

fn setup() -> Ctx {
    let (db, conn) = create_test_db().unwrap();
    let api = ConfiguratorApi::from_connection(conn.clone()).unwrap();
    let mt = api.create_manufacturing_type("铝合金窗", 200.0, 25.0).unwrap();
    Ctx {
        _db: db,
        conn,
        api,
        type_id: mt.type_id,
    }
}

/// 建一个 总价=350 的已选配置（基准 200 + 框料 150）
async fn build_priced_configuration(ctx: &Ctx) -> (String, String) {
    let root = ctx.api.create_node(new_node(&ctx.type_id, None, "Window")).unwrap();
    let mut frame = new_node(&ctx.type_id, Some(&root.node_id), "Frame Material");
    frame.data_type = DataType::Selection;
    frame.price_impact_value = Some(150.0);
    frame.weight_impact = Some(10.0);
    let frame = ctx.api.create_node(frame).unwrap();

    let config = ctx
        .api
        .create_configuration(&ctx.type_id, Some("C001".to_string()), "阳台窗")
        .await
        .unwrap();
    ctx.api
        .submit_selection(
            &config.configuration_id,
            &frame.node_id,
            SelectionValue::String("Aluminum".to_string()),
        )
        .await
        .unwrap();

    (config.configuration_id, frame.node_id)
}

#[tokio::test]
async fn test_quote_freezes_price_against_later_changes() {
    let ctx = setup();
    let (configuration_id, frame_id) = build_priced_configuration(&ctx).await;

    let (quote, snapshot) = ctx.api.create_quote(&configuration_id, None, 0.0, None).await.unwrap();
    assert_eq!(quote.subtotal, 350.0);
    // 默认税率 13%
    assert!((quote.tax_amount - 45.5).abs() < 1e-9);
    assert!((quote.total - 395.5).abs() < 1e-9);
    assert_eq!(quote.status, QuoteStatus::Issued);
    // 未指定客户时沿用配置上的客户
    assert_eq!(quote.customer_id.as_deref(), Some("C001"));
    assert_eq!(quote.snapshot_id.as_deref(), Some(snapshot.snapshot_id.as_str()));
    assert_eq!(snapshot.quote_id.as_deref(), Some(quote.quote_id.as_str()));
    assert_eq!(snapshot.snapshot_type, SnapshotType::PriceQuote);
    assert_eq!(snapshot.total_price, 350.0);
    assert_eq!(snapshot.price_breakdown.get("base"), Some(&200.0));
    assert_eq!(snapshot.price_breakdown.get("frame_material"), Some(&150.0));

    // 配置状态推进为 QUOTED
    let detail = ctx.api.get_configuration(&configuration_id).unwrap();
    assert_eq!(detail.configuration.status, ConfigStatus::Quoted);

    // 管理端随后大幅调价
    let mut frame = ctx
        .api
        .get_tree(&ctx.type_id)
        .unwrap()
        .into_iter()
        .find(|n| n.node_id == frame_id)
        .unwrap();
    frame.price_impact_value = Some(999.0);
    ctx.api.update_node(&frame).unwrap();

    // 配置重算会反映新价, 但已出报价与快照纹丝不动
    let recalced = ctx.api.recalculate(&configuration_id).await.unwrap();
    assert_eq!(recalced.total_price, 1199.0);

    let frozen_quote = ctx.api.get_quote(&quote.quote_id).unwrap();
    assert_eq!(frozen_quote.subtotal, 350.0);
    let frozen_snapshot = ctx.api.get_snapshot(&snapshot.snapshot_id).unwrap();
    assert_eq!(frozen_snapshot.total_price, 350.0);
}

#[tokio::test]
async fn test_quote_accept_and_order_confirmation() {
    let ctx = setup();
    let (configuration_id, _) = build_priced_configuration(&ctx).await;

    let (quote, _) = ctx.api.create_quote(&configuration_id, None, 20.0, None).await.unwrap();
    assert!((quote.total - (350.0 + 45.5 - 20.0)).abs() < 1e-9);

    let accepted = ctx.api.accept_quote(&quote.quote_id).unwrap();
    assert_eq!(accepted.status, QuoteStatus::Accepted);
    // 重复接受被拒
    assert!(matches!(
        ctx.api.accept_quote(&quote.quote_id),
        Err(ApiError::InvalidInput { .. })
    ));

    let order_snapshot = ctx.api.confirm_order(&configuration_id).await.unwrap();
    assert_eq!(order_snapshot.snapshot_type, SnapshotType::OrderConfirmation);
    assert!(order_snapshot.quote_id.is_none());
    assert!(order_snapshot.valid_until.is_none());

    let detail = ctx.api.get_configuration(&configuration_id).unwrap();
    assert_eq!(detail.configuration.status, ConfigStatus::Ordered);

    // 终态配置不可再次确认订单
    assert!(matches!(
        ctx.api.confirm_order(&configuration_id).await,
        Err(ApiError::InvalidStateTransition { .. })
    ));

    // 两类快照都可追溯
    let snapshots = ctx.api.list_snapshots(&configuration_id).unwrap();
    assert_eq!(snapshots.len(), 2);
}

#[tokio::test]
async fn test_expire_quotes_keeps_snapshots_intact() {
    let ctx = setup();
    let (configuration_id, _) = build_priced_configuration(&ctx).await;
    let (quote, snapshot) = ctx.api.create_quote(&configuration_id, None, 0.0, None).await.unwrap();

    // 回拨有效期, 模拟时间流逝
    {
        let conn = ctx.conn.lock().unwrap();
        conn.execute(
            "UPDATE quote SET valid_until = '2000-01-01' WHERE quote_id = ?",
            rusqlite::params![&quote.quote_id],
        )
        .unwrap();
    }

    let expired = ctx.api.expire_quotes().unwrap();
    assert_eq!(expired, 1);
    // 幂等: 再跑一遍无新过期
    assert_eq!(ctx.api.expire_quotes().unwrap(), 0);

    let quote = ctx.api.get_quote(&quote.quote_id).unwrap();
    assert_eq!(quote.status, QuoteStatus::Expired);
    // 过期报价不可接受
    assert!(matches!(
        ctx.api.accept_quote(&quote.quote_id),
        Err(ApiError::InvalidInput { .. })
    ));
    // 快照行原样保留
    let snapshot = ctx.api.get_snapshot(&snapshot.snapshot_id).unwrap();
    assert_eq!(snapshot.total_price, 350.0);
}

#[tokio::test]
async fn test_quote_respects_configured_tax_and_validity() {
    let ctx = setup();
    let (configuration_id, _) = build_priced_configuration(&ctx).await;

    let config_manager = ConfigManager::from_connection(ctx.conn.clone()).unwrap();
    config_manager
        .set_global_config_value("pricing/tax_rate", "0.2")
        .unwrap();
    config_manager
        .set_global_config_value("quote/default_valid_days", "0")
        .unwrap();

    let (quote, snapshot) = ctx.api.create_quote(&configuration_id, None, 0.0, None).await.unwrap();
    assert!((quote.tax_amount - 70.0).abs() < 1e-9);
    // 有效天数 0 = 长期有效
    assert!(quote.valid_until.is_none());
    assert!(snapshot.valid_until.is_none());

    // 显式有效期与客户覆盖优先于默认值（QUOTED 状态允许重新报价）
    let explicit = NaiveDate::from_ymd_opt(2026, 12, 31).unwrap();
    let (quote, snapshot) = ctx
        .api
        .create_quote(&configuration_id, Some("C099".to_string()), 0.0, Some(explicit))
        .await
        .unwrap();
    assert_eq!(quote.valid_until, Some(explicit));
    assert_eq!(snapshot.valid_until, Some(explicit));
    assert_eq!(quote.customer_id.as_deref(), Some("C099"));
}

#[tokio::test]
async fn test_quote_requires_all_required_fields_selected() {
    let ctx = setup();
    let (configuration_id, _) = build_priced_configuration(&ctx).await;

    let root = ctx.api.get_tree(&ctx.type_id).unwrap().remove(0);
    let mut width = new_node(&ctx.type_id, Some(&root.node_id), "Width");
    width.data_type = DataType::Dimension;
    width.validation_rules = Some(serde_json::from_str(r#"{"required": true}"#).unwrap());
    let width = ctx.api.create_node(width).unwrap();

    // 必填字段未取值: 拒绝出具报价, 不产生快照
    let err = ctx.api.create_quote(&configuration_id, None, 0.0, None).await.unwrap_err();
    assert!(matches!(
        err,
        ApiError::InvalidInput { ref field, .. } if field == "width"
    ));
    assert!(ctx.api.list_snapshots(&configuration_id).unwrap().is_empty());

    ctx.api
        .submit_selection(&configuration_id, &width.node_id, SelectionValue::Numeric(800.0))
        .await
        .unwrap();
    let (quote, _) = ctx.api.create_quote(&configuration_id, None, 0.0, None).await.unwrap();
    assert_eq!(quote.status, QuoteStatus::Issued);
}

#[tokio::test]
async fn test_technical_snapshot_does_not_touch_status() {
    let ctx = setup();
    let (configuration_id, _) = build_priced_configuration(&ctx).await;

    let snapshot = ctx.api.snapshot_technical(&configuration_id).await.unwrap();
    assert_eq!(snapshot.snapshot_type, SnapshotType::TechnicalCalculation);
    assert!(snapshot.quote_id.is_none());
    assert_eq!(snapshot.total_price, 350.0);

    let detail = ctx.api.get_configuration(&configuration_id).unwrap();
    assert_eq!(detail.configuration.status, ConfigStatus::Draft);
    assert_eq!(ctx.api.list_snapshots(&configuration_id).unwrap().len(), 1);
}

#[tokio::test]
async fn test_template_instantiation_and_fork() {
    let ctx = setup();

    let root = ctx.api.create_node(new_node(&ctx.type_id, None, "Window")).unwrap();
    let mut frame = new_node(&ctx.type_id, Some(&root.node_id), "Frame Material");
    frame.data_type = DataType::Selection;
    frame.price_impact_value = Some(150.0);
    let frame = ctx.api.create_node(frame).unwrap();
    let mut width = new_node(&ctx.type_id, Some(&root.node_id), "Width");
    width.data_type = DataType::Dimension;
    let width = ctx.api.create_node(width).unwrap();

    let template = ctx
        .api
        .create_template(
            &ctx.type_id,
            "标准铝窗",
            vec![
                PresetSelection {
                    attribute_node_id: frame.node_id.clone(),
                    value: SelectionValue::String("Aluminum".to_string()),
                },
                PresetSelection {
                    attribute_node_id: width.node_id.clone(),
                    value: SelectionValue::Numeric(1200.0),
                },
            ],
        )
        .unwrap();

    let config = ctx
        .api
        .create_from_template(&template.template_id, Some("C002".to_string()), "按模板下单")
        .await
        .unwrap();
    assert_eq!(config.status, ConfigStatus::Draft);
    assert_eq!(config.total_price, 350.0);
    let detail = ctx.api.get_configuration(&config.configuration_id).unwrap();
    assert_eq!(detail.selections.len(), 2);

    // 下单后复制出可编辑的新草稿
    ctx.api.create_quote(&config.configuration_id, None, 0.0, None).await.unwrap();
    ctx.api.confirm_order(&config.configuration_id).await.unwrap();

    let fork = ctx
        .api
        .fork_configuration(&config.configuration_id, "变更单")
        .await
        .unwrap();
    assert_eq!(fork.status, ConfigStatus::Draft);
    assert_eq!(fork.total_price, 350.0);
    assert_ne!(fork.configuration_id, config.configuration_id);

    let fork_detail = ctx.api.get_configuration(&fork.configuration_id).unwrap();
    assert_eq!(fork_detail.selections.len(), 2);

    // 复制体可继续编辑, 原终态配置保持不动
    ctx.api
        .submit_selection(&fork.configuration_id, &width.node_id, SelectionValue::Numeric(900.0))
        .await
        .unwrap();
    let original = ctx.api.get_configuration(&config.configuration_id).unwrap();
    assert_eq!(original.configuration.status, ConfigStatus::Ordered);
}

#[tokio::test]
async fn test_quote_aborts_on_formula_error_without_side_effects() {
    let ctx = setup();

    let root = ctx.api.create_node(new_node(&ctx.type_id, None, "Window")).unwrap();
    let mut broken = new_node(&ctx.type_id, Some(&root.node_id), "Broken");
    broken.data_type = DataType::Selection;
    broken.price_impact_type = product_configurator::domain::types::PriceImpactType::Formula;
    broken.price_formula = Some("nope *".to_string());
    let broken = ctx.api.create_node(broken).unwrap();

    let config = ctx.api.create_configuration(&ctx.type_id, None, "配置").await.unwrap();
    // 直接写入选择行, 绕过提交期重算（模拟后改坏的公式）
    {
        let conn = ctx.conn.lock().unwrap();
        conn.execute(
            r#"INSERT INTO configuration_selection (
                selection_id, configuration_id, attribute_node_id, value_json,
                calculated_price_impact, calculated_weight_impact, selection_path,
                created_at, updated_at
            ) VALUES ('S1', ?, ?, '{"kind":"STRING","value":"x"}', 0, 0, 'window/broken',
                      '2026-01-01T00:00:00+00:00', '2026-01-01T00:00:00+00:00')"#,
            rusqlite::params![&config.configuration_id, &broken.node_id],
        )
        .unwrap();
    }

    let err = ctx.api.create_quote(&config.configuration_id, None, 0.0, None).await.unwrap_err();
    assert!(matches!(err, ApiError::MalformedFormula(_)));

    // 无快照、无报价、状态未推进
    assert!(ctx.api.list_snapshots(&config.configuration_id).unwrap().is_empty());
    let detail = ctx.api.get_configuration(&config.configuration_id).unwrap();
    assert_eq!(detail.configuration.status, ConfigStatus::Draft);
}
