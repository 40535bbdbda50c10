// ==========================================
// 并发控制测试
// ==========================================
// 职责: 验证乐观锁 (revision) 防止并发重算互相覆盖
// ==========================================


use product_configurator::api::ConfiguratorApi;
use product_configurator::domain::configuration::SelectionValue;
use product_configurator::domain::types::DataType;
use product_configurator::repository::{
    ConfigurationRepository, RepositoryError, SelectionImpact,
};
use std::collections::BTreeMap;
use test_helpers::{create_test_db, new_node};

#[tokio::test]
async fn test_stale_revision_write_is_rejected() {
    let (_db, conn) = create_test_db().unwrap();
    let api = ConfiguratorApi::from_connection(conn.clone()).unwrap();
    let mt = api.create_manufacturing_type("铝合金窗", 200.0, 25.0).unwrap();

    let config = api.create_configuration(&mt.type_id, None, "配置").await.unwrap();
    let repo = ConfigurationRepository::from_connection(conn);
    let technical: BTreeMap<String, f64> = BTreeMap::new();
    let impacts: Vec<SelectionImpact> = Vec::new();

    // 两个"并发"写者都基于 revision=0 读取
    let first = repo
        .apply_calculation(&config.configuration_id, 0, 300.0, 30.0, &technical, &impacts)
        .unwrap();
    assert_eq!(first, 1);

    // 后写者携带过期的 revision, 必须失败
    let err = repo
        .apply_calculation(&config.configuration_id, 0, 999.0, 99.0, &technical, &impacts)
        .unwrap_err();
    match err {
        RepositoryError::OptimisticLockFailure {
            expected, actual, ..
        } => {
            assert_eq!(expected, 0);
            assert_eq!(actual, 1);
        }
        other => panic!("应返回 OptimisticLockFailure, 实际: {:?}", other),
    }

    // 先写者的结果未被覆盖
    let stored = repo.find_by_id(&config.configuration_id).unwrap().unwrap();
    assert_eq!(stored.total_price, 300.0);
    assert_eq!(stored.revision, 1);
}

#[tokio::test]
async fn test_submit_after_external_write_succeeds_with_fresh_read() {
    let (_db, conn) = create_test_db().unwrap();
    let api = ConfiguratorApi::from_connection(conn.clone()).unwrap();
    let mt = api.create_manufacturing_type("铝合金窗", 200.0, 25.0).unwrap();

    let root = api.create_node(new_node(&mt.type_id, None, "Window")).unwrap();
    let mut width = new_node(&mt.type_id, Some(&root.node_id), "Width");
    width.data_type = DataType::Dimension;
    let width = api.create_node(width).unwrap();

    let config = api.create_configuration(&mt.type_id, None, "配置").await.unwrap();

    // 外部写者抢先推进了 revision
    let repo = ConfigurationRepository::from_connection(conn);
    repo.apply_calculation(&config.configuration_id, 0, 200.0, 25.0, &BTreeMap::new(), &[])
        .unwrap();

    // 引擎在写回前重新读取 revision, 正常提交
    api.submit_selection(&config.configuration_id, &width.node_id, SelectionValue::Numeric(48.0))
        .await
        .unwrap();

    let stored = repo.find_by_id(&config.configuration_id).unwrap().unwrap();
    assert_eq!(stored.revision, 2);
}

#[tokio::test]
async fn test_nonexistent_configuration_reports_not_found() {
    let (_db, conn) = create_test_db().unwrap();
    let repo = ConfigurationRepository::from_connection(conn);

    let err = repo
        .apply_calculation("no-such-config", 0, 1.0, 1.0, &BTreeMap::new(), &[])
        .unwrap_err();
    assert!(matches!(err, RepositoryError::NotFound { .. }));
}
