// ==========================================
// 属性树集成测试
// ==========================================
// 职责: 验证节点插入/移动/重命名后的物化路径一致性
// 场景: 子树移动、环拒绝、祖先/后代查询
// ==========================================


use product_configurator::api::ConfiguratorApi;
use product_configurator::ApiError;
use test_helpers::{create_test_db, new_node};

fn setup() -> (tempfile::NamedTempFile, ConfiguratorApi, String) {
    let (temp_file, conn) = create_test_db().unwrap();
    let api = ConfiguratorApi::from_connection(conn).unwrap();
    let mt = api.create_manufacturing_type("铝合金窗", 200.0, 25.0).unwrap();
    (temp_file, api, mt.type_id)
}

#[test]
fn test_insert_builds_materialized_path() {
    let (_db, api, type_id) = setup();

    let root = api.create_node(new_node(&type_id, None, "Window")).unwrap();
    assert_eq!(root.path.to_string(), "window");
    assert_eq!(root.depth, 0);

    let frame = api
        .create_node(new_node(&type_id, Some(&root.node_id), "Frame Material"))
        .unwrap();
    assert_eq!(frame.path.to_string(), "window/frame_material");
    assert_eq!(frame.depth, 1);

    let alu = api
        .create_node(new_node(&type_id, Some(&frame.node_id), "Aluminum (6063)"))
        .unwrap();
    assert_eq!(alu.path.to_string(), "window/frame_material/aluminum_6063");
    assert_eq!(alu.depth, 2);
}

#[test]
fn test_insert_rejects_missing_parent_and_empty_name() {
    let (_db, api, type_id) = setup();

    let mut input = new_node(&type_id, Some("no-such-node"), "Frame");
    match api.create_node(input.clone()) {
        Err(ApiError::MissingParent(id)) => assert_eq!(id, "no-such-node"),
        other => panic!("应返回 MissingParent, 实际: {:?}", other.map(|n| n.node_id)),
    }

    input.parent_id = None;
    input.name = "---".to_string();
    assert!(matches!(
        api.create_node(input),
        Err(ApiError::InvalidNodeName(_))
    ));
}

#[test]
fn test_move_subtree_rewrites_descendant_paths() {
    let (_db, api, type_id) = setup();

    let root = api.create_node(new_node(&type_id, None, "Window")).unwrap();
    let frame = api
        .create_node(new_node(&type_id, Some(&root.node_id), "Frame"))
        .unwrap();
    let material = api
        .create_node(new_node(&type_id, Some(&frame.node_id), "Material"))
        .unwrap();
    let hardware = api
        .create_node(new_node(&type_id, Some(&root.node_id), "Hardware"))
        .unwrap();

    // frame 子树整体移入 hardware 下
    let moved = api.move_node(&frame.node_id, Some(&hardware.node_id)).unwrap();
    assert_eq!(moved.path.to_string(), "window/hardware/frame");
    assert_eq!(moved.depth, 2);

    let ancestors = api.get_ancestors(&material.node_id).unwrap();
    let chain: Vec<String> = ancestors.iter().map(|n| n.path.to_string()).collect();
    assert_eq!(
        chain,
        vec!["window", "window/hardware", "window/hardware/frame"]
    );
}

#[test]
fn test_move_subtree_with_multibyte_segments() {
    let (_db, api, type_id) = setup();

    // 中文段为多字节字符, 前缀改写必须按字符而非字节计数
    let root = api.create_node(new_node(&type_id, None, "窗体")).unwrap();
    let frame = api
        .create_node(new_node(&type_id, Some(&root.node_id), "框料"))
        .unwrap();
    let material = api
        .create_node(new_node(&type_id, Some(&frame.node_id), "材质"))
        .unwrap();
    let hardware = api
        .create_node(new_node(&type_id, Some(&root.node_id), "五金"))
        .unwrap();
    assert_eq!(material.path.to_string(), "窗体/框料/材质");

    let moved = api.move_node(&frame.node_id, Some(&hardware.node_id)).unwrap();
    assert_eq!(moved.path.to_string(), "窗体/五金/框料");

    let descendants = api.get_descendants(&moved.node_id).unwrap();
    assert_eq!(descendants.len(), 1);
    assert_eq!(descendants[0].path.to_string(), "窗体/五金/框料/材质");
    assert_eq!(descendants[0].depth, 3);

    let renamed = api.rename_node(&moved.node_id, "复合框料").unwrap();
    let descendants = api.get_descendants(&renamed.node_id).unwrap();
    assert_eq!(descendants[0].path.to_string(), "窗体/五金/复合框料/材质");
}

#[test]
fn test_sibling_segment_collision_rejected() {
    let (_db, api, type_id) = setup();

    let root = api.create_node(new_node(&type_id, None, "Window")).unwrap();
    api.create_node(new_node(&type_id, Some(&root.node_id), "Frame")).unwrap();

    // "frame" 与 "Frame" 净化为同一段 — 路径须在类别树内唯一
    assert!(matches!(
        api.create_node(new_node(&type_id, Some(&root.node_id), "frame")),
        Err(ApiError::InvalidInput { .. })
    ));

    // 移动撞段同样拒绝
    let hardware = api
        .create_node(new_node(&type_id, Some(&root.node_id), "Hardware"))
        .unwrap();
    let nested = api
        .create_node(new_node(&type_id, Some(&hardware.node_id), "Frame"))
        .unwrap();
    assert!(matches!(
        api.move_node(&nested.node_id, Some(&root.node_id)),
        Err(ApiError::InvalidInput { .. })
    ));

    // 重命名撞段拒绝; 原名重命名（路径不变）放行
    assert!(matches!(
        api.rename_node(&hardware.node_id, "Frame"),
        Err(ApiError::InvalidInput { .. })
    ));
    api.rename_node(&hardware.node_id, "Hardware").unwrap();
}

#[test]
fn test_move_rejects_cycle() {
    let (_db, api, type_id) = setup();

    let root = api.create_node(new_node(&type_id, None, "Window")).unwrap();
    let frame = api
        .create_node(new_node(&type_id, Some(&root.node_id), "Frame"))
        .unwrap();
    let material = api
        .create_node(new_node(&type_id, Some(&frame.node_id), "Material"))
        .unwrap();

    // 移动到自身后代之下
    assert!(matches!(
        api.move_node(&frame.node_id, Some(&material.node_id)),
        Err(ApiError::Cycle { .. })
    ));
    // 移动到自身之下
    assert!(matches!(
        api.move_node(&frame.node_id, Some(&frame.node_id)),
        Err(ApiError::Cycle { .. })
    ));

    // 树未被破坏
    let unchanged = api.get_descendants(&root.node_id).unwrap();
    assert_eq!(unchanged.len(), 2);
}

#[test]
fn test_rename_rewrites_leaf_and_descendants() {
    let (_db, api, type_id) = setup();

    let root = api.create_node(new_node(&type_id, None, "Window")).unwrap();
    let frame = api
        .create_node(new_node(&type_id, Some(&root.node_id), "Frame"))
        .unwrap();
    let material = api
        .create_node(new_node(&type_id, Some(&frame.node_id), "Material"))
        .unwrap();

    let renamed = api.rename_node(&frame.node_id, "Outer Frame").unwrap();
    assert_eq!(renamed.name, "Outer Frame");
    assert_eq!(renamed.path.to_string(), "window/outer_frame");

    let descendants = api.get_descendants(&renamed.node_id).unwrap();
    assert_eq!(descendants.len(), 1);
    assert_eq!(descendants[0].node_id, material.node_id);
    assert_eq!(descendants[0].path.to_string(), "window/outer_frame/material");
}

#[test]
fn test_descendants_prefix_is_segment_level() {
    let (_db, api, type_id) = setup();

    let root = api.create_node(new_node(&type_id, None, "Win")).unwrap();
    // 净化名 "window" 以 "win" 开头, 但不在 "win" 之下
    let lookalike = api.create_node(new_node(&type_id, None, "Window")).unwrap();
    let child = api
        .create_node(new_node(&type_id, Some(&root.node_id), "Frame"))
        .unwrap();

    let descendants = api.get_descendants(&root.node_id).unwrap();
    let ids: Vec<&str> = descendants.iter().map(|n| n.node_id.as_str()).collect();
    assert_eq!(ids, vec![child.node_id.as_str()]);
    assert!(!ids.contains(&lookalike.node_id.as_str()));
}

#[test]
fn test_move_to_root_and_children_query() {
    let (_db, api, type_id) = setup();

    let root = api.create_node(new_node(&type_id, None, "Window")).unwrap();
    let frame = api
        .create_node(new_node(&type_id, Some(&root.node_id), "Frame"))
        .unwrap();

    // 提升为根
    let promoted = api.move_node(&frame.node_id, None).unwrap();
    assert_eq!(promoted.path.to_string(), "frame");
    assert_eq!(promoted.depth, 0);
    assert!(promoted.parent_id.is_none());

    assert!(api.get_children(&root.node_id).unwrap().is_empty());
    assert!(api.get_ancestors(&promoted.node_id).unwrap().is_empty());
}

#[test]
fn test_delete_rejects_non_leaf() {
    let (_db, api, type_id) = setup();

    let root = api.create_node(new_node(&type_id, None, "Window")).unwrap();
    let frame = api
        .create_node(new_node(&type_id, Some(&root.node_id), "Frame"))
        .unwrap();

    assert!(matches!(
        api.delete_node(&root.node_id),
        Err(ApiError::InvalidInput { .. })
    ));

    api.delete_node(&frame.node_id).unwrap();
    api.delete_node(&root.node_id).unwrap();
    assert!(api.get_tree(&type_id).unwrap().is_empty());
}
