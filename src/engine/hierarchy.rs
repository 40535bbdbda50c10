// ==========================================
// 定制产品配置报价系统 - 属性树引擎
// ==========================================
// 红线: path(node) == path(parent) ++ [sanitize(name)] 在每次写入后必须成立
// 红线: 环检测在引擎层完成, 仓储层只执行已验证的改写
// 职责: 节点插入 / 子树移动 / 重命名 / 祖先与后代查询
// ==========================================

use crate::domain::condition::{DisplayCondition, ValidationRules};
use crate::domain::node::{sanitize_name, AttributeNode, NodePath};
use crate::domain::types::{DataType, NodeType, PriceImpactType};
use crate::engine::error::{EngineError, EngineResult};
use crate::repository::AttributeNodeRepository;
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

// ==========================================
// NewNode - 插入参数
// ==========================================
// 管理端提交的新节点描述; path/depth 由引擎派生, 不对外接收
#[derive(Debug, Clone)]
pub struct NewNode {
    pub manufacturing_type_id: String,        // 所属产品类别
    pub parent_id: Option<String>,            // 父节点（None = 根）
    pub name: String,                         // 原始名称（未净化）
    pub node_type: NodeType,                  // 节点类型
    pub data_type: DataType,                  // 取值类型
    pub price_impact_type: PriceImpactType,   // 价格影响类型
    pub price_impact_value: Option<f64>,      // FIXED/PERCENTAGE 取值
    pub price_formula: Option<String>,        // FORMULA 表达式
    pub weight_impact: Option<f64>,           // 重量固定/百分比取值
    pub weight_formula: Option<String>,       // 重量公式
    pub technical_impact_formula: Option<String>, // 技术参数公式
    pub display_condition: Option<DisplayCondition>, // 显示条件
    pub validation_rules: Option<ValidationRules>,   // 取值校验
    pub sort_order: i32,                      // 同级排序
}

// ==========================================
// HierarchyEngine - 属性树引擎
// ==========================================
pub struct HierarchyEngine {
    node_repo: Arc<AttributeNodeRepository>,
}

impl HierarchyEngine {
    pub fn new(node_repo: Arc<AttributeNodeRepository>) -> Self {
        Self { node_repo }
    }

    /// 插入节点
    ///
    /// # 错误
    /// - `InvalidNodeName`: 名称净化后为空
    /// - `MissingParent`: parent_id 指向的节点不存在
    /// - `ValidationError`: 父节点属于其他产品类别
    #[instrument(skip(self, input), fields(name = %input.name))]
    pub fn insert_node(&self, input: NewNode) -> EngineResult<AttributeNode> {
        let segment = sanitize_name(&input.name)
            .ok_or_else(|| EngineError::InvalidNodeName(input.name.clone()))?;

        let path = match &input.parent_id {
            None => NodePath::root(segment),
            Some(parent_id) => {
                let parent = self
                    .node_repo
                    .find_by_id(parent_id)?
                    .ok_or_else(|| EngineError::MissingParent(parent_id.clone()))?;
                if parent.manufacturing_type_id != input.manufacturing_type_id {
                    return Err(EngineError::ValidationError {
                        field: "parent_id".to_string(),
                        message: format!(
                            "父节点 {} 属于类别 {}, 不能挂接类别 {} 的节点",
                            parent_id, parent.manufacturing_type_id, input.manufacturing_type_id
                        ),
                    });
                }
                parent.path.child(segment)
            }
        };
        self.reject_duplicate_path(&input.manufacturing_type_id, &path, None)?;

        let now = Utc::now();
        let node = AttributeNode {
            node_id: Uuid::new_v4().to_string(),
            manufacturing_type_id: input.manufacturing_type_id,
            parent_id: input.parent_id,
            name: input.name,
            node_type: input.node_type,
            data_type: input.data_type,
            price_impact_type: input.price_impact_type,
            price_impact_value: input.price_impact_value,
            price_formula: input.price_formula,
            weight_impact: input.weight_impact,
            weight_formula: input.weight_formula,
            technical_impact_formula: input.technical_impact_formula,
            display_condition: input.display_condition,
            validation_rules: input.validation_rules,
            depth: path.depth(),
            path,
            sort_order: input.sort_order,
            created_at: now,
            updated_at: now,
        };

        self.node_repo.insert(&node)?;
        info!(node_id = %node.node_id, path = %node.path, "属性节点已插入");
        Ok(node)
    }

    /// 移动子树到新父节点
    ///
    /// 节点自身与全部后代的路径在单一事务内改写;
    /// 历史选择中的 selection_path 快照不回写。
    ///
    /// # 错误
    /// - `NotFound`: node_id 不存在
    /// - `MissingParent`: new_parent_id 指向的节点不存在
    /// - `Cycle`: 目标父节点是自身或自身的后代
    #[instrument(skip(self))]
    pub fn move_node(
        &self,
        node_id: &str,
        new_parent_id: Option<&str>,
    ) -> EngineResult<AttributeNode> {
        let node = self.require_node(node_id)?;

        let new_path = match new_parent_id {
            None => NodePath::root(node.path.leaf().to_string()),
            Some(parent_id) => {
                if parent_id == node_id {
                    return Err(EngineError::Cycle {
                        node_id: node_id.to_string(),
                        new_parent_id: parent_id.to_string(),
                    });
                }
                let parent = self
                    .node_repo
                    .find_by_id(parent_id)?
                    .ok_or_else(|| EngineError::MissingParent(parent_id.to_string()))?;
                if parent.manufacturing_type_id != node.manufacturing_type_id {
                    return Err(EngineError::ValidationError {
                        field: "new_parent_id".to_string(),
                        message: "不能跨产品类别移动节点".to_string(),
                    });
                }
                // 环检测: 目标父节点位于待移动子树内（含路径前缀自检）
                if node.path.is_strict_prefix_of(&parent.path) {
                    warn!(node_id, parent_id, "拒绝成环的移动请求");
                    return Err(EngineError::Cycle {
                        node_id: node_id.to_string(),
                        new_parent_id: parent_id.to_string(),
                    });
                }
                parent.path.child(node.path.leaf().to_string())
            }
        };
        self.reject_duplicate_path(&node.manufacturing_type_id, &new_path, Some(node_id))?;

        let rewritten = self.node_repo.rewrite_subtree(
            node_id,
            new_parent_id,
            &node.name,
            &node.path,
            &new_path,
        )?;
        info!(node_id, rewritten, new_path = %new_path, "子树已移动");

        self.require_node(node_id)
    }

    /// 重命名节点（路径末段随净化名同步改写, 后代前缀在同一事务内更新）
    ///
    /// # 错误
    /// - `InvalidNodeName`: 新名称净化后为空
    #[instrument(skip(self))]
    pub fn rename_node(&self, node_id: &str, new_name: &str) -> EngineResult<AttributeNode> {
        let node = self.require_node(node_id)?;
        let segment = sanitize_name(new_name)
            .ok_or_else(|| EngineError::InvalidNodeName(new_name.to_string()))?;

        let new_path = node.path.with_leaf(segment);
        self.reject_duplicate_path(&node.manufacturing_type_id, &new_path, Some(node_id))?;

        let rewritten = self.node_repo.rewrite_subtree(
            node_id,
            node.parent_id.as_deref(),
            new_name,
            &node.path,
            &new_path,
        )?;
        info!(node_id, rewritten, new_path = %new_path, "节点已重命名");

        self.require_node(node_id)
    }

    /// 更新节点业务字段（价格/条件/校验等, 不触碰树结构）
    pub fn update_node(&self, node: &AttributeNode) -> EngineResult<()> {
        let mut updated = node.clone();
        updated.updated_at = Utc::now();
        self.node_repo.update_fields(&updated)?;
        Ok(())
    }

    /// 删除叶子节点（有子节点或被选择引用时拒绝）
    #[instrument(skip(self))]
    pub fn delete_node(&self, node_id: &str) -> EngineResult<()> {
        let node = self.require_node(node_id)?;
        let descendants = self
            .node_repo
            .find_descendants_by_prefix(&node.manufacturing_type_id, &node.path)?;
        if !descendants.is_empty() {
            return Err(EngineError::ValidationError {
                field: "node_id".to_string(),
                message: format!("节点下仍有 {} 个后代, 不能删除", descendants.len()),
            });
        }
        self.node_repo.delete(node_id)?;
        Ok(())
    }

    /// 查询直接子节点
    pub fn children_of(&self, node_id: &str) -> EngineResult<Vec<AttributeNode>> {
        Ok(self.node_repo.find_children(node_id)?)
    }

    /// 查询类别树的根节点
    pub fn roots_of(&self, manufacturing_type_id: &str) -> EngineResult<Vec<AttributeNode>> {
        Ok(self.node_repo.find_roots(manufacturing_type_id)?)
    }

    /// 查询全部严格后代（按路径排序, 即先序遍历）
    pub fn descendants_of(&self, node_id: &str) -> EngineResult<Vec<AttributeNode>> {
        let node = self.require_node(node_id)?;
        Ok(self
            .node_repo
            .find_descendants_by_prefix(&node.manufacturing_type_id, &node.path)?)
    }

    /// 查询祖先链（根在前, 不含自身）
    ///
    /// 物化路径的每个严格前缀对应一个祖先, 逐段精确查询。
    pub fn ancestors_of(&self, node_id: &str) -> EngineResult<Vec<AttributeNode>> {
        let node = self.require_node(node_id)?;
        let segments = node.path.segments();
        let mut ancestors = Vec::with_capacity(segments.len().saturating_sub(1));

        for end in 1..segments.len() {
            let prefix = NodePath::from_segments(segments[..end].to_vec());
            let ancestor = self
                .node_repo
                .find_by_path(&node.manufacturing_type_id, &prefix)?
                .ok_or_else(|| EngineError::NotFound {
                    entity: "AttributeNode".to_string(),
                    id: prefix.to_string(),
                })?;
            ancestors.push(ancestor);
        }

        Ok(ancestors)
    }

    /// 查询类别树全部节点（先序）
    pub fn tree_of(&self, manufacturing_type_id: &str) -> EngineResult<Vec<AttributeNode>> {
        Ok(self.node_repo.find_by_type(manufacturing_type_id)?)
    }

    // 物化路径以 path 标识节点, 同级净化名撞段会让前缀查询张冠李戴
    fn reject_duplicate_path(
        &self,
        manufacturing_type_id: &str,
        path: &NodePath,
        exclude_node_id: Option<&str>,
    ) -> EngineResult<()> {
        if let Some(existing) = self.node_repo.find_by_path(manufacturing_type_id, path)? {
            if exclude_node_id != Some(existing.node_id.as_str()) {
                return Err(EngineError::ValidationError {
                    field: "name".to_string(),
                    message: format!(
                        "同级已存在净化名相同的节点 (path={}, node_id={})",
                        path, existing.node_id
                    ),
                });
            }
        }
        Ok(())
    }

    fn require_node(&self, node_id: &str) -> EngineResult<AttributeNode> {
        self.node_repo
            .find_by_id(node_id)?
            .ok_or_else(|| EngineError::NotFound {
                entity: "AttributeNode".to_string(),
                id: node_id.to_string(),
            })
    }
}
