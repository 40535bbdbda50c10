// ==========================================
// 定制产品配置报价系统 - 引擎层错误类型
// ==========================================
// 红线: 计算失败不得吞错、不得以默认值顶替 —
//       所有错误必须以类型化形式传播给调用方
// 工具: thiserror 派生宏
// ==========================================

use crate::repository::RepositoryError;
use thiserror::Error;

/// 引擎层错误类型
#[derive(Error, Debug)]
pub enum EngineError {
    // ===== 树完整性错误（拒绝本次变更）=====
    #[error("父节点不存在: parent_id={0}")]
    MissingParent(String),

    #[error("检测到环: 节点 {node_id} 不能移动到其自身或后代 {new_parent_id} 之下")]
    Cycle {
        node_id: String,
        new_parent_id: String,
    },

    #[error("非法节点名（净化后为空）: {0:?}")]
    InvalidNodeName(String),

    // ===== 公式求值错误（中止本次重算, 保留上次聚合值）=====
    #[error("公式格式错误: {0}")]
    MalformedFormula(String),

    #[error("公式引用了未绑定变量: {0}")]
    UnknownVariable(String),

    #[error("公式除零: {0}")]
    DivisionByZero(String),

    // ===== 业务规则错误（拒绝本次选择写入）=====
    #[error("字段当前不可用: node_id={node_id}, field={field}")]
    FieldNotApplicable { node_id: String, field: String },

    #[error("取值校验失败 (field={field}): {message}")]
    ValidationError { field: String, message: String },

    #[error("无效的状态转换: from={from} to={to}")]
    InvalidStateTransition { from: String, to: String },

    // ===== 并发控制错误（调用方应重试）=====
    #[error("并发冲突: {0}")]
    ConcurrencyConflict(String),

    // ===== 不变量违规（编程错误类, 公共接口不可能触发）=====
    #[error("快照不可变性违规: {0}")]
    SnapshotImmutabilityViolation(String),

    // ===== 通用错误 =====
    #[error("资源未找到: {entity} with id={id}")]
    NotFound { entity: String, id: String },

    #[error("配置读取失败: {0}")]
    ConfigError(String),

    #[error(transparent)]
    Repository(RepositoryError),
}

// 乐观锁冲突上浮为并发冲突, 其余仓储错误透传
impl From<RepositoryError> for EngineError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::OptimisticLockFailure {
                configuration_id,
                expected,
                actual,
            } => EngineError::ConcurrencyConflict(format!(
                "configuration_id={}, expected_revision={}, actual_revision={}",
                configuration_id, expected, actual
            )),
            RepositoryError::NotFound { entity, id } => EngineError::NotFound { entity, id },
            other => EngineError::Repository(other),
        }
    }
}

impl EngineError {
    /// 是否为公式求值类错误（决定重算中止语义）
    pub fn is_formula_error(&self) -> bool {
        matches!(
            self,
            EngineError::MalformedFormula(_)
                | EngineError::UnknownVariable(_)
                | EngineError::DivisionByZero(_)
        )
    }
}

/// Result 类型别名
pub type EngineResult<T> = Result<T, EngineError>;
