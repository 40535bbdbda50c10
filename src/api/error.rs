// ==========================================
// 定制产品配置报价系统 - API层错误类型
// ==========================================
// 职责: 定义API层错误类型, 转换引擎/仓储错误为用户友好的错误消息
// 红线: 所有错误信息必须包含显式原因, 不得吞掉底层上下文
// ==========================================

use crate::engine::error::EngineError;
use crate::repository::error::RepositoryError;
use thiserror::Error;

/// API层错误类型
#[derive(Error, Debug)]
pub enum ApiError {
    // ==========================================
    // 树完整性错误
    // ==========================================
    #[error("父节点不存在: {0}")]
    MissingParent(String),

    #[error("检测到环: 节点 {node_id} 不能移动到 {new_parent_id} 之下")]
    Cycle {
        node_id: String,
        new_parent_id: String,
    },

    #[error("非法节点名: {0:?}")]
    InvalidNodeName(String),

    // ==========================================
    // 公式求值错误
    // ==========================================
    #[error("公式格式错误: {0}")]
    MalformedFormula(String),

    #[error("公式引用了未绑定变量: {0}")]
    UnknownVariable(String),

    #[error("公式除零: {0}")]
    DivisionByZero(String),

    // ==========================================
    // 业务规则错误
    // ==========================================
    #[error("字段当前不可用: {field} (node_id={node_id})")]
    FieldNotApplicable { node_id: String, field: String },

    #[error("无效输入 (field={field}): {message}")]
    InvalidInput { field: String, message: String },

    #[error("无效的状态转换: from={from} to={to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("资源未找到: {0}")]
    NotFound(String),

    // ==========================================
    // 并发控制错误
    // ==========================================
    #[error("并发冲突, 请重试: {0}")]
    ConcurrencyConflict(String),

    // ==========================================
    // 系统错误
    // ==========================================
    #[error("快照不可变性违规: {0}")]
    SnapshotImmutabilityViolation(String),

    #[error("系统内部错误: {0}")]
    InternalError(String),
}

/// API Result 类型别名
pub type ApiResult<T> = Result<T, ApiError>;

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::MissingParent(id) => ApiError::MissingParent(id),
            EngineError::Cycle {
                node_id,
                new_parent_id,
            } => ApiError::Cycle {
                node_id,
                new_parent_id,
            },
            EngineError::InvalidNodeName(name) => ApiError::InvalidNodeName(name),
            EngineError::MalformedFormula(msg) => ApiError::MalformedFormula(msg),
            EngineError::UnknownVariable(name) => ApiError::UnknownVariable(name),
            EngineError::DivisionByZero(msg) => ApiError::DivisionByZero(msg),
            EngineError::FieldNotApplicable { node_id, field } => {
                ApiError::FieldNotApplicable { node_id, field }
            }
            EngineError::ValidationError { field, message } => {
                ApiError::InvalidInput { field, message }
            }
            EngineError::InvalidStateTransition { from, to } => {
                ApiError::InvalidStateTransition { from, to }
            }
            EngineError::ConcurrencyConflict(msg) => ApiError::ConcurrencyConflict(msg),
            EngineError::SnapshotImmutabilityViolation(msg) => {
                ApiError::SnapshotImmutabilityViolation(msg)
            }
            EngineError::NotFound { entity, id } => {
                ApiError::NotFound(format!("{} (id={})", entity, id))
            }
            EngineError::ConfigError(msg) => ApiError::InternalError(msg),
            EngineError::Repository(e) => e.into(),
        }
    }
}

impl From<RepositoryError> for ApiError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound { entity, id } => {
                ApiError::NotFound(format!("{} (id={})", entity, id))
            }
            RepositoryError::OptimisticLockFailure {
                configuration_id,
                expected,
                actual,
            } => ApiError::ConcurrencyConflict(format!(
                "configuration_id={}, expected_revision={}, actual_revision={}",
                configuration_id, expected, actual
            )),
            RepositoryError::FieldValueError { field, message } => {
                ApiError::InvalidInput { field, message }
            }
            other => ApiError::InternalError(other.to_string()),
        }
    }
}
