// ==========================================
// 定制产品配置报价系统 - 引擎层
// ==========================================
// 分层: 引擎层承载全部业务语义, 仓储层只做持久化
// ==========================================

pub mod calc;
pub mod error;
pub mod formula;
pub mod hierarchy;
pub mod quote;
pub mod rules;

pub use calc::{CalcEngine, CalcResult, BREAKDOWN_BASE_KEY};
pub use error::{EngineError, EngineResult};
pub use formula::FormulaEngine;
pub use hierarchy::{HierarchyEngine, NewNode};
pub use quote::QuoteEngine;
pub use rules::RuleEngine;
