//! 循环状态定义：LoopPhase 与会话终态
//!
//! INIT → OBSERVING → DECIDING → DISPATCHING → EXECUTING → (OBSERVING | 终态)

use serde::Serialize;

/// 控制循环所处阶段（用于日志与事件推送）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopPhase {
    Init,
    Observing,
    Deciding,
    Dispatching,
    Executing,
    Terminated,
}

/// 会话终态
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Termination {
    /// 收到显式终止（final_answer 或 stop）
    Success,
    /// 步数预算耗尽，答案由历史摘要合成
    BudgetExhausted,
    /// 资源错误或 Oracle 致命错误
    Failed { reason: String },
}

impl Termination {
    pub fn is_failure(&self) -> bool {
        matches!(self, Termination::Failed { .. })
    }
}
