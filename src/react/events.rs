//! 会话过程事件：用于日志以外的进度展示（可序列化为 JSON）

use serde::Serialize;

use crate::core::{LoopPhase, Termination};

/// 单步过程事件
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// INIT 完成前发出
    SessionStarted {
        session_id: String,
        task: String,
        start: String,
        max_steps: usize,
    },
    /// 步数更新（当前第几步，从 0 开始）
    StepUpdate { step: usize, max_steps: usize },
    /// 状态机阶段切换
    Phase { phase: LoopPhase },
    /// Oracle 给出的决策
    Decision {
        step: usize,
        observation: String,
        reasoning: String,
        action_code: String,
    },
    /// 动作执行结果
    Executed {
        step: usize,
        action_code: String,
        success: bool,
        detail: String,
    },
    /// 分派失败
    Rejected {
        step: usize,
        action_code: String,
        reason: String,
    },
    /// Oracle 调用失败，将重试
    OracleRetry { attempt: u32, error: String },
    /// 开始合成最终答案
    Synthesizing { reason: String },
    /// 会话结束
    Terminated {
        termination: Termination,
        steps: usize,
    },
}

/// 可选事件通道
pub type EventSender = tokio::sync::mpsc::UnboundedSender<AgentEvent>;

pub(crate) fn send_event(tx: Option<&EventSender>, ev: AgentEvent) {
    if let Some(t) = tx {
        let _ = t.send(ev);
    }
}
