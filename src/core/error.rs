//! Agent 错误类型
//!
//! 只有 Oracle 传输错误与 INIT 阶段的资源错误会终止会话；
//! 分派错误（DispatchError）与动作执行失败都写入 Session History，交给下一轮决策自我修正。

use thiserror::Error;

use crate::actions::ArgKind;

/// 会话级错误（网络、资源、配置等）
#[derive(Error, Debug)]
pub enum AgentError {
    /// 环境会话无法建立（浏览器启动失败、起始地址无效等），INIT 阶段即终止
    #[error("Environment unavailable: {0}")]
    EnvironmentUnavailable(String),

    /// Oracle 在有限次重试后仍失败（传输错误、超时或回复中没有 JSON 对象）
    #[error("Decision oracle failed after {attempts} attempts: {last_error}")]
    OracleExhausted { attempts: u32, last_error: String },

    #[error("Tool execution failed: {0}")]
    ToolExecutionFailed(String),

    #[error("Tool timeout: {0}")]
    ToolTimeout(String),

    #[error("Config error: {0}")]
    ConfigError(String),
}

/// Oracle 文本无法转为合法 ActionInvocation 的原因（非致命，记录为失败步骤）
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("Empty decision payload")]
    EmptyPayload,

    #[error("Decision payload has no action_code")]
    MissingActionCode,

    #[error("Unknown action: {0}")]
    UnknownAction(String),

    #[error("Action {action} does not take arguments")]
    UnexpectedArgument { action: String },

    #[error("Action {action} takes at most one argument, got {got}")]
    TooManyArguments { action: String, got: usize },

    #[error("Malformed action code: {0}")]
    MalformedCall(String),

    #[error("Action {action} requires an argument")]
    MissingArgument { action: String },

    #[error("Invalid argument for {action}: expected {expected}, got {got}")]
    InvalidArgument {
        action: String,
        expected: ArgKind,
        got: String,
    },
}
