//! 决策回复 JSON Schema（schemars 生成）
//!
//! 拼入决策请求，减少 Oracle 输出格式错误。

use schemars::{schema_for, JsonSchema};

/// Oracle 每轮应返回的对象（仅用于 Schema 生成，解析见 dispatcher）
#[allow(dead_code)]
#[derive(JsonSchema)]
struct DecisionFormat {
    /// 对当前画面的简短描述
    pub observation: String,
    /// 选择下一步动作的理由
    pub reasoning: String,
    /// 动作调用，如 `street_view_turn_left()`、`click_marker(0)`；结束任务时为 `final_answer`
    pub action_code: String,
    /// 仅当 action_code 为 final_answer 时填写
    pub answer: Option<String>,
}

/// 返回决策对象的 JSON Schema 字符串
pub fn decision_schema_json() -> String {
    let schema = schema_for!(DecisionFormat);
    serde_json::to_string_pretty(&schema).unwrap_or_else(|_| String::new())
}
