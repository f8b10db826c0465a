//! Session History：按步追加的执行记录
//!
//! 这是跨步骤唯一的记忆。索引由 `push` 分配，保证从 0 开始严格连续；记录一旦写入不可修改。

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::actions::ActionInvocation;

/// 每一步实际发生的动作
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepAction {
    /// 已校验并执行（或尝试执行）的动作
    Invoked { invocation: ActionInvocation },
    /// 终止标记（final_answer 或 stop）
    Termination { answer: Option<String> },
    /// Oracle 文本未能分派为合法动作
    Rejected { reason: String },
}

/// 单步记录
#[derive(Debug, Clone, Serialize)]
pub struct StepRecord {
    pub index: usize,
    pub observation: String,
    pub reasoning: String,
    /// Oracle 给出的原始 action_code
    pub action_code: String,
    pub action: StepAction,
    pub success: bool,
    pub detail: String,
    pub recorded_at: DateTime<Utc>,
}

impl StepRecord {
    /// 渲染为一行，供决策请求与合成请求使用
    pub fn render(&self) -> String {
        let status = if self.success {
            format!("success: {}", self.detail)
        } else {
            format!("failure: {}", self.detail)
        };
        format!(
            "Step {}: {} -> {} ({})",
            self.index, self.observation, self.action_code, status
        )
    }
}

/// 新增记录时由调用方提供的内容（索引与时间戳由 SessionHistory 填写）
#[derive(Debug, Clone)]
pub struct StepEntry {
    pub observation: String,
    pub reasoning: String,
    pub action_code: String,
    pub action: StepAction,
    pub success: bool,
    pub detail: String,
}

/// 追加式历史
#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionHistory {
    records: Vec<StepRecord>,
}

impl SessionHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加一步，返回其索引
    pub fn push(&mut self, entry: StepEntry) -> usize {
        let index = self.records.len();
        self.records.push(StepRecord {
            index,
            observation: entry.observation,
            reasoning: entry.reasoning,
            action_code: entry.action_code,
            action: entry.action,
            success: entry.success,
            detail: entry.detail,
            recorded_at: Utc::now(),
        });
        index
    }

    pub fn records(&self) -> &[StepRecord] {
        &self.records
    }

    pub fn last(&self) -> Option<&StepRecord> {
        self.records.last()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// 全部历史渲染为多行文本；为空时返回 "(no actions yet)"
    pub fn render(&self) -> String {
        if self.records.is_empty() {
            return "(no actions yet)".to_string();
        }
        self.records
            .iter()
            .map(StepRecord::render)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(code: &str, success: bool, detail: &str) -> StepEntry {
        StepEntry {
            observation: "map view".to_string(),
            reasoning: String::new(),
            action_code: code.to_string(),
            action: StepAction::Rejected {
                reason: detail.to_string(),
            },
            success,
            detail: detail.to_string(),
        }
    }

    #[test]
    fn test_indices_are_contiguous() {
        let mut history = SessionHistory::new();
        for i in 0..5 {
            assert_eq!(history.push(entry("noop()", false, "x")), i);
        }
        let indices: Vec<usize> = history.records().iter().map(|r| r.index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_render() {
        let mut history = SessionHistory::new();
        assert_eq!(history.render(), "(no actions yet)");
        history.push(entry("click_marker(0)", true, "Clicked marker #0"));
        history.push(entry("fly()", false, "Unknown action: fly"));
        let text = history.render();
        assert_eq!(
            text,
            "Step 0: map view -> click_marker(0) (success: Clicked marker #0)\n\
             Step 1: map view -> fly() (failure: Unknown action: fly)"
        );
    }
}
