//! 决策请求与合成请求的渲染

use crate::actions::ActionRegistry;
use crate::env::EnvironmentState;
use crate::memory::{Message, SessionHistory};
use crate::react::schema::decision_schema_json;

/// 默认系统提示词（可由 app.system_prompt_path 覆盖）
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a specialized maps agent that solves tasks by operating a maps page \
with street view. You see a screenshot of the page at every step and choose exactly one action. \
Reply with a single JSON object and nothing else.";

const OPERATING_GUIDE: &str = r#"Operating sequence:
1. Access street view with `enter_street_view()`. If several markers are listed, pick the best match with
   `click_marker(index)`. If the place you reach is not the target, call `back()` and try the next marker.
2. Orient the view: rotate with `street_view_turn_left()` / `street_view_turn_right()`, use `flip_view()` to look
   behind, adjust distance with `street_view_move_forward()` / `street_view_move_backward()` and centre the target
   with `move_left()` / `move_right()`.
3. When the task asks about a date, use `select_historical_date(date)` with the exact label shown on the page.
4. Finish as soon as the task is answered."#;

/// 渲染决策请求：任务、动作目录、历史、当前状态；有截图时附带图片
pub fn decision_messages(
    system_prompt: &str,
    task: &str,
    registry: &ActionRegistry,
    history: &SessionHistory,
    state: Result<&EnvironmentState, &str>,
) -> Vec<Message> {
    let state_text = match state {
        Ok(s) => {
            let mut text = format!("Current location: {}", s.location);
            if let Some(overlay) = &s.overlay {
                text.push_str(&format!("\nPage notes: {}", overlay));
            }
            if s.screenshot.is_none() {
                text.push_str("\n(no screenshot available for this step)");
            }
            text
        }
        Err(e) => format!("Current state could not be captured: {}", e),
    };

    let content = format!(
        r#"Task: {task}

Available actions:
{catalog}

Action history:
{history}

{state}

{guide}

Termination:
- When the task is solved reply with {{"observation": "...", "reasoning": "...", "action_code": "final_answer", "answer": "<your answer>"}}
- Otherwise reply with {{"observation": "...", "reasoning": "...", "action_code": "<action call>"}}

Reply schema:
{schema}

Examples:
{{"observation": "Three markers match the cafe name", "reasoning": "Marker 0 has the exact address", "action_code": "click_marker(0)"}}
{{"observation": "Facade is visible, 2019 imagery selected", "reasoning": "The sign shows the opening year", "action_code": "final_answer", "answer": "2014"}}"#,
        task = task,
        catalog = registry.catalog_prompt(),
        history = history.render(),
        state = state_text,
        guide = OPERATING_GUIDE,
        schema = decision_schema_json(),
    );

    let mut user = Message::user(content);
    if let Ok(Some(url)) = state.map(|s| s.screenshot_data_url()) {
        user = user.with_image(url);
    }
    vec![Message::system(system_prompt.to_string()), user]
}

/// 合成的触发原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SynthesisReason {
    /// 显式终止但没有给出答案
    Completed,
    /// 步数预算耗尽
    BudgetExhausted,
}

/// 渲染合成请求：仅基于完整历史给出最终答案
pub fn synthesis_messages(task: &str, history: &SessionHistory, reason: SynthesisReason) -> Vec<Message> {
    let preface = match reason {
        SynthesisReason::Completed => format!("You have completed the maps task: {}", task),
        SynthesisReason::BudgetExhausted => format!(
            "The step budget was exhausted before the maps task was explicitly finished: {}",
            task
        ),
    };
    let content = format!(
        r#"{preface}

Action history:
{history}

Based on this history, provide the final answer to the task.

Important:
- If the task requires a specific date, include that date in the answer
- If the task requires geographic information, include specific details
- If the history shows the task could not be solved, say so and summarise what was tried
- The answer should be concise and directly answer the question"#,
        preface = preface,
        history = history.render(),
    );
    vec![Message::user(content)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::ActionInvocation;
    use crate::memory::{StepAction, StepEntry};

    fn history() -> SessionHistory {
        let mut h = SessionHistory::new();
        h.push(StepEntry {
            observation: "map".into(),
            reasoning: "enter".into(),
            action_code: "enter_street_view()".into(),
            action: StepAction::Invoked {
                invocation: ActionInvocation::EnterStreetView,
            },
            success: true,
            detail: "Entered street view".into(),
        });
        h
    }

    #[test]
    fn test_decision_request_contents() {
        let state = EnvironmentState {
            location: "https://maps.example/x".into(),
            screenshot: Some(vec![0x89, 0x50]),
            overlay: None,
        };
        let msgs = decision_messages(
            DEFAULT_SYSTEM_PROMPT,
            "Find the cafe",
            &ActionRegistry::maps(),
            &history(),
            Ok(&state),
        );
        assert_eq!(msgs.len(), 2);
        let user = &msgs[1];
        assert!(user.content.contains("Task: Find the cafe"));
        assert!(user.content.contains("click_marker(index: int)"));
        assert!(user.content.contains("Step 0: map -> enter_street_view() (success: Entered street view)"));
        assert!(user.content.contains("https://maps.example/x"));
        assert_eq!(user.images.len(), 1);
        assert!(user.images[0].starts_with("data:image/png;base64,"));
    }

    #[test]
    fn test_capture_failure_is_noted() {
        let msgs = decision_messages(
            DEFAULT_SYSTEM_PROMPT,
            "t",
            &ActionRegistry::maps(),
            &SessionHistory::new(),
            Err("screenshot failed"),
        );
        assert!(msgs[1].content.contains("could not be captured: screenshot failed"));
        assert!(msgs[1].content.contains("(no actions yet)"));
        assert!(msgs[1].images.is_empty());
    }

    #[test]
    fn test_synthesis_mentions_reason() {
        let msgs = synthesis_messages("t", &history(), SynthesisReason::BudgetExhausted);
        assert!(msgs[0].content.contains("step budget was exhausted"));
        assert!(msgs[0].content.contains("Step 0:"));
    }
}
