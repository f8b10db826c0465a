//! maps_task 工具：把完整的地图 / 街景会话暴露给上层路由
//!
//! 每次调用运行一个独立会话；会话内部的失败以说明性答案返回，只有参数错误才返回 Err。

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::react::MapsAgent;
use crate::tools::Tool;

pub struct MapsTaskTool {
    agent: Arc<MapsAgent>,
}

impl MapsTaskTool {
    pub fn new(agent: Arc<MapsAgent>) -> Self {
        Self { agent }
    }
}

fn required_str<'a>(args: &'a Value, key: &str) -> Result<&'a str, String> {
    args.get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| format!("Missing {}", key))
}

#[async_trait]
impl Tool for MapsTaskTool {
    fn name(&self) -> &str {
        "maps_task"
    }

    fn description(&self) -> &str {
        r#"Executes maps exploration tasks with a browser-driven street view agent.

Capabilities:
- Navigate street view and its historical imagery timeline
- Interact with map markers and place panels
- Read information that is only visible in (dated) street view imagery

Best used for time-based exploration of a location, analysis of dated street view content
and verification of visible features.

Args: {"task_prompt": "detailed task description", "start_url": "maps URL to start from"}
Returns the task answer, or an explanation when the task could not be completed."#
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "task_prompt": {
                    "type": "string",
                    "description": "Detailed description of the maps task to execute"
                },
                "start_url": {
                    "type": "string",
                    "description": "Maps URL to start the exploration from"
                }
            },
            "required": ["task_prompt", "start_url"]
        })
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let task = required_str(&args, "task_prompt")?;
        let start = required_str(&args, "start_url")?;
        tracing::info!(start = %start, "maps_task invoked");
        let report = self.agent.run_session(task, start).await;
        tracing::info!(
            session = %report.session_id,
            steps = report.history.len(),
            termination = ?report.termination,
            "maps_task finished"
        );
        Ok(report.answer)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::env::{SimulatedEnvironment, SimulatedEnvironmentFactory};
    use crate::llm::{RetryConfig, ScriptedLlmClient};
    use crate::react::DecisionOracle;

    fn tool(replies: Vec<&str>) -> MapsTaskTool {
        let llm = Arc::new(ScriptedLlmClient::new(replies));
        let oracle = Arc::new(DecisionOracle::new(
            llm,
            RetryConfig {
                max_attempts: 1,
                request_timeout: Duration::from_secs(5),
                initial_backoff: Duration::from_millis(1),
                max_backoff: Duration::from_millis(1),
            },
        ));
        let factory = Arc::new(SimulatedEnvironmentFactory::new(
            SimulatedEnvironment::single_location(),
        ));
        MapsTaskTool::new(Arc::new(MapsAgent::new(oracle, factory)))
    }

    #[tokio::test]
    async fn test_runs_session() {
        let t = tool(vec![r#"{"action_code": "final_answer", "answer": "06/12/2012"}"#]);
        let out = t
            .execute(json!({"task_prompt": "When?", "start_url": "sim://tunnel"}))
            .await
            .unwrap();
        assert_eq!(out, "06/12/2012");
    }

    #[tokio::test]
    async fn test_missing_arguments() {
        let t = tool(vec![]);
        assert_eq!(
            t.execute(json!({"start_url": "sim://x"})).await.unwrap_err(),
            "Missing task_prompt"
        );
        assert_eq!(
            t.execute(json!({"task_prompt": "x", "start_url": "  "})).await.unwrap_err(),
            "Missing start_url"
        );
    }

    #[tokio::test]
    async fn test_failure_is_an_answer() {
        let t = tool(vec![]);
        let out = t
            .execute(json!({"task_prompt": "x", "start_url": "ftp://nowhere"}))
            .await
            .unwrap();
        assert!(out.starts_with("Failed to open start location 'ftp://nowhere'"));
    }
}
