//! Headless Agent 运行时
//!
//! create_agent_components 从配置构建 LLM → DecisionOracle → 环境工厂 → MapsAgent，
//! 并把地图任务与地图 URL 注册为工具；run 对单个任务跑一次完整会话并返回答案。

use std::sync::Arc;
use std::time::Duration;

use crate::config::{load_config, AppConfig};
use crate::core::AgentError;
use crate::env::{ActuatorTimings, EnvironmentFactory, SimulatedEnvironment, SimulatedEnvironmentFactory};
#[cfg(feature = "browser")]
use crate::env::ChromeEnvironmentFactory;
use crate::llm::{create_llm_from_config, LlmClient};
use crate::react::{DecisionOracle, EventSender, MapsAgent, DEFAULT_SYSTEM_PROMPT};
use crate::tools::{MapsTaskTool, MapsUrlTool, ToolExecutor, ToolRegistry};

/// 预构建的组件，可被多个会话共享（每个会话仍各自创建环境）
pub struct AgentComponents {
    pub agent: Arc<MapsAgent>,
    pub executor: ToolExecutor,
}

/// 按 browser.backend 选择环境工厂
pub fn create_environment_factory(cfg: &AppConfig) -> Result<Arc<dyn EnvironmentFactory>, AgentError> {
    match cfg.browser.backend.to_lowercase().as_str() {
        "simulated" => {
            tracing::info!("Using simulated environment");
            Ok(Arc::new(SimulatedEnvironmentFactory::new(
                SimulatedEnvironment::single_location(),
            )))
        }
        #[cfg(feature = "browser")]
        "chrome" => {
            tracing::info!(
                headless = cfg.browser.headless,
                width = cfg.browser.viewport_width,
                height = cfg.browser.viewport_height,
                "Using headless chrome environment"
            );
            Ok(Arc::new(ChromeEnvironmentFactory::new(cfg.browser.clone())))
        }
        #[cfg(not(feature = "browser"))]
        "chrome" => Err(AgentError::ConfigError(
            "browser.backend = \"chrome\" requires the `browser` feature".to_string(),
        )),
        other => Err(AgentError::ConfigError(format!(
            "unknown browser.backend: {}",
            other
        ))),
    }
}

/// 系统提示词：app.system_prompt_path 指向的文件优先，读取失败回退到内置提示词
fn load_system_prompt(cfg: &AppConfig) -> String {
    cfg.app
        .system_prompt_path
        .as_ref()
        .and_then(|path| match std::fs::read_to_string(path) {
            Ok(text) if !text.trim().is_empty() => Some(text),
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "system prompt file unreadable, using default");
                None
            }
        })
        .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string())
}

/// 用给定的 LLM 与环境工厂构建组件（测试与嵌入场景注入自己的实现）
pub fn build_components(
    cfg: &AppConfig,
    llm: Arc<dyn LlmClient>,
    environments: Arc<dyn EnvironmentFactory>,
    event_tx: Option<EventSender>,
) -> AgentComponents {
    let oracle = Arc::new(DecisionOracle::new(llm, cfg.retry_config()));
    let mut agent = MapsAgent::new(oracle, environments)
        .with_max_steps(cfg.agent.max_steps)
        .with_timings(ActuatorTimings {
            action_timeout: cfg.browser.action_timeout(),
            composite_pause: cfg.browser.composite_pause(),
        })
        .with_system_prompt(load_system_prompt(cfg));
    if let Some(tx) = event_tx {
        agent = agent.with_event_tx(tx);
    }
    let agent = Arc::new(agent);

    let mut tools = ToolRegistry::new();
    tools.register(MapsTaskTool::new(agent.clone()));
    tools.register(MapsUrlTool::new(cfg.tools.default_zoom));
    let executor = ToolExecutor::with_timeout(tools, Duration::from_secs(cfg.tools.tool_timeout_secs));

    AgentComponents { agent, executor }
}

/// 从配置创建全部组件
pub fn create_agent_components(
    cfg: &AppConfig,
    event_tx: Option<EventSender>,
) -> Result<AgentComponents, AgentError> {
    let llm = create_llm_from_config(cfg);
    let environments = create_environment_factory(cfg)?;
    Ok(build_components(cfg, llm, environments, event_tx))
}

/// 任务入口：加载默认配置并运行一次会话；配置错误也以说明性答案返回
pub async fn run(task: &str, start: &str) -> String {
    let cfg = match load_config(None) {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::warn!(error = %e, "config load failed, using defaults");
            AppConfig::default()
        }
    };
    match create_agent_components(&cfg, None) {
        Ok(components) => components.agent.run(task, start).await,
        Err(e) => format!("Failed to complete the task: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedLlmClient;

    #[test]
    fn test_unknown_backend_is_config_error() {
        let mut cfg = AppConfig::default();
        cfg.browser.backend = "firefox".into();
        assert!(matches!(
            create_environment_factory(&cfg),
            Err(AgentError::ConfigError(_))
        ));
        cfg.browser.backend = "Simulated".into();
        assert!(create_environment_factory(&cfg).is_ok());
    }

    #[tokio::test]
    async fn test_components_expose_tools() {
        let mut cfg = AppConfig::default();
        cfg.agent.max_steps = 4;
        cfg.browser.backend = "simulated".into();
        let llm = Arc::new(ScriptedLlmClient::new(vec![
            r#"{"action_code": "final_answer", "answer": "done"}"#,
        ]));
        let components = build_components(&cfg, llm, create_environment_factory(&cfg).unwrap(), None);
        assert_eq!(components.agent.max_steps(), 4);
        assert_eq!(
            components.executor.tool_names(),
            vec!["maps_task".to_string(), "maps_url".to_string()]
        );
        let answer = components
            .executor
            .execute(
                "maps_task",
                serde_json::json!({"task_prompt": "t", "start_url": "sim://x"}),
            )
            .await
            .unwrap();
        assert_eq!(answer, "done");
    }

    #[test]
    fn test_system_prompt_override() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut file, b"Custom prompt").unwrap();
        let mut cfg = AppConfig::default();
        cfg.app.system_prompt_path = Some(file.path().to_path_buf());
        assert_eq!(load_system_prompt(&cfg), "Custom prompt");
        cfg.app.system_prompt_path = Some("/definitely/missing.txt".into());
        assert_eq!(load_system_prompt(&cfg), DEFAULT_SYSTEM_PROMPT);
    }
}
