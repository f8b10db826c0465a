//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `WAYFARER__*` 覆盖（双下划线表示嵌套，如 `WAYFARER__AGENT__MAX_STEPS=20`）。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::llm::RetryConfig;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub agent: AgentSection,
    pub browser: BrowserSection,
    pub tools: ToolsSection,
}

/// [app] 段
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppSection {
    pub name: Option<String>,
    /// 覆盖默认系统提示词的文件路径
    pub system_prompt_path: Option<PathBuf>,
}

/// [llm] 段：后端选择、模型与超时
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    /// 后端：openai / mock
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    pub base_url: Option<String>,
    /// 存放 API Key 的环境变量名
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default)]
    pub timeouts: LlmTimeoutsSection,
}

fn default_provider() -> String {
    "openai".to_string()
}

fn default_model() -> String {
    "gpt-4o".to_string()
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_temperature() -> f32 {
    0.1
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: None,
            api_key_env: default_api_key_env(),
            temperature: default_temperature(),
            timeouts: LlmTimeoutsSection::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmTimeoutsSection {
    /// 单次请求超时（秒）
    #[serde(default = "default_request_timeout")]
    pub request: u64,
}

fn default_request_timeout() -> u64 {
    60
}

impl Default for LlmTimeoutsSection {
    fn default() -> Self {
        Self {
            request: default_request_timeout(),
        }
    }
}

/// [agent] 段：步数预算与 Oracle 重试
#[derive(Debug, Clone, Deserialize)]
pub struct AgentSection {
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,
    #[serde(default = "default_oracle_max_attempts")]
    pub oracle_max_attempts: u32,
    #[serde(default = "default_oracle_backoff_ms")]
    pub oracle_backoff_ms: u64,
    #[serde(default = "default_oracle_max_backoff_ms")]
    pub oracle_max_backoff_ms: u64,
}

fn default_max_steps() -> usize {
    15
}

fn default_oracle_max_attempts() -> u32 {
    3
}

fn default_oracle_backoff_ms() -> u64 {
    1000
}

fn default_oracle_max_backoff_ms() -> u64 {
    10_000
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            oracle_max_attempts: default_oracle_max_attempts(),
            oracle_backoff_ms: default_oracle_backoff_ms(),
            oracle_max_backoff_ms: default_oracle_max_backoff_ms(),
        }
    }
}

/// [browser] 段：环境后端、视口、各类等待时间
#[derive(Debug, Clone, Deserialize)]
pub struct BrowserSection {
    /// 后端：chrome（需 feature browser）/ simulated
    #[serde(default = "default_backend")]
    pub backend: String,
    #[serde(default = "default_headless")]
    pub headless: bool,
    #[serde(default = "default_viewport_width")]
    pub viewport_width: u32,
    #[serde(default = "default_viewport_height")]
    pub viewport_height: u32,
    #[serde(default = "default_navigation_timeout_secs")]
    pub navigation_timeout_secs: u64,
    /// 导航或点击后等待页面稳定的上限（秒）
    #[serde(default = "default_load_wait_secs")]
    pub load_wait_secs: u64,
    /// 单个原子动作的超时（秒），超时视为执行失败
    #[serde(default = "default_action_timeout_secs")]
    pub action_timeout_secs: u64,
    /// 组合动作各子步骤之间的停顿（毫秒）
    #[serde(default = "default_composite_pause_ms")]
    pub composite_pause_ms: u64,
    #[serde(default)]
    pub settle: SettleSection,
}

fn default_backend() -> String {
    "chrome".to_string()
}

fn default_headless() -> bool {
    true
}

fn default_viewport_width() -> u32 {
    1280
}

fn default_viewport_height() -> u32 {
    720
}

fn default_navigation_timeout_secs() -> u64 {
    60
}

fn default_load_wait_secs() -> u64 {
    5
}

fn default_action_timeout_secs() -> u64 {
    20
}

fn default_composite_pause_ms() -> u64 {
    1000
}

impl Default for BrowserSection {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            headless: default_headless(),
            viewport_width: default_viewport_width(),
            viewport_height: default_viewport_height(),
            navigation_timeout_secs: default_navigation_timeout_secs(),
            load_wait_secs: default_load_wait_secs(),
            action_timeout_secs: default_action_timeout_secs(),
            composite_pause_ms: default_composite_pause_ms(),
            settle: SettleSection::default(),
        }
    }
}

impl BrowserSection {
    pub fn action_timeout(&self) -> Duration {
        Duration::from_secs(self.action_timeout_secs)
    }

    pub fn composite_pause(&self) -> Duration {
        Duration::from_millis(self.composite_pause_ms)
    }
}

/// [browser.settle] 段：发出底层命令后的稳定等待（毫秒）
#[derive(Debug, Clone, Deserialize)]
pub struct SettleSection {
    #[serde(default = "default_turn_ms")]
    pub turn_ms: u64,
    #[serde(default = "default_forward_ms")]
    pub forward_ms: u64,
    #[serde(default = "default_backward_ms")]
    pub backward_ms: u64,
    #[serde(default = "default_dated_view_ms")]
    pub dated_view_ms: u64,
    #[serde(default = "default_click_ms")]
    pub click_ms: u64,
}

fn default_turn_ms() -> u64 {
    500
}

fn default_forward_ms() -> u64 {
    2000
}

fn default_backward_ms() -> u64 {
    1000
}

fn default_dated_view_ms() -> u64 {
    2000
}

fn default_click_ms() -> u64 {
    500
}

impl Default for SettleSection {
    fn default() -> Self {
        Self {
            turn_ms: default_turn_ms(),
            forward_ms: default_forward_ms(),
            backward_ms: default_backward_ms(),
            dated_view_ms: default_dated_view_ms(),
            click_ms: default_click_ms(),
        }
    }
}

/// [tools] 段：工具调用超时、地图 URL 默认缩放
#[derive(Debug, Clone, Deserialize)]
pub struct ToolsSection {
    /// 单次工具调用超时（秒）；maps_task 会跑完整个会话，故默认较长
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
    #[serde(default = "default_zoom")]
    pub default_zoom: u8,
}

fn default_tool_timeout_secs() -> u64 {
    900
}

fn default_zoom() -> u8 {
    15
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            tool_timeout_secs: default_tool_timeout_secs(),
            default_zoom: default_zoom(),
        }
    }
}

impl AppConfig {
    /// Oracle 调用的重试配置
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.agent.oracle_max_attempts.max(1),
            request_timeout: Duration::from_secs(self.llm.timeouts.request),
            initial_backoff: Duration::from_millis(self.agent.oracle_backoff_ms),
            max_backoff: Duration::from_millis(self.agent.oracle_max_backoff_ms),
        }
    }
}

/// 从 config 目录加载配置，环境变量 WAYFARER__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 WAYFARER__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("WAYFARER")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.agent.max_steps, 15);
        assert_eq!(cfg.agent.oracle_max_attempts, 3);
        assert_eq!(cfg.browser.viewport_width, 1280);
        assert_eq!(cfg.browser.viewport_height, 720);
        assert_eq!(cfg.tools.tool_timeout_secs, 900);
        assert_eq!(cfg.llm.provider, "openai");
    }

    #[test]
    fn test_load_explicit_file_overrides() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[agent]\nmax_steps = 7\n\n[browser]\nbackend = \"simulated\"\n\n[browser.settle]\nturn_ms = 0"
        )
        .unwrap();

        let cfg = load_config(Some(file.path().to_path_buf())).unwrap();
        assert_eq!(cfg.agent.max_steps, 7);
        assert_eq!(cfg.agent.oracle_max_attempts, 3);
        assert_eq!(cfg.browser.backend, "simulated");
        assert_eq!(cfg.browser.settle.turn_ms, 0);
        assert_eq!(cfg.browser.settle.forward_ms, 2000);
    }

    #[test]
    fn test_retry_config_floor() {
        let mut cfg = AppConfig::default();
        cfg.agent.oracle_max_attempts = 0;
        assert_eq!(cfg.retry_config().max_attempts, 1);
    }
}
