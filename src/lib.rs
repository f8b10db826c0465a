//! Wayfarer - Rust 街景导航智能体
//!
//! 模块划分：
//! - **agent**: 无头运行时（配置 → LLM → Oracle → 环境工厂 → MapsAgent + 工具）
//! - **actions**: 动作词表、参数类型与 action code 校验
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型、循环阶段与终止原因
//! - **env**: 环境适配（headless Chrome / 模拟环境）与组合动作执行
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / Mock / Scripted）
//! - **memory**: 会话历史与对话消息
//! - **react**: 决策 Oracle、分派器、提示词与有界主循环
//! - **tools**: 对外工具（maps_task、maps_url）与执行器

pub mod actions;
pub mod agent;
pub mod config;
pub mod core;
pub mod env;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod react;
pub mod tools;

pub use agent::{create_agent_components, AgentComponents};
pub use react::{MapsAgent, SessionReport};
