//! Wayfarer - Rust 街景导航智能体
//!
//! 入口：wayfarer <task> <start_url> [config.toml]
//! 运行一次会话并把最终答案写到标准输出；日志写到标准错误。

use std::path::PathBuf;

use anyhow::Context;
use wayfarer::{config::load_config, create_agent_components, observability};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let mut args = std::env::args().skip(1);
    let (Some(task), Some(start)) = (args.next(), args.next()) else {
        anyhow::bail!("usage: wayfarer <task> <start_url> [config.toml]");
    };
    let config_path = args.next().map(PathBuf::from);

    let cfg = load_config(config_path).context("Failed to load config")?;
    let components =
        create_agent_components(&cfg, None).context("Failed to create agent components")?;

    let report = components.agent.run_session(&task, &start).await;
    tracing::info!(
        session = %report.session_id,
        steps = report.history.len(),
        termination = ?report.termination,
        "session finished"
    );
    println!("{}", report.answer);
    Ok(())
}
