//! 环境适配层
//!
//! Environment 持有唯一一个可导航会话（页面），实现每个原子动作并返回成功与否及简短说明。
//! 组合动作（flip_view / move_left / move_right）与超时控制在 Actuator 中统一实现，
//! 所有适配器共享同一套执行顺序与失败语义。

pub mod actuator;
#[cfg(feature = "browser")]
pub mod chrome;
pub mod simulated;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::Serialize;

use crate::core::AgentError;

pub use actuator::{Actuator, ActuatorTimings};
#[cfg(feature = "browser")]
pub use chrome::{ChromeEnvironment, ChromeEnvironmentFactory};
pub use simulated::{Primitive, SimulatedEnvironment, SimulatedEnvironmentFactory, SimulationLog};

/// 单个动作的执行结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionOutcome {
    pub success: bool,
    pub detail: String,
}

impl ActionOutcome {
    pub fn ok(detail: impl Into<String>) -> Self {
        Self {
            success: true,
            detail: detail.into(),
        }
    }

    pub fn failed(detail: impl Into<String>) -> Self {
        Self {
            success: false,
            detail: detail.into(),
        }
    }
}

/// 可见地图标记
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MarkerInfo {
    pub index: usize,
    pub title: String,
}

/// 进入街景的结果：直接进入，或返回多个候选标记供下一步选择
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreetViewEntry {
    Entered,
    Candidates(Vec<MarkerInfo>),
    Unavailable(String),
}

/// 当前环境快照：截图 + 定位 URL + 可选文字叠加信息
#[derive(Debug, Clone, Default)]
pub struct EnvironmentState {
    pub location: String,
    /// PNG 截图
    pub screenshot: Option<Vec<u8>>,
    pub overlay: Option<String>,
}

impl EnvironmentState {
    /// 截图的 data URL，供视觉模型读取
    pub fn screenshot_data_url(&self) -> Option<String> {
        self.screenshot
            .as_ref()
            .map(|png| format!("data:image/png;base64,{}", BASE64.encode(png)))
    }
}

/// 可控的视觉 / 可导航环境
///
/// 所有动作在结构性前置条件不满足时（如未进入街景就转向）返回失败说明而不是报错。
#[async_trait]
pub trait Environment: Send {
    /// INIT：建立会话并打开起始地址；失败属于资源错误
    async fn open(&mut self, start: &str) -> Result<(), AgentError>;

    /// 当前状态快照
    async fn capture(&mut self) -> Result<EnvironmentState, String>;

    /// 释放底层资源；可重复调用
    async fn close(&mut self);

    async fn click_id(&mut self, identifier: &str) -> ActionOutcome;
    async fn enter_street_view(&mut self) -> StreetViewEntry;
    async fn click_marker(&mut self, index: usize) -> ActionOutcome;
    async fn move_forward(&mut self) -> ActionOutcome;
    async fn move_backward(&mut self) -> ActionOutcome;
    async fn turn_left(&mut self) -> ActionOutcome;
    async fn turn_right(&mut self) -> ActionOutcome;
    async fn select_historical_date(&mut self, label: &str) -> ActionOutcome;
    /// 回到本次运行的起始地址（不是浏览器级后退）
    async fn back(&mut self) -> ActionOutcome;
    async fn current_url(&mut self) -> ActionOutcome;
    async fn find_text(&mut self, query: &str) -> ActionOutcome;
    async fn click_blank_area(&mut self) -> ActionOutcome;
}

/// 每个会话创建一个独立的环境，会话之间不共享可变状态
pub trait EnvironmentFactory: Send + Sync {
    fn create(&self) -> Box<dyn Environment>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_screenshot_data_url() {
        let state = EnvironmentState {
            location: "sim://x".into(),
            screenshot: Some(vec![1, 2, 3]),
            overlay: None,
        };
        assert_eq!(
            state.screenshot_data_url().as_deref(),
            Some("data:image/png;base64,AQID")
        );
        assert!(EnvironmentState::default().screenshot_data_url().is_none());
    }
}
