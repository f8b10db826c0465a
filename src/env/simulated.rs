//! 内存模拟环境：确定性的街景状态机
//!
//! 用于测试与无浏览器试跑。朝向以度为单位（90 的倍数），位置为网格坐标；
//! 可按原子动作注入失败或挂起，所有调用写入共享的 SimulationLog。

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::core::AgentError;
use crate::env::{
    ActionOutcome, Environment, EnvironmentFactory, EnvironmentState, MarkerInfo, StreetViewEntry,
};

/// 模拟环境的原子操作（含会话管理）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Primitive {
    Open,
    Capture,
    Close,
    ClickId,
    EnterStreetView,
    ClickMarker,
    MoveForward,
    MoveBackward,
    TurnLeft,
    TurnRight,
    SelectHistoricalDate,
    Back,
    CurrentUrl,
    FindText,
    ClickBlankArea,
}

#[derive(Debug, Default)]
struct LogInner {
    calls: Vec<Primitive>,
    heading: u16,
    opens: usize,
    closes: usize,
}

/// 调用日志；clone 后共享同一份数据，测试可在会话结束后检查
#[derive(Debug, Clone, Default)]
pub struct SimulationLog {
    inner: Arc<Mutex<LogInner>>,
}

impl SimulationLog {
    fn record(&self, primitive: Primitive) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.calls.push(primitive);
            match primitive {
                Primitive::Open => inner.opens += 1,
                Primitive::Close => inner.closes += 1,
                _ => {}
            }
        }
    }

    fn set_heading(&self, heading: u16) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.heading = heading;
        }
    }

    pub fn calls(&self) -> Vec<Primitive> {
        self.inner
            .lock()
            .map(|i| i.calls.clone())
            .unwrap_or_default()
    }

    pub fn count(&self, primitive: Primitive) -> usize {
        self.inner
            .lock()
            .map(|i| i.calls.iter().filter(|p| **p == primitive).count())
            .unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.inner.lock().map(|i| i.calls.len()).unwrap_or(0)
    }

    /// 动作类调用次数（不含 open / capture / close）
    pub fn action_calls(&self) -> usize {
        self.inner
            .lock()
            .map(|i| {
                i.calls
                    .iter()
                    .filter(|p| !matches!(p, Primitive::Open | Primitive::Capture | Primitive::Close))
                    .count()
            })
            .unwrap_or(0)
    }

    pub fn heading(&self) -> u16 {
        self.inner.lock().map(|i| i.heading).unwrap_or(0)
    }

    pub fn open_count(&self) -> usize {
        self.inner.lock().map(|i| i.opens).unwrap_or(0)
    }

    pub fn close_count(&self) -> usize {
        self.inner.lock().map(|i| i.closes).unwrap_or(0)
    }
}

/// 模拟环境
#[derive(Debug, Clone)]
pub struct SimulatedEnvironment {
    // 场景
    markers: Vec<String>,
    dates: Vec<String>,
    elements: Vec<String>,
    page_text: String,
    street_view_available: bool,
    settle: Duration,
    fail_on: HashSet<Primitive>,
    stall_on: HashSet<Primitive>,

    // 运行状态
    start: Option<String>,
    location: String,
    in_street_view: bool,
    heading: u16,
    position: (i32, i32),
    selected_marker: Option<usize>,
    selected_date: Option<String>,
    closed: bool,

    log: SimulationLog,
}

impl Default for SimulatedEnvironment {
    fn default() -> Self {
        Self {
            markers: Vec::new(),
            dates: vec!["2014".to_string(), "2019".to_string(), "2023".to_string()],
            elements: Vec::new(),
            page_text: String::new(),
            street_view_available: true,
            settle: Duration::ZERO,
            fail_on: HashSet::new(),
            stall_on: HashSet::new(),
            start: None,
            location: String::new(),
            in_street_view: false,
            heading: 0,
            position: (0, 0),
            selected_marker: None,
            selected_date: None,
            closed: false,
            log: SimulationLog::default(),
        }
    }
}

impl SimulatedEnvironment {
    /// 单一地点：enter_street_view 直接进入
    pub fn single_location() -> Self {
        Self::default()
    }

    /// 多个候选标记：enter_street_view 返回候选列表，需先 click_marker
    pub fn with_markers(markers: Vec<String>) -> Self {
        Self {
            markers,
            ..Self::default()
        }
    }

    pub fn with_dates(mut self, dates: Vec<String>) -> Self {
        self.dates = dates;
        self
    }

    pub fn with_elements(mut self, elements: Vec<String>) -> Self {
        self.elements = elements;
        self
    }

    pub fn with_page_text(mut self, text: impl Into<String>) -> Self {
        self.page_text = text.into();
        self
    }

    pub fn without_street_view(mut self) -> Self {
        self.street_view_available = false;
        self
    }

    /// 每个原子动作的稳定等待
    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    pub fn fail_on(&mut self, primitive: Primitive) {
        self.fail_on.insert(primitive);
    }

    pub fn stall_on(&mut self, primitive: Primitive) {
        self.stall_on.insert(primitive);
    }

    pub fn failing_on(mut self, primitive: Primitive) -> Self {
        self.fail_on(primitive);
        self
    }

    pub fn stalling_on(mut self, primitive: Primitive) -> Self {
        self.stall_on(primitive);
        self
    }

    pub fn log(&self) -> SimulationLog {
        self.log.clone()
    }

    pub fn heading(&self) -> u16 {
        self.heading
    }

    pub fn position(&self) -> (i32, i32) {
        self.position
    }

    pub fn in_street_view(&self) -> bool {
        self.in_street_view
    }

    pub fn selected_date(&self) -> Option<&str> {
        self.selected_date.as_deref()
    }

    #[cfg(test)]
    pub(crate) async fn open_for_test(&mut self) {
        self.open("sim://start")
            .await
            .expect("simulated open should succeed");
    }

    /// 记录调用并应用注入；返回 Some 表示注入的失败
    async fn enter(&mut self, primitive: Primitive) -> Option<String> {
        self.log.record(primitive);
        if self.stall_on.contains(&primitive) {
            std::future::pending::<()>().await;
        }
        if !self.settle.is_zero() {
            tokio::time::sleep(self.settle).await;
        }
        if self.fail_on.contains(&primitive) {
            return Some(format!("injected failure in {:?}", primitive));
        }
        if self.closed || self.start.is_none() {
            return Some("environment session is not open".to_string());
        }
        None
    }

    fn rotate(&mut self, delta: u16) {
        self.heading = (self.heading + delta) % 360;
        self.log.set_heading(self.heading);
    }

    fn step(&mut self, sign: i32) {
        let (dx, dy) = match self.heading {
            0 => (0, 1),
            90 => (1, 0),
            180 => (0, -1),
            _ => (-1, 0),
        };
        self.position.0 += dx * sign;
        self.position.1 += dy * sign;
    }

    fn url(&self) -> String {
        if self.in_street_view {
            let mut url = format!(
                "{}#street_view={},{};heading={}",
                self.location, self.position.0, self.position.1, self.heading
            );
            if let Some(date) = &self.selected_date {
                url.push_str(&format!(";date={}", date));
            }
            url
        } else {
            self.location.clone()
        }
    }

    fn describe(&self) -> String {
        if self.in_street_view {
            format!(
                "Street view at ({}, {}), heading {}°, imagery {}",
                self.position.0,
                self.position.1,
                self.heading,
                self.selected_date.as_deref().unwrap_or("latest")
            )
        } else if self.markers.is_empty() || self.selected_marker.is_some() {
            "Map view".to_string()
        } else {
            format!("Map view with {} visible markers", self.markers.len())
        }
    }

    fn require_street_view(&self, action: &str) -> Option<ActionOutcome> {
        if self.in_street_view {
            None
        } else {
            Some(ActionOutcome::failed(format!(
                "{} requires street view; call enter_street_view first",
                action
            )))
        }
    }

    fn reset_to_start(&mut self) {
        self.location = self.start.clone().unwrap_or_default();
        self.in_street_view = false;
        self.heading = 0;
        self.position = (0, 0);
        self.selected_marker = None;
        self.selected_date = None;
        self.log.set_heading(0);
    }
}

fn valid_start(start: &str) -> bool {
    ["sim://", "http://", "https://"]
        .iter()
        .any(|scheme| start.len() > scheme.len() && start.starts_with(scheme))
}

#[async_trait]
impl Environment for SimulatedEnvironment {
    async fn open(&mut self, start: &str) -> Result<(), AgentError> {
        self.log.record(Primitive::Open);
        if self.fail_on.contains(&Primitive::Open) {
            return Err(AgentError::EnvironmentUnavailable(
                "injected failure in Open".to_string(),
            ));
        }
        if !valid_start(start) {
            return Err(AgentError::EnvironmentUnavailable(format!(
                "unsupported start handle '{}'",
                start
            )));
        }
        self.start = Some(start.to_string());
        self.closed = false;
        self.reset_to_start();
        Ok(())
    }

    async fn capture(&mut self) -> Result<EnvironmentState, String> {
        if let Some(err) = self.enter(Primitive::Capture).await {
            return Err(err);
        }
        Ok(EnvironmentState {
            location: self.url(),
            screenshot: None,
            overlay: Some(self.describe()),
        })
    }

    async fn close(&mut self) {
        self.log.record(Primitive::Close);
        self.closed = true;
    }

    async fn click_id(&mut self, identifier: &str) -> ActionOutcome {
        if let Some(err) = self.enter(Primitive::ClickId).await {
            return ActionOutcome::failed(err);
        }
        if self.elements.iter().any(|e| e == identifier) {
            ActionOutcome::ok(format!("Clicked element '{}'", identifier))
        } else {
            ActionOutcome::failed(format!("Element '{}' not found", identifier))
        }
    }

    async fn enter_street_view(&mut self) -> StreetViewEntry {
        if let Some(err) = self.enter(Primitive::EnterStreetView).await {
            return StreetViewEntry::Unavailable(err);
        }
        if !self.street_view_available {
            return StreetViewEntry::Unavailable("no street view coverage here".to_string());
        }
        if self.in_street_view {
            return StreetViewEntry::Entered;
        }
        if !self.markers.is_empty() && self.selected_marker.is_none() {
            let candidates = self
                .markers
                .iter()
                .enumerate()
                .map(|(index, title)| MarkerInfo {
                    index,
                    title: title.clone(),
                })
                .collect();
            return StreetViewEntry::Candidates(candidates);
        }
        self.in_street_view = true;
        StreetViewEntry::Entered
    }

    async fn click_marker(&mut self, index: usize) -> ActionOutcome {
        if let Some(err) = self.enter(Primitive::ClickMarker).await {
            return ActionOutcome::failed(err);
        }
        if self.markers.is_empty() {
            return ActionOutcome::failed("No visible markers to click");
        }
        match self.markers.get(index) {
            Some(title) => {
                let title = title.clone();
                self.selected_marker = Some(index);
                self.location = format!(
                    "{}/place/{}",
                    self.start.as_deref().unwrap_or_default(),
                    index
                );
                ActionOutcome::ok(format!("Clicked marker {}: {}", index, title))
            }
            None => ActionOutcome::failed(format!(
                "Marker index {} out of range ({} visible)",
                index,
                self.markers.len()
            )),
        }
    }

    async fn move_forward(&mut self) -> ActionOutcome {
        if let Some(err) = self.enter(Primitive::MoveForward).await {
            return ActionOutcome::failed(err);
        }
        if let Some(failed) = self.require_street_view("street_view_move_forward") {
            return failed;
        }
        self.step(1);
        ActionOutcome::ok("Moved forward")
    }

    async fn move_backward(&mut self) -> ActionOutcome {
        if let Some(err) = self.enter(Primitive::MoveBackward).await {
            return ActionOutcome::failed(err);
        }
        if let Some(failed) = self.require_street_view("street_view_move_backward") {
            return failed;
        }
        self.step(-1);
        ActionOutcome::ok("Moved backward")
    }

    async fn turn_left(&mut self) -> ActionOutcome {
        if let Some(err) = self.enter(Primitive::TurnLeft).await {
            return ActionOutcome::failed(err);
        }
        if let Some(failed) = self.require_street_view("street_view_turn_left") {
            return failed;
        }
        self.rotate(270);
        ActionOutcome::ok("Turned left 90°")
    }

    async fn turn_right(&mut self) -> ActionOutcome {
        if let Some(err) = self.enter(Primitive::TurnRight).await {
            return ActionOutcome::failed(err);
        }
        if let Some(failed) = self.require_street_view("street_view_turn_right") {
            return failed;
        }
        self.rotate(90);
        ActionOutcome::ok("Turned right 90°")
    }

    async fn select_historical_date(&mut self, label: &str) -> ActionOutcome {
        if let Some(err) = self.enter(Primitive::SelectHistoricalDate).await {
            return ActionOutcome::failed(err);
        }
        if let Some(failed) = self.require_street_view("select_historical_date") {
            return failed;
        }
        if self.dates.iter().any(|d| d == label) {
            self.selected_date = Some(label.to_string());
            ActionOutcome::ok(format!("Selected historical date: {}", label))
        } else {
            ActionOutcome::failed(format!(
                "Historical date '{}' not available; available: {}",
                label,
                self.dates.join(", ")
            ))
        }
    }

    async fn back(&mut self) -> ActionOutcome {
        if let Some(err) = self.enter(Primitive::Back).await {
            return ActionOutcome::failed(err);
        }
        self.reset_to_start();
        ActionOutcome::ok(format!("Returned to start location: {}", self.location))
    }

    async fn current_url(&mut self) -> ActionOutcome {
        if let Some(err) = self.enter(Primitive::CurrentUrl).await {
            return ActionOutcome::failed(err);
        }
        ActionOutcome::ok(format!("Current URL: {}", self.url()))
    }

    async fn find_text(&mut self, query: &str) -> ActionOutcome {
        if let Some(err) = self.enter(Primitive::FindText).await {
            return ActionOutcome::failed(err);
        }
        if !query.is_empty() && self.page_text.contains(query) {
            ActionOutcome::ok(format!("Found text '{}' on page", query))
        } else {
            ActionOutcome::failed(format!("Text '{}' not found on page", query))
        }
    }

    async fn click_blank_area(&mut self) -> ActionOutcome {
        if let Some(err) = self.enter(Primitive::ClickBlankArea).await {
            return ActionOutcome::failed(err);
        }
        ActionOutcome::ok("Clicked blank area")
    }
}

/// 按模板为每个会话克隆一个全新的模拟环境，并保留各自的日志
#[derive(Debug, Default)]
pub struct SimulatedEnvironmentFactory {
    template: SimulatedEnvironment,
    logs: Mutex<Vec<SimulationLog>>,
}

impl SimulatedEnvironmentFactory {
    pub fn new(template: SimulatedEnvironment) -> Self {
        Self {
            template,
            logs: Mutex::new(Vec::new()),
        }
    }

    /// 已创建环境的日志（按创建顺序）
    pub fn logs(&self) -> Vec<SimulationLog> {
        self.logs.lock().map(|l| l.clone()).unwrap_or_default()
    }
}

impl EnvironmentFactory for SimulatedEnvironmentFactory {
    fn create(&self) -> Box<dyn Environment> {
        let mut env = self.template.clone();
        env.log = SimulationLog::default();
        if let Ok(mut logs) = self.logs.lock() {
            logs.push(env.log.clone());
        }
        Box::new(env)
    }
}
