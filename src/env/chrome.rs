//! Chrome 环境：使用 Headless Chrome 驱动地图 / 街景页面
//!
//! 需启用 feature "browser" 且系统已安装 Chrome/Chromium。
//! headless_chrome 为同步 API，所有页面操作放入 spawn_blocking；超时只会丢弃等待方，
//! 阻塞线程仍在操作 Tab，因此下一次操作（含 close）先等上一次阻塞调用结束，保证同一时刻只有一个页面操作。
//! 页面内逻辑（可见性判断、按钮查找、日期面板）通过 evaluate 执行 JS，结构化结果以 JSON 字符串返回。
//! 控件同时匹配中英文 aria-label。

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use headless_chrome::protocol::cdp::Page::CaptureScreenshotFormatOption;
use headless_chrome::{Browser, LaunchOptions, Tab};

use crate::config::BrowserSection;
use crate::core::AgentError;
use crate::env::{
    ActionOutcome, Environment, EnvironmentFactory, EnvironmentState, MarkerInfo, StreetViewEntry,
};

const STREET_VIEW_BUTTONS: &[&str] = &[
    "button[aria-label='Street View']",
    "button[aria-label='街景']",
    "button[aria-label='Street View and 360° photos']",
    "button[aria-label='街景和 360 度全景照']",
];

/// 地点面板中的街景缩略图入口
const STREET_VIEW_THUMBNAIL: &str = "button[class='yra0jd Hk4XGb']";

const MARKER_SELECTOR: &str = ".hfpxzc";

const TURN_LEFT_BUTTONS: &[&str] = &[
    "button[aria-label='逆时针旋转视图']",
    "button[aria-label='Rotate the view counterclockwise']",
];

const TURN_RIGHT_BUTTONS: &[&str] = &[
    "button[aria-label='顺时针旋转视图']",
    "button[aria-label='Rotate the view clockwise']",
];

const DATES_PANEL_BUTTON: &str = "button.LQDejd";
const DATES_PANEL_LABELS: &[&str] = &["查看更多日期", "See more dates"];
const DATE_BUTTON: &str = "button[class='aLPB6c kaqDpe']";

/// JS 字面量（JSON 编码即合法 JS 字符串 / 数组）
fn js_literal<T: serde::Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "null".to_string())
}

fn eval_string(tab: &Tab, js: &str) -> Result<Option<String>, String> {
    let result = tab
        .evaluate(js, false)
        .map_err(|e| format!("Script failed: {}", e))?;
    Ok(result
        .value
        .and_then(|v| v.as_str().map(|s| s.to_string())))
}

fn eval_bool(tab: &Tab, js: &str) -> Result<bool, String> {
    let result = tab
        .evaluate(js, false)
        .map_err(|e| format!("Script failed: {}", e))?;
    Ok(result.value.and_then(|v| v.as_bool()).unwrap_or(false))
}

/// 点击第一个可见的匹配元素，返回命中的选择器
fn click_first_visible(tab: &Tab, selectors: &[&str]) -> Result<Option<String>, String> {
    let js = format!(
        r#"(() => {{
            for (const sel of {}) {{
                const el = document.querySelector(sel);
                if (el && el.offsetParent !== null) {{
                    el.scrollIntoView({{ block: 'center' }});
                    el.click();
                    return sel;
                }}
            }}
            return null;
        }})()"#,
        js_literal(selectors)
    );
    eval_string(tab, &js)
}

fn visible_markers(tab: &Tab) -> Result<Vec<MarkerInfo>, String> {
    let js = format!(
        r#"(() => JSON.stringify(
            Array.from(document.querySelectorAll({}))
                .filter(m => m.offsetParent !== null)
                .map((m, i) => m.getAttribute('aria-label') || ('Marker ' + i))
        ))()"#,
        js_literal(MARKER_SELECTOR)
    );
    let raw = eval_string(tab, &js)?.unwrap_or_else(|| "[]".to_string());
    let titles: Vec<String> =
        serde_json::from_str(&raw).map_err(|e| format!("Marker list parse failed: {}", e))?;
    Ok(titles
        .into_iter()
        .enumerate()
        .map(|(index, title)| MarkerInfo { index, title })
        .collect())
}

/// 等待 readyState=complete（不超过 limit），再留 500ms 缓冲
fn wait_for_load(tab: &Tab, limit: Duration) {
    let started = Instant::now();
    while started.elapsed() < limit {
        match eval_string(tab, "document.readyState") {
            Ok(Some(state)) if state == "complete" => break,
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(error = %e, "readyState probe failed");
                break;
            }
        }
        std::thread::sleep(Duration::from_millis(200));
    }
    std::thread::sleep(Duration::from_millis(500));
}

/// 点击视口内坐标；坐标由 body 中点平移得到
fn click_at(tab: &Tab, x: f64, y: f64) -> Result<(), String> {
    let mut point = tab
        .find_element("body")
        .map_err(|e| format!("Page body not found: {}", e))?
        .get_midpoint()
        .map_err(|e| format!("Layout query failed: {}", e))?;
    point.x = x;
    point.y = y;
    tab.click_point(point)
        .map_err(|e| format!("Click failed: {}", e))?;
    Ok(())
}

fn street_view_open(tab: &Tab) -> Result<bool, String> {
    let js = format!(
        r#"(() => {{
            for (const sel of {}) {{
                const el = document.querySelector(sel);
                if (el && el.offsetParent !== null) return true;
            }}
            return false;
        }})()"#,
        js_literal(&[TURN_LEFT_BUTTONS, TURN_RIGHT_BUTTONS].concat())
    );
    eval_bool(tab, &js)
}

fn try_enter_street_view(tab: &Tab, load_wait: Duration) -> Result<bool, String> {
    if let Some(sel) = click_first_visible(tab, STREET_VIEW_BUTTONS)? {
        tracing::debug!(selector = %sel, "street view button clicked");
        wait_for_load(tab, load_wait);
        return Ok(true);
    }
    if click_first_visible(tab, &[STREET_VIEW_THUMBNAIL])?.is_some() {
        tracing::debug!("street view thumbnail clicked");
        wait_for_load(tab, load_wait);
        return Ok(true);
    }
    Ok(false)
}

/// 打开历史日期面板并点击匹配的日期按钮（aria-label 精确匹配，其次按文本前缀）
fn pick_date(tab: &Tab, label: &str) -> Result<Result<String, String>, String> {
    let panel_open = format!(
        "document.querySelector({}) !== null",
        js_literal(DATE_BUTTON)
    );
    if !eval_bool(tab, &panel_open)? {
        let open_js = format!(
            r#"(() => {{
                let btn = document.querySelector({});
                if (!btn) {{
                    const labels = {};
                    btn = Array.from(document.querySelectorAll('button'))
                        .find(b => labels.some(l => (b.textContent || '').includes(l)));
                }}
                if (btn && btn.offsetParent !== null) {{ btn.click(); return true; }}
                return false;
            }})()"#,
            js_literal(DATES_PANEL_BUTTON),
            js_literal(DATES_PANEL_LABELS)
        );
        if !eval_bool(tab, &open_js)? {
            return Ok(Err("historical dates control not found".to_string()));
        }
        std::thread::sleep(Duration::from_secs(1));
    }

    let select_js = format!(
        r#"(() => {{
            const want = {};
            const buttons = Array.from(document.querySelectorAll({}));
            let btn = buttons.find(b => b.getAttribute('aria-label') === want);
            if (!btn) {{
                const lower = want.toLowerCase();
                btn = buttons.find(b => ((b.getAttribute('aria-label') || b.textContent || '').trim().toLowerCase()).startsWith(lower));
            }}
            if (!btn) {{
                return JSON.stringify({{ ok: false, available: buttons.map(b => b.getAttribute('aria-label') || '').filter(s => s) }});
            }}
            btn.scrollIntoView({{ block: 'center' }});
            btn.click();
            return JSON.stringify({{ ok: true, label: btn.getAttribute('aria-label') || want }});
        }})()"#,
        js_literal(label),
        js_literal(DATE_BUTTON)
    );
    let raw = eval_string(tab, &select_js)?.unwrap_or_default();
    let parsed: serde_json::Value =
        serde_json::from_str(&raw).map_err(|e| format!("Date panel parse failed: {}", e))?;
    if parsed["ok"].as_bool().unwrap_or(false) {
        Ok(Ok(parsed["label"].as_str().unwrap_or(label).to_string()))
    } else {
        let available = parsed["available"]
            .as_array()
            .map(|a| {
                a.iter()
                    .filter_map(|v| v.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            })
            .unwrap_or_default();
        Ok(Err(format!(
            "Historical date '{}' not available; available: {}",
            label, available
        )))
    }
}

/// 阻塞调用槽：记录仍在运行的 spawn_blocking 任务
///
/// run 的等待方被取消（外层超时）后，句柄留在槽里；下一次 run 或 drain 先等它结束。
#[derive(Debug, Default)]
struct BlockingSlot {
    pending: Option<JoinHandle<()>>,
}

impl BlockingSlot {
    /// 等待上一次被放弃的阻塞调用结束；等待本身被取消时句柄仍保留
    async fn drain(&mut self) {
        if let Some(handle) = self.pending.as_mut() {
            tracing::warn!("waiting for an abandoned browser call to finish");
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "abandoned browser call failed");
            }
            self.pending = None;
        }
    }

    async fn run<T, F>(&mut self, op: F) -> Result<T, String>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        self.drain().await;
        let (tx, rx) = oneshot::channel();
        self.pending = Some(tokio::task::spawn_blocking(move || {
            let _ = tx.send(op());
        }));
        let result = rx.await.map_err(|_| "browser call aborted".to_string());
        self.drain().await;
        result
    }
}

/// Headless Chrome 环境：一个会话对应一个浏览器进程与一个 Tab
pub struct ChromeEnvironment {
    settings: BrowserSection,
    browser: Option<Browser>,
    tab: Option<Arc<Tab>>,
    start_url: Option<String>,
    in_flight: BlockingSlot,
}

impl ChromeEnvironment {
    pub fn new(settings: BrowserSection) -> Self {
        Self {
            settings,
            browser: None,
            tab: None,
            start_url: None,
            in_flight: BlockingSlot::default(),
        }
    }

    fn load_wait(&self) -> Duration {
        Duration::from_secs(self.settings.load_wait_secs)
    }

    /// 在阻塞线程上对当前 Tab 执行操作
    async fn with_tab<T, F>(&mut self, op: F) -> Result<T, String>
    where
        F: FnOnce(&Tab) -> Result<T, String> + Send + 'static,
        T: Send + 'static,
    {
        let tab = self
            .tab
            .clone()
            .ok_or_else(|| "browser session is not open".to_string())?;
        self.in_flight.run(move || op(tab.as_ref())).await?
    }

    /// 转向：点击旋转按钮后等待稳定
    async fn rotate(&mut self, buttons: &'static [&'static str], name: &'static str) -> ActionOutcome {
        let settle = Duration::from_millis(self.settings.settle.turn_ms);
        let result = self
            .with_tab(move |tab| {
                match click_first_visible(tab, buttons)? {
                    Some(_) => {
                        std::thread::sleep(settle);
                        Ok(())
                    }
                    None => Err("rotation control not found; is street view open?".to_string()),
                }
            })
            .await;
        match result {
            Ok(()) => ActionOutcome::ok(format!("{} done", name)),
            Err(e) => ActionOutcome::failed(e),
        }
    }
}

#[async_trait]
impl Environment for ChromeEnvironment {
    async fn open(&mut self, start: &str) -> Result<(), AgentError> {
        if !(start.starts_with("http://") || start.starts_with("https://")) {
            return Err(AgentError::EnvironmentUnavailable(format!(
                "unsupported start handle '{}'",
                start
            )));
        }

        let settings = self.settings.clone();
        let url = start.to_string();
        tracing::info!(url = %url, headless = settings.headless, "launching chrome session");

        let (browser, tab) = tokio::task::spawn_blocking(move || {
            let options = LaunchOptions::default_builder()
                .headless(settings.headless)
                .window_size(Some((settings.viewport_width, settings.viewport_height)))
                .build()
                .map_err(|e| format!("Chrome launch options invalid: {}", e))?;
            let browser = Browser::new(options)
                .map_err(|e| format!("Chrome launch failed: {}. Install Chrome/Chromium.", e))?;
            let tab = browser
                .new_tab()
                .map_err(|e| format!("Browser tab failed: {}", e))?;
            tab.set_default_timeout(Duration::from_secs(settings.navigation_timeout_secs));
            tab.navigate_to(&url)
                .map_err(|e| format!("Navigate failed: {}", e))?;
            tab.wait_until_navigated()
                .map_err(|e| format!("Page load failed: {}", e))?;
            wait_for_load(&tab, Duration::from_secs(settings.load_wait_secs));
            Ok::<_, String>((browser, tab))
        })
        .await
        .map_err(|e| AgentError::EnvironmentUnavailable(format!("Task join: {}", e)))?
        .map_err(AgentError::EnvironmentUnavailable)?;

        self.browser = Some(browser);
        self.tab = Some(tab);
        self.start_url = Some(start.to_string());
        Ok(())
    }

    async fn capture(&mut self) -> Result<EnvironmentState, String> {
        let (location, screenshot) = self
            .with_tab(|tab| {
                let png = tab
                    .capture_screenshot(CaptureScreenshotFormatOption::Png, None, None, true)
                    .map_err(|e| format!("Screenshot failed: {}", e))?;
                Ok((tab.get_url(), png))
            })
            .await?;
        Ok(EnvironmentState {
            location,
            screenshot: Some(screenshot),
            overlay: None,
        })
    }

    async fn close(&mut self) {
        self.in_flight.drain().await;
        let tab = self.tab.take();
        let browser = self.browser.take();
        if tab.is_none() && browser.is_none() {
            return;
        }
        let joined = tokio::task::spawn_blocking(move || {
            if let Some(tab) = tab {
                if let Err(e) = tab.close(false) {
                    tracing::warn!(error = %e, "tab close failed");
                }
            }
            drop(browser);
        })
        .await;
        if let Err(e) = joined {
            tracing::warn!(error = %e, "browser shutdown task failed");
        }
        tracing::info!("chrome session closed");
    }

    async fn click_id(&mut self, identifier: &str) -> ActionOutcome {
        let id = identifier.to_string();
        let load_wait = self.load_wait();
        let result = self
            .with_tab(move |tab| {
                let js = format!(
                    r#"(() => {{
                        const id = {};
                        const el = /^\d+$/.test(id)
                            ? (document.querySelectorAll('*')[Number(id)] || null)
                            : document.getElementById(id);
                        if (!el) return false;
                        el.scrollIntoView({{ block: 'center' }});
                        el.click();
                        return true;
                    }})()"#,
                    js_literal(&id)
                );
                let clicked = eval_bool(tab, &js)?;
                if clicked {
                    wait_for_load(tab, load_wait);
                }
                Ok(clicked)
            })
            .await;
        match result {
            Ok(true) => ActionOutcome::ok(format!("Clicked element '{}'", identifier)),
            Ok(false) => ActionOutcome::failed(format!("Element '{}' not found", identifier)),
            Err(e) => ActionOutcome::failed(e),
        }
    }

    async fn enter_street_view(&mut self) -> StreetViewEntry {
        let load_wait = self.load_wait();
        let result = self
            .with_tab(move |tab| {
                if street_view_open(tab)? || try_enter_street_view(tab, load_wait)? {
                    return Ok(StreetViewEntry::Entered);
                }
                let markers = visible_markers(tab)?;
                if markers.is_empty() {
                    Ok(StreetViewEntry::Unavailable(
                        "no street view control or markers visible".to_string(),
                    ))
                } else {
                    Ok(StreetViewEntry::Candidates(markers))
                }
            })
            .await;
        result.unwrap_or_else(StreetViewEntry::Unavailable)
    }

    async fn click_marker(&mut self, index: usize) -> ActionOutcome {
        let load_wait = self.load_wait();
        let result = self
            .with_tab(move |tab| {
                let js = format!(
                    r#"(() => {{
                        const markers = Array.from(document.querySelectorAll({}))
                            .filter(m => m.offsetParent !== null);
                        const m = markers[{}];
                        if (!m) return JSON.stringify({{ ok: false, count: markers.length }});
                        m.scrollIntoView({{ block: 'center' }});
                        m.click();
                        return JSON.stringify({{ ok: true, title: m.getAttribute('aria-label') || '' }});
                    }})()"#,
                    js_literal(MARKER_SELECTOR),
                    index
                );
                let raw = eval_string(tab, &js)?.unwrap_or_default();
                let parsed: serde_json::Value = serde_json::from_str(&raw)
                    .map_err(|e| format!("Marker click parse failed: {}", e))?;
                if !parsed["ok"].as_bool().unwrap_or(false) {
                    return Err(format!(
                        "Marker index {} out of range ({} visible)",
                        index,
                        parsed["count"].as_u64().unwrap_or(0)
                    ));
                }
                wait_for_load(tab, load_wait);
                let title = parsed["title"].as_str().unwrap_or_default().to_string();
                // 点击标记后尝试从地点面板直接进入街景
                let entered = try_enter_street_view(tab, load_wait)?;
                Ok((title, entered))
            })
            .await;
        match result {
            Ok((title, true)) => ActionOutcome::ok(format!(
                "Clicked marker {}: {}; entered street view",
                index, title
            )),
            Ok((title, false)) => ActionOutcome::ok(format!(
                "Clicked marker {}: {}; street view not entered",
                index, title
            )),
            Err(e) => ActionOutcome::failed(e),
        }
    }

    async fn move_forward(&mut self) -> ActionOutcome {
        let settle = Duration::from_millis(self.settings.settle.forward_ms);
        let (w, h) = (self.settings.viewport_width, self.settings.viewport_height);
        let result = self
            .with_tab(move |tab| {
                if !street_view_open(tab)? {
                    return Err("street view is not open".to_string());
                }
                click_at(tab, f64::from(w / 2), f64::from(h / 2))?;
                std::thread::sleep(settle);
                Ok(())
            })
            .await;
        match result {
            Ok(()) => ActionOutcome::ok("Moved forward"),
            Err(e) => ActionOutcome::failed(e),
        }
    }

    async fn move_backward(&mut self) -> ActionOutcome {
        let settle = Duration::from_millis(self.settings.settle.backward_ms);
        let result = self
            .with_tab(move |tab| {
                if !street_view_open(tab)? {
                    return Err("street view is not open".to_string());
                }
                tab.press_key("ArrowDown")
                    .map_err(|e| format!("Key press failed: {}", e))?;
                std::thread::sleep(settle);
                Ok(())
            })
            .await;
        match result {
            Ok(()) => ActionOutcome::ok("Moved backward"),
            Err(e) => ActionOutcome::failed(e),
        }
    }

    async fn turn_left(&mut self) -> ActionOutcome {
        self.rotate(TURN_LEFT_BUTTONS, "Turn left").await
    }

    async fn turn_right(&mut self) -> ActionOutcome {
        self.rotate(TURN_RIGHT_BUTTONS, "Turn right").await
    }

    async fn select_historical_date(&mut self, label: &str) -> ActionOutcome {
        let settle = Duration::from_millis(self.settings.settle.dated_view_ms);
        let wanted = label.to_string();
        let result = self
            .with_tab(move |tab| {
                if !street_view_open(tab)? {
                    return Err("street view is not open".to_string());
                }
                let picked = pick_date(tab, &wanted)?;
                if picked.is_ok() {
                    std::thread::sleep(settle);
                }
                Ok(picked)
            })
            .await;
        match result {
            Ok(Ok(picked)) => ActionOutcome::ok(format!("Selected historical date: {}", picked)),
            Ok(Err(e)) | Err(e) => ActionOutcome::failed(e),
        }
    }

    async fn back(&mut self) -> ActionOutcome {
        let Some(start) = self.start_url.clone() else {
            return ActionOutcome::failed("no start location recorded");
        };
        let load_wait = self.load_wait();
        let target = start.clone();
        let result = self
            .with_tab(move |tab| {
                tab.navigate_to(&target)
                    .map_err(|e| format!("Navigate failed: {}", e))?;
                tab.wait_until_navigated()
                    .map_err(|e| format!("Page load failed: {}", e))?;
                wait_for_load(tab, load_wait);
                Ok(())
            })
            .await;
        match result {
            Ok(()) => ActionOutcome::ok(format!("Returned to start location: {}", start)),
            Err(e) => ActionOutcome::failed(e),
        }
    }

    async fn current_url(&mut self) -> ActionOutcome {
        match self.with_tab(|tab| Ok(tab.get_url())).await {
            Ok(url) => ActionOutcome::ok(format!("Current URL: {}", url)),
            Err(e) => ActionOutcome::failed(e),
        }
    }

    async fn find_text(&mut self, query: &str) -> ActionOutcome {
        let q = query.to_string();
        let result = self
            .with_tab(move |tab| {
                let js = format!("window.find({})", js_literal(&q));
                eval_bool(tab, &js)
            })
            .await;
        match result {
            Ok(true) => ActionOutcome::ok(format!("Found text '{}' on page", query)),
            Ok(false) => ActionOutcome::failed(format!("Text '{}' not found on page", query)),
            Err(e) => ActionOutcome::failed(e),
        }
    }

    async fn click_blank_area(&mut self) -> ActionOutcome {
        let settle = Duration::from_millis(self.settings.settle.click_ms);
        let result = self
            .with_tab(move |tab| {
                click_at(tab, 5.0, 5.0)?;
                std::thread::sleep(settle);
                Ok(())
            })
            .await;
        match result {
            Ok(()) => ActionOutcome::ok("Clicked blank area"),
            Err(e) => ActionOutcome::failed(e),
        }
    }
}

/// 每个会话启动独立的浏览器进程
pub struct ChromeEnvironmentFactory {
    settings: BrowserSection,
}

impl ChromeEnvironmentFactory {
    pub fn new(settings: BrowserSection) -> Self {
        Self { settings }
    }
}

impl EnvironmentFactory for ChromeEnvironmentFactory {
    fn create(&self) -> Box<dyn Environment> {
        Box::new(ChromeEnvironment::new(self.settings.clone()))
    }
}
