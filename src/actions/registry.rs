//! 动作注册表
//!
//! 静态的动作目录：名称、参数个数与类型、给 Oracle 看的用法说明。
//! 所有 ActionInvocation 的名称都必须能在此解析；未注册名称在分派前即被拒绝。

use std::collections::HashMap;
use std::fmt;

use serde::Serialize;

use crate::core::DispatchError;

/// 参数类型：本设计中每个动作至多一个参数
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ArgKind {
    None,
    String,
    Integer,
}

impl fmt::Display for ArgKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgKind::None => write!(f, "no argument"),
            ArgKind::String => write!(f, "string"),
            ArgKind::Integer => write!(f, "integer"),
        }
    }
}

/// 动作身份（与名称一一对应）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    ClickId,
    EnterStreetView,
    MoveForward,
    MoveBackward,
    TurnLeft,
    TurnRight,
    SelectHistoricalDate,
    Back,
    Stop,
    GetUrl,
    FindText,
    ClickBlankArea,
    ClickMarker,
    FlipView,
    MoveLeft,
    MoveRight,
}

/// 单个动作的元数据，注册后不可变
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ActionSpec {
    pub kind: ActionKind,
    pub name: &'static str,
    pub arg: ArgKind,
    /// 参数名（仅用于渲染签名）
    pub arg_name: &'static str,
    pub usage: &'static str,
}

impl ActionSpec {
    /// 渲染为 `name(arg: type)` 形式的签名
    pub fn signature(&self) -> String {
        match self.arg {
            ArgKind::None => format!("{}()", self.name),
            ArgKind::String => format!("{}({}: str)", self.name, self.arg_name),
            ArgKind::Integer => format!("{}({}: int)", self.name, self.arg_name),
        }
    }

    pub fn is_termination(&self) -> bool {
        self.kind == ActionKind::Stop
    }
}

const fn spec(
    kind: ActionKind,
    name: &'static str,
    arg: ArgKind,
    arg_name: &'static str,
    usage: &'static str,
) -> ActionSpec {
    ActionSpec {
        kind,
        name,
        arg,
        arg_name,
        usage,
    }
}

/// 地图 / 街景动作目录（顺序即 prompt 中的展示顺序）
pub static MAPS_ACTIONS: &[ActionSpec] = &[
    spec(
        ActionKind::ClickId,
        "click_id",
        ArgKind::String,
        "identifier",
        "Click an element with the given ID (a numeric identifier selects by element index).",
    ),
    spec(
        ActionKind::EnterStreetView,
        "enter_street_view",
        ArgKind::None,
        "",
        "Enter street view mode at the current location. Returns the visible markers if several candidates exist.",
    ),
    spec(
        ActionKind::MoveForward,
        "street_view_move_forward",
        ArgKind::None,
        "",
        "Move forward in street view by clicking on the center.",
    ),
    spec(
        ActionKind::MoveBackward,
        "street_view_move_backward",
        ArgKind::None,
        "",
        "Move backward in street view by pressing the down arrow key.",
    ),
    spec(
        ActionKind::TurnLeft,
        "street_view_turn_left",
        ArgKind::None,
        "",
        "Turn left in street view (counterclockwise rotation, 90 degrees).",
    ),
    spec(
        ActionKind::TurnRight,
        "street_view_turn_right",
        ArgKind::None,
        "",
        "Turn right in street view (clockwise rotation, 90 degrees).",
    ),
    spec(
        ActionKind::SelectHistoricalDate,
        "select_historical_date",
        ArgKind::String,
        "date",
        "Select a specific historical date to view, e.g. 'July 2010'. Opens the dates panel if needed.",
    ),
    spec(
        ActionKind::Back,
        "back",
        ArgKind::None,
        "",
        "Return to the location this task started from.",
    ),
    spec(
        ActionKind::Stop,
        "stop",
        ArgKind::None,
        "",
        "Stop the action process.",
    ),
    spec(
        ActionKind::GetUrl,
        "get_url",
        ArgKind::None,
        "",
        "Get the current URL.",
    ),
    spec(
        ActionKind::FindText,
        "find_text_on_page",
        ArgKind::String,
        "search_text",
        "Find text on the page.",
    ),
    spec(
        ActionKind::ClickBlankArea,
        "click_blank_area",
        ArgKind::None,
        "",
        "Click a blank area to unfocus.",
    ),
    spec(
        ActionKind::ClickMarker,
        "click_marker",
        ArgKind::Integer,
        "index",
        "After enter_street_view, click on a map marker by its visible index.",
    ),
    spec(
        ActionKind::FlipView,
        "flip_view",
        ArgKind::None,
        "",
        "Flip street view perspective 180 degrees (executes two consecutive clockwise rotations).",
    ),
    spec(
        ActionKind::MoveLeft,
        "move_left",
        ArgKind::None,
        "",
        "Move left by temporarily rotating CCW 90 degrees, advancing, then restoring direction.",
    ),
    spec(
        ActionKind::MoveRight,
        "move_right",
        ArgKind::None,
        "",
        "Move right by temporarily rotating CW 90 degrees, advancing, then restoring direction.",
    ),
];

/// 动作注册表：按名称查找 ActionSpec，只读
#[derive(Debug, Clone)]
pub struct ActionRegistry {
    ordered: &'static [ActionSpec],
    by_name: HashMap<&'static str, &'static ActionSpec>,
}

impl ActionRegistry {
    pub fn new(actions: &'static [ActionSpec]) -> Self {
        let by_name = actions.iter().map(|a| (a.name, a)).collect();
        Self {
            ordered: actions,
            by_name,
        }
    }

    /// 地图街景动作集
    pub fn maps() -> Self {
        Self::new(MAPS_ACTIONS)
    }

    pub fn resolve(&self, name: &str) -> Result<&'static ActionSpec, DispatchError> {
        self.by_name
            .get(name)
            .copied()
            .ok_or_else(|| DispatchError::UnknownAction(name.to_string()))
    }

    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &'static ActionSpec> {
        self.ordered.iter()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.ordered.iter().map(|a| a.name).collect()
    }

    /// 人类可读的动作目录，拼入决策请求
    pub fn catalog_prompt(&self) -> String {
        self.ordered
            .iter()
            .enumerate()
            .map(|(i, a)| format!("{}. `{}`: {}", i + 1, a.signature(), a.usage))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl Default for ActionRegistry {
    fn default() -> Self {
        Self::maps()
    }
}
