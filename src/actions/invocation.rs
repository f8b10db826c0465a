//! ActionInvocation：经过校验、带具体参数的动作实例
//!
//! 只由 Step Dispatcher 通过 `bind` 构造，随即被控制循环消费。

use std::fmt;

use serde::Serialize;

use crate::actions::{ActionKind, ActionSpec, ArgKind};
use crate::core::DispatchError;

/// 从 action code 中解析出的原始参数 token
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgValue {
    /// 引号包裹的字符串
    Str(String),
    /// 裸整数
    Int(i64),
    /// 其它内容，原样透传
    Raw(String),
}

impl fmt::Display for ArgValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgValue::Str(s) => write!(f, "'{}'", s),
            ArgValue::Int(n) => write!(f, "{}", n),
            ArgValue::Raw(s) => write!(f, "{}", s),
        }
    }
}

/// 已校验的动作调用
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", content = "arg", rename_all = "snake_case")]
pub enum ActionInvocation {
    ClickId(String),
    EnterStreetView,
    MoveForward,
    MoveBackward,
    TurnLeft,
    TurnRight,
    SelectHistoricalDate(String),
    Back,
    Stop,
    GetUrl,
    FindText(String),
    ClickBlankArea,
    ClickMarker(usize),
    FlipView,
    MoveLeft,
    MoveRight,
}

impl ActionInvocation {
    /// 按 ActionSpec 校验参数个数与类型并构造调用；每个动作至多一个参数
    pub(crate) fn bind(spec: &ActionSpec, args: Vec<ArgValue>) -> Result<Self, DispatchError> {
        let action = spec.name.to_string();
        if args.len() > 1 && spec.arg != ArgKind::None {
            return Err(DispatchError::TooManyArguments {
                action,
                got: args.len(),
            });
        }
        let arg = match (spec.arg, args.into_iter().next()) {
            (ArgKind::None, Some(_)) => return Err(DispatchError::UnexpectedArgument { action }),
            (ArgKind::None, None) => None,
            (_, None) => return Err(DispatchError::MissingArgument { action }),
            (ArgKind::String, Some(v)) => Some(BoundArg::Text(coerce_string(v))),
            (ArgKind::Integer, Some(v)) => Some(BoundArg::Index(coerce_index(&action, v)?)),
        };

        let invocation = match (spec.kind, arg) {
            (ActionKind::ClickId, Some(BoundArg::Text(id))) => ActionInvocation::ClickId(id),
            (ActionKind::SelectHistoricalDate, Some(BoundArg::Text(d))) => {
                ActionInvocation::SelectHistoricalDate(d)
            }
            (ActionKind::FindText, Some(BoundArg::Text(q))) => ActionInvocation::FindText(q),
            (ActionKind::ClickMarker, Some(BoundArg::Index(i))) => ActionInvocation::ClickMarker(i),
            (ActionKind::EnterStreetView, None) => ActionInvocation::EnterStreetView,
            (ActionKind::MoveForward, None) => ActionInvocation::MoveForward,
            (ActionKind::MoveBackward, None) => ActionInvocation::MoveBackward,
            (ActionKind::TurnLeft, None) => ActionInvocation::TurnLeft,
            (ActionKind::TurnRight, None) => ActionInvocation::TurnRight,
            (ActionKind::Back, None) => ActionInvocation::Back,
            (ActionKind::Stop, None) => ActionInvocation::Stop,
            (ActionKind::GetUrl, None) => ActionInvocation::GetUrl,
            (ActionKind::ClickBlankArea, None) => ActionInvocation::ClickBlankArea,
            (ActionKind::FlipView, None) => ActionInvocation::FlipView,
            (ActionKind::MoveLeft, None) => ActionInvocation::MoveLeft,
            (ActionKind::MoveRight, None) => ActionInvocation::MoveRight,
            // 目录里声明的参数类型与 kind 不一致
            (_, _) => {
                return Err(DispatchError::InvalidArgument {
                    action,
                    expected: spec.arg,
                    got: "mismatched catalog entry".to_string(),
                })
            }
        };
        Ok(invocation)
    }

    pub fn kind(&self) -> ActionKind {
        match self {
            ActionInvocation::ClickId(_) => ActionKind::ClickId,
            ActionInvocation::EnterStreetView => ActionKind::EnterStreetView,
            ActionInvocation::MoveForward => ActionKind::MoveForward,
            ActionInvocation::MoveBackward => ActionKind::MoveBackward,
            ActionInvocation::TurnLeft => ActionKind::TurnLeft,
            ActionInvocation::TurnRight => ActionKind::TurnRight,
            ActionInvocation::SelectHistoricalDate(_) => ActionKind::SelectHistoricalDate,
            ActionInvocation::Back => ActionKind::Back,
            ActionInvocation::Stop => ActionKind::Stop,
            ActionInvocation::GetUrl => ActionKind::GetUrl,
            ActionInvocation::FindText(_) => ActionKind::FindText,
            ActionInvocation::ClickBlankArea => ActionKind::ClickBlankArea,
            ActionInvocation::ClickMarker(_) => ActionKind::ClickMarker,
            ActionInvocation::FlipView => ActionKind::FlipView,
            ActionInvocation::MoveLeft => ActionKind::MoveLeft,
            ActionInvocation::MoveRight => ActionKind::MoveRight,
        }
    }

    pub fn is_termination(&self) -> bool {
        matches!(self, ActionInvocation::Stop)
    }
}

enum BoundArg {
    Text(String),
    Index(usize),
}

fn coerce_string(v: ArgValue) -> String {
    match v {
        ArgValue::Str(s) | ArgValue::Raw(s) => s,
        ArgValue::Int(n) => n.to_string(),
    }
}

/// 整数参数：接受裸整数与形如数字的字符串；负数视为类型不符
fn coerce_index(action: &str, v: ArgValue) -> Result<usize, DispatchError> {
    let parsed = match &v {
        ArgValue::Int(n) => usize::try_from(*n).ok(),
        ArgValue::Str(s) | ArgValue::Raw(s) => s.trim().parse::<usize>().ok(),
    };
    parsed.ok_or_else(|| DispatchError::InvalidArgument {
        action: action.to_string(),
        expected: ArgKind::Integer,
        got: v.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::ActionRegistry;

    fn bind(name: &str, arg: Option<ArgValue>) -> Result<ActionInvocation, DispatchError> {
        let registry = ActionRegistry::maps();
        ActionInvocation::bind(registry.resolve(name)?, arg.into_iter().collect())
    }

    #[test]
    fn test_numeric_string_coerced_for_integer_arg() {
        assert_eq!(
            bind("click_marker", Some(ArgValue::Str("2".into()))),
            Ok(ActionInvocation::ClickMarker(2))
        );
    }

    #[test]
    fn test_numeric_string_kept_for_string_arg() {
        assert_eq!(
            bind("click_id", Some(ArgValue::Str("42".into()))),
            Ok(ActionInvocation::ClickId("42".into()))
        );
        assert_eq!(
            bind("click_id", Some(ArgValue::Int(7))),
            Ok(ActionInvocation::ClickId("7".into()))
        );
    }

    #[test]
    fn test_argument_on_nullary_action_rejected() {
        assert_eq!(
            bind("flip_view", Some(ArgValue::Int(1))),
            Err(DispatchError::UnexpectedArgument {
                action: "flip_view".into()
            })
        );
    }

    #[test]
    fn test_second_argument_rejected() {
        let registry = ActionRegistry::maps();
        let spec = registry.resolve("select_historical_date").unwrap();
        assert_eq!(
            ActionInvocation::bind(
                spec,
                vec![ArgValue::Str("July 2010".into()), ArgValue::Str("Aug 2011".into())]
            ),
            Err(DispatchError::TooManyArguments {
                action: "select_historical_date".into(),
                got: 2
            })
        );
        // 无参动作多给参数仍按“不接受参数”报告
        let spec = registry.resolve("back").unwrap();
        assert!(matches!(
            ActionInvocation::bind(spec, vec![ArgValue::Int(1), ArgValue::Int(2)]),
            Err(DispatchError::UnexpectedArgument { .. })
        ));
    }

    #[test]
    fn test_missing_argument_rejected() {
        assert!(matches!(
            bind("select_historical_date", None),
            Err(DispatchError::MissingArgument { .. })
        ));
    }

    #[test]
    fn test_negative_and_text_marker_rejected() {
        assert!(matches!(
            bind("click_marker", Some(ArgValue::Int(-1))),
            Err(DispatchError::InvalidArgument { .. })
        ));
        assert!(matches!(
            bind("click_marker", Some(ArgValue::Str("first".into()))),
            Err(DispatchError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn test_kind_roundtrips_through_registry() {
        let registry = ActionRegistry::maps();
        for spec in registry.iter() {
            let arg = match spec.arg {
                ArgKind::None => vec![],
                ArgKind::String => vec![ArgValue::Str("x".into())],
                ArgKind::Integer => vec![ArgValue::Int(0)],
            };
            let inv = ActionInvocation::bind(spec, arg).unwrap();
            assert_eq!(inv.kind(), spec.kind);
        }
    }
}
