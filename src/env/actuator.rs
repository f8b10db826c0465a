//! Actuator：把 ActionInvocation 落到 Environment 上
//!
//! - 每个原子动作施加统一超时，超时即失败而不是挂起
//! - 组合动作按固定顺序执行原子动作；任一子步骤失败立即返回失败，
//!   不做补偿，环境停留在中间状态，并在说明里写明朝向偏差
//! - enter_street_view 按结果类型分支（直接进入 / 候选标记 / 不可用）

use std::future::Future;
use std::time::Duration;

use crate::actions::ActionInvocation;
use crate::env::{ActionOutcome, Environment, MarkerInfo, StreetViewEntry};

/// 执行时序参数
#[derive(Debug, Clone, Copy)]
pub struct ActuatorTimings {
    /// 单个原子动作（含其稳定等待）的上限
    pub action_timeout: Duration,
    /// 组合动作子步骤之间的停顿
    pub composite_pause: Duration,
}

impl Default for ActuatorTimings {
    fn default() -> Self {
        Self {
            action_timeout: Duration::from_secs(20),
            composite_pause: Duration::from_millis(1000),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Left,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Turn {
    Left,
    Right,
}

impl Turn {
    fn action_name(self) -> &'static str {
        match self {
            Turn::Left => "street_view_turn_left",
            Turn::Right => "street_view_turn_right",
        }
    }

    fn rotation(self) -> &'static str {
        match self {
            Turn::Left => "counter-clockwise",
            Turn::Right => "clockwise",
        }
    }
}

async fn bounded<F>(limit: Duration, name: &str, fut: F) -> ActionOutcome
where
    F: Future<Output = ActionOutcome>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(outcome) => outcome,
        Err(_) => ActionOutcome::failed(format!("{} timed out after {:?}", name, limit)),
    }
}

/// 组合动作子步骤之间的停顿；只借用 Duration，不跨 await 持有 Actuator
async fn pause(duration: Duration) {
    if !duration.is_zero() {
        tokio::time::sleep(duration).await;
    }
}

fn render_markers(markers: &[MarkerInfo]) -> String {
    markers
        .iter()
        .map(|m| format!("[{}] {}", m.index, m.title))
        .collect::<Vec<_>>()
        .join("; ")
}

/// 对单个环境会话执行动作；一次只有一个动作在途
pub struct Actuator<'a> {
    env: &'a mut dyn Environment,
    timings: ActuatorTimings,
}

impl<'a> Actuator<'a> {
    pub fn new(env: &'a mut dyn Environment, timings: ActuatorTimings) -> Self {
        Self { env, timings }
    }

    /// 执行一次已校验的调用；stop 不触达环境
    pub async fn execute(&mut self, invocation: &ActionInvocation) -> ActionOutcome {
        let limit = self.timings.action_timeout;
        match invocation {
            ActionInvocation::Stop => ActionOutcome::ok("Task completed"),
            ActionInvocation::ClickId(id) => bounded(limit, "click_id", self.env.click_id(id)).await,
            ActionInvocation::EnterStreetView => self.enter_street_view().await,
            ActionInvocation::ClickMarker(index) => {
                bounded(limit, "click_marker", self.env.click_marker(*index)).await
            }
            ActionInvocation::MoveForward => self.move_forward().await,
            ActionInvocation::MoveBackward => {
                bounded(limit, "street_view_move_backward", self.env.move_backward()).await
            }
            ActionInvocation::TurnLeft => self.turn(Turn::Left).await,
            ActionInvocation::TurnRight => self.turn(Turn::Right).await,
            ActionInvocation::SelectHistoricalDate(label) => {
                bounded(
                    limit,
                    "select_historical_date",
                    self.env.select_historical_date(label),
                )
                .await
            }
            ActionInvocation::Back => bounded(limit, "back", self.env.back()).await,
            ActionInvocation::GetUrl => bounded(limit, "get_url", self.env.current_url()).await,
            ActionInvocation::FindText(query) => {
                bounded(limit, "find_text_on_page", self.env.find_text(query)).await
            }
            ActionInvocation::ClickBlankArea => {
                bounded(limit, "click_blank_area", self.env.click_blank_area()).await
            }
            ActionInvocation::FlipView => self.flip_view().await,
            ActionInvocation::MoveLeft => self.move_lateral(Side::Left).await,
            ActionInvocation::MoveRight => self.move_lateral(Side::Right).await,
        }
    }

    async fn enter_street_view(&mut self) -> ActionOutcome {
        let limit = self.timings.action_timeout;
        match tokio::time::timeout(limit, self.env.enter_street_view()).await {
            Err(_) => ActionOutcome::failed(format!(
                "enter_street_view timed out after {:?}",
                limit
            )),
            Ok(StreetViewEntry::Entered) => ActionOutcome::ok("Entered street view"),
            Ok(StreetViewEntry::Candidates(markers)) if markers.is_empty() => {
                ActionOutcome::failed("Failed to enter street view: no street view control or markers visible")
            }
            Ok(StreetViewEntry::Candidates(markers)) => ActionOutcome::ok(format!(
                "Found {} visible markers: {}",
                markers.len(),
                render_markers(&markers)
            )),
            Ok(StreetViewEntry::Unavailable(reason)) => {
                ActionOutcome::failed(format!("Failed to enter street view: {}", reason))
            }
        }
    }

    async fn move_forward(&mut self) -> ActionOutcome {
        let limit = self.timings.action_timeout;
        bounded(limit, "street_view_move_forward", self.env.move_forward()).await
    }

    async fn turn(&mut self, turn: Turn) -> ActionOutcome {
        let limit = self.timings.action_timeout;
        match turn {
            Turn::Left => bounded(limit, turn.action_name(), self.env.turn_left()).await,
            Turn::Right => bounded(limit, turn.action_name(), self.env.turn_right()).await,
        }
    }

    /// 180° 翻转 = 连续两次顺时针 90°
    pub async fn flip_view(&mut self) -> ActionOutcome {
        let first = self.turn(Turn::Right).await;
        if !first.success {
            tracing::warn!(detail = %first.detail, "flip_view aborted at first rotation");
            return ActionOutcome::failed(format!(
                "flip_view aborted at first street_view_turn_right: {}; heading unchanged",
                first.detail
            ));
        }
        pause(self.timings.composite_pause).await;
        let second = self.turn(Turn::Right).await;
        if !second.success {
            tracing::warn!(detail = %second.detail, "flip_view aborted at second rotation");
            return ActionOutcome::failed(format!(
                "flip_view aborted at second street_view_turn_right: {}; heading left rotated 90° clockwise (not restored)",
                second.detail
            ));
        }
        ActionOutcome::ok("Flipped view 180° (two clockwise rotations)")
    }

    /// 横移 = 转 90° → 前进 → 反向转 90° 恢复朝向
    async fn move_lateral(&mut self, side: Side) -> ActionOutcome {
        let (name, out, back) = match side {
            Side::Left => ("move_left", Turn::Left, Turn::Right),
            Side::Right => ("move_right", Turn::Right, Turn::Left),
        };

        let turned = self.turn(out).await;
        if !turned.success {
            tracing::warn!(action = name, detail = %turned.detail, "lateral move aborted before moving");
            return ActionOutcome::failed(format!(
                "{} aborted at {}: {}; heading unchanged",
                name,
                out.action_name(),
                turned.detail
            ));
        }
        pause(self.timings.composite_pause).await;

        let moved = self.move_forward().await;
        if !moved.success {
            tracing::warn!(action = name, detail = %moved.detail, "lateral move aborted, heading left rotated");
            return ActionOutcome::failed(format!(
                "{} aborted at street_view_move_forward: {}; heading left rotated 90° {} (not restored)",
                name,
                moved.detail,
                out.rotation()
            ));
        }
        pause(self.timings.composite_pause).await;

        let restored = self.turn(back).await;
        if !restored.success {
            tracing::warn!(action = name, detail = %restored.detail, "lateral move could not restore heading");
            return ActionOutcome::failed(format!(
                "{} aborted at restoring {}: {}; position advanced, heading left rotated 90° {} (not restored)",
                name,
                back.action_name(),
                restored.detail,
                out.rotation()
            ));
        }

        let label = match side {
            Side::Left => "left",
            Side::Right => "right",
        };
        ActionOutcome::ok(format!("Moved {} one step; heading restored", label))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::{Primitive, SimulatedEnvironment};

    fn timings() -> ActuatorTimings {
        ActuatorTimings {
            action_timeout: Duration::from_millis(200),
            composite_pause: Duration::ZERO,
        }
    }

    async fn street_view_env() -> SimulatedEnvironment {
        let mut env = SimulatedEnvironment::single_location();
        env.open_for_test().await;
        let mut act = Actuator::new(&mut env, timings());
        assert!(act.execute(&ActionInvocation::EnterStreetView).await.success);
        env
    }

    #[tokio::test]
    async fn test_lateral_move_restores_heading() {
        let mut env = street_view_env().await;
        let before = env.heading();
        let start = env.position();
        let outcome = Actuator::new(&mut env, timings())
            .execute(&ActionInvocation::MoveLeft)
            .await;
        assert!(outcome.success, "{}", outcome.detail);
        assert_eq!(env.heading(), before);
        assert_ne!(env.position(), start);

        let outcome = Actuator::new(&mut env, timings())
            .execute(&ActionInvocation::MoveRight)
            .await;
        assert!(outcome.success);
        assert_eq!(env.heading(), before);
        assert_eq!(env.position(), start);
    }

    #[tokio::test]
    async fn test_two_right_turns_flip_heading() {
        let mut env = street_view_env().await;
        let before = env.heading();
        let mut act = Actuator::new(&mut env, timings());
        assert!(act.execute(&ActionInvocation::TurnRight).await.success);
        assert!(act.execute(&ActionInvocation::TurnRight).await.success);
        assert_eq!(env.heading(), (before + 180) % 360);

        let outcome = Actuator::new(&mut env, timings())
            .execute(&ActionInvocation::FlipView)
            .await;
        assert!(outcome.success);
        assert_eq!(env.heading(), before);
    }

    #[tokio::test]
    async fn test_failed_advance_leaves_heading_rotated() {
        let mut env = street_view_env().await;
        env.fail_on(Primitive::MoveForward);
        let before = env.heading();
        let outcome = Actuator::new(&mut env, timings())
            .execute(&ActionInvocation::MoveLeft)
            .await;
        assert!(!outcome.success);
        assert!(outcome.detail.contains("street_view_move_forward"));
        assert!(outcome.detail.contains("not restored"));
        assert_eq!(env.heading(), (before + 270) % 360);
        // 恢复用的右转从未发出
        assert_eq!(env.log().count(Primitive::TurnRight), 0);
    }

    #[tokio::test]
    async fn test_turn_outside_street_view_fails_gracefully() {
        let mut env = SimulatedEnvironment::single_location();
        env.open_for_test().await;
        let outcome = Actuator::new(&mut env, timings())
            .execute(&ActionInvocation::FlipView)
            .await;
        assert!(!outcome.success);
        assert!(outcome.detail.contains("heading unchanged"));
    }

    #[tokio::test]
    async fn test_stalled_primitive_times_out() {
        let mut env = street_view_env().await;
        env.stall_on(Primitive::MoveBackward);
        let outcome = Actuator::new(&mut env, timings())
            .execute(&ActionInvocation::MoveBackward)
            .await;
        assert!(!outcome.success);
        assert!(outcome.detail.contains("timed out"));
    }

    #[tokio::test]
    async fn test_enter_street_view_lists_candidates() {
        let mut env = SimulatedEnvironment::with_markers(vec!["Cafe A".into(), "Cafe B".into()]);
        env.open_for_test().await;
        let outcome = Actuator::new(&mut env, timings())
            .execute(&ActionInvocation::EnterStreetView)
            .await;
        assert!(outcome.success);
        assert_eq!(outcome.detail, "Found 2 visible markers: [0] Cafe A; [1] Cafe B");
        assert!(!env.in_street_view());
    }

    #[tokio::test]
    async fn test_stop_never_touches_environment() {
        let mut env = SimulatedEnvironment::single_location();
        env.open_for_test().await;
        let calls = env.log().total();
        let outcome = Actuator::new(&mut env, timings())
            .execute(&ActionInvocation::Stop)
            .await;
        assert!(outcome.success);
        assert_eq!(env.log().total(), calls);
    }
}
