//! 主循环集成测试：Scripted LLM + 模拟环境

use std::sync::Arc;
use std::time::Duration;

use wayfarer::core::Termination;
use wayfarer::env::{ActuatorTimings, Primitive, SimulatedEnvironment, SimulatedEnvironmentFactory};
use wayfarer::llm::{RetryConfig, ScriptStep, ScriptedLlmClient};
use wayfarer::memory::StepAction;
use wayfarer::react::{DecisionOracle, MapsAgent, MAX_STEPS};

fn retry() -> RetryConfig {
    RetryConfig {
        max_attempts: 2,
        request_timeout: Duration::from_secs(5),
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(1),
    }
}

fn build(
    replies: Vec<String>,
    template: SimulatedEnvironment,
) -> (MapsAgent, Arc<SimulatedEnvironmentFactory>, Arc<ScriptedLlmClient>) {
    build_with(ScriptedLlmClient::new(replies), retry(), template)
}

fn build_with(
    llm: ScriptedLlmClient,
    retry: RetryConfig,
    template: SimulatedEnvironment,
) -> (MapsAgent, Arc<SimulatedEnvironmentFactory>, Arc<ScriptedLlmClient>) {
    let llm = Arc::new(llm);
    let oracle = Arc::new(DecisionOracle::new(llm.clone(), retry));
    let factory = Arc::new(SimulatedEnvironmentFactory::new(template));
    let agent = MapsAgent::new(oracle, factory.clone()).with_timings(ActuatorTimings {
        action_timeout: Duration::from_millis(200),
        composite_pause: Duration::ZERO,
    });
    (agent, factory, llm)
}

fn reply(action_code: &str) -> String {
    serde_json::json!({
        "observation": "looking at the page",
        "reasoning": "next step",
        "action_code": action_code,
    })
    .to_string()
}

#[tokio::test]
async fn marker_then_stop_synthesizes_from_history() {
    let (agent, factory, llm) = build(
        vec![
            reply("click_marker(0)"),
            reply("stop()"),
            "The tunnel opened on 06/12/2012.".to_string(),
        ],
        SimulatedEnvironment::with_markers(vec!["Tunnel entrance".into(), "Car park".into()]),
    );

    let report = agent.run_session("When did the tunnel open?", "sim://tunnel").await;

    assert_eq!(report.termination, Termination::Success);
    assert_eq!(report.answer, "The tunnel opened on 06/12/2012.");
    assert_eq!(report.history.len(), 2);
    let records = report.history.records();
    assert!(records[0].success);
    assert!(records[0].detail.contains("Clicked marker 0: Tunnel entrance"));
    assert!(matches!(records[1].action, StepAction::Termination { answer: None }));

    let requests = llm.requests();
    assert_eq!(requests.len(), 3);
    let synthesis = &requests[2][0].content;
    assert!(synthesis.contains("You have completed the maps task: When did the tunnel open?"));
    assert!(synthesis.contains("Clicked marker 0: Tunnel entrance"));
    assert_eq!(factory.logs()[0].close_count(), 1);
}

#[tokio::test]
async fn unreachable_start_records_nothing() {
    let (agent, factory, llm) = build(vec![], SimulatedEnvironment::single_location());

    let report = agent.run_session("anything", "not-a-url").await;

    assert!(report.answer.starts_with("Failed to open start location 'not-a-url'"));
    assert!(report.termination.is_failure());
    assert!(report.history.is_empty());
    assert_eq!(llm.call_count(), 0);
    let log = &factory.logs()[0];
    assert_eq!(log.open_count(), 1);
    assert_eq!(log.close_count(), 1);
}

#[tokio::test]
async fn unknown_actions_exhaust_the_budget() {
    let mut replies: Vec<String> = (0..MAX_STEPS).map(|_| reply("show_historical_dates()")).collect();
    replies.push("Could not determine the date.".to_string());
    let (agent, factory, llm) = build(replies, SimulatedEnvironment::single_location());

    let report = agent.run_session("Find the date", "sim://x").await;

    assert_eq!(report.termination, Termination::BudgetExhausted);
    assert_eq!(report.answer, "Could not determine the date.");
    assert_eq!(report.history.len(), MAX_STEPS);
    assert!(report.history.records().iter().all(|r| !r.success));
    assert_eq!(factory.logs()[0].action_calls(), 0);

    let requests = llm.requests();
    assert_eq!(requests.len(), MAX_STEPS + 1);
    let synthesis = &requests[MAX_STEPS][0].content;
    assert!(synthesis.contains("step budget was exhausted"));
    assert_eq!(synthesis.matches("failure: ").count(), MAX_STEPS);
    assert_eq!(factory.logs()[0].close_count(), 1);
}

#[tokio::test]
async fn nothing_runs_after_stop() {
    let (agent, factory, llm) = build(
        vec![
            reply("enter_street_view()"),
            reply("stop()"),
            "summary".to_string(),
            reply("street_view_move_forward()"),
        ],
        SimulatedEnvironment::single_location(),
    );

    let report = agent.run_session("t", "sim://x").await;

    assert_eq!(report.history.len(), 2);
    assert_eq!(report.answer, "summary");
    let log = &factory.logs()[0];
    assert_eq!(log.action_calls(), 1);
    assert_eq!(log.count(Primitive::MoveForward), 0);
    assert_eq!(llm.remaining(), 1);
}

#[tokio::test]
async fn step_budget_bounds_the_history() {
    let replies: Vec<String> = (0..10)
        .map(|i| {
            if i % 2 == 0 {
                reply("enter_street_view()")
            } else {
                reply("street_view_turn_right()")
            }
        })
        .chain(std::iter::once("done".to_string()))
        .collect();
    let (agent, factory, _llm) = build(replies, SimulatedEnvironment::single_location());
    let agent = agent.with_max_steps(4);

    let report = agent.run_session("t", "sim://x").await;

    assert_eq!(report.history.len(), 4);
    assert_eq!(factory.logs()[0].close_count(), 1);
    assert_eq!(report.termination, Termination::BudgetExhausted);
    let indices: Vec<usize> = report.history.records().iter().map(|r| r.index).collect();
    assert_eq!(indices, vec![0, 1, 2, 3]);
}

#[tokio::test]
async fn concurrent_sessions_are_independent() {
    let (agent, factory, _llm) = build(
        vec![
            r#"{"action_code": "final_answer", "answer": "first"}"#.to_string(),
            r#"{"action_code": "final_answer", "answer": "second"}"#.to_string(),
        ],
        SimulatedEnvironment::single_location(),
    );

    let (a, b) = tokio::join!(
        agent.run_session("a", "sim://a"),
        agent.run_session("b", "sim://b"),
    );

    assert_ne!(a.session_id, b.session_id);
    assert_eq!(a.history.len(), 1);
    assert_eq!(b.history.len(), 1);
    let mut answers = vec![a.answer, b.answer];
    answers.sort();
    assert_eq!(answers, vec!["first".to_string(), "second".to_string()]);
    let logs = factory.logs();
    assert_eq!(logs.len(), 2);
    assert!(logs.iter().all(|l| l.open_count() == 1 && l.close_count() == 1));
}

#[tokio::test]
async fn failed_lateral_move_reports_partial_state() {
    let (agent, factory, llm) = build(
        vec![
            reply("enter_street_view()"),
            reply("move_left()"),
            r#"{"action_code": "final_answer", "answer": "gave up"}"#.to_string(),
        ],
        SimulatedEnvironment::single_location().failing_on(Primitive::MoveForward),
    );

    let report = agent.run_session("t", "sim://x").await;

    let lateral = &report.history.records()[1];
    assert!(!lateral.success);
    assert!(lateral
        .detail
        .starts_with("move_left aborted at street_view_move_forward:"));
    assert!(lateral.detail.contains("counter-clockwise (not restored)"));
    assert_eq!(factory.logs()[0].heading(), 270);
    assert!(llm.requests()[2][1].content.contains("move_left aborted"));
    assert_eq!(report.answer, "gave up");
}

#[tokio::test]
async fn stalled_oracle_fails_the_session_and_closes() {
    let llm = ScriptedLlmClient::from_steps(vec![ScriptStep::Stall, ScriptStep::Stall]);
    let retry = RetryConfig {
        request_timeout: Duration::from_millis(50),
        ..retry()
    };
    let (agent, factory, llm) = build_with(llm, retry, SimulatedEnvironment::single_location());

    let report = agent.run_session("t", "sim://x").await;

    assert!(report.answer.starts_with("Failed to complete the task:"));
    assert!(report.answer.contains("timed out"), "{}", report.answer);
    assert!(report.termination.is_failure());
    assert!(report.history.is_empty());
    assert_eq!(llm.call_count(), 2);
    assert_eq!(factory.logs()[0].close_count(), 1);
}

#[tokio::test]
async fn sessions_can_be_spawned() {
    let (agent, factory, _llm) = build(
        vec![
            reply("enter_street_view()"),
            reply("flip_view()"),
            r#"{"action_code": "final_answer", "answer": "spawned"}"#.to_string(),
        ],
        SimulatedEnvironment::single_location(),
    );
    // 组合动作之间的停顿同样跨 await，必须保持 Send
    let agent = Arc::new(agent.with_timings(ActuatorTimings {
        action_timeout: Duration::from_millis(200),
        composite_pause: Duration::from_millis(5),
    }));

    let handle = tokio::spawn({
        let agent = agent.clone();
        async move { agent.run_session("t", "sim://x").await }
    });
    let report = handle.await.unwrap();

    assert_eq!(report.answer, "spawned");
    assert!(report.history.records()[1].success);
    assert_eq!(factory.logs()[0].heading(), 180);
}
