//! Agent Loop Controller
//!
//! INIT -> OBSERVING -> DECIDING -> DISPATCHING -> EXECUTING -> (OBSERVING | 终态)
//!
//! - 每轮恰好追加一条 StepRecord（含终止步与分派失败步），总数不超过步数预算
//! - 动作执行失败、分派失败只写入历史；Oracle 重试耗尽与 INIT 资源错误才终止会话
//! - 收到终止后不再执行任何动作；预算耗尽时基于完整历史合成答案
//! - 环境在每条退出路径上都会被 close

use std::sync::Arc;

use serde::Serialize;
use tracing::Instrument;
use uuid::Uuid;

use crate::actions::ActionRegistry;
use crate::core::{AgentError, LoopPhase, Termination};
use crate::env::{Actuator, ActuatorTimings, Environment, EnvironmentFactory};
use crate::memory::{SessionHistory, StepAction, StepEntry};
use crate::react::dispatcher::{Decision, Dispatcher, FINAL_ANSWER};
use crate::react::events::{send_event, AgentEvent, EventSender};
use crate::react::oracle::DecisionOracle;
use crate::react::prompt::{decision_messages, synthesis_messages, SynthesisReason, DEFAULT_SYSTEM_PROMPT};

/// 默认步数预算
pub const MAX_STEPS: usize = 15;

/// 单次会话的结果
#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    pub session_id: Uuid,
    pub answer: String,
    pub termination: Termination,
    pub history: SessionHistory,
}

/// 地图 / 街景智能体：每次 run 创建一个独立会话（独立环境 + 独立历史）
pub struct MapsAgent {
    oracle: Arc<DecisionOracle>,
    environments: Arc<dyn EnvironmentFactory>,
    dispatcher: Dispatcher,
    max_steps: usize,
    timings: ActuatorTimings,
    system_prompt: String,
    event_tx: Option<EventSender>,
}

impl MapsAgent {
    pub fn new(oracle: Arc<DecisionOracle>, environments: Arc<dyn EnvironmentFactory>) -> Self {
        Self {
            oracle,
            environments,
            dispatcher: Dispatcher::new(ActionRegistry::maps()),
            max_steps: MAX_STEPS,
            timings: ActuatorTimings::default(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            event_tx: None,
        }
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    pub fn with_timings(mut self, timings: ActuatorTimings) -> Self {
        self.timings = timings;
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_event_tx(mut self, tx: EventSender) -> Self {
        self.event_tx = Some(tx);
        self
    }

    pub fn max_steps(&self) -> usize {
        self.max_steps
    }

    pub fn registry(&self) -> &ActionRegistry {
        self.dispatcher.registry()
    }

    /// 任务入口：总是返回一个答案字符串（失败时为说明性文字）
    pub async fn run(&self, task: &str, start: &str) -> String {
        self.run_session(task, start).await.answer
    }

    /// 运行一个完整会话并返回报告
    pub async fn run_session(&self, task: &str, start: &str) -> SessionReport {
        let session_id = Uuid::new_v4();
        let span = tracing::info_span!("maps_session", session = %session_id);
        self.session(session_id, task, start).instrument(span).await
    }

    async fn session(&self, session_id: Uuid, task: &str, start: &str) -> SessionReport {
        let events = self.event_tx.as_ref();
        send_event(
            events,
            AgentEvent::SessionStarted {
                session_id: session_id.to_string(),
                task: task.to_string(),
                start: start.to_string(),
                max_steps: self.max_steps,
            },
        );
        tracing::info!(start = %start, max_steps = self.max_steps, "session started");
        self.phase(LoopPhase::Init);

        let mut history = SessionHistory::new();
        let mut env = self.environments.create();

        if let Err(e) = env.open(start).await {
            env.close().await;
            let detail = match e {
                AgentError::EnvironmentUnavailable(detail) => detail,
                other => other.to_string(),
            };
            let answer = format!("Failed to open start location '{}': {}", start, detail);
            tracing::error!(error = %detail, "environment unavailable, session aborted");
            return self.finish(
                session_id,
                answer.clone(),
                Termination::Failed { reason: answer },
                history,
            );
        }

        let outcome = self.drive(env.as_mut(), task, &mut history).await;
        env.close().await;

        match outcome {
            Ok((termination, answer)) => self.finish(session_id, answer, termination, history),
            Err(e) => {
                tracing::error!(error = %e, steps = history.len(), "session failed");
                let answer = format!("Failed to complete the task: {}", e);
                self.finish(
                    session_id,
                    answer,
                    Termination::Failed {
                        reason: e.to_string(),
                    },
                    history,
                )
            }
        }
    }

    fn finish(
        &self,
        session_id: Uuid,
        answer: String,
        termination: Termination,
        history: SessionHistory,
    ) -> SessionReport {
        self.phase(LoopPhase::Terminated);
        send_event(
            self.event_tx.as_ref(),
            AgentEvent::Terminated {
                termination: termination.clone(),
                steps: history.len(),
            },
        );
        let (prompt_tokens, completion_tokens, total_tokens) = self.oracle.token_usage();
        tracing::info!(
            termination = ?termination,
            steps = history.len(),
            prompt_tokens,
            completion_tokens,
            total_tokens,
            "session finished"
        );
        SessionReport {
            session_id,
            answer,
            termination,
            history,
        }
    }

    fn phase(&self, phase: LoopPhase) {
        tracing::debug!(phase = ?phase, "loop phase");
        send_event(self.event_tx.as_ref(), AgentEvent::Phase { phase });
    }

    /// 主循环；Err 只来自 Oracle 重试耗尽
    async fn drive(
        &self,
        env: &mut dyn Environment,
        task: &str,
        history: &mut SessionHistory,
    ) -> Result<(Termination, String), AgentError> {
        let events = self.event_tx.as_ref();

        for step in 0..self.max_steps {
            send_event(
                events,
                AgentEvent::StepUpdate {
                    step,
                    max_steps: self.max_steps,
                },
            );

            self.phase(LoopPhase::Observing);
            let captured = env.capture().await;
            if let Err(e) = &captured {
                tracing::warn!(step, error = %e, "state capture failed, deciding without screenshot");
            }
            let messages = decision_messages(
                &self.system_prompt,
                task,
                self.dispatcher.registry(),
                history,
                captured.as_ref().map_err(|e| e.as_str()),
            );

            self.phase(LoopPhase::Deciding);
            let payload = self.oracle.decide(&messages, events).await?;

            self.phase(LoopPhase::Dispatching);
            let decision = self.dispatcher.dispatch(payload);

            match decision {
                Decision::Terminate {
                    observation,
                    reasoning,
                    action_code,
                    answer,
                } => {
                    send_event(
                        events,
                        AgentEvent::Decision {
                            step,
                            observation: observation.clone(),
                            reasoning: reasoning.clone(),
                            action_code: action_code.clone(),
                        },
                    );
                    let detail = if action_code.eq_ignore_ascii_case(FINAL_ANSWER) {
                        "Final answer provided"
                    } else {
                        "Task completed"
                    };
                    history.push(StepEntry {
                        observation,
                        reasoning,
                        action_code: action_code.clone(),
                        action: StepAction::Termination {
                            answer: answer.clone(),
                        },
                        success: true,
                        detail: detail.to_string(),
                    });
                    tracing::info!(step, action_code = %action_code, "termination received");

                    if let Some(answer) = answer.filter(|a| !a.trim().is_empty()) {
                        return Ok((Termination::Success, answer));
                    }
                    send_event(
                        events,
                        AgentEvent::Synthesizing {
                            reason: "completed without answer".to_string(),
                        },
                    );
                    let answer = self
                        .oracle
                        .synthesize(
                            &synthesis_messages(task, history, SynthesisReason::Completed),
                            events,
                        )
                        .await?;
                    return Ok((Termination::Success, answer));
                }

                Decision::Reject {
                    observation,
                    reasoning,
                    action_code,
                    error,
                } => {
                    let reason = error.to_string();
                    tracing::warn!(step, action_code = %action_code, reason = %reason, "dispatch rejected");
                    send_event(
                        events,
                        AgentEvent::Rejected {
                            step,
                            action_code: action_code.clone(),
                            reason: reason.clone(),
                        },
                    );
                    history.push(StepEntry {
                        observation,
                        reasoning,
                        action_code,
                        action: StepAction::Rejected {
                            reason: reason.clone(),
                        },
                        success: false,
                        detail: reason,
                    });
                }

                Decision::Invoke {
                    observation,
                    reasoning,
                    action_code,
                    invocation,
                } => {
                    send_event(
                        events,
                        AgentEvent::Decision {
                            step,
                            observation: observation.clone(),
                            reasoning: reasoning.clone(),
                            action_code: action_code.clone(),
                        },
                    );

                    self.phase(LoopPhase::Executing);
                    let outcome = Actuator::new(&mut *env, self.timings)
                        .execute(&invocation)
                        .await;
                    if outcome.success {
                        tracing::info!(step, action_code = %action_code, detail = %outcome.detail, "step executed");
                    } else {
                        tracing::warn!(step, action_code = %action_code, detail = %outcome.detail, "step failed");
                    }
                    send_event(
                        events,
                        AgentEvent::Executed {
                            step,
                            action_code: action_code.clone(),
                            success: outcome.success,
                            detail: outcome.detail.clone(),
                        },
                    );
                    history.push(StepEntry {
                        observation,
                        reasoning,
                        action_code,
                        action: StepAction::Invoked { invocation },
                        success: outcome.success,
                        detail: outcome.detail,
                    });
                }
            }
        }

        tracing::info!(steps = history.len(), "step budget exhausted, synthesizing answer");
        send_event(
            events,
            AgentEvent::Synthesizing {
                reason: "step budget exhausted".to_string(),
            },
        );
        let answer = self
            .oracle
            .synthesize(
                &synthesis_messages(task, history, SynthesisReason::BudgetExhausted),
                events,
            )
            .await?;
        Ok((Termination::BudgetExhausted, answer))
    }
}
