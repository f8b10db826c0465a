//! Decision Oracle 客户端
//!
//! 包装注入的 LlmClient：每次调用有超时，传输错误 / 超时 / 回复中没有 JSON 对象时按指数退避重试，
//! 次数耗尽后返回 AgentError::OracleExhausted（会话致命）。

use std::sync::Arc;

use crate::core::AgentError;
use crate::llm::{LlmClient, LlmError, RetryConfig};
use crate::memory::Message;
use crate::react::dispatcher::{extract_payload, DecisionPayload};
use crate::react::events::{send_event, AgentEvent, EventSender};

pub struct DecisionOracle {
    llm: Arc<dyn LlmClient>,
    retry: RetryConfig,
}

impl DecisionOracle {
    pub fn new(llm: Arc<dyn LlmClient>, retry: RetryConfig) -> Self {
        Self { llm, retry }
    }

    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry
    }

    /// 获取 LLM 累计 token 使用统计
    pub fn token_usage(&self) -> (u64, u64, u64) {
        self.llm.token_usage()
    }

    /// 请求一次决策，返回提取出的决策载荷
    pub async fn decide(
        &self,
        messages: &[Message],
        events: Option<&EventSender>,
    ) -> Result<DecisionPayload, AgentError> {
        self.call_with_retry(messages, events, |reply| {
            extract_payload(&reply).ok_or_else(|| {
                format!(
                    "reply contained no JSON object: {}",
                    preview(&reply, 120)
                )
            })
        })
        .await
    }

    /// 基于历史合成最终答案
    pub async fn synthesize(
        &self,
        messages: &[Message],
        events: Option<&EventSender>,
    ) -> Result<String, AgentError> {
        self.call_with_retry(messages, events, |reply| {
            let answer = reply.trim();
            if answer.is_empty() {
                Err(LlmError::EmptyResponse.to_string())
            } else {
                Ok(answer.to_string())
            }
        })
        .await
    }

    async fn call_with_retry<T, F>(
        &self,
        messages: &[Message],
        events: Option<&EventSender>,
        accept: F,
    ) -> Result<T, AgentError>
    where
        F: Fn(String) -> Result<T, String>,
    {
        let attempts = self.retry.max_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            let outcome =
                match tokio::time::timeout(self.retry.request_timeout, self.llm.complete(messages))
                    .await
                {
                    Err(_) => Err(LlmError::Timeout(self.retry.request_timeout).to_string()),
                    Ok(Err(e)) => Err(e.to_string()),
                    Ok(Ok(reply)) => accept(reply),
                };

            match outcome {
                Ok(value) => return Ok(value),
                Err(e) => {
                    tracing::warn!(attempt, max_attempts = attempts, error = %e, "oracle call failed");
                    last_error = e;
                }
            }

            if attempt < attempts {
                send_event(
                    events,
                    AgentEvent::OracleRetry {
                        attempt,
                        error: last_error.clone(),
                    },
                );
                tokio::time::sleep(self.retry.backoff_for(attempt)).await;
            }
        }

        Err(AgentError::OracleExhausted {
            attempts,
            last_error,
        })
    }
}

fn preview(text: &str, max_chars: usize) -> String {
    let mut out: String = text.chars().take(max_chars).collect();
    if text.chars().count() > max_chars {
        out.push_str("...");
    }
    out
}
