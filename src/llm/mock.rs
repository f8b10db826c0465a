//! Mock / Scripted LLM 客户端（用于测试与本地试跑，无需 API）
//!
//! - MockLlmClient：对决策请求直接回复 final_answer，便于本地跑通整个会话
//! - ScriptedLlmClient：按顺序返回预设回复并记录收到的请求，供测试断言

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::llm::{LlmClient, LlmError};
use crate::memory::{Message, Role};

/// Mock 客户端：用最后一条 User 消息的首行生成终止决策
#[derive(Debug, Default)]
pub struct MockLlmClient;

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        let first_line = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .and_then(|m| m.content.lines().find(|l| !l.trim().is_empty()))
            .unwrap_or("(no input)");

        let reply = serde_json::json!({
            "observation": "Mock oracle does not inspect the page",
            "reasoning": "Mock oracle terminates immediately",
            "action_code": "final_answer",
            "answer": format!("Mock answer for: {}", first_line.trim()),
        });
        Ok(reply.to_string())
    }
}

/// 脚本中的一步
#[derive(Debug, Clone)]
pub enum ScriptStep {
    Reply(Result<String, LlmError>),
    /// 永不返回，用于触发调用方的超时
    Stall,
}

/// 预设回复序列；脚本耗尽后返回 Transport 错误
#[derive(Debug, Default)]
pub struct ScriptedLlmClient {
    replies: Mutex<VecDeque<ScriptStep>>,
    requests: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedLlmClient {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::from_results(replies.into_iter().map(|r| Ok(r.into())))
    }

    pub fn from_results<I>(replies: I) -> Self
    where
        I: IntoIterator<Item = Result<String, LlmError>>,
    {
        Self::from_steps(replies.into_iter().map(ScriptStep::Reply))
    }

    pub fn from_steps<I>(steps: I) -> Self
    where
        I: IntoIterator<Item = ScriptStep>,
    {
        Self {
            replies: Mutex::new(steps.into_iter().collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// 已收到的全部请求（按调用顺序）
    pub fn requests(&self) -> Vec<Vec<Message>> {
        self.requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn remaining(&self) -> usize {
        self.replies.lock().map(|r| r.len()).unwrap_or(0)
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(messages.to_vec());
        }
        let next = self
            .replies
            .lock()
            .map_err(|e| LlmError::Transport(e.to_string()))?
            .pop_front();
        match next {
            Some(ScriptStep::Reply(reply)) => reply,
            Some(ScriptStep::Stall) => std::future::pending().await,
            None => Err(LlmError::Transport("script exhausted".to_string())),
        }
    }
}
