//! 记忆层：发往 LLM 的消息、会话内逐步历史

pub mod conversation;
pub mod history;

pub use conversation::{Message, Role};
pub use history::{SessionHistory, StepAction, StepEntry, StepRecord};
