//! 控制层：分派、Oracle、提示词、事件与主循环

pub mod dispatcher;
pub mod events;
pub mod loop_;
pub mod oracle;
pub mod prompt;
pub mod schema;

pub use dispatcher::{extract_payload, parse_action_code, Decision, DecisionPayload, Dispatcher};
pub use events::{AgentEvent, EventSender};
pub use loop_::{MapsAgent, SessionReport, MAX_STEPS};
pub use oracle::DecisionOracle;
pub use prompt::DEFAULT_SYSTEM_PROMPT;
