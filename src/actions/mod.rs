//! 动作层：注册表与已校验的调用

pub mod invocation;
pub mod registry;

pub use invocation::{ActionInvocation, ArgValue};
pub use registry::{ActionKind, ActionRegistry, ActionSpec, ArgKind, MAPS_ACTIONS};
