//! 工具层：对外暴露的地图任务与地图 URL 生成

pub mod executor;
pub mod maps_task;
pub mod maps_url;
pub mod registry;

pub use executor::ToolExecutor;
pub use maps_task::MapsTaskTool;
pub use maps_url::{generate_maps_url, parse_text_coordinates, MapsLocation, MapsUrlTool};
pub use registry::{Tool, ToolRegistry};
