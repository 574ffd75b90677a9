//! Service façade and HTTP surface of the MCP gateway.

pub mod http;
pub mod serve;
pub mod service;

pub use http::{AppState, gateway_router};
pub use serve::run;
pub use service::{AggregatedTool, GatewayService, McpEntry};
