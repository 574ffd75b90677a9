//! Live downstream MCP sessions and the manager that supervises them.

mod manager;
mod rmcp_session;
mod session;

pub use manager::{ManagerConfig, ManagerMetrics, SessionManager};
pub use rmcp_session::RmcpSession;
pub use session::McpSession;
