//! Core model for the MCP gateway: downstream definitions, observed status,
//! and the error taxonomy shared by the storage, session, and service layers.

pub mod definition;
pub mod duration;
pub mod error;
pub mod status;

pub use definition::{McpDefinition, ToolFilter, ToolFilterMode, TransportKind};
pub use error::{DefinitionError, GatewayError};
pub use status::{ConnectionState, McpStatus, StatusHandle};
