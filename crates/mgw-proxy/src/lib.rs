//! Proxy-side mirrors of downstream MCPs: the per-downstream mirror server,
//! the capability loader that populates it, and the registry that owns the
//! mirror/adapter tuples and dispatches client HTTP traffic.

mod loader;
mod mirror;
mod registry;

#[cfg(test)]
mod testutil;

pub use loader::load_capabilities;
pub use mirror::McpMirror;
pub use registry::ProxyRegistry;
