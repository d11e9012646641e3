//! Streamable HTTP MCP transport: JSON-RPC dispatch plus the "mailbox" SSE
//! reconnection mechanism.

pub mod session;
pub mod transport;

pub use session::SessionManager;
