//! Debug Adapter Protocol server for Strela programs.
//!
//! The adapter speaks DAP over stdio to the editor and the Strela debug wire
//! protocol (see [`strela_wire`]) to the debuggee, which it launches itself
//! and which connects back over loopback TCP.

pub mod dap_tokio;
mod error;
pub mod launch;
pub mod server;

pub use error::{Result, ServerError};
