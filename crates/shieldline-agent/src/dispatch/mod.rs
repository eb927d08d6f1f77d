//! Inbound message and command dispatch.
//!
//! Re-exports the router and the command table so the app state can wire
//! host events straight into them.

pub mod commands;
pub mod router;

pub use commands::{CommandTable, ENTER_PICKER_MODE, ENTER_ZAPPER_MODE};
pub use router::MessageRouter;
