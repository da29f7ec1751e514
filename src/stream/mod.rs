pub mod connection;
pub mod protocol;
pub mod server;

pub use protocol::{ClientMessage, ServerMessage, StreamFilters};
pub use server::StreamServer;
