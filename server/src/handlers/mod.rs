//! Request handlers for the records API and its change feed.

mod records;
mod websocket;

pub use records::*;
pub use websocket::*;
