//! Change feed fan-out.
//!
//! Every successful write is turned into a RemoteEvent and pushed to each
//! WebSocket subscribed at `/records/changes`, one JSON text frame per event.

mod manager;

pub use manager::{Connection, ConnectionManager, EventSender, FeedRegistration};
