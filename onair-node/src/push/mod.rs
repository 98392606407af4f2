// Status push protocol
//
// Every status change is pushed to each known peer, and every push is
// acknowledged with the receiver's own status, so a single round trip
// synchronizes both directions:
// - client: outbound pushes with a bounded timeout
// - server: inbound push endpoint
// - messages: wire types shared by both halves

pub mod client;
pub mod messages;
pub mod server;

pub use client::PushClient;
pub use messages::{PushRequest, PushResponse};
pub use server::PushServer;

/// Path of the push endpoint on every node
pub const STATUS_PATH: &str = "/api/v1/status";
