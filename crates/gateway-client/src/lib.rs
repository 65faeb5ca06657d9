//! The client runtime (C8): connect, sign the auth challenge, send
//! requests, receive the token stream, and reconnect with jitter on drop.
//! The symmetric peer of `gateway-core`'s WebSocket handler (§3, §4.9).

mod backoff;
mod client;
mod error;
mod events;
mod sign;

pub use backoff::reconnect_delay_ms;
pub use client::GatewayClient;
pub use error::ClientError;
pub use events::ClientEvent;
