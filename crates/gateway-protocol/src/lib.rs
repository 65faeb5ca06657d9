//! Wire protocol shared by the gateway server and client runtime.
//!
//! One JSON text frame per WebSocket message (§6.1 of the design). Every
//! frame carries `type` and `timestamp`; most carry `id`. `ClientMessage` and
//! `ServerMessage` are internally-tagged on `type` so `serde_json` can decode
//! a frame without an intermediate probe.

mod algo;
mod constants;
mod errors;
mod messages;

pub use algo::{SUPPORTED_SIGNATURE_ALGORITHMS, is_supported_signature_algorithm};
pub use constants::*;
pub use errors::{CloseCode, ErrorCode};
pub use messages::*;
