//! The authorized-client registry (C1), its atomic write protocol (C10), and
//! hash-named backup rotation (C9).
//!
//! Mirrors the teacher's `GatewayState` pattern (a service wrapped in a
//! single lock, invalidated on write) but backs it with a JSON file instead
//! of an in-memory-only map, since client identities must survive a restart.

mod backup;
mod error;
mod fingerprint;
mod registry;
mod write;

pub use backup::{BackupMeta, rotate_backups};
pub use error::RegistryError;
pub use fingerprint::fingerprint;
pub use registry::{AuthorizedClient, ClientRegistry, ConnectionAudit};
