//! Wire types for pairlink.
//!
//! This crate contains the serde-serializable shapes exchanged with the
//! external collaborators pairlink talks to:
//!
//! * the protocol sidecar, over a JSON-RPC bridge ([`bridge`]),
//! * connection lifecycle updates emitted by a protocol connection ([`update`]),
//! * the remote status-code table the sidecar reports ([`status`]),
//! * the documents written into the session archive ([`archive`]).
//!
//! Types in this crate are pure data: no behavior beyond
//! serialization/deserialization and small classification helpers. The
//! services that act on them live in the `pairlink` crate.

pub mod archive;
pub mod bridge;
pub mod status;
pub mod update;

pub use archive::*;
pub use bridge::*;
pub use status::*;
pub use update::*;
