//! pairlink: brokerage of one-time pairing codes.
//!
//! A user asks for a pairing code; pairlink opens a protocol session on their
//! behalf, extracts the short-lived code and tracks the session until the
//! remote endpoint reports it authenticated (or the attempt fails). The main
//! pieces:
//!
//! * [`pairing`]: the per-attempt state machine, its driver and the bounded
//!   retry loop,
//! * [`registry`]: in-flight and completed sessions, at most one pending
//!   attempt per user,
//! * [`cleanup`]: periodic reclamation of abandoned attempts and scratch
//!   directories,
//! * [`archive`]: persistence of completed sessions to a version-controlled
//!   remote,
//! * [`broker`]: the façade wiring everything behind one API.
//!
//! The protocol library itself lives outside the process; [`bridge`] talks to
//! it over WebSocket JSON-RPC and [`fake`] stands in for it in tests.

pub mod access;
pub mod archive;
pub mod bridge;
pub mod broker;
pub mod cleanup;
pub mod config;
pub mod connection;
pub mod error;
pub mod fake;
pub mod host;
pub mod notify;
pub mod pairing;
pub mod rate_limit;
pub mod registry;
pub mod requests;
pub mod types;
pub mod users;

pub use broker::{Broker, BrokerError, BrokerParts};
pub use error::{CodeRequestError, Error, Result};
pub use types::{PhoneNumber, SessionId, UserId};
