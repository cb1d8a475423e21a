//! Process edge of pairlink: argument parsing, logging, the HTTP surface, the
//! webhook notifier and the keep-alive pinger.

pub mod app;
pub mod cli;
pub mod config;
pub mod error;
pub mod keepalive;
pub mod logging;
pub mod notifier;
pub mod server;
pub mod shutdown;
