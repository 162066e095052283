//! CLI for the shopping-list cluster.
//!
//! One binary, three roles:
//! - `router`: the client-facing dispatcher
//! - `worker`: a stateful storage node
//! - `client`: the local pending log and its sync task

pub mod commands;
pub mod config;

pub use commands::{ClientAction, Command};
pub use config::CliConfig;
