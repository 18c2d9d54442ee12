//! Reward harvester library.
//!
//! Keeps a set of accounts on a rewards platform claiming their mining
//! sessions, daily rewards, spins and upgrades over JSON-RPC.

pub mod app;
pub mod config;
pub mod domain;
pub mod infra;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
