//! Bunnybot mirrors merge proposals from a Bazaar review host into a public
//! git mirror, tracks their CI status, and executes merge commands found in
//! review comments.
//!
//! Each invocation is one reconciliation run: list the open proposals,
//! refresh their source mirrors, fold fresh CI results into the recorded
//! states, report state changes back as comments, execute requested merges,
//! and persist a snapshot so the next run knows what has already been seen.

pub mod bzr;
pub mod ci;
pub mod commands;
pub mod config;
pub mod engine;
pub mod git;
pub mod launchpad;
pub mod lock;
pub mod persistence;
pub mod process;
pub mod retry;
pub mod types;
pub mod workspace;
