//! Anchor Deployer Library
//!
//! Clones an Anchor project, builds it and deploys it to a Solana cluster
//! with a per-deployment wallet, cleaning up after itself on every path.

pub mod app;
pub mod deploy;
pub mod errors;
pub mod filesys;
pub mod logs;
pub mod models;
pub mod server;
pub mod services;
pub mod storage;
pub mod utils;
pub mod workers;
