//! Deployment module

pub mod anchor;
pub mod cluster;
pub mod executor;
pub mod extract;
pub mod fsm;
pub mod git;
pub mod process;
pub mod project;
pub mod wallet;
