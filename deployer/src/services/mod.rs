//! Deployment service: admission and status tracking around the pipeline

pub mod deployment;
pub mod tracker;
