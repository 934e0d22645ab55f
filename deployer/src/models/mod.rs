//! Request and result models

pub mod deployment;
