//! Common test utilities for gmail-dl integration tests

#[allow(dead_code)]
pub mod config;
#[allow(dead_code)]
pub mod mailbox;

pub use config::*;
#[allow(unused_imports)]
pub use mailbox::*;
