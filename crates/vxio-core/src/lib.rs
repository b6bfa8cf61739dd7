#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::expect_used, clippy::unwrap_used))]

pub mod config;
pub mod error;
pub mod particle;
pub mod schema;
pub mod store;
pub mod types;
