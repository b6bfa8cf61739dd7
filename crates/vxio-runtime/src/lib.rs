#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::expect_used, clippy::unwrap_used))]

pub mod assembler;
pub mod error;
pub mod loader;
pub mod scheduler;
pub mod sink;
pub mod slots;
pub mod types;
pub mod writer;
