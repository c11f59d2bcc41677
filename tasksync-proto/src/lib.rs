//! Shared task model and REST wire format for `TaskSync`.

pub mod auth;
pub mod codec;
pub mod rest;
pub mod task;
pub mod timestamp;
