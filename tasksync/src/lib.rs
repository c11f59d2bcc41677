//! `tasksync` -- offline-first task list client library.

pub mod app;
pub mod cache;
pub mod config;
pub mod remote;
pub mod scheduler;
pub mod session;
pub mod sync;
pub mod view;
