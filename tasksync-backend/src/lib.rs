//! `tasksync` development backend library.
//!
//! Exposes the REST backend for use in tests and embedding. The server
//! keeps accounts and task rows in memory and speaks the same HTTP
//! contract the client's remote store expects.

pub mod config;
pub mod server;
pub mod store;
