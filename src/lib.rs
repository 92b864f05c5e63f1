//! ShareCycle client core.
//!
//! A keyed query cache with de-duplicated fetches and prefix invalidation,
//! query observers and mutations built on it, the session hook, and the
//! gateways that talk to the donation backend. The `sharecycle` binary puts a
//! terminal UI and a small CLI on top.

pub mod cache;
pub mod config;
pub mod donations;
pub mod error;
pub mod gateway;
pub mod model;
pub mod mutation;
pub mod query;
pub mod session;
