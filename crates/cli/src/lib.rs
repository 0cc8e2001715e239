//! BiPay CLI - Configuration, wiring and operator commands
//!
//! This crate provides the `bipay` binary and the commands behind it.

pub mod commands;
pub mod context;

pub use context::AppContext;
