//! Ember - embedded non-blocking HTTP server core
//!
//! A single-threaded readiness loop, a per-connection request lifecycle that
//! drives cooperative handler tasks, and an ordered prefix/pattern router
//! with content negotiation.

pub mod config;
pub mod http;
pub mod routing;
pub mod server;
