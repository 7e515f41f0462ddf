//! HTTP protocol implementation.
//!
//! This module turns socket bytes into routed handler calls, one request per
//! connection.
//!
//! # Architecture
//!
//! - **`connection`**: request records and the lifecycle state machine
//! - **`parser`**: incremental push parser feeding structural callbacks
//! - **`request`**: methods, headers, target splitting and query decoding
//! - **`accept`**: the Accept Preference List
//! - **`mime`**: extension to MIME table and media-range matching
//! - **`response`** / **`writer`**: status codes, head serialization, chunk
//!   framing, non-blocking flush
//! - **`task`** / **`exchange`**: the handler task and its view of the request
//!
//! # Request Lifecycle
//!
//! Each readiness event for a connection runs one service step:
//!
//! ```text
//!        ┌─────────────┐
//!        │   Reading   │ ← feed bytes to the parser until it would block
//!        └──────┬──────┘
//!               │ headers complete
//!               ▼
//!        ┌──────────────────┐
//!        │   Routing        │ ← once per request; 404 + close if unmatched
//!        └──────┬───────────┘
//!               │ handler bound, task created
//!               ▼
//!        ┌──────────────────┐
//!        │   Resuming       │ ← poll the task until it suspends
//!        └──────┬───────────┘
//!               ├─ writing / reading → stay registered
//!               ├─ sleeping          → deregister until timer or wakeup
//!               └─ done / term-close / failed → finish response, evict
//! ```
//!
//! # Example
//!
//! ```ignore
//! use ember::http::exchange::Exchange;
//! use ember::http::task::HandlerRef;
//! use ember::routing::RouteTable;
//! use std::rc::Rc;
//!
//! let router = RouteTable::new()
//!     .get("/hello", Rc::new(|ex: Exchange| async move {
//!         ex.respond("hello").await
//!     }) as HandlerRef)
//!     .compile()?;
//! ```

pub mod accept;
pub mod connection;
pub mod exchange;
pub mod mime;
pub mod parser;
pub mod request;
pub mod response;
pub mod task;
pub mod writer;
