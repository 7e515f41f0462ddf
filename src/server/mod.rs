//! Connection multiplexing: readiness backends, the event loop and the
//! cross-thread wake path.

pub mod limits;
pub mod listener;
pub mod poller;
pub mod reactor;
pub mod wake;

/// Identifies one accepted connection for as long as it is live. Ids are
/// issued from a counter and never reused.
pub type ConnId = u64;

pub use reactor::{Reactor, ReactorOptions};
pub use wake::ReactorHandle;
