//! The long-running side of ombud: the supervisor loop that drives scrape
//! cycles and the fail-over ladder, the per-operator resolution state
//! machine fed by the chat poller, and the `/health` endpoint.

pub mod health;
pub mod resolution;
pub mod supervisor;

pub use health::Monitor;
pub use resolution::ResolutionEngine;
pub use supervisor::Supervisor;
