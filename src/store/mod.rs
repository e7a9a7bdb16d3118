//! In-memory state shared by the poller and the HTTP surface.
//!
//! Nothing is persisted; everything lives for the process lifetime.

mod latest;
mod models;

pub use latest::*;
pub use models::*;
