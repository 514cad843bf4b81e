//! Status HTTP API
//!
//! Read-only health and event stream, plus two control endpoints that drive
//! the orchestrator the way host code would.

pub mod control;
pub mod health;
pub mod sse;

pub use control::{control_routes, ApiError};
pub use health::health_routes;
pub use sse::event_stream;
