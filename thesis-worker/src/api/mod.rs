//! HTTP surface of the thesis worker
//!
//! Job submission and status, SSE progress stream, health check.

pub mod health;
pub mod jobs;
pub mod sse;

pub use health::health_routes;
pub use jobs::job_routes;
pub use sse::event_stream;
