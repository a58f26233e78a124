//! HTTP API handlers for ccr-reviewer
//!
//! REST endpoints under `/api/v1` plus an SSE stream of pipeline events.

pub mod classifications;
pub mod code_reviews;
pub mod health;
pub mod sse;
pub mod standard_sets;

pub use classifications::classification_routes;
pub use code_reviews::code_review_routes;
pub use health::health_routes;
pub use sse::{event_routes, event_stream};
pub use standard_sets::standard_set_routes;
