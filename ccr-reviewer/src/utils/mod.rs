//! Utility modules for ccr-reviewer

pub mod retry;

pub use retry::{retry_on_lock, retry_on_unavailable, RetryPolicy};
