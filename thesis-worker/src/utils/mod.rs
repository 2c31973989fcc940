//! Utility modules for the thesis worker

pub mod db_retry;
pub mod json_extract;
pub mod retry;

pub use db_retry::retry_on_lock;
pub use json_extract::extract_json;
pub use retry::{retry_with_backoff, RetryPolicy};
