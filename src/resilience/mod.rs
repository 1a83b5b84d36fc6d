//! # Resilience Module
//!
//! Failure-handling primitives shared by the orchestrator and the scheduler.
//!
//! ## Architecture
//!
//! - **Retry**: bounded exponential backoff with jitter around any async
//!   operation; the inner, in-process retry layer
//! - **Idempotency**: the `once` guard that collapses duplicate deliveries of
//!   one logical operation into a single effect
//!
//! ## Usage
//!
//! ```rust,no_run
//! use foreman_core::resilience::{retry, RetryPolicy};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let policy = RetryPolicy::new(3, Duration::from_millis(100), Duration::from_secs(5));
//!
//! let value = retry(&policy, |attempt| async move {
//!     if attempt < 2 {
//!         Err("agent not ready")
//!     } else {
//!         Ok(attempt)
//!     }
//! })
//! .await?;
//! assert_eq!(value, 2);
//! # Ok(())
//! # }
//! ```

pub mod idempotency;
pub mod retry;

pub use idempotency::{once, OnceError};
pub use retry::{retry, retry_with_hook, RetryPolicy};
