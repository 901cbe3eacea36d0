//! The prefetch-and-dispatch engine.
//!
//! Pulls batches of pending items from a remote queue, forwards each
//! item to the worker pool, and keeps the amount of in-flight work
//! under the pool's configured budget. A single tokio task owns all
//! engine state; fetch replies and worker signals are serialized onto
//! it through channels, so no locks are involved.

pub mod engine;
pub mod status;
pub mod token;
pub mod unit;

pub use engine::Dispatcher;
pub use status::DispatcherStatus;
