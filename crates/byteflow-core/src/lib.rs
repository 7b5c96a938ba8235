//! ByteFlow Core — transport-agnostic domain logic for the report pipeline.
//!
//! This crate contains the workflow engine, role registry, provider adapters,
//! search augmenters, and the in-memory task registry. It has **no HTTP
//! framework dependency** by default, making it suitable for use in:
//!
//! - HTTP servers (via `byteflow-server`)
//! - CLI tools (via `byteflow-cli`)
//!
//! # Feature Flags
//!
//! - `axum` — Enables `IntoResponse` impl on `WorkflowError` for use in axum handlers.

pub mod error;
pub mod events;
pub mod providers;
pub mod roles;
pub mod search;
pub mod state;
pub mod task;
pub mod text;
pub mod workflow;

// Convenience re-exports
pub use error::WorkflowError;
pub use state::{AppState, AppStateInner};
pub use workflow::WorkflowEngine;
