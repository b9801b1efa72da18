//! Core domain models and business logic for tail-based sampling.
//!
//! Contains the span/tag data model shared by the agent and collector
//! roles, configuration, error types, and retry/backoff utilities used by
//! the peer fan-out.

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod retry;
pub mod types;

// Re-export commonly used types
pub use config::Config;
pub use error::{Result, TailSampleError};
pub use types::{
    ServiceName, Span, SpanBuilder, SpanId, Tag, TagSet, TagValue, TraceId, ERROR_TAG_KEY,
    PROPAGATED_ERROR_VALUE, SELF_ERROR_VALUE, SERVICES_IPS_TAG_KEY,
};
