//! Domain types for the tail-based sampling core.
//!
//! These are the fields the core actually reads from a span: a trace
//! identifier, a set of tags, and the originating service name. Everything
//! else about a span (timing, operation name, full process descriptor) is
//! the concern of upstream sanitization and is out of scope here.

use crate::core::error::{Result, TailSampleError};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::fmt;
use std::sync::Arc;

/// Tag key carrying the self/propagated error marker.
///
/// `0` means this service produced the error; `1` means an upstream
/// service already reported it and this span is just propagating that
/// fact. Wire-stable: renaming requires a coordinated upgrade.
pub const ERROR_TAG_KEY: &str = "tag.tail_based_sampling.error";

/// Tag key carrying the comma-separated peer-endpoint chain.
///
/// Encoding: `up1,up2,...,upN,self,down1`. Wire-stable: renaming requires
/// a coordinated upgrade.
pub const SERVICES_IPS_TAG_KEY: &str = "tag.services.ips";

/// Value of [`ERROR_TAG_KEY`] meaning "this service produced the error".
pub const SELF_ERROR_VALUE: i64 = 0;

/// Value of [`ERROR_TAG_KEY`] meaning "an upstream error is being propagated".
pub const PROPAGATED_ERROR_VALUE: i64 = 1;

/// Unique identifier for a trace. Opaque except for its canonical string
/// form, used only for equality and map keying.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TraceId(Arc<str>);

impl TraceId {
    /// Creates a new `TraceId` after validation.
    pub fn new<S: Into<String>>(id: S) -> Result<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(TailSampleError::InvalidSpan("TraceId cannot be empty".to_string()));
        }
        Ok(TraceId(Arc::from(id.as_str())))
    }

    /// Returns the string representation of the trace ID.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for TraceId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Unique identifier for a span within a trace. Not read by any core
/// algorithm; carried through purely for logging and wire round-tripping.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SpanId(Arc<str>);

impl SpanId {
    /// Creates a new `SpanId` after validation.
    pub fn new<S: Into<String>>(id: S) -> Result<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(TailSampleError::InvalidSpan("SpanId cannot be empty".to_string()));
        }
        Ok(SpanId(Arc::from(id.as_str())))
    }

    /// Returns the string representation of the span ID.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Service name identifier, reduced from the original model's full
/// `Process` descriptor to the one field the core uses: logging context.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceName(Arc<str>);

impl ServiceName {
    /// Creates a new `ServiceName`.
    pub fn new<S: Into<String>>(name: S) -> Self {
        ServiceName(Arc::from(name.into().as_str()))
    }

    /// Returns the string representation of the service name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ServiceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Typed tag value: OTEL-style tags carry either an integer or a string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TagValue {
    /// Integer value, e.g. the error marker.
    Int64(i64),
    /// String value, e.g. the services-IPs chain.
    Str(Arc<str>),
}

impl TagValue {
    /// Returns the inner integer if this is an `Int64`.
    pub fn as_int64(&self) -> Option<i64> {
        match self {
            TagValue::Int64(v) => Some(*v),
            TagValue::Str(_) => None,
        }
    }

    /// Returns the inner string if this is a `Str`.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            TagValue::Str(v) => Some(v),
            TagValue::Int64(_) => None,
        }
    }
}

impl From<i64> for TagValue {
    fn from(v: i64) -> Self {
        TagValue::Int64(v)
    }
}

impl From<&str> for TagValue {
    fn from(v: &str) -> Self {
        TagValue::Str(Arc::from(v))
    }
}

impl From<String> for TagValue {
    fn from(v: String) -> Self {
        TagValue::Str(Arc::from(v.as_str()))
    }
}

/// A single key/value tag. Most spans carry a handful of tags, so the
/// containing set is stack-allocated for the common case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tag {
    /// Tag key.
    pub key: Arc<str>,
    /// Tag value.
    pub value: TagValue,
}

/// Ordered bag of tags attached to a span.
///
/// Backed by a `SmallVec` rather than a map: tag order is preserved (some
/// instrumentation emits the same key twice, and the detector only acts on
/// the first match), and four inline slots avoid heap allocation for the
/// common case.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TagSet(pub SmallVec<[Tag; 4]>);

impl TagSet {
    /// Creates an empty tag set.
    pub fn new() -> Self {
        TagSet(SmallVec::new())
    }

    /// Appends a tag.
    pub fn push<K: Into<Arc<str>>, V: Into<TagValue>>(&mut self, key: K, value: V) {
        self.0.push(Tag {
            key: key.into(),
            value: value.into(),
        });
    }

    /// Returns the first tag matching `key`, if any.
    pub fn get(&self, key: &str) -> Option<&TagValue> {
        self.0.iter().find(|t| t.key.as_ref() == key).map(|t| &t.value)
    }

    /// Returns the integer value of the first tag matching `key`.
    pub fn get_int64(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(TagValue::as_int64)
    }

    /// Returns the string value of the first tag matching `key`.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(TagValue::as_str)
    }

    /// Iterates over all tags.
    pub fn iter(&self) -> impl Iterator<Item = &Tag> {
        self.0.iter()
    }

    /// Returns true if this span's error tag marks a self-produced error.
    pub fn is_self_error(&self) -> bool {
        self.get_int64(ERROR_TAG_KEY) == Some(SELF_ERROR_VALUE)
    }
}

/// A single span in a distributed trace, reduced to the fields the
/// tail-based sampling core reads: `trace_id`, `tags`, and `service_name`
/// (the one useful field of the original `Process` descriptor).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Span {
    /// Identifier of the trace this span belongs to.
    pub trace_id: TraceId,
    /// Identifier of this span.
    pub span_id: SpanId,
    /// Name of the service that produced this span.
    pub service_name: ServiceName,
    /// Tags attached to this span.
    pub tags: TagSet,
}

impl Span {
    /// Creates a span builder.
    pub fn builder() -> SpanBuilder {
        SpanBuilder::default()
    }

    /// Returns the value of the services-IPs tag, if present.
    pub fn services_ips(&self) -> Option<&str> {
        self.tags.get_str(SERVICES_IPS_TAG_KEY)
    }

    /// Returns true if this span's error tag marks a self-produced error.
    pub fn is_self_error(&self) -> bool {
        self.tags.is_self_error()
    }
}

/// Builder for [`Span`].
#[derive(Default)]
pub struct SpanBuilder {
    trace_id: Option<TraceId>,
    span_id: Option<SpanId>,
    service_name: Option<ServiceName>,
    tags: TagSet,
}

impl SpanBuilder {
    /// Sets the trace ID.
    pub fn trace_id(mut self, trace_id: TraceId) -> Self {
        self.trace_id = Some(trace_id);
        self
    }

    /// Sets the span ID.
    pub fn span_id(mut self, span_id: SpanId) -> Self {
        self.span_id = Some(span_id);
        self
    }

    /// Sets the service name.
    pub fn service_name(mut self, service_name: ServiceName) -> Self {
        self.service_name = Some(service_name);
        self
    }

    /// Appends a tag.
    pub fn tag<K: Into<Arc<str>>, V: Into<TagValue>>(mut self, key: K, value: V) -> Self {
        self.tags.push(key, value);
        self
    }

    /// Builds the span, filling in defaults for missing identifiers.
    pub fn build(self) -> Result<Span> {
        Ok(Span {
            trace_id: self
                .trace_id
                .ok_or_else(|| TailSampleError::InvalidSpan("trace_id is required".to_string()))?,
            span_id: self
                .span_id
                .ok_or_else(|| TailSampleError::InvalidSpan("span_id is required".to_string()))?,
            service_name: self.service_name.unwrap_or_else(|| ServiceName::new("unknown")),
            tags: self.tags,
        })
    }
}
