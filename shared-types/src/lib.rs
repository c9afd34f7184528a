//! Shared types between the bus and the UI layer
//!
//! These types are used by both:
//! - the agentbus actors (native Rust)
//! - transport and frontend code consuming envelopes
//!
//! Serializable with serde for JSON over WebSocket/HTTP

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

// ============================================================================
// Constants
// ============================================================================

/// The only accepted `specversion` value.
pub const SPEC_VERSION: &str = "1.0";

/// Extension key carrying the request/response correlation identifier.
pub const CORRELATION_ID_EXTENSION: &str = "correlationid";

/// Suffix appended to an event type when building a reply.
pub const REPLY_TYPE_SUFFIX: &str = ".reply";

// ============================================================================
// Identity
// ============================================================================

/// Unique identity of one running agent instance.
///
/// A restarted agent gets a fresh identity; names are the stable handle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord, TS)]
#[ts(export, export_to = "agentbus.ts")]
pub struct AgentId(pub String);

impl AgentId {
    pub fn new() -> Self {
        Self(ulid::Ulid::new().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for AgentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Envelope
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EnvelopeError {
    #[error("envelope id must not be empty")]
    EmptyId,
    #[error("envelope source must not be empty")]
    EmptySource,
    #[error("envelope type must not be empty")]
    EmptyType,
    #[error("unsupported specversion: {0}")]
    UnsupportedSpecVersion(String),
}

/// Scalar value allowed in the extensions map.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[serde(untagged)]
#[ts(export, export_to = "agentbus.ts")]
pub enum ExtensionValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
}

impl ExtensionValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ExtensionValue::String(s) => Some(s),
            _ => None,
        }
    }
}

impl From<&str> for ExtensionValue {
    fn from(value: &str) -> Self {
        ExtensionValue::String(value.to_string())
    }
}

impl From<String> for ExtensionValue {
    fn from(value: String) -> Self {
        ExtensionValue::String(value)
    }
}

impl From<bool> for ExtensionValue {
    fn from(value: bool) -> Self {
        ExtensionValue::Bool(value)
    }
}

impl From<i64> for ExtensionValue {
    fn from(value: i64) -> Self {
        ExtensionValue::Integer(value)
    }
}

impl From<f64> for ExtensionValue {
    fn from(value: f64) -> Self {
        ExtensionValue::Float(value)
    }
}

impl fmt::Display for ExtensionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExtensionValue::Bool(v) => write!(f, "{v}"),
            ExtensionValue::Integer(v) => write!(f, "{v}"),
            ExtensionValue::Float(v) => write!(f, "{v}"),
            ExtensionValue::String(v) => f.write_str(v),
        }
    }
}

/// Immutable event envelope routed through the bus.
///
/// Construction goes through [`Envelope::new`]; every `with_*` method
/// consumes the envelope and returns a new one, so a value handed to the bus
/// is never changed afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[ts(export, export_to = "agentbus.ts")]
pub struct Envelope {
    specversion: String,
    id: String,
    source: String,
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(type = "unknown")]
    data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    subject: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    datacontenttype: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    extensions: BTreeMap<String, ExtensionValue>,
}

impl Envelope {
    /// Create an envelope with a generated ULID id and the current time.
    pub fn new(
        source: impl Into<String>,
        event_type: impl Into<String>,
        data: Option<serde_json::Value>,
    ) -> Result<Self, EnvelopeError> {
        let envelope = Self {
            specversion: SPEC_VERSION.to_string(),
            id: ulid::Ulid::new().to_string(),
            source: source.into(),
            event_type: event_type.into(),
            data,
            time: Some(Utc::now()),
            subject: None,
            datacontenttype: None,
            extensions: BTreeMap::new(),
        };
        envelope.validate()?;
        Ok(envelope)
    }

    /// Check the required fields, e.g. after decoding from the wire.
    pub fn validate(&self) -> Result<(), EnvelopeError> {
        if self.specversion != SPEC_VERSION {
            return Err(EnvelopeError::UnsupportedSpecVersion(
                self.specversion.clone(),
            ));
        }
        if self.id.is_empty() {
            return Err(EnvelopeError::EmptyId);
        }
        if self.source.is_empty() {
            return Err(EnvelopeError::EmptySource);
        }
        if self.event_type.is_empty() {
            return Err(EnvelopeError::EmptyType);
        }
        Ok(())
    }

    pub fn specversion(&self) -> &str {
        &self.specversion
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn data(&self) -> Option<&serde_json::Value> {
        self.data.as_ref()
    }

    pub fn time(&self) -> Option<DateTime<Utc>> {
        self.time
    }

    pub fn subject(&self) -> Option<&str> {
        self.subject.as_deref()
    }

    pub fn datacontenttype(&self) -> Option<&str> {
        self.datacontenttype.as_deref()
    }

    pub fn extensions(&self) -> &BTreeMap<String, ExtensionValue> {
        &self.extensions
    }

    pub fn extension(&self, key: &str) -> Option<&ExtensionValue> {
        self.extensions.get(key)
    }

    /// Correlation identifier carried in the extensions, if any.
    pub fn correlation_id(&self) -> Option<&ExtensionValue> {
        self.extensions.get(CORRELATION_ID_EXTENSION)
    }

    /// Same envelope under a new id.
    pub fn with_id(self, id: impl Into<String>) -> Result<Self, EnvelopeError> {
        let id = id.into();
        if id.is_empty() {
            return Err(EnvelopeError::EmptyId);
        }
        Ok(Self { id, ..self })
    }

    pub fn with_subject(self, subject: impl Into<String>) -> Self {
        Self {
            subject: Some(subject.into()),
            ..self
        }
    }

    pub fn with_time(self, time: DateTime<Utc>) -> Self {
        Self {
            time: Some(time),
            ..self
        }
    }

    pub fn with_data_content_type(self, content_type: impl Into<String>) -> Self {
        Self {
            datacontenttype: Some(content_type.into()),
            ..self
        }
    }

    pub fn with_extension(self, key: impl Into<String>, value: impl Into<ExtensionValue>) -> Self {
        let mut extensions = self.extensions;
        extensions.insert(key.into(), value.into());
        Self { extensions, ..self }
    }

    pub fn with_correlation_id(self, correlation_id: impl Into<ExtensionValue>) -> Self {
        self.with_extension(CORRELATION_ID_EXTENSION, correlation_id)
    }
}

// ============================================================================
// Delivery
// ============================================================================

/// Per-target result of a synchronous dispatch.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "agentbus.ts")]
pub enum DeliveryOutcome {
    /// The target confirmed it accepted the envelope.
    Delivered,
    /// No confirmation before the dispatch deadline.
    Timeout,
    /// Submission failed, e.g. the target was already gone.
    Error,
}

impl fmt::Display for DeliveryOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryOutcome::Delivered => write!(f, "delivered"),
            DeliveryOutcome::Timeout => write!(f, "timeout"),
            DeliveryOutcome::Error => write!(f, "error"),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
