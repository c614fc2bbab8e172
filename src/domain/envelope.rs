//! The wire unit exchanged by every session.
//!
//! An [`Envelope`] is a JSON object `{"type": <string>, "payload": <any>}`.
//! The payload is kept as raw JSON text and is only interpreted by the
//! handler registered for the envelope's type tag.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

use crate::error::RelayError;

/// Typed tag plus opaque payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// Type tag selecting the handler. Never empty once decoded.
    #[serde(rename = "type")]
    event_type: String,
    /// Raw payload JSON, untouched by the session and router.
    #[serde(default)]
    payload: Option<Box<RawValue>>,
}

impl Envelope {
    /// Builds an envelope by serializing `payload`.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::InvalidEnvelope`] if `event_type` is empty and
    /// [`RelayError::Decode`] if the payload cannot be serialized.
    pub fn new<T: Serialize>(
        event_type: impl Into<String>,
        payload: &T,
    ) -> Result<Self, RelayError> {
        let event_type = event_type.into();
        if event_type.is_empty() {
            return Err(RelayError::InvalidEnvelope("empty type tag".to_string()));
        }
        let payload = serde_json::value::to_raw_value(payload)?;
        Ok(Self {
            event_type,
            payload: Some(payload),
        })
    }

    /// Decodes an envelope from one data frame.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Decode`] for malformed JSON and
    /// [`RelayError::InvalidEnvelope`] when the type tag is empty.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, RelayError> {
        let envelope: Self = serde_json::from_slice(bytes)?;
        if envelope.event_type.is_empty() {
            return Err(RelayError::InvalidEnvelope("empty type tag".to_string()));
        }
        Ok(envelope)
    }

    /// Encodes the envelope as the text of one data frame.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Decode`] if serialization fails.
    pub fn encode(&self) -> Result<String, RelayError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Returns the type tag.
    #[must_use]
    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    /// Returns the raw payload text (`null` when absent).
    #[must_use]
    pub fn raw_payload(&self) -> &str {
        self.payload.as_deref().map_or("null", RawValue::get)
    }

    /// Deserializes the payload into a handler-specific type.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Decode`] if the payload does not match `T`.
    pub fn decode_payload<T: DeserializeOwned>(&self) -> Result<T, RelayError> {
        Ok(serde_json::from_str(self.raw_payload())?)
    }
}
