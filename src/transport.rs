//! Reversible transport encoding of queue message bodies
//!
//! The router encodes every chat line before it is sent to the outgoing
//! queue and decodes every incoming message body before it is written to
//! chat. The transform is injected as a `BodyCodec` trait object.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Deserialize;

use crate::error::CodecError;

/// Reversible body transform
pub trait BodyCodec: Send + Sync {
    /// Encode a chat line into a queue message body
    fn encode(&self, line: &str) -> String;

    /// Decode a queue message body into a chat line
    fn decode(&self, body: &str) -> Result<String, CodecError>;
}

/// Bodies are carried unchanged
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainText;

impl BodyCodec for PlainText {
    fn encode(&self, line: &str) -> String {
        line.to_string()
    }

    fn decode(&self, body: &str) -> Result<String, CodecError> {
        Ok(body.to_string())
    }
}

/// Bodies are standard base64 of the UTF-8 line
#[derive(Debug, Clone, Copy, Default)]
pub struct Base64Text;

impl BodyCodec for Base64Text {
    fn encode(&self, line: &str) -> String {
        STANDARD.encode(line.as_bytes())
    }

    fn decode(&self, body: &str) -> Result<String, CodecError> {
        let bytes = STANDARD.decode(body.trim())?;
        Ok(String::from_utf8(bytes)?)
    }
}

/// Transport encoding selected in the configuration file
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BodyEncoding {
    #[default]
    Plain,
    Base64,
}

impl BodyEncoding {
    /// Build the codec for this encoding
    pub fn codec(self) -> Arc<dyn BodyCodec> {
        match self {
            BodyEncoding::Plain => Arc::new(PlainText),
            BodyEncoding::Base64 => Arc::new(Base64Text),
        }
    }
}
