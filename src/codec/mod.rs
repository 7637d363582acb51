//! The `codec` module turns publish payloads into bytes and deliveries back
//! into values.
//!
//! `Messenger` serializes every payload before it is queued, so a payload that
//! cannot be encoded is rejected by `publish` itself and never reaches the
//! broker.

mod json;
mod xml;
mod yaml;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

pub use json::JsonCodec;
pub use xml::XmlCodec;
pub use yaml::YamlCodec;

use crate::utils::error::CodecError;

pub trait Codec: Send + Sync + 'static {
    /// Short name used in error messages and logs.
    fn name(&self) -> &'static str;

    fn marshal<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>, CodecError>;

    fn unmarshal<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, CodecError>;
}

/// Codec picked at runtime, e.g. from configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodecKind {
    #[default]
    Json,
    Yaml,
    Xml,
}

impl Codec for CodecKind {
    fn name(&self) -> &'static str {
        match self {
            CodecKind::Json => JsonCodec.name(),
            CodecKind::Yaml => YamlCodec.name(),
            CodecKind::Xml => XmlCodec.name(),
        }
    }

    fn marshal<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        match self {
            CodecKind::Json => JsonCodec.marshal(value),
            CodecKind::Yaml => YamlCodec.marshal(value),
            CodecKind::Xml => XmlCodec.marshal(value),
        }
    }

    fn unmarshal<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, CodecError> {
        match self {
            CodecKind::Json => JsonCodec.unmarshal(data),
            CodecKind::Yaml => YamlCodec.unmarshal(data),
            CodecKind::Xml => XmlCodec.unmarshal(data),
        }
    }
}

#[cfg(test)]
mod tests;
