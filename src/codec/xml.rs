use serde::Serialize;
use serde::de::DeserializeOwned;

use super::Codec;
use crate::utils::error::CodecError;

/// Root element wrapping every encoded payload.
const XML_ROOT: &str = "message";

#[derive(Debug, Clone, Copy, Default)]
pub struct XmlCodec;

impl Codec for XmlCodec {
    fn name(&self) -> &'static str {
        "xml"
    }

    fn marshal<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        quick_xml::se::to_string_with_root(XML_ROOT, value)
            .map(String::into_bytes)
            .map_err(|e| CodecError::Serialize {
                codec: self.name(),
                reason: e.to_string(),
            })
    }

    fn unmarshal<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, CodecError> {
        let text = std::str::from_utf8(data).map_err(|e| CodecError::Deserialize {
            codec: self.name(),
            reason: e.to_string(),
        })?;
        quick_xml::de::from_str(text).map_err(|e| CodecError::Deserialize {
            codec: self.name(),
            reason: e.to_string(),
        })
    }
}
