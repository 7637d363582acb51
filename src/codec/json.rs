use serde::Serialize;
use serde::de::DeserializeOwned;

use super::Codec;
use crate::utils::error::CodecError;

/// Default codec: `serde_json`, compact encoding.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn name(&self) -> &'static str {
        "json"
    }

    fn marshal<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(value).map_err(|e| CodecError::Serialize {
            codec: self.name(),
            reason: e.to_string(),
        })
    }

    fn unmarshal<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, CodecError> {
        serde_json::from_slice(data).map_err(|e| CodecError::Deserialize {
            codec: self.name(),
            reason: e.to_string(),
        })
    }
}
