use anyhow::{Context, Result};
use bytes::Bytes;
use saga_core::codec::{Decoder, Encoder, sealed};
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Codec encoding values as JSON documents.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Encoder for JsonCodec {}
impl Decoder for JsonCodec {}

impl<T> sealed::EncodeValue<T> for JsonCodec
where
    T: Serialize,
{
    fn encode_value(&self, value: &T) -> Result<Bytes> {
        let json = serde_json::to_vec(value).context("Failed to serialize value as JSON")?;
        Ok(Bytes::from(json))
    }
}

impl<T> sealed::DecodeValue<T> for JsonCodec
where
    T: DeserializeOwned,
{
    fn decode_value(&self, bytes: Bytes) -> Result<T> {
        serde_json::from_slice(&bytes).context("Failed to deserialize JSON value")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Transfer {
        account: String,
        cents: i64,
    }

    #[test]
    fn test_struct_payload() {
        let transfer = Transfer {
            account: "acc-1".to_string(),
            cents: -250,
        };
        let bytes = JsonCodec.encode(&transfer).unwrap();
        assert_eq!(bytes, Bytes::from_static(br#"{"account":"acc-1","cents":-250}"#));
        assert_eq!(JsonCodec.decode::<Transfer>(bytes).unwrap(), transfer);
    }

    #[test]
    fn test_decode_error_has_context() {
        let error = JsonCodec
            .decode::<Transfer>(Bytes::from_static(b"insufficient funds"))
            .unwrap_err();
        assert!(error.to_string().contains("JSON"));
    }
}
