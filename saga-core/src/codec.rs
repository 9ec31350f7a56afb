//! Typed views over job payloads and results.
//!
//! Job engines and the registry only ever see [`Bytes`]. A codec sits at the
//! two places where a typed value crosses into or out of that byte stream:
//! [`TypedSaga`](crate::typed::TypedSaga) encodes step inputs and decodes
//! the results a saga is resumed with, and engine adapters decode payloads
//! and encode results around typed job handlers.
//!
//! A codec type implements the empty [`Encoder`] and [`Decoder`] markers and
//! one `sealed::EncodeValue<T>` / `sealed::DecodeValue<T>` impl per value
//! type (usually a blanket impl bounded on its format's traits):
//!
//! ```rust
//! use anyhow::Result;
//! use bytes::Bytes;
//! use saga_core::codec::{Decoder, Encoder, sealed};
//!
//! struct Utf8Codec;
//!
//! impl Encoder for Utf8Codec {}
//! impl Decoder for Utf8Codec {}
//!
//! impl sealed::EncodeValue<String> for Utf8Codec {
//!     fn encode_value(&self, value: &String) -> Result<Bytes> {
//!         Ok(Bytes::from(value.clone()))
//!     }
//! }
//!
//! impl sealed::DecodeValue<String> for Utf8Codec {
//!     fn decode_value(&self, bytes: Bytes) -> Result<String> {
//!         Ok(String::from_utf8(bytes.to_vec())?)
//!     }
//! }
//!
//! let payload = Utf8Codec.encode(&"order-17".to_string())?;
//! assert_eq!(Utf8Codec.decode::<String>(payload)?, "order-17");
//! # Ok::<(), anyhow::Error>(())
//! ```
//!
//! Codecs are shared as `Arc<C>` between saga closures and worker threads,
//! hence the `Send + Sync + 'static` bounds.

use anyhow::Result;
use bytes::Bytes;

/// Per-type encode/decode hooks. Callers go through [`Encoder::encode`] and
/// [`Decoder::decode`] instead.
pub mod sealed {
    use super::*;

    pub trait EncodeValue<T>: Send + Sync + 'static {
        fn encode_value(&self, value: &T) -> Result<Bytes>;
    }

    pub trait DecodeValue<T>: Send + Sync + 'static {
        fn decode_value(&self, bytes: Bytes) -> Result<T>;
    }
}

/// Turns step inputs and job results into bytes.
pub trait Encoder: Send + Sync + 'static {
    fn encode<T>(&self, value: &T) -> Result<Bytes>
    where
        Self: sealed::EncodeValue<T>,
    {
        sealed::EncodeValue::encode_value(self, value)
    }
}

/// Turns job payloads and results back into values.
pub trait Decoder: Send + Sync + 'static {
    fn decode<T>(&self, bytes: Bytes) -> Result<T>
    where
        Self: sealed::DecodeValue<T>,
    {
        sealed::DecodeValue::decode_value(self, bytes)
    }
}

/// Both directions; what [`TypedSaga`](crate::typed::TypedSaga) requires.
pub trait Codec: Encoder + Decoder {}

impl<U> Codec for U where U: Encoder + Decoder {}
