//! Codecs for typed saga payloads and job results.
//!
//! - [`JsonCodec`] (feature `json`, default): `serde_json`
//! - [`RkyvCodec`] (feature `rkyv`): zero-copy validated archives

#[cfg(feature = "json")]
mod json;
#[cfg(feature = "rkyv")]
mod rkyv;

#[cfg(feature = "json")]
pub use self::json::JsonCodec;

#[cfg(feature = "rkyv")]
pub use self::rkyv::RkyvCodec;

/// Re-export the codec traits from `saga-core`.
pub use saga_core::codec::{Codec, Decoder, Encoder};
