use anyhow::{Context, Result};
use bytes::Bytes;
use rkyv::bytecheck::CheckBytes;
use rkyv::rancor::{Error, Strategy};
use rkyv::{Archive, Deserialize, Serialize, from_bytes, to_bytes};
use saga_core::codec::{Decoder, Encoder, sealed};

/// Codec carrying payloads and results as rkyv archives.
///
/// Archives are validated on decode, so a corrupt or foreign job result
/// fails the saga's resumption instead of being read unchecked. Job results
/// reach the driver in whatever buffer the engine filled, so decoding first
/// copies them into aligned storage.
#[derive(Debug, Clone, Copy, Default)]
pub struct RkyvCodec;

impl Encoder for RkyvCodec {}
impl Decoder for RkyvCodec {}

impl<T> sealed::EncodeValue<T> for RkyvCodec
where
    T: for<'a> Serialize<
            rkyv::api::high::HighSerializer<
                rkyv::util::AlignedVec,
                rkyv::ser::allocator::ArenaHandle<'a>,
                Error,
            >,
        >,
{
    fn encode_value(&self, value: &T) -> Result<Bytes> {
        let aligned_vec =
            to_bytes::<Error>(value).context("Failed to encode rkyv payload")?;
        let vec: Vec<u8> = aligned_vec.into();
        Ok(Bytes::from(vec))
    }
}

impl<T> sealed::DecodeValue<T> for RkyvCodec
where
    T: Archive,
    for<'a> T::Archived: CheckBytes<rkyv::api::high::HighValidator<'a, Error>>,
    T::Archived: Deserialize<T, Strategy<rkyv::de::Pool, Error>>,
{
    fn decode_value(&self, bytes: Bytes) -> Result<T> {
        from_bytes::<T, Error>(&aligned(&bytes)).context("Failed to decode rkyv job result")
    }
}

fn aligned(bytes: &[u8]) -> rkyv::util::AlignedVec<16> {
    let mut aligned = rkyv::util::AlignedVec::<16>::with_capacity(bytes.len());
    aligned.extend_from_slice(bytes);
    aligned
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode_u32() {
        let bytes = RkyvCodec.encode(&42u32).unwrap();
        assert_eq!(RkyvCodec.decode::<u32>(bytes).unwrap(), 42);
    }

    #[test]
    fn test_decode_from_unaligned_slice() {
        let encoded = RkyvCodec.encode(&7u64).unwrap();
        let mut shifted = vec![0u8];
        shifted.extend_from_slice(&encoded);
        let unaligned = Bytes::from(shifted).slice(1..);
        assert_eq!(RkyvCodec.decode::<u64>(unaligned).unwrap(), 7);
    }

    #[test]
    fn test_decode_truncated_buffer() {
        assert!(RkyvCodec.decode::<u64>(Bytes::from_static(b"\x01\x02")).is_err());
    }
}
