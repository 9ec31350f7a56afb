//! Typed saga authoring on top of a [`Codec`].
//!
//! [`TypedSaga`] encodes step inputs and decodes step results so a saga can
//! be written against domain types instead of raw bytes.
//!
//! ```rust,ignore
//! let script = TypedSaga::new(Arc::new(JsonCodec));
//! let saga = script.clone().call("double", &3u32, move |doubled: u32| {
//!     script.fan_out([("inc", doubled), ("inc", doubled)], move |incs: Vec<u32>| {
//!         script.finish(&incs)
//!     })
//! })?;
//! ```

use crate::batch::Batch;
use crate::codec::{Codec, sealed};
use crate::command::JobCommand;
use crate::error::SagaError;
use crate::saga::{self, SagaContinuation};
use anyhow::Result;
use bytes::Bytes;
use std::sync::Arc;

/// Builds saga continuations whose payloads go through a codec.
pub struct TypedSaga<C> {
    codec: Arc<C>,
}

impl<C> Clone for TypedSaga<C> {
    fn clone(&self) -> Self {
        Self {
            codec: Arc::clone(&self.codec),
        }
    }
}

impl<C: Codec> TypedSaga<C> {
    pub fn new(codec: Arc<C>) -> Self {
        Self { codec }
    }

    pub fn codec(&self) -> &Arc<C> {
        &self.codec
    }

    /// Suspend on `job_name` with an encoded `input`; `next` receives the
    /// decoded result.
    ///
    /// # Errors
    ///
    /// Returns [`SagaError::Codec`] if `input` cannot be encoded. A result
    /// that fails to decode fails the resumption, abandoning the saga.
    pub fn call<I, O, F>(&self, job_name: &str, input: &I, next: F) -> Result<SagaContinuation>
    where
        C: sealed::EncodeValue<I> + sealed::DecodeValue<O>,
        O: 'static,
        F: FnOnce(O) -> Result<SagaContinuation> + 'static,
    {
        let payload = self.codec.encode(input).map_err(SagaError::Codec)?;
        let codec = Arc::clone(&self.codec);
        Ok(saga::call(job_name, payload, move |result: Bytes| {
            next(codec.decode::<O>(result)?)
        }))
    }

    /// Suspend on a batch of jobs sharing one input and output type; `join`
    /// receives the decoded results in submission order.
    ///
    /// # Errors
    ///
    /// Returns [`SagaError::InvalidBatch`] for an empty `jobs`, or
    /// [`SagaError::Codec`] if an input cannot be encoded.
    pub fn fan_out<'a, I, O, J, F>(&self, jobs: J, join: F) -> Result<SagaContinuation>
    where
        C: sealed::EncodeValue<I> + sealed::DecodeValue<O>,
        J: IntoIterator<Item = (&'a str, I)>,
        O: 'static,
        F: FnOnce(Vec<O>) -> Result<SagaContinuation> + 'static,
    {
        let commands = jobs
            .into_iter()
            .map(|(job_name, input)| -> Result<JobCommand, SagaError> {
                let payload = self.codec.encode(&input).map_err(SagaError::Codec)?;
                Ok(JobCommand::new(job_name, payload))
            })
            .collect::<Result<Vec<_>, SagaError>>()?;
        let batch = Batch::build(commands)?;

        let codec = Arc::clone(&self.codec);
        Ok(saga::batch(batch, move |results: Vec<Bytes>| {
            let decoded = results
                .into_iter()
                .map(|result| codec.decode::<O>(result))
                .collect::<Result<Vec<O>>>()?;
            join(decoded)
        }))
    }

    /// Finish the saga with an encoded `output`.
    ///
    /// # Errors
    ///
    /// Returns [`SagaError::Codec`] if `output` cannot be encoded.
    pub fn finish<O>(&self, output: &O) -> Result<SagaContinuation>
    where
        C: sealed::EncodeValue<O>,
    {
        let result = self.codec.encode(output).map_err(SagaError::Codec)?;
        Ok(saga::done(result))
    }

    /// Decode a saga's final result.
    pub fn decode<O>(&self, result: Bytes) -> Result<O>
    where
        C: sealed::DecodeValue<O>,
    {
        self.codec.decode::<O>(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{Decoder, Encoder};

    struct DecimalCodec;

    impl Encoder for DecimalCodec {}
    impl Decoder for DecimalCodec {}

    impl sealed::EncodeValue<u32> for DecimalCodec {
        fn encode_value(&self, value: &u32) -> Result<Bytes> {
            Ok(Bytes::from(value.to_string()))
        }
    }

    impl sealed::DecodeValue<u32> for DecimalCodec {
        fn decode_value(&self, bytes: Bytes) -> Result<u32> {
            Ok(std::str::from_utf8(&bytes)?.parse()?)
        }
    }

    impl sealed::EncodeValue<Vec<u32>> for DecimalCodec {
        fn encode_value(&self, value: &Vec<u32>) -> Result<Bytes> {
            Ok(Bytes::from(serde_json::to_vec(value)?))
        }
    }

    #[test]
    fn test_call_encodes_and_decodes() {
        let script = TypedSaga::new(Arc::new(DecimalCodec));
        let inner = script.clone();
        let saga = script
            .call("double", &3u32, move |doubled: u32| inner.finish(&(doubled + 1)))
            .unwrap();

        let SagaContinuation::Call { command, next } = saga else {
            panic!("expected a single step");
        };
        assert_eq!(command.name(), "double");
        assert_eq!(command.payload(), "3");

        let finished = next(Bytes::from_static(b"6")).unwrap();
        assert!(matches!(finished, SagaContinuation::Done(ref v) if v == "7"));
    }

    #[test]
    fn test_undecodable_result_fails_resumption() {
        let script = TypedSaga::new(Arc::new(DecimalCodec));
        let inner = script.clone();
        let saga = script
            .call("double", &3u32, move |doubled: u32| inner.finish(&doubled))
            .unwrap();

        let SagaContinuation::Call { next, .. } = saga else {
            panic!("expected a single step");
        };
        assert!(next(Bytes::from_static(b"not a number")).is_err());
    }

    #[test]
    fn test_fan_out_decodes_in_order() {
        let script = TypedSaga::new(Arc::new(DecimalCodec));
        let inner = script.clone();
        let saga = script
            .fan_out([("inc", 6u32), ("dec", 6u32)], move |results: Vec<u32>| {
                inner.finish(&results)
            })
            .unwrap();

        let SagaContinuation::Batch { batch, join } = saga else {
            panic!("expected a batch step");
        };
        let names: Vec<&str> = batch.commands().iter().map(JobCommand::name).collect();
        assert_eq!(names, vec!["inc", "dec"]);

        let finished = join(vec![Bytes::from_static(b"7"), Bytes::from_static(b"5")]).unwrap();
        assert!(matches!(finished, SagaContinuation::Done(ref v) if v == "[7,5]"));
    }

    #[test]
    fn test_fan_out_rejects_empty() {
        let script = TypedSaga::new(Arc::new(DecimalCodec));
        let inner = script.clone();
        let result = script.fan_out(Vec::<(&str, u32)>::new(), move |results: Vec<u32>| {
            inner.finish(&results)
        });

        let error = result.unwrap_err();
        assert!(matches!(
            error.downcast_ref::<SagaError>(),
            Some(SagaError::InvalidBatch)
        ));
    }
}
