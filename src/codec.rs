//! Bridge to the general-purpose value serializer.
//!
//! The engine never inspects how an individual [`Value`] is encoded; it only
//! asks a [`ValueCodec`] for opaque bytes and hands them back on restore.

use thiserror::Error;

use crate::value::Value;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("cannot serialize value: {0}")]
    Encode(String),
    #[error("cannot deserialize value: {0}")]
    Decode(String),
}

pub trait ValueCodec: Send + Sync {
    fn encode(&self, value: &Value) -> Result<Vec<u8>, CodecError>;
    fn decode(&self, bytes: &[u8]) -> Result<Value, CodecError>;
}

/// Default codec backed by `bincode` (little-endian, fixed-width integers).
#[derive(Debug, Default, Clone, Copy)]
pub struct BincodeCodec;

impl ValueCodec for BincodeCodec {
    fn encode(&self, value: &Value) -> Result<Vec<u8>, CodecError> {
        bincode::serialize(value).map_err(|err| CodecError::Encode(err.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> Result<Value, CodecError> {
        bincode::deserialize(bytes).map_err(|err| CodecError::Decode(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{Finalizer, NativeHandle};
    use crate::vm::GeneratorId;

    #[test]
    fn bincode_preserves_structured_values() {
        let codec = BincodeCodec;
        let value = Value::List(vec![
            Value::Generator(GeneratorId(2)),
            Value::Finalizer(Finalizer::new("aclose", 9)),
            Value::Float(2.5),
        ]);
        let bytes = codec.encode(&value).expect("encode");
        assert_eq!(codec.decode(&bytes).expect("decode"), value);
    }

    #[test]
    fn native_values_surface_encode_errors() {
        let err = BincodeCodec
            .encode(&Value::List(vec![Value::Native(NativeHandle(1))]))
            .expect_err("native payload");
        assert!(matches!(err, CodecError::Encode(_)));
    }

    #[test]
    fn truncated_payload_is_a_decode_error() {
        let bytes = BincodeCodec.encode(&Value::String("hello".into())).expect("encode");
        let err = BincodeCodec.decode(&bytes[..3]).expect_err("truncated");
        assert!(matches!(err, CodecError::Decode(_)));
    }
}
