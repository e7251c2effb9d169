//! Result payload codec
//!
//! Results cross the protocol as opaque bytes: serialized by their producer,
//! base64-encoded into the text payload of an envelope, and decoded back to
//! bytes by the consumer. This layer never interprets the bytes.
//!
//! The typed helpers (`encode_value`/`decode_value`) add a MessagePack
//! serialization step for producers that hold a structured value rather than
//! pre-serialized bytes.
//!
//! Decode failures are reported to the caller and are never fatal: the owning
//! state machine logs them and resets (see the coordinator's retrieval loop).

use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

/// Codec failure
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("failed to serialize value: {0}")]
    Serialize(#[from] rmp_serde::encode::Error),

    #[error("failed to deserialize value: {0}")]
    Deserialize(#[from] rmp_serde::decode::Error),

    #[error("payload is not valid base64: {0}")]
    Transport(#[from] base64::DecodeError),
}

/// Encode raw result bytes into a transport-safe text payload
pub fn encode_result(bytes: &[u8]) -> String {
    B64.encode(bytes)
}

/// Decode a transport payload back into raw result bytes
pub fn decode_result(payload: &str) -> Result<Vec<u8>, CodecError> {
    Ok(B64.decode(payload)?)
}

/// Serialize a value with MessagePack and encode it for transport
pub fn encode_value<T: Serialize>(value: &T) -> Result<String, CodecError> {
    let bytes = rmp_serde::to_vec(value)?;
    Ok(encode_result(&bytes))
}

/// Decode a transport payload and deserialize the MessagePack bytes
pub fn decode_value<T: DeserializeOwned>(payload: &str) -> Result<T, CodecError> {
    let bytes = decode_result(payload)?;
    Ok(rmp_serde::from_slice(&bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Candidate {
        objective: f64,
        tour: Vec<u32>,
    }

    #[test]
    fn test_bytes_round_trip() {
        let bytes = vec![0u8, 1, 2, 250, 255];
        let payload = encode_result(&bytes);
        assert_eq!(decode_result(&payload).unwrap(), bytes);
    }

    #[test]
    fn test_value_round_trip() {
        let candidate = Candidate {
            objective: 42.5,
            tour: vec![3, 1, 4, 1, 5],
        };
        let payload = encode_value(&candidate).unwrap();
        let back: Candidate = decode_value(&payload).unwrap();
        assert_eq!(back, candidate);
    }

    #[test]
    fn test_payload_is_transport_safe_text() {
        let payload = encode_result(&[0u8, 255, 128]);
        assert!(payload.is_ascii());
        assert!(!payload.contains('\0'));
    }

    #[test]
    fn test_invalid_base64_is_transport_error() {
        let err = decode_result("not base64!!").unwrap_err();
        assert!(matches!(err, CodecError::Transport(_)));
    }

    #[test]
    fn test_truncated_bytes_fail_to_deserialize() {
        let payload = encode_value(&Candidate {
            objective: 1.0,
            tour: vec![1, 2],
        })
        .unwrap();
        let bytes = decode_result(&payload).unwrap();
        let truncated = encode_result(&bytes[..bytes.len() - 1]);

        let err = decode_value::<Candidate>(&truncated).unwrap_err();
        assert!(matches!(err, CodecError::Deserialize(_)));
    }
}
