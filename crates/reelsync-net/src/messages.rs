//! Versioned message encoding.
//!
//! The transport does not know the game's message types. Any serde type is
//! encoded as `[version: u8] [postcard body]` so that a peer running a
//! different protocol revision fails loudly instead of misreading fields.

use serde::Serialize;
use serde::de::DeserializeOwned;

/// Current wire-protocol version. Prepended to every serialized message.
pub const PROTOCOL_VERSION: u8 = 1;

/// Errors that can occur during message deserialization.
#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    /// The payload was empty (no version byte).
    #[error("empty payload, no version byte")]
    EmptyPayload,

    /// The version byte does not match [`PROTOCOL_VERSION`].
    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u8),

    /// Postcard encoding or decoding failed.
    #[error("postcard error: {0}")]
    Postcard(#[from] postcard::Error),
}

/// Encode `msg` into a versioned binary payload.
pub fn serialize_message<T: Serialize>(msg: &T) -> Result<Vec<u8>, MessageError> {
    let body = postcard::to_allocvec(msg)?;
    let mut out = Vec::with_capacity(1 + body.len());
    out.push(PROTOCOL_VERSION);
    out.extend_from_slice(&body);
    Ok(out)
}

/// Decode a versioned binary payload.
pub fn deserialize_message<T: DeserializeOwned>(data: &[u8]) -> Result<T, MessageError> {
    let (&version, body) = data.split_first().ok_or(MessageError::EmptyPayload)?;
    if version != PROTOCOL_VERSION {
        return Err(MessageError::UnsupportedVersion(version));
    }
    Ok(postcard::from_bytes(body)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    enum Probe {
        Cast { player: u64 },
        Taps(u32),
        Prompt(String),
    }

    #[test]
    fn test_version_byte_is_first_byte() {
        let bytes = serialize_message(&Probe::Taps(12)).unwrap();
        assert_eq!(bytes[0], PROTOCOL_VERSION);
        let decoded: Probe = deserialize_message(&bytes).unwrap();
        assert_eq!(decoded, Probe::Taps(12));
    }

    #[test]
    fn test_string_payload_survives() {
        let msg = Probe::Prompt("Press R to Reel In!".to_string());
        let bytes = serialize_message(&msg).unwrap();
        assert_eq!(deserialize_message::<Probe>(&bytes).unwrap(), msg);
    }

    #[test]
    fn test_encoding_is_compact() {
        let bytes = serialize_message(&Probe::Cast { player: 1 }).unwrap();
        assert!(bytes.len() <= 4, "got {} bytes", bytes.len());
    }

    #[test]
    fn test_unsupported_version_rejected() {
        let mut bytes = serialize_message(&Probe::Taps(1)).unwrap();
        bytes[0] = 255;
        let result = deserialize_message::<Probe>(&bytes);
        assert!(matches!(result, Err(MessageError::UnsupportedVersion(255))));
    }

    #[test]
    fn test_empty_payload_rejected() {
        let result = deserialize_message::<Probe>(&[]);
        assert!(matches!(result, Err(MessageError::EmptyPayload)));
    }

    #[test]
    fn test_corrupted_payload_rejected() {
        let result = deserialize_message::<Probe>(&[PROTOCOL_VERSION, 0xFF, 0xFF, 0xFF]);
        assert!(matches!(result, Err(MessageError::Postcard(_))));
    }
}
