//! Base64 conventions used on the wire and on disk.
//!
//! Signatures and public keys travel as standard base64 without padding;
//! JSON envelope fields use padded standard base64.

use base64::Engine as _;
use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};

/// Encode wire material (signatures, public keys).
pub fn b64_wire(bytes: &[u8]) -> String {
    STANDARD_NO_PAD.encode(bytes)
}

/// Decode wire material. Accepts both padded and unpadded input so captured
/// headers survive re-encoding by intermediaries.
pub fn b64_wire_decode(s: &str) -> Result<Vec<u8>, base64::DecodeError> {
    let trimmed = s.trim_end_matches('=');
    STANDARD_NO_PAD.decode(trimmed)
}

/// Encode a JSON envelope field.
pub fn b64_envelope(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Decode a JSON envelope field.
pub fn b64_envelope_decode(s: &str) -> Result<Vec<u8>, base64::DecodeError> {
    STANDARD.decode(s)
}

/// Serde adapter for binary fields stored as padded standard base64 strings.
pub mod base64_bytes {
    use base64::Engine as _;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize as _, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(de)?;
        STANDARD.decode(s.as_bytes()).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_decode_accepts_padded_input() {
        let enc = b64_wire(b"quantum");
        assert!(!enc.ends_with('='));
        assert_eq!(b64_wire_decode(&enc).unwrap(), b"quantum");
        assert_eq!(b64_wire_decode("cXVhbnR1bQ==").unwrap(), b"quantum");
    }

    #[test]
    fn envelope_round_trips() {
        let enc = b64_envelope(&[0, 1, 2, 255]);
        assert_eq!(b64_envelope_decode(&enc).unwrap(), vec![0, 1, 2, 255]);
    }
}
