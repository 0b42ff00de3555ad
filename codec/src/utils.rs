// Copyright (c) 2021 The tlaloc developers. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};

/// Maximum byte length of a length-prefixed string field.
pub const MAX_STRING_LEN: usize = u16::MAX as usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringError {
    /// More than 65535 bytes.
    TooManyData,

    /// Ill-formed UTF-8 sequence.
    InvalidUtf8,

    /// Contains the null character U+0000, which is forbidden
    /// in MQTT string fields [MQTT-1.5.3-2].
    NullCharacter,
}

/// Check that `s` may be carried in a length-prefixed string field.
///
/// # Errors
///
/// Returns error if `s` is too long or contains a null character.
pub fn validate_utf8_string(s: &str) -> Result<(), StringError> {
    if s.len() > MAX_STRING_LEN {
        return Err(StringError::TooManyData);
    }
    if s.contains('\u{0}') {
        return Err(StringError::NullCharacter);
    }
    Ok(())
}

/// Convert raw bytes into an owned UTF-8 string.
///
/// # Errors
///
/// Returns error if `bytes` is not well-formed UTF-8 or embeds a null
/// character.
pub fn to_utf8_string(bytes: &[u8]) -> Result<String, StringError> {
    let s = std::str::from_utf8(bytes).map_err(|_err| StringError::InvalidUtf8)?;
    validate_utf8_string(s)?;
    Ok(s.to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientIdError {
    /// No chars.
    IsEmpty,

    /// Contains chars outside of 0-9a-zA-Z, '-' and '_'.
    InvalidChars,
}

/// Check client id in client side before sending a CONNECT packet.
///
/// Note that the charset is a client-side convention; the broker accepts
/// any valid UTF-8 identifier.
///
/// # Errors
///
/// Returns error if `client_id` is empty or contains unexpected chars.
pub fn validate_client_id(client_id: &str) -> Result<(), ClientIdError> {
    if client_id.is_empty() {
        return Err(ClientIdError::IsEmpty);
    }
    for byte in client_id.bytes() {
        if !(byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_') {
            return Err(ClientIdError::InvalidChars);
        }
    }
    Ok(())
}

/// Generate random alphanumeric string.
#[must_use]
pub fn random_string(len: usize) -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_utf8_string() {
        assert_eq!(to_utf8_string(b"sport/tennis"), Ok("sport/tennis".to_string()));
        assert_eq!(to_utf8_string(b""), Ok(String::new()));
        assert_eq!(to_utf8_string(&[0xff, 0xfe]), Err(StringError::InvalidUtf8));
        assert_eq!(to_utf8_string(&[b'a', 0x00]), Err(StringError::NullCharacter));
    }

    #[test]
    fn test_validate_client_id() {
        assert!(validate_client_id("hutzli0815").is_ok());
        assert_eq!(validate_client_id(""), Err(ClientIdError::IsEmpty));
        assert_eq!(
            validate_client_id("sp ace"),
            Err(ClientIdError::InvalidChars)
        );
    }

    #[test]
    fn test_random_string() {
        let s = random_string(23);
        assert_eq!(s.len(), 23);
        assert!(validate_client_id(&s).is_ok());
    }
}
