// Copyright (c) 2021 The tlaloc developers. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

use rand::Rng;
use std::fmt::Write;

/// Generate a broker-assigned client identifier.
///
/// 128 random bits rendered as a 36 character lowercase UUID, with the
/// version and variant bits of a random (v4) UUID set. Used when a client
/// connects with a zero-length client id and `clean_session` set.
#[must_use]
pub fn assigned_client_id() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill(&mut bytes[..]);
    bytes[6] = (bytes[6] & 0x0f) | 0x40;
    bytes[8] = (bytes[8] & 0x3f) | 0x80;

    let mut out = String::with_capacity(36);
    for (index, byte) in bytes.iter().enumerate() {
        if matches!(index, 4 | 6 | 8 | 10) {
            out.push('-');
        }
        let _ = write!(out, "{byte:02x}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assigned_client_id_format() {
        let id = assigned_client_id();
        assert_eq!(id.len(), 36);
        let dashes: Vec<usize> = id
            .char_indices()
            .filter_map(|(i, c)| (c == '-').then_some(i))
            .collect();
        assert_eq!(dashes, vec![8, 13, 18, 23]);
        assert_eq!(id.as_bytes()[14], b'4');
        assert_eq!(id, id.to_lowercase());
    }

    #[test]
    fn test_assigned_client_id_unique() {
        assert_ne!(assigned_client_id(), assigned_client_id());
    }
}
