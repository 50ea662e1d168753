//! Fixed-stride encoding of a bundle's member ids.
//!
//! A bundle record is the concatenation of each member's canonical text
//! encoding, in upload order. No separators or length prefix: the record
//! length alone tells how many ids it holds.

use super::ids::{ENCODED_LEN, FileId};
use thiserror::Error;

/// Bytes per encoded id.
pub const STRIDE: usize = ENCODED_LEN;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("a bundle must contain at least one file id")]
    EmptyInput,
    #[error("encoded bundle of {len} bytes is shorter than one id ({STRIDE} bytes)")]
    Truncated { len: usize },
    #[error("encoded bundle of {len} bytes is not a multiple of {STRIDE}")]
    Misaligned { len: usize },
    #[error("id at position {index} is malformed")]
    MalformedId { index: usize },
}

pub fn encode(ids: &[FileId]) -> Result<Vec<u8>, CodecError> {
    if ids.is_empty() {
        return Err(CodecError::EmptyInput);
    }

    let mut out = vec![0u8; ids.len() * STRIDE];
    for (id, slot) in ids.iter().zip(out.chunks_exact_mut(STRIDE)) {
        id.encode_into(slot);
    }
    Ok(out)
}

pub fn decode(input: &[u8]) -> Result<Vec<FileId>, CodecError> {
    let len = input.len();
    if len < STRIDE {
        return Err(CodecError::Truncated { len });
    }
    if len % STRIDE != 0 {
        return Err(CodecError::Misaligned { len });
    }

    input
        .chunks_exact(STRIDE)
        .enumerate()
        .map(|(index, chunk)| {
            FileId::parse_bytes(chunk).map_err(|_| CodecError::MalformedId { index })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_in_order() {
        for count in [1, 2, 5, 17] {
            let ids: Vec<FileId> = (0..count).map(|_| FileId::new()).collect();
            let encoded = encode(&ids).unwrap();
            assert_eq!(encoded.len(), count * STRIDE);
            assert_eq!(decode(&encoded).unwrap(), ids);
        }
    }

    #[test]
    fn preserves_caller_order_not_sort_order() {
        let a = FileId::new();
        let b = FileId::new();
        let c = FileId::new();
        let ids = vec![c, a, b];
        assert_eq!(decode(&encode(&ids).unwrap()).unwrap(), ids);
    }

    #[test]
    fn encode_rejects_empty() {
        assert_eq!(encode(&[]), Err(CodecError::EmptyInput));
    }

    #[test]
    fn decode_rejects_short_input() {
        assert_eq!(decode(b""), Err(CodecError::Truncated { len: 0 }));
        assert_eq!(
            decode(&[b'0'; STRIDE - 1]),
            Err(CodecError::Truncated { len: STRIDE - 1 })
        );
    }

    #[test]
    fn decode_rejects_misaligned_input() {
        let mut encoded = encode(&[FileId::new(), FileId::new()]).unwrap();
        encoded.push(b'0');
        assert_eq!(
            decode(&encoded),
            Err(CodecError::Misaligned { len: 2 * STRIDE + 1 })
        );
    }

    #[test]
    fn decode_reports_malformed_position() {
        let mut encoded = encode(&[FileId::new(), FileId::new(), FileId::new()]).unwrap();
        encoded[STRIDE + 3] = b'z';
        assert_eq!(decode(&encoded), Err(CodecError::MalformedId { index: 1 }));
    }
}
