//! Codec error type shared by the packet and data group parsers

use thiserror::Error;

/// Structural errors raised while parsing packet mode transport.
///
/// Each variant carries a stable numeric code so log lines stay grep-able
/// across releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("buffer too short for the declared structure")]
    Truncated,

    #[error("length field disagrees with the buffer size")]
    LengthMismatch,

    #[error("checksum mismatch")]
    BadChecksum,

    #[error("continuity index out of sequence")]
    ContinuityBroken,

    #[error("continuation received without a first fragment")]
    OrphanContinuation,

    #[error("segment number out of sequence")]
    SegmentMismatch,

    #[error("unsupported data group type")]
    UnsupportedGroupType,
}

impl CodecError {
    /// Stable numeric code for diagnostics.
    pub fn code(&self) -> u32 {
        match self {
            CodecError::Truncated => 1,
            CodecError::LengthMismatch => 2,
            CodecError::BadChecksum => 3,
            CodecError::ContinuityBroken => 4,
            CodecError::OrphanContinuation => 5,
            CodecError::SegmentMismatch => 6,
            CodecError::UnsupportedGroupType => 7,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_distinct() {
        let all = [
            CodecError::Truncated,
            CodecError::LengthMismatch,
            CodecError::BadChecksum,
            CodecError::ContinuityBroken,
            CodecError::OrphanContinuation,
            CodecError::SegmentMismatch,
            CodecError::UnsupportedGroupType,
        ];
        for (i, a) in all.iter().enumerate() {
            for b in &all[i + 1..] {
                assert_ne!(a.code(), b.code());
            }
        }
    }
}
