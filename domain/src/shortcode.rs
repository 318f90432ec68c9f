//! Short code generation strategies.

use rand::rngs::OsRng;
use rand::RngCore;

use crate::{ShortCode, ShortCodeGenerator};

/// Number of random bytes behind a generated code.
pub const CODE_BYTES: usize = 4;

/// Generates lowercase hex codes from OS-provided random bytes, two
/// characters per byte (8 characters by default).
#[derive(Clone, Copy, Debug)]
pub struct RandomHexGenerator {
    bytes: usize,
}

impl RandomHexGenerator {
    pub fn new() -> Self {
        Self { bytes: CODE_BYTES }
    }

    /// Use `bytes` random bytes per code; clamped to what fits in a code.
    pub fn with_bytes(bytes: usize) -> Self {
        Self {
            bytes: bytes.clamp(1, ShortCode::MAX_LEN / 2),
        }
    }
}

impl Default for RandomHexGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl ShortCodeGenerator for RandomHexGenerator {
    fn generate(&self) -> ShortCode {
        let mut buf = vec![0u8; self.bytes];
        OsRng.fill_bytes(&mut buf);
        // Valid by construction: hex digits only, at most MAX_LEN long
        ShortCode(hex::encode(&buf))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_codes_are_eight_hex_chars() {
        let g = RandomHexGenerator::new();
        for _ in 0..50 {
            let code = g.generate();
            assert_eq!(code.as_str().len(), 8);
            assert!(code
                .as_str()
                .chars()
                .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
            assert!(ShortCode::new(code.as_str()).is_ok());
        }
    }

    #[test]
    fn byte_count_is_clamped() {
        assert_eq!(RandomHexGenerator::with_bytes(0).generate().as_str().len(), 2);
        assert_eq!(RandomHexGenerator::with_bytes(99).generate().as_str().len(), 32);
    }
}
