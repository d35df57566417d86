//! Session transport boundary, room creation and teardown

pub mod recovery;
pub mod relay;
pub mod service;
pub mod transport;

#[cfg(test)]
pub mod local;

pub use recovery::{ResetReason, ShutdownCoordinator};
pub use relay::{ConnectionGuard, WsRelay};
pub use service::SessionService;
pub use transport::SessionTransport;

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Characters used in join codes. No 0/O or 1/I.
const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
pub const CODE_LENGTH: usize = 6;

/// Short code players type to reach a room
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JoinCode(String);

impl JoinCode {
    /// Normalize user input; codes are case-insensitive
    pub fn new(raw: &str) -> Self {
        Self(raw.trim().to_ascii_uppercase())
    }

    pub fn generate<R: Rng>(rng: &mut R) -> Self {
        let code = (0..CODE_LENGTH)
            .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
            .collect();
        Self(code)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JoinCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn test_generated_codes_use_alphabet() {
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let code = JoinCode::generate(&mut rng);
        assert_eq!(code.as_str().len(), CODE_LENGTH);
        assert!(code.as_str().bytes().all(|b| CODE_ALPHABET.contains(&b)));
    }

    #[test]
    fn test_codes_are_case_insensitive() {
        assert_eq!(JoinCode::new(" ab3kq9 "), JoinCode::new("AB3KQ9"));
    }
}
