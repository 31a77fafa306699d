//! CA certificate fingerprint matching.
//!
//! SCEP payloads carry only the raw digest bytes; the hash algorithm is
//! inferred from the digest length. An unknown length disables pinning
//! rather than failing enrollment.

use md5::Md5;
use sha1::Sha1;
use sha2::{Digest as _, Sha256};

/// Digest algorithm inferred from a fingerprint's byte length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FingerprintKind {
    Md5,
    Sha1,
    Sha256,
}

impl FingerprintKind {
    /// Map a digest length to its algorithm, when recognized.
    pub fn for_len(len: usize) -> Option<Self> {
        match len {
            16 => Some(FingerprintKind::Md5),
            20 => Some(FingerprintKind::Sha1),
            32 => Some(FingerprintKind::Sha256),
            _ => None,
        }
    }

    /// Digest `data` with this algorithm.
    pub fn digest(self, data: &[u8]) -> Vec<u8> {
        match self {
            FingerprintKind::Md5 => Md5::digest(data).to_vec(),
            FingerprintKind::Sha1 => Sha1::digest(data).to_vec(),
            FingerprintKind::Sha256 => Sha256::digest(data).to_vec(),
        }
    }
}

/// Whether `cert_der` hashes to `fingerprint` under the algorithm the
/// fingerprint's length selects.
pub fn fingerprint_matches(kind: FingerprintKind, fingerprint: &[u8], cert_der: &[u8]) -> bool {
    kind.digest(cert_der) == fingerprint
}
