//! Certificate Identity Primitives
//!
//! CSR construction for SCEP payloads, the hand-rolled key-usage
//! extension, ephemeral self-signed signer identities, and CA
//! fingerprint matching.

mod csr;
mod fingerprint;
mod keyusage;
mod selfsign;

pub use csr::*;
pub use fingerprint::*;
pub use keyusage::*;
pub use selfsign::*;

pub(crate) fn crypto_err(err: impl std::fmt::Display) -> mdmsim_core::Error {
    mdmsim_core::Error::Crypto(err.to_string())
}
