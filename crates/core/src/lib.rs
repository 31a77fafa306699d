//! Core Types for the MDM Device Simulator
//!
//! Configuration-profile document model, keychain item records, the
//! device record, and the domain error type shared by every crate.

mod device;
mod error;
mod keychain;
mod profile;

pub use device::*;
pub use error::*;
pub use keychain::*;
pub use profile::*;
