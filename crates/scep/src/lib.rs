//! SCEP enrollment client.
//!
//! Drives a GetCACert / PKCSReq exchange against a SCEP CA through
//! pluggable transport and PKCS#7 codec seams.

mod client;
mod traits;

pub use client::EnrollmentClient;
pub use traits::*;
