//! Device-Side Enrollment Engine
//!
//! A simulated device installs and removes configuration profiles,
//! issues SCEP identities into its keychain, and drives the MDM
//! check-in protocol against injected remote services.

mod checkin;
mod device;
mod installer;
mod mdmclient;

pub use checkin::*;
pub use device::Device;
pub use installer::{REF_KEY_KEYCHAIN_IDENTITY, RemoteServices};
pub use mdmclient::{EnrollmentState, MdmClient};
