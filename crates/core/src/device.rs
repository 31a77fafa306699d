//! Device record.

/// Persisted identity and enrollment cross-references of one simulated
/// device.
///
/// UDID, serial, and computer name are fixed for the simulated session.
/// The two `mdm_*` cross-references are `None` while unenrolled.
#[derive(Debug, Clone)]
pub struct DeviceRecord {
    pub udid: String,
    pub serial: String,
    pub computer_name: String,

    /// Identifier of the installed enrollment profile.
    pub mdm_profile_identifier: Option<String>,

    /// Keychain UUID of the Identity backing the active MDM session.
    pub mdm_identity_keychain_uuid: Option<String>,
}

impl DeviceRecord {
    /// A fresh, unenrolled device.
    pub fn new(
        udid: impl Into<String>,
        serial: impl Into<String>,
        computer_name: impl Into<String>,
    ) -> Self {
        Self {
            udid: udid.into(),
            serial: serial.into(),
            computer_name: computer_name.into(),
            mdm_profile_identifier: None,
            mdm_identity_keychain_uuid: None,
        }
    }
}
