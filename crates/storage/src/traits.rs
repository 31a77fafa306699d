//! Storage traits.

use mdmsim_core::{DeviceRecord, KeychainItem, NewKeychainItem, Result};

/// Coordinates of a payload bookkeeping ref within an installed profile.
#[derive(Debug, Clone, Copy)]
pub struct PayloadRef<'a> {
    pub profile_id: &'a str,
    pub payload_identifier: &'a str,
    pub payload_uuid: &'a str,
    pub key: &'a str,
}

/// Device record storage.
pub trait DeviceStore: Send + Sync {
    /// Insert or update a device record.
    fn save_device(&self, device: &DeviceRecord) -> Result<()>;

    /// Load a device record; `NotFound` when the device does not exist.
    fn load_device(&self, udid: &str) -> Result<DeviceRecord>;

    /// UDIDs of every stored device.
    fn list_device_udids(&self) -> Result<Vec<String>>;
}

/// Per-device keychain storage.
pub trait KeychainStore: Send + Sync {
    /// Persist a new item, returning its generated UUID.
    fn create_item(&self, udid: &str, item: &NewKeychainItem) -> Result<String>;

    /// Load an item by UUID. Loading an Identity validates that its Key
    /// and Certificate still exist; a dangling pairing is
    /// `BrokenReference`.
    fn load_item(&self, udid: &str, uuid: &str) -> Result<KeychainItem>;

    /// Delete an item by UUID; `NotFound` when nothing was deleted.
    fn delete_item(&self, udid: &str, uuid: &str) -> Result<()>;

    /// Every item in a device's keychain.
    fn list_items(&self, udid: &str) -> Result<Vec<KeychainItem>>;
}

/// Installed-profile and payload-ref storage.
pub trait ProfileStore: Send + Sync {
    /// Record a profile as installed, replacing any previous copy.
    /// An empty document is `Validation`.
    fn save_profile(&self, udid: &str, profile_id: &str, profile_uuid: &str, raw: &[u8])
    -> Result<()>;

    /// Raw bytes of an installed profile; `NotFound` when absent.
    fn load_profile(&self, udid: &str, profile_id: &str) -> Result<Vec<u8>>;

    /// Forget an installed profile.
    fn remove_profile(&self, udid: &str, profile_id: &str) -> Result<()>;

    /// Identifiers of every installed profile on a device.
    fn list_profile_ids(&self, udid: &str) -> Result<Vec<String>>;

    /// Save a payload bookkeeping ref. An empty value is `Validation`.
    fn save_payload_ref(&self, udid: &str, payload_ref: PayloadRef<'_>, value: &str) -> Result<()>;

    /// Load a payload ref; `Ok(None)` when it was never saved.
    fn load_payload_ref(&self, udid: &str, payload_ref: PayloadRef<'_>) -> Result<Option<String>>;

    /// Delete a payload ref.
    fn remove_payload_ref(&self, udid: &str, payload_ref: PayloadRef<'_>) -> Result<()>;
}

/// Combined storage trait.
pub trait AllStorage: DeviceStore + KeychainStore + ProfileStore {}

impl<T> AllStorage for T where T: DeviceStore + KeychainStore + ProfileStore {}
