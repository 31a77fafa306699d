//! A simulated device bound to its storage.

use mdmsim_core::{DeviceRecord, Result};
use mdmsim_storage::AllStorage;

use crate::mdmclient::EnrollmentState;

/// One simulated device and the store holding its state.
pub struct Device<S> {
    store: S,
    record: DeviceRecord,
}

impl<S: AllStorage> Device<S> {
    /// Create and persist a fresh, unenrolled device.
    pub fn create(
        store: S,
        udid: impl Into<String>,
        serial: impl Into<String>,
        computer_name: impl Into<String>,
    ) -> Result<Self> {
        let record = DeviceRecord::new(udid, serial, computer_name);
        store.save_device(&record)?;
        Ok(Self { store, record })
    }

    /// Load an existing device by UDID.
    pub fn load(store: S, udid: &str) -> Result<Self> {
        let record = store.load_device(udid)?;
        Ok(Self { store, record })
    }

    pub fn udid(&self) -> &str {
        &self.record.udid
    }

    pub fn record(&self) -> &DeviceRecord {
        &self.record
    }

    pub(crate) fn record_mut(&mut self) -> &mut DeviceRecord {
        &mut self.record
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Whether an MDM enrollment is currently active.
    pub fn enrollment_state(&self) -> EnrollmentState {
        if self.record.mdm_profile_identifier.is_some() {
            EnrollmentState::Enrolled
        } else {
            EnrollmentState::Unenrolled
        }
    }

    /// Persist the current record.
    pub fn save(&self) -> Result<()> {
        self.store.save_device(&self.record)
    }
}
