//! MDM enrollment session.

use rsa::RsaPrivateKey;
use rsa::pkcs8::DecodePrivateKey as _;

use mdmsim_core::{Error, KeychainItem, MdmPayload, Profile, Result};
use mdmsim_storage::AllStorage;

use crate::checkin::{Authenticate, CheckOut, CheckinClient, DeviceIdentity, TokenUpdate};
use crate::device::Device;

/// Enrollment lifecycle of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnrollmentState {
    Unenrolled,
    Enrolled,
}

/// One MDM enrollment: the payload describing the server and the
/// keychain identity authenticating to it. Constructed explicitly from
/// an installed payload or rebuilt from persisted device state; never
/// cached.
pub struct MdmClient {
    profile_id: String,
    payload: MdmPayload,
    identity: DeviceIdentity,
}

impl MdmClient {
    pub fn new(profile_id: impl Into<String>, payload: MdmPayload, identity: DeviceIdentity) -> Self {
        Self {
            profile_id: profile_id.into(),
            payload,
            identity,
        }
    }

    /// Rebuild the enrollment session from a device's persisted state:
    /// its enrollment profile and keychain identity cross-references.
    pub fn from_device<S: AllStorage>(device: &Device<S>) -> Result<Self> {
        let record = device.record();
        let profile_id = record
            .mdm_profile_identifier
            .clone()
            .ok_or_else(|| Error::not_found("device has no enrollment profile"))?;

        let raw = device.store().load_profile(&record.udid, &profile_id)?;
        let profile = Profile::parse(&raw)?;
        let payload = profile
            .mdm_payloads()
            .into_iter()
            .next()
            .cloned()
            .ok_or_else(|| {
                Error::validation(format!("profile {profile_id} has no MDM payload"))
            })?;

        let identity_uuid = record.mdm_identity_keychain_uuid.as_deref().ok_or_else(|| {
            Error::broken_reference("enrolled device has no keychain identity reference")
        })?;
        let identity = load_identity(device.store(), &record.udid, identity_uuid)?;

        Ok(Self::new(profile_id, payload, identity))
    }

    pub fn payload(&self) -> &MdmPayload {
        &self.payload
    }

    /// Run the enrollment check-in sequence (Authenticate, then
    /// TokenUpdate) and mark the device enrolled.
    ///
    /// Only SignMessage (mTLS) enrollments are supported; anything else
    /// fails before the first message is sent.
    pub fn enroll<S: AllStorage>(
        &self,
        device: &mut Device<S>,
        checkin: &dyn CheckinClient,
    ) -> Result<()> {
        if !self.payload.sign_message {
            return Err(Error::unsupported(
                "MDM payload without SignMessage (mTLS) authentication",
            ));
        }

        let authenticate = Authenticate::new(&self.payload, device.record());
        checkin.authenticate(&self.payload, &self.identity, &authenticate)?;

        let token_update = TokenUpdate::new(&self.payload, device.record());
        checkin.token_update(&self.payload, &self.identity, &token_update)?;

        tracing::info!(
            udid = %device.udid(),
            server_url = %self.payload.server_url,
            "enrolled"
        );

        device.record_mut().mdm_profile_identifier = Some(self.profile_id.clone());
        device.save()
    }

    /// Check out of the enrollment and mark the device unenrolled.
    pub fn unenroll<S: AllStorage>(
        &self,
        device: &mut Device<S>,
        checkin: &dyn CheckinClient,
    ) -> Result<()> {
        let check_out = CheckOut::new(&self.payload, device.record());
        checkin.check_out(&self.payload, &self.identity, &check_out)?;

        tracing::info!(udid = %device.udid(), "checked out of enrollment");

        device.record_mut().mdm_profile_identifier = None;
        device.save()
    }
}

/// Resolve a keychain Identity into usable key material.
pub(crate) fn load_identity<S: AllStorage>(
    store: &S,
    udid: &str,
    uuid: &str,
) -> Result<DeviceIdentity> {
    let KeychainItem::Identity {
        key_uuid,
        certificate_uuid,
        ..
    } = store.load_item(udid, uuid)?
    else {
        return Err(Error::broken_reference(format!(
            "keychain item {uuid} is not an identity"
        )));
    };

    let private_key = match store.load_item(udid, &key_uuid)? {
        KeychainItem::Key { key_der, .. } => {
            RsaPrivateKey::from_pkcs8_der(&key_der).map_err(Error::crypto)?
        }
        other => {
            return Err(Error::broken_reference(format!(
                "identity {uuid} key half is a {}",
                other.class()
            )));
        }
    };

    let certificate_der = match store.load_item(udid, &certificate_uuid)? {
        KeychainItem::Certificate { cert_der, .. } => cert_der,
        other => {
            return Err(Error::broken_reference(format!(
                "identity {uuid} certificate half is a {}",
                other.class()
            )));
        }
    };

    Ok(DeviceIdentity {
        keychain_uuid: uuid.to_string(),
        private_key,
        certificate_der,
    })
}
