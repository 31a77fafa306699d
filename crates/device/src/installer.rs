//! Profile payload installation engine.
//!
//! Installing a profile classifies its payloads, orders them so that
//! identity-producing payloads run before identity-consuming ones,
//! then installs each in turn. Removal walks the same ordering in
//! reverse and is best-effort per payload.

use rsa::pkcs8::EncodePrivateKey as _;

use mdmsim_core::{
    Error, KeychainItem, MdmPayload, NewKeychainItem, Payload, Profile, Result, ScepPayload,
};
use mdmsim_crypto::{build_csr, generate_key};
use mdmsim_scep::{EnrollmentClient, PkiMessageCodec, TransportFactory};
use mdmsim_storage::{AllStorage, PayloadRef};

use crate::checkin::CheckinClient;
use crate::device::Device;
use crate::mdmclient::{MdmClient, load_identity};

/// Ref key under which a SCEP payload records the keychain identity it
/// produced.
pub const REF_KEY_KEYCHAIN_IDENTITY: &str = "keychain_identity";

const REQUIRES_NETWORK: u8 = 1 << 0;
const REQUIRES_IDENTITIES: u8 = 1 << 1;

/// External collaborators of an install or removal run.
pub struct RemoteServices<'a> {
    pub scep: &'a dyn TransportFactory,
    pub scep_codec: &'a dyn PkiMessageCodec,
    pub checkin: &'a dyn CheckinClient,
}

struct ClassifiedPayload<'p> {
    payload: &'p Payload,
    flags: u8,
    /// Keychain identity UUID produced by installing this payload.
    installed_identity: Option<String>,
}

fn classify(payload: &Payload) -> u8 {
    match payload {
        Payload::Scep(_) => REQUIRES_NETWORK,
        Payload::Mdm(_) => REQUIRES_NETWORK | REQUIRES_IDENTITIES,
        Payload::Unrecognized(_) => 0,
    }
}

/// Order payloads for processing. The sort is stable, so payloads with
/// equal requirements keep their document order. Ascending puts
/// identity producers before consumers (install); descending reverses
/// that (removal).
fn classify_and_sort(profile: &Profile, ascending: bool) -> Vec<ClassifiedPayload<'_>> {
    let mut ordered: Vec<ClassifiedPayload<'_>> = profile
        .payload_content
        .iter()
        .map(|payload| ClassifiedPayload {
            payload,
            flags: classify(payload),
            installed_identity: None,
        })
        .collect();

    if ascending {
        ordered.sort_by_key(|p| p.flags);
    } else {
        ordered.sort_by_key(|p| std::cmp::Reverse(p.flags));
    }
    ordered
}

impl<S: AllStorage> Device<S> {
    /// Install a profile from raw plist bytes.
    pub fn install_profile(&mut self, raw: &[u8], services: &RemoteServices<'_>) -> Result<()> {
        self.install_profile_inner(raw, services, false)
    }

    /// Install a profile delivered by the currently enrolled MDM
    /// server. Permits re-enrollment against the same ServerURL.
    pub fn install_profile_from_mdm(
        &mut self,
        raw: &[u8],
        services: &RemoteServices<'_>,
    ) -> Result<()> {
        self.install_profile_inner(raw, services, true)
    }

    fn install_profile_inner(
        &mut self,
        raw: &[u8],
        services: &RemoteServices<'_>,
        from_mdm: bool,
    ) -> Result<()> {
        if raw.is_empty() {
            return Err(Error::validation("no profile data to install"));
        }

        let profile = Profile::parse(raw)?;
        self.validate_profile_install(&profile, from_mdm)?;

        // reinstalling the same identifier replaces: remove the old
        // copy's payloads first
        match self.store().load_profile(self.udid(), &profile.payload_identifier) {
            Ok(_) => {
                tracing::info!(
                    profile_id = %profile.payload_identifier,
                    "profile already installed, removing before reinstall"
                );
                // removal is best-effort here too: the new install
                // overwrites whatever the old copy left behind
                if let Err(error) = self.remove_profile(&profile.payload_identifier, services) {
                    tracing::warn!(
                        profile_id = %profile.payload_identifier,
                        %error,
                        "failed to remove previous profile copy, continuing"
                    );
                }
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }

        let mut ordered = classify_and_sort(&profile, true);
        for index in 0..ordered.len() {
            let payload = ordered[index].payload;
            match payload {
                Payload::Scep(scep) => {
                    let identity_uuid = self.install_scep_payload(&profile, scep, services)?;
                    ordered[index].installed_identity = Some(identity_uuid);
                }
                Payload::Mdm(mdm) => {
                    let identity_uuid = ordered
                        .iter()
                        .find(|p| p.payload.common().payload_uuid == mdm.identity_certificate_uuid)
                        .and_then(|p| p.installed_identity.clone())
                        .ok_or_else(|| {
                            Error::broken_reference(format!(
                                "IdentityCertificateUUID {} does not name an installed identity payload",
                                mdm.identity_certificate_uuid
                            ))
                        })?;
                    self.install_mdm_payload(&profile, mdm, &identity_uuid, services)?;
                }
                Payload::Unrecognized(common) => {
                    tracing::info!(
                        payload_type = %common.payload_type,
                        payload_id = %common.payload_identifier,
                        "skipping unrecognized payload"
                    );
                }
            }
        }

        self.store().save_profile(
            self.udid(),
            &profile.payload_identifier,
            &profile.payload_uuid,
            raw,
        )
    }

    fn validate_profile_install(&self, profile: &Profile, from_mdm: bool) -> Result<()> {
        let mdm_payloads = profile.mdm_payloads();
        if mdm_payloads.len() > 1 {
            return Err(Error::validation(
                "profile contains more than one MDM payload",
            ));
        }

        let Some(new_mdm) = mdm_payloads.first() else {
            return Ok(());
        };
        let Some(current_profile_id) = self.record().mdm_profile_identifier.as_deref() else {
            return Ok(());
        };

        if !from_mdm {
            return Err(Error::validation(format!(
                "already enrolled via profile {current_profile_id}"
            )));
        }

        // an MDM server may replace its own enrollment, not hand the
        // device to a different server
        let raw = self.store().load_profile(self.udid(), current_profile_id)?;
        let current = Profile::parse(&raw)?;
        let current_mdm = current.mdm_payloads().into_iter().next().ok_or_else(|| {
            Error::broken_reference(format!(
                "enrollment profile {current_profile_id} has no MDM payload"
            ))
        })?;
        if current_mdm.server_url != new_mdm.server_url {
            return Err(Error::validation(format!(
                "ServerURL mismatch: enrolled with {}, profile names {}",
                current_mdm.server_url, new_mdm.server_url
            )));
        }

        Ok(())
    }

    /// Issue (or reuse) the keychain identity a SCEP payload describes,
    /// returning its keychain UUID.
    fn install_scep_payload(
        &self,
        profile: &Profile,
        payload: &ScepPayload,
        services: &RemoteServices<'_>,
    ) -> Result<String> {
        let payload_ref = PayloadRef {
            profile_id: &profile.payload_identifier,
            payload_identifier: &payload.common.payload_identifier,
            payload_uuid: &payload.common.payload_uuid,
            key: REF_KEY_KEYCHAIN_IDENTITY,
        };

        // idempotency: a previous install of this exact payload left
        // its identity behind
        if let Some(existing) = self.store().load_payload_ref(self.udid(), payload_ref)? {
            tracing::info!(
                payload_id = %payload.common.payload_identifier,
                identity = %existing,
                "reusing previously issued keychain identity"
            );
            return Ok(existing);
        }

        let key = generate_key(payload)?;
        let csr = build_csr(payload, self.record(), &key)?;

        let client = EnrollmentClient {
            transports: services.scep,
            codec: services.scep_codec,
        };
        let cert_der = client.issue_certificate(
            &payload.payload_content.url,
            &payload.payload_content.name,
            payload.payload_content.ca_fingerprint_bytes(),
            &csr,
        )?;

        let key_der = key.to_pkcs8_der().map_err(Error::crypto)?;
        let key_uuid = self.store().create_item(
            self.udid(),
            &NewKeychainItem::Key {
                key_der: key_der.as_bytes().to_vec(),
            },
        )?;
        let certificate_uuid = self
            .store()
            .create_item(self.udid(), &NewKeychainItem::Certificate { cert_der })?;
        let identity_uuid = self.store().create_item(
            self.udid(),
            &NewKeychainItem::Identity {
                key_uuid,
                certificate_uuid,
            },
        )?;

        self.store()
            .save_payload_ref(self.udid(), payload_ref, &identity_uuid)?;

        tracing::info!(
            payload_id = %payload.common.payload_identifier,
            identity = %identity_uuid,
            "issued keychain identity"
        );
        Ok(identity_uuid)
    }

    fn install_mdm_payload(
        &mut self,
        profile: &Profile,
        payload: &MdmPayload,
        identity_uuid: &str,
        services: &RemoteServices<'_>,
    ) -> Result<()> {
        self.record_mut().mdm_identity_keychain_uuid = Some(identity_uuid.to_string());
        self.save()?;

        let identity = load_identity(self.store(), self.udid(), identity_uuid)?;
        let client = MdmClient::new(
            profile.payload_identifier.clone(),
            payload.clone(),
            identity,
        );
        client.enroll(self, services.checkin)
    }

    /// Remove an installed profile and everything its payloads put on
    /// the device. Payload removal failures are logged and skipped so
    /// one broken payload cannot pin the whole profile.
    pub fn remove_profile(&mut self, profile_id: &str, services: &RemoteServices<'_>) -> Result<()> {
        let raw = self.store().load_profile(self.udid(), profile_id)?;
        let profile = Profile::parse(&raw)?;

        let ordered = classify_and_sort(&profile, false);
        for entry in &ordered {
            let outcome = match entry.payload {
                Payload::Scep(scep) => self.remove_scep_payload(&profile, scep),
                Payload::Mdm(mdm) => self.remove_mdm_payload(mdm, services),
                Payload::Unrecognized(_) => Ok(()),
            };
            if let Err(error) = outcome {
                tracing::warn!(
                    payload_id = %entry.payload.common().payload_identifier,
                    %error,
                    "failed to remove payload, continuing"
                );
            }
        }

        self.store().remove_profile(self.udid(), profile_id)
    }

    fn remove_scep_payload(&self, profile: &Profile, payload: &ScepPayload) -> Result<()> {
        let payload_ref = PayloadRef {
            profile_id: &profile.payload_identifier,
            payload_identifier: &payload.common.payload_identifier,
            payload_uuid: &payload.common.payload_uuid,
            key: REF_KEY_KEYCHAIN_IDENTITY,
        };

        let identity_uuid = self
            .store()
            .load_payload_ref(self.udid(), payload_ref)?
            .ok_or_else(|| {
                Error::not_found(format!(
                    "no keychain identity recorded for payload {}",
                    payload.common.payload_identifier
                ))
            })?;

        let KeychainItem::Identity {
            key_uuid,
            certificate_uuid,
            ..
        } = self.store().load_item(self.udid(), &identity_uuid)?
        else {
            return Err(Error::broken_reference(format!(
                "keychain item {identity_uuid} is not an identity"
            )));
        };

        // pairing first, then the halves it points at
        self.store().delete_item(self.udid(), &identity_uuid)?;
        self.store().delete_item(self.udid(), &key_uuid)?;
        self.store().delete_item(self.udid(), &certificate_uuid)?;

        self.store().remove_payload_ref(self.udid(), payload_ref)
    }

    fn remove_mdm_payload(&mut self, _payload: &MdmPayload, services: &RemoteServices<'_>) -> Result<()> {
        let client = MdmClient::from_device(self)?;
        client.unenroll(self, services.checkin)?;

        self.record_mut().mdm_identity_keychain_uuid = None;
        self.save()
    }
}
