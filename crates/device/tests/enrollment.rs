//! End-to-end install / enroll / remove flows against mock remote
//! services and a real SQLite store.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use der::Decode as _;
use x509_cert::request::CertReq;

use mdmsim_core::{DeviceRecord, Error, ItemClass, KeychainItem, NewKeychainItem};
use mdmsim_device::{
    Authenticate, CheckOut, CheckinClient, Device, DeviceIdentity, EnrollmentState, RemoteServices,
    TokenUpdate,
};
use mdmsim_scep::{
    CaCertResponse, PkcsRequest, PkiMessageCodec, PkiResponse, PkiStatus, ScepTransport,
    TransportFactory,
};
use mdmsim_storage::{DeviceStore, KeychainStore, PayloadRef, ProfileStore, SqliteStorage};

const UDID: &str = "475F0A29-6FCE-419E-A30F-9FF616FD2B87";
const SCEP_UUID: &str = "11111111-1111-1111-1111-111111111111";

fn open_store() -> (tempfile::TempDir, SqliteStorage) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("test.db");
    let store = SqliteStorage::new(path.to_str().unwrap()).unwrap();
    store.run_migrations().unwrap();
    (dir, store)
}

fn scep_payload_xml() -> String {
    format!(
        r#"        <dict>
            <key>PayloadType</key><string>com.apple.security.scep</string>
            <key>PayloadIdentifier</key><string>com.example.scep</string>
            <key>PayloadUUID</key><string>{SCEP_UUID}</string>
            <key>PayloadVersion</key><integer>1</integer>
            <key>PayloadContent</key>
            <dict>
                <key>URL</key><string>https://scep.example.com/scep</string>
                <key>Challenge</key><string>sekret</string>
                <key>Keysize</key><integer>512</integer>
            </dict>
        </dict>"#
    )
}

fn mdm_payload_xml(server_url: &str, sign_message: bool, identity_uuid: &str) -> String {
    let sign = if sign_message { "<true/>" } else { "<false/>" };
    format!(
        r#"        <dict>
            <key>PayloadType</key><string>com.apple.mdm</string>
            <key>PayloadIdentifier</key><string>com.example.mdm</string>
            <key>PayloadUUID</key><string>33333333-3333-3333-3333-333333333333</string>
            <key>PayloadVersion</key><integer>1</integer>
            <key>ServerURL</key><string>{server_url}</string>
            <key>CheckInURL</key><string>{server_url}/checkin</string>
            <key>Topic</key><string>com.apple.mgmt.example</string>
            <key>IdentityCertificateUUID</key><string>{identity_uuid}</string>
            <key>SignMessage</key>{sign}
        </dict>"#
    )
}

fn profile_xml(identifier: &str, payloads: &[String]) -> Vec<u8> {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0">
<dict>
    <key>PayloadContent</key>
    <array>
{}
    </array>
    <key>PayloadIdentifier</key><string>{identifier}</string>
    <key>PayloadType</key><string>Configuration</string>
    <key>PayloadUUID</key><string>00000000-0000-0000-0000-000000000000</string>
    <key>PayloadVersion</key><integer>1</integer>
</dict>
</plist>"#,
        payloads.join("\n")
    )
    .into_bytes()
}

/// MDM payload listed before the SCEP payload it depends on; ordering
/// must still install SCEP first.
fn enrollment_profile(server_url: &str, sign_message: bool) -> Vec<u8> {
    profile_xml(
        "com.example.enrollment",
        &[
            mdm_payload_xml(server_url, sign_message, SCEP_UUID),
            scep_payload_xml(),
        ],
    )
}

#[derive(Default)]
struct MockScep {
    pki_operations: Cell<usize>,
    ca_cert_requests: Cell<usize>,
}

impl TransportFactory for MockScep {
    fn transport_for(&self, _url: &str) -> mdmsim_core::Result<Box<dyn ScepTransport + '_>> {
        Ok(Box::new(MockTransport { scep: self }))
    }
}

struct MockTransport<'a> {
    scep: &'a MockScep,
}

impl ScepTransport for MockTransport<'_> {
    fn get_ca_cert(&self, _message: &str) -> mdmsim_core::Result<CaCertResponse> {
        self.scep.ca_cert_requests.set(self.scep.ca_cert_requests.get() + 1);
        Ok(CaCertResponse {
            body: b"degenerate-pkcs7-bundle".to_vec(),
            cert_count: 2,
        })
    }

    fn pki_operation(&self, _body: &[u8]) -> mdmsim_core::Result<Vec<u8>> {
        self.scep.pki_operations.set(self.scep.pki_operations.get() + 1);
        Ok(b"certrep".to_vec())
    }
}

impl PkiMessageCodec for MockScep {
    fn encode_pkcs_req(&self, request: &PkcsRequest<'_>) -> mdmsim_core::Result<Vec<u8>> {
        // the engine must hand the codec a well-formed CSR
        CertReq::from_der(request.csr_der)
            .map_err(|e| Error::validation(format!("bad CSR from engine: {e}")))?;
        assert!(!request.recipients.is_empty());
        Ok(request.csr_der.to_vec())
    }

    fn decode_cert_rep(
        &self,
        _body: &[u8],
        _signer_key: &rsa::RsaPrivateKey,
        _signer_cert_der: &[u8],
    ) -> mdmsim_core::Result<PkiResponse> {
        Ok(PkiResponse {
            status: PkiStatus::Success,
            fail_info: None,
            certificate_der: Some(b"issued-certificate".to_vec()),
        })
    }

    fn decode_ca_cert_bundle(&self, _body: &[u8]) -> mdmsim_core::Result<Vec<Vec<u8>>> {
        Ok(vec![b"ca-cert-1".to_vec(), b"ca-cert-2".to_vec()])
    }
}

struct RecordingCheckin {
    events: RefCell<Vec<String>>,
    store: SqliteStorage,
    /// Fail the first N authenticate calls with a transport error.
    fail_authenticates: Cell<usize>,
}

impl RecordingCheckin {
    fn new(store: SqliteStorage) -> Self {
        Self {
            events: RefCell::new(Vec::new()),
            store,
            fail_authenticates: Cell::new(0),
        }
    }

    fn events(&self) -> Vec<String> {
        self.events.borrow().clone()
    }
}

impl CheckinClient for RecordingCheckin {
    fn authenticate(
        &self,
        _payload: &mdmsim_core::MdmPayload,
        _identity: &DeviceIdentity,
        message: &Authenticate,
    ) -> mdmsim_core::Result<()> {
        if self.fail_authenticates.get() > 0 {
            self.fail_authenticates.set(self.fail_authenticates.get() - 1);
            return Err(Error::transport("checkin endpoint unreachable"));
        }
        assert_eq!(message.message_type, "Authenticate");
        self.events
            .borrow_mut()
            .push(format!("authenticate udid={}", message.udid));
        Ok(())
    }

    fn token_update(
        &self,
        _payload: &mdmsim_core::MdmPayload,
        _identity: &DeviceIdentity,
        message: &TokenUpdate,
    ) -> mdmsim_core::Result<()> {
        assert_eq!(message.message_type, "TokenUpdate");
        self.events.borrow_mut().push("token_update".into());
        Ok(())
    }

    fn check_out(
        &self,
        _payload: &mdmsim_core::MdmPayload,
        identity: &DeviceIdentity,
        message: &CheckOut,
    ) -> mdmsim_core::Result<()> {
        assert_eq!(message.message_type, "CheckOut");
        // the identity must still be usable while checking out
        let present = self.store.load_item(UDID, &identity.keychain_uuid).is_ok();
        self.events
            .borrow_mut()
            .push(format!("check_out identity_present={present}"));
        Ok(())
    }
}

/// Store wrapper that records keychain deletion order and can inject
/// profile-removal failures.
#[derive(Clone)]
struct InstrumentedStore {
    inner: SqliteStorage,
    deletions: Arc<Mutex<Vec<String>>>,
    fail_profile_removals: Arc<AtomicUsize>,
}

impl InstrumentedStore {
    fn new(inner: SqliteStorage) -> Self {
        Self {
            inner,
            deletions: Arc::new(Mutex::new(Vec::new())),
            fail_profile_removals: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn deletions(&self) -> Vec<String> {
        self.deletions.lock().unwrap().clone()
    }
}

impl DeviceStore for InstrumentedStore {
    fn save_device(&self, device: &DeviceRecord) -> mdmsim_core::Result<()> {
        self.inner.save_device(device)
    }

    fn load_device(&self, udid: &str) -> mdmsim_core::Result<DeviceRecord> {
        self.inner.load_device(udid)
    }

    fn list_device_udids(&self) -> mdmsim_core::Result<Vec<String>> {
        self.inner.list_device_udids()
    }
}

impl KeychainStore for InstrumentedStore {
    fn create_item(&self, udid: &str, item: &NewKeychainItem) -> mdmsim_core::Result<String> {
        self.inner.create_item(udid, item)
    }

    fn load_item(&self, udid: &str, uuid: &str) -> mdmsim_core::Result<KeychainItem> {
        self.inner.load_item(udid, uuid)
    }

    fn delete_item(&self, udid: &str, uuid: &str) -> mdmsim_core::Result<()> {
        self.deletions.lock().unwrap().push(uuid.to_string());
        self.inner.delete_item(udid, uuid)
    }

    fn list_items(&self, udid: &str) -> mdmsim_core::Result<Vec<KeychainItem>> {
        self.inner.list_items(udid)
    }
}

impl ProfileStore for InstrumentedStore {
    fn save_profile(
        &self,
        udid: &str,
        profile_id: &str,
        profile_uuid: &str,
        raw: &[u8],
    ) -> mdmsim_core::Result<()> {
        self.inner.save_profile(udid, profile_id, profile_uuid, raw)
    }

    fn load_profile(&self, udid: &str, profile_id: &str) -> mdmsim_core::Result<Vec<u8>> {
        self.inner.load_profile(udid, profile_id)
    }

    fn remove_profile(&self, udid: &str, profile_id: &str) -> mdmsim_core::Result<()> {
        let remaining = self.fail_profile_removals.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_profile_removals
                .store(remaining - 1, Ordering::SeqCst);
            return Err(Error::storage("simulated profile removal failure"));
        }
        self.inner.remove_profile(udid, profile_id)
    }

    fn list_profile_ids(&self, udid: &str) -> mdmsim_core::Result<Vec<String>> {
        self.inner.list_profile_ids(udid)
    }

    fn save_payload_ref(
        &self,
        udid: &str,
        payload_ref: PayloadRef<'_>,
        value: &str,
    ) -> mdmsim_core::Result<()> {
        self.inner.save_payload_ref(udid, payload_ref, value)
    }

    fn load_payload_ref(
        &self,
        udid: &str,
        payload_ref: PayloadRef<'_>,
    ) -> mdmsim_core::Result<Option<String>> {
        self.inner.load_payload_ref(udid, payload_ref)
    }

    fn remove_payload_ref(&self, udid: &str, payload_ref: PayloadRef<'_>) -> mdmsim_core::Result<()> {
        self.inner.remove_payload_ref(udid, payload_ref)
    }
}

fn services<'a>(scep: &'a MockScep, checkin: &'a RecordingCheckin) -> RemoteServices<'a> {
    RemoteServices {
        scep,
        scep_codec: scep,
        checkin,
    }
}

#[test]
fn install_enrolls_with_scep_before_mdm() {
    let (_dir, store) = open_store();
    let scep = MockScep::default();
    let checkin = RecordingCheckin::new(store.clone());
    let mut device = Device::create(store.clone(), UDID, "P3IJDS49Z90A", "test box").unwrap();

    device
        .install_profile(
            &enrollment_profile("https://mdm.example.com", true),
            &services(&scep, &checkin),
        )
        .unwrap();

    assert_eq!(device.enrollment_state(), EnrollmentState::Enrolled);
    assert_eq!(
        device.record().mdm_profile_identifier.as_deref(),
        Some("com.example.enrollment")
    );
    assert!(device.record().mdm_identity_keychain_uuid.is_some());

    // key, certificate, identity
    let items = store.list_items(UDID).unwrap();
    assert_eq!(items.len(), 3);
    assert!(items.iter().any(|i| i.class() == ItemClass::Identity));

    assert_eq!(
        store.list_profile_ids(UDID).unwrap(),
        vec!["com.example.enrollment"]
    );
    assert_eq!(scep.pki_operations.get(), 1);
    assert_eq!(
        checkin.events(),
        vec![format!("authenticate udid={UDID}"), "token_update".to_string()]
    );
}

#[test]
fn unrecognized_payloads_are_skipped() {
    let (_dir, store) = open_store();
    let scep = MockScep::default();
    let checkin = RecordingCheckin::new(store.clone());
    let mut device = Device::create(store.clone(), UDID, "P3IJDS49Z90A", "test box").unwrap();

    let unknown = r#"        <dict>
            <key>PayloadType</key><string>com.example.unknown</string>
            <key>PayloadIdentifier</key><string>com.example.unknown</string>
            <key>PayloadUUID</key><string>44444444-4444-4444-4444-444444444444</string>
        </dict>"#
        .to_string();
    let raw = profile_xml("com.example.mixed", &[unknown, scep_payload_xml()]);

    device
        .install_profile(&raw, &services(&scep, &checkin))
        .unwrap();

    assert_eq!(store.list_items(UDID).unwrap().len(), 3);
    assert_eq!(device.enrollment_state(), EnrollmentState::Unenrolled);
    assert!(checkin.events().is_empty());
}

#[test]
fn duplicate_mdm_payloads_are_rejected() {
    let (_dir, store) = open_store();
    let scep = MockScep::default();
    let checkin = RecordingCheckin::new(store.clone());
    let mut device = Device::create(store.clone(), UDID, "P3IJDS49Z90A", "test box").unwrap();

    let raw = profile_xml(
        "com.example.twin",
        &[
            scep_payload_xml(),
            mdm_payload_xml("https://a.example.com", true, SCEP_UUID),
            mdm_payload_xml("https://b.example.com", true, SCEP_UUID),
        ],
    );

    let err = device
        .install_profile(&raw, &services(&scep, &checkin))
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));

    // rejected before any payload ran
    assert!(store.list_items(UDID).unwrap().is_empty());
    assert_eq!(scep.pki_operations.get(), 0);
}

#[test]
fn second_enrollment_profile_is_rejected_while_enrolled() {
    let (_dir, store) = open_store();
    let scep = MockScep::default();
    let checkin = RecordingCheckin::new(store.clone());
    let mut device = Device::create(store.clone(), UDID, "P3IJDS49Z90A", "test box").unwrap();

    device
        .install_profile(
            &enrollment_profile("https://mdm.example.com", true),
            &services(&scep, &checkin),
        )
        .unwrap();

    let other = profile_xml(
        "com.example.other",
        &[
            scep_payload_xml(),
            mdm_payload_xml("https://other.example.com", true, SCEP_UUID),
        ],
    );
    let err = device
        .install_profile(&other, &services(&scep, &checkin))
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));

    assert_eq!(
        device.record().mdm_profile_identifier.as_deref(),
        Some("com.example.enrollment")
    );
}

#[test]
fn mdm_delivered_reinstall_replaces_the_enrollment() {
    let (_dir, store) = open_store();
    let scep = MockScep::default();
    let checkin = RecordingCheckin::new(store.clone());
    let mut device = Device::create(store.clone(), UDID, "P3IJDS49Z90A", "test box").unwrap();

    let raw = enrollment_profile("https://mdm.example.com", true);
    device
        .install_profile(&raw, &services(&scep, &checkin))
        .unwrap();

    device
        .install_profile_from_mdm(&raw, &services(&scep, &checkin))
        .unwrap();

    assert_eq!(device.enrollment_state(), EnrollmentState::Enrolled);
    // the old identity was removed before the new one was issued
    assert_eq!(store.list_items(UDID).unwrap().len(), 3);
    assert_eq!(scep.pki_operations.get(), 2);

    let events = checkin.events();
    assert_eq!(
        events,
        vec![
            format!("authenticate udid={UDID}"),
            "token_update".to_string(),
            "check_out identity_present=true".to_string(),
            format!("authenticate udid={UDID}"),
            "token_update".to_string(),
        ]
    );
}

#[test]
fn mdm_delivered_reinstall_rejects_a_different_server() {
    let (_dir, store) = open_store();
    let scep = MockScep::default();
    let checkin = RecordingCheckin::new(store.clone());
    let mut device = Device::create(store.clone(), UDID, "P3IJDS49Z90A", "test box").unwrap();

    device
        .install_profile(
            &enrollment_profile("https://mdm.example.com", true),
            &services(&scep, &checkin),
        )
        .unwrap();

    let hijack = profile_xml(
        "com.example.enrollment",
        &[
            scep_payload_xml(),
            mdm_payload_xml("https://evil.example.com", true, SCEP_UUID),
        ],
    );
    let err = device
        .install_profile_from_mdm(&hijack, &services(&scep, &checkin))
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
    assert_eq!(device.enrollment_state(), EnrollmentState::Enrolled);
}

#[test]
fn retry_after_checkin_failure_reuses_the_issued_identity() {
    let (_dir, store) = open_store();
    let scep = MockScep::default();
    let checkin = RecordingCheckin::new(store.clone());
    checkin.fail_authenticates.set(1);
    let mut device = Device::create(store.clone(), UDID, "P3IJDS49Z90A", "test box").unwrap();

    let raw = enrollment_profile("https://mdm.example.com", true);
    let err = device
        .install_profile(&raw, &services(&scep, &checkin))
        .unwrap_err();
    assert!(matches!(err, Error::Transport(_)));

    // identity was issued and kept, but the profile never landed
    assert_eq!(scep.pki_operations.get(), 1);
    assert_eq!(store.list_items(UDID).unwrap().len(), 3);
    assert!(store.list_profile_ids(UDID).unwrap().is_empty());
    assert_eq!(device.enrollment_state(), EnrollmentState::Unenrolled);

    // retry completes without going back to the CA
    device
        .install_profile(&raw, &services(&scep, &checkin))
        .unwrap();
    assert_eq!(scep.pki_operations.get(), 1);
    assert_eq!(device.enrollment_state(), EnrollmentState::Enrolled);
}

#[test]
fn non_mtls_mdm_payload_is_unsupported() {
    let (_dir, store) = open_store();
    let scep = MockScep::default();
    let checkin = RecordingCheckin::new(store.clone());
    let mut device = Device::create(store.clone(), UDID, "P3IJDS49Z90A", "test box").unwrap();

    let err = device
        .install_profile(
            &enrollment_profile("https://mdm.example.com", false),
            &services(&scep, &checkin),
        )
        .unwrap_err();
    assert!(matches!(err, Error::Unsupported(_)));

    assert!(device.record().mdm_profile_identifier.is_none());
    assert!(store.list_profile_ids(UDID).unwrap().is_empty());
    assert!(checkin.events().is_empty());
}

#[test]
fn missing_identity_payload_is_a_broken_reference() {
    let (_dir, store) = open_store();
    let scep = MockScep::default();
    let checkin = RecordingCheckin::new(store.clone());
    let mut device = Device::create(store.clone(), UDID, "P3IJDS49Z90A", "test box").unwrap();

    let raw = profile_xml(
        "com.example.dangling",
        &[
            scep_payload_xml(),
            mdm_payload_xml(
                "https://mdm.example.com",
                true,
                "99999999-9999-9999-9999-999999999999",
            ),
        ],
    );
    let err = device
        .install_profile(&raw, &services(&scep, &checkin))
        .unwrap_err();
    assert!(matches!(err, Error::BrokenReference(_)));
}

#[test]
fn removal_checks_out_then_clears_everything() {
    let (_dir, store) = open_store();
    let scep = MockScep::default();
    let checkin = RecordingCheckin::new(store.clone());
    let mut device = Device::create(store.clone(), UDID, "P3IJDS49Z90A", "test box").unwrap();

    device
        .install_profile(
            &enrollment_profile("https://mdm.example.com", true),
            &services(&scep, &checkin),
        )
        .unwrap();

    device
        .remove_profile("com.example.enrollment", &services(&scep, &checkin))
        .unwrap();

    // check-out happened while the identity was still in the keychain
    assert_eq!(
        checkin.events().last().map(String::as_str),
        Some("check_out identity_present=true")
    );

    assert!(store.list_items(UDID).unwrap().is_empty());
    assert!(store.list_profile_ids(UDID).unwrap().is_empty());
    assert!(device.record().mdm_profile_identifier.is_none());
    assert!(device.record().mdm_identity_keychain_uuid.is_none());
    assert_eq!(device.enrollment_state(), EnrollmentState::Unenrolled);
}

#[test]
fn scep_identity_deletion_orders_identity_key_certificate() {
    let (_dir, sqlite) = open_store();
    let store = InstrumentedStore::new(sqlite.clone());
    let scep = MockScep::default();
    let checkin = RecordingCheckin::new(sqlite.clone());
    let mut device = Device::create(store.clone(), UDID, "P3IJDS49Z90A", "test box").unwrap();

    device
        .install_profile(
            &enrollment_profile("https://mdm.example.com", true),
            &services(&scep, &checkin),
        )
        .unwrap();

    let classes: HashMap<String, ItemClass> = sqlite
        .list_items(UDID)
        .unwrap()
        .into_iter()
        .map(|item| (item.uuid().to_string(), item.class()))
        .collect();

    device
        .remove_profile("com.example.enrollment", &services(&scep, &checkin))
        .unwrap();

    // the pairing goes before the halves it points at
    let deleted: Vec<ItemClass> = store
        .deletions()
        .iter()
        .map(|uuid| classes[uuid])
        .collect();
    assert_eq!(
        deleted,
        vec![ItemClass::Identity, ItemClass::Key, ItemClass::Certificate]
    );
}

#[test]
fn reinstall_proceeds_when_prior_removal_fails() {
    let (_dir, sqlite) = open_store();
    let store = InstrumentedStore::new(sqlite.clone());
    let scep = MockScep::default();
    let checkin = RecordingCheckin::new(sqlite.clone());
    let mut device = Device::create(store.clone(), UDID, "P3IJDS49Z90A", "test box").unwrap();

    let raw = enrollment_profile("https://mdm.example.com", true);
    device
        .install_profile(&raw, &services(&scep, &checkin))
        .unwrap();

    // the old copy refuses to go away, the reinstall still lands
    store.fail_profile_removals.store(1, Ordering::SeqCst);
    device
        .install_profile_from_mdm(&raw, &services(&scep, &checkin))
        .unwrap();

    assert_eq!(device.enrollment_state(), EnrollmentState::Enrolled);
    assert_eq!(sqlite.list_items(UDID).unwrap().len(), 3);
    assert_eq!(scep.pki_operations.get(), 2);
}

#[test]
fn removing_a_profile_that_is_not_installed_is_not_found() {
    let (_dir, store) = open_store();
    let scep = MockScep::default();
    let checkin = RecordingCheckin::new(store.clone());
    let mut device = Device::create(store, UDID, "P3IJDS49Z90A", "test box").unwrap();

    let err = device
        .remove_profile("com.example.absent", &services(&scep, &checkin))
        .unwrap_err();
    assert!(err.is_not_found());
}
