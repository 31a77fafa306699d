//! MDM check-in protocol messages.
//!
//! Device-side Authenticate, TokenUpdate, and CheckOut messages, plus
//! the client seam that delivers them. Delivery is injected so the
//! engine can run against a real check-in endpoint or a test double.

use rand::RngCore as _;
use rsa::RsaPrivateKey;
use serde::Serialize;

use mdmsim_core::{DeviceRecord, Error, MdmPayload, Result};

/// Key, certificate, and keychain coordinates backing the mTLS
/// check-in session.
pub struct DeviceIdentity {
    pub keychain_uuid: String,
    pub private_key: RsaPrivateKey,
    pub certificate_der: Vec<u8>,
}

/// Authenticate check-in message.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Authenticate {
    pub message_type: String,
    pub topic: String,
    #[serde(rename = "UDID")]
    pub udid: String,
    pub serial_number: String,
    pub device_name: String,
}

impl Authenticate {
    pub fn new(payload: &MdmPayload, device: &DeviceRecord) -> Self {
        Self {
            message_type: "Authenticate".into(),
            topic: payload.topic.clone(),
            udid: device.udid.clone(),
            serial_number: device.serial.clone(),
            device_name: device.computer_name.clone(),
        }
    }
}

/// TokenUpdate check-in message. The simulator has no APNs connection,
/// so token and magic are freshly generated random values.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct TokenUpdate {
    pub message_type: String,
    pub topic: String,
    #[serde(rename = "UDID")]
    pub udid: String,
    pub token: plist::Data,
    pub push_magic: String,
}

impl TokenUpdate {
    pub fn new(payload: &MdmPayload, device: &DeviceRecord) -> Self {
        let mut token = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut token);

        let mut magic = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut magic);

        Self {
            message_type: "TokenUpdate".into(),
            topic: payload.topic.clone(),
            udid: device.udid.clone(),
            token: token.to_vec().into(),
            push_magic: hex::encode(magic),
        }
    }
}

/// CheckOut check-in message.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CheckOut {
    pub message_type: String,
    pub topic: String,
    #[serde(rename = "UDID")]
    pub udid: String,
}

impl CheckOut {
    pub fn new(payload: &MdmPayload, device: &DeviceRecord) -> Self {
        Self {
            message_type: "CheckOut".into(),
            topic: payload.topic.clone(),
            udid: device.udid.clone(),
        }
    }
}

/// Encode a check-in message as an XML plist body.
pub fn encode_checkin<T: Serialize>(message: &T) -> Result<Vec<u8>> {
    let mut body = Vec::new();
    plist::to_writer_xml(&mut body, message).map_err(Error::Parse)?;
    Ok(body)
}

/// Delivers check-in messages to the MDM server named by `payload`.
pub trait CheckinClient {
    fn authenticate(
        &self,
        payload: &MdmPayload,
        identity: &DeviceIdentity,
        message: &Authenticate,
    ) -> Result<()>;

    fn token_update(
        &self,
        payload: &MdmPayload,
        identity: &DeviceIdentity,
        message: &TokenUpdate,
    ) -> Result<()>;

    fn check_out(
        &self,
        payload: &MdmPayload,
        identity: &DeviceIdentity,
        message: &CheckOut,
    ) -> Result<()>;
}
