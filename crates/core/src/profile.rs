//! Configuration profile document model.
//!
//! Apple-style configuration profiles are plist documents carrying an
//! array of typed payload dictionaries. Parsing goes through the plist
//! crate; each known `PayloadType` maps to a typed payload record and
//! everything else lands in the `Unrecognized` arm with its raw type
//! tag preserved.

use serde::Deserialize;

use crate::{Error, Result};

/// PayloadType value of SCEP enrollment payloads.
pub const PAYLOAD_TYPE_SCEP: &str = "com.apple.security.scep";
/// PayloadType value of MDM enrollment payloads.
pub const PAYLOAD_TYPE_MDM: &str = "com.apple.mdm";

/// Keys common to every payload dictionary.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PayloadCommon {
    pub payload_identifier: String,

    #[serde(rename = "PayloadUUID")]
    pub payload_uuid: String,

    pub payload_type: String,

    #[serde(default)]
    pub payload_version: Option<u32>,

    #[serde(default)]
    pub payload_display_name: Option<String>,

    #[serde(default)]
    pub payload_organization: Option<String>,
}

/// SCEP enrollment payload.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ScepPayload {
    #[serde(flatten)]
    pub common: PayloadCommon,

    pub payload_content: ScepContent,
}

/// Key and CSR parameters of a SCEP payload.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScepContent {
    /// SCEP enrollment URL.
    #[serde(rename = "URL")]
    pub url: String,

    /// CA issuer hint forwarded to GetCACert (the "CA message").
    #[serde(default, rename = "Name")]
    pub name: String,

    /// Challenge password embedded in the CSR.
    #[serde(default, rename = "Challenge")]
    pub challenge: String,

    /// Declared key type; only "RSA" (or unset) is supported.
    #[serde(default, rename = "Key Type")]
    pub key_type: String,

    /// Key size in bits; the legacy default of 1024 applies when unset.
    #[serde(default, rename = "Keysize")]
    pub key_size: Option<u32>,

    /// X.509 key-usage bitmask; defaults to digital signature only.
    #[serde(default, rename = "Key Usage")]
    pub key_usage: Option<u16>,

    /// Subject attribute groups: lists of (OID tag, value...) entries.
    #[serde(default, rename = "Subject")]
    pub subject: Vec<Vec<Vec<String>>>,

    /// Expected CA certificate fingerprint; length selects the hash.
    #[serde(default, rename = "CAFingerprint")]
    pub ca_fingerprint: Option<plist::Data>,
}

impl ScepContent {
    /// Fingerprint bytes, when the payload declares one.
    pub fn ca_fingerprint_bytes(&self) -> Option<&[u8]> {
        self.ca_fingerprint.as_ref().map(AsRef::as_ref)
    }
}

/// MDM enrollment payload.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MdmPayload {
    #[serde(flatten)]
    pub common: PayloadCommon,

    /// MDM command connection URL.
    #[serde(rename = "ServerURL")]
    pub server_url: String,

    /// Checkin protocol URL.
    #[serde(default, rename = "CheckInURL")]
    pub check_in_url: String,

    /// APNs topic the server pushes to.
    #[serde(default)]
    pub topic: String,

    /// PayloadUUID of the payload producing this enrollment's identity.
    #[serde(rename = "IdentityCertificateUUID")]
    pub identity_certificate_uuid: String,

    /// Message-signing (mTLS) enrollment mode; required for enrollment.
    #[serde(default)]
    pub sign_message: bool,

    #[serde(default)]
    pub access_rights: Option<i64>,

    #[serde(default)]
    pub check_out_when_removed: bool,

    #[serde(default)]
    pub server_capabilities: Vec<String>,
}

/// One typed unit of configuration inside a profile.
#[derive(Debug, Clone)]
pub enum Payload {
    Scep(ScepPayload),
    Mdm(MdmPayload),
    /// Payload types the simulator does not install; kept for logging.
    Unrecognized(PayloadCommon),
}

impl Payload {
    /// The common keys every variant carries.
    pub fn common(&self) -> &PayloadCommon {
        match self {
            Payload::Scep(p) => &p.common,
            Payload::Mdm(p) => &p.common,
            Payload::Unrecognized(common) => common,
        }
    }
}

/// A parsed configuration profile document.
#[derive(Debug, Clone)]
pub struct Profile {
    pub payload_identifier: String,
    pub payload_uuid: String,
    pub payload_display_name: Option<String>,
    pub payload_content: Vec<Payload>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawProfile {
    payload_identifier: String,

    #[serde(rename = "PayloadUUID")]
    payload_uuid: String,

    #[serde(default)]
    payload_display_name: Option<String>,

    #[serde(default)]
    payload_content: Vec<plist::Value>,
}

impl Profile {
    /// Parse a raw plist profile document.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let raw: RawProfile = plist::from_bytes(bytes)?;

        let mut payload_content = Vec::with_capacity(raw.payload_content.len());
        for value in &raw.payload_content {
            payload_content.push(parse_payload(value)?);
        }

        Ok(Self {
            payload_identifier: raw.payload_identifier,
            payload_uuid: raw.payload_uuid,
            payload_display_name: raw.payload_display_name,
            payload_content,
        })
    }

    /// All SCEP payloads in document order.
    pub fn scep_payloads(&self) -> Vec<&ScepPayload> {
        self.payload_content
            .iter()
            .filter_map(|p| match p {
                Payload::Scep(scep) => Some(scep),
                _ => None,
            })
            .collect()
    }

    /// All MDM payloads in document order.
    pub fn mdm_payloads(&self) -> Vec<&MdmPayload> {
        self.payload_content
            .iter()
            .filter_map(|p| match p {
                Payload::Mdm(mdm) => Some(mdm),
                _ => None,
            })
            .collect()
    }
}

fn parse_payload(value: &plist::Value) -> Result<Payload> {
    let payload_type = value
        .as_dictionary()
        .ok_or_else(|| Error::validation("payload entry is not a dictionary"))?
        .get("PayloadType")
        .and_then(|v| v.as_string())
        .unwrap_or_default()
        .to_string();

    match payload_type.as_str() {
        PAYLOAD_TYPE_SCEP => Ok(Payload::Scep(plist::from_value(value)?)),
        PAYLOAD_TYPE_MDM => Ok(Payload::Mdm(plist::from_value(value)?)),
        _ => Ok(Payload::Unrecognized(plist::from_value(value)?)),
    }
}
