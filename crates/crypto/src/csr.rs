//! SCEP CSR construction.

use der::asn1::{Any, BitString, ObjectIdentifier, SetOfVec, Utf8StringRef};
use der::{Decode as _, Encode as _};
use rsa::RsaPrivateKey;
use rsa::pkcs1v15::SigningKey;
use rsa::pkcs8::EncodePublicKey as _;
use rsa::signature::{SignatureEncoding as _, Signer as _};
use sha2::Sha256;
use x509_cert::attr::{Attribute, AttributeTypeAndValue};
use x509_cert::name::{RdnSequence, RelativeDistinguishedName};
use x509_cert::request::{CertReq, CertReqInfo, ExtensionReq, Version};
use x509_cert::spki::{AlgorithmIdentifierOwned, SubjectPublicKeyInfoOwned};

use mdmsim_core::{DeviceRecord, Error, Result, ScepPayload};

use crate::crypto_err;
use crate::keyusage::{KEY_USAGE_DIGITAL_SIGNATURE, key_usage_extension};

/// Legacy default; current deployments should set Keysize explicitly.
pub const DEFAULT_RSA_KEY_SIZE: usize = 1024;

const OID_SHA256_WITH_RSA: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.11");
const OID_CHALLENGE_PASSWORD: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.7");
const OID_EXTENSION_REQUEST: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.14");

const OID_AT_COMMON_NAME: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.4.3");
const OID_AT_COUNTRY: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.4.6");
const OID_AT_LOCALITY: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.4.7");
const OID_AT_PROVINCE: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.4.8");
const OID_AT_ORGANIZATION: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.4.10");
const OID_AT_ORGANIZATIONAL_UNIT: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.4.11");

/// Generate the RSA private key a SCEP payload asks for.
///
/// Only RSA (or an unspecified type) is supported; key size falls back
/// to the legacy 1024-bit default when the payload does not set one.
pub fn generate_key(payload: &ScepPayload) -> Result<RsaPrivateKey> {
    let content = &payload.payload_content;
    if !content.key_type.is_empty() && content.key_type != "RSA" {
        return Err(Error::unsupported(format!(
            "key type {:?}: only RSA keys supported",
            content.key_type
        )));
    }
    let key_size = content.key_size.map_or(DEFAULT_RSA_KEY_SIZE, |size| size as usize);
    RsaPrivateKey::new(&mut rand::thread_rng(), key_size).map_err(crypto_err)
}

/// Substitute device enrollment variables inside a subject value.
/// Unrecognized `%Token%` sequences pass through unchanged.
fn replace_device_vars(device: &DeviceRecord, value: &str) -> String {
    value
        .replace("%ComputerName%", &device.computer_name)
        .replace("%HardwareUUID%", &device.udid)
        .replace("%SerialNumber%", &device.serial)
}

fn utf8_value(s: &str) -> Result<Any> {
    Ok(Any::from(Utf8StringRef::new(s).map_err(crypto_err)?))
}

pub(crate) fn rdn(oid: ObjectIdentifier, value: &str) -> Result<RelativeDistinguishedName> {
    let atv = AttributeTypeAndValue {
        oid,
        value: utf8_value(value)?,
    };
    let set = SetOfVec::try_from(vec![atv]).map_err(crypto_err)?;
    Ok(RelativeDistinguishedName::from(set))
}

/// Build the CSR subject from the payload's attribute groups, applying
/// device-variable substitution. An unsupported OID tag aborts the
/// whole CSR; no partial subject is produced.
fn build_subject(payload: &ScepPayload, device: &DeviceRecord) -> Result<RdnSequence> {
    let mut rdns = Vec::new();
    let mut common_name: Option<String> = None;

    for group in &payload.payload_content.subject {
        for entry in group {
            if entry.len() < 2 {
                return Err(Error::validation(format!(
                    "invalid subject entry in SCEP payload: {entry:?}"
                )));
            }
            let values: Vec<String> = entry[1..]
                .iter()
                .map(|value| replace_device_vars(device, value))
                .collect();
            let oid = match entry[0].as_str() {
                "C" => OID_AT_COUNTRY,
                "L" => OID_AT_LOCALITY,
                // ST maps onto stateOrProvinceName
                "ST" => OID_AT_PROVINCE,
                "O" => OID_AT_ORGANIZATION,
                "OU" => OID_AT_ORGANIZATIONAL_UNIT,
                "CN" => {
                    common_name = Some(values[0].clone());
                    continue;
                }
                tag => {
                    return Err(Error::unsupported(format!(
                        "subject OID {tag:?} in SCEP payload"
                    )));
                }
            };
            for value in &values {
                rdns.push(rdn(oid, value)?);
            }
        }
    }

    // macOS fills a default CN of the PayloadIdentifier when none is given
    let cn = common_name.unwrap_or_else(|| payload.common.payload_identifier.clone());
    rdns.push(rdn(OID_AT_COMMON_NAME, &cn)?);

    Ok(RdnSequence::from(rdns))
}

/// Build a DER-encoded CSR for a SCEP payload, signed with `key`.
pub fn build_csr(
    payload: &ScepPayload,
    device: &DeviceRecord,
    key: &RsaPrivateKey,
) -> Result<Vec<u8>> {
    let content = &payload.payload_content;

    // macOS defaults to digital signature only
    let key_usage = match content.key_usage {
        Some(usage) if usage != 0 => usage,
        _ => KEY_USAGE_DIGITAL_SIGNATURE,
    };
    let extensions = vec![key_usage_extension(key_usage)?];

    let mut attributes = SetOfVec::new();
    if !content.challenge.is_empty() {
        let mut values = SetOfVec::new();
        values
            .insert(utf8_value(&content.challenge)?)
            .map_err(crypto_err)?;
        attributes
            .insert(Attribute {
                oid: OID_CHALLENGE_PASSWORD,
                values,
            })
            .map_err(crypto_err)?;
    }

    let mut extension_req_values = SetOfVec::new();
    extension_req_values
        .insert(Any::encode_from(&ExtensionReq::from(extensions)).map_err(crypto_err)?)
        .map_err(crypto_err)?;
    attributes
        .insert(Attribute {
            oid: OID_EXTENSION_REQUEST,
            values: extension_req_values,
        })
        .map_err(crypto_err)?;

    let public_key_der = key
        .to_public_key()
        .to_public_key_der()
        .map_err(crypto_err)?;
    let info = CertReqInfo {
        version: Version::V1,
        subject: build_subject(payload, device)?,
        public_key: SubjectPublicKeyInfoOwned::from_der(public_key_der.as_bytes())
            .map_err(crypto_err)?,
        attributes,
    };

    let message = info.to_der().map_err(crypto_err)?;
    let signer = SigningKey::<Sha256>::new(key.clone());
    let signature = signer.try_sign(&message).map_err(crypto_err)?;

    let request = CertReq {
        info,
        algorithm: sha256_with_rsa(),
        signature: BitString::from_bytes(&signature.to_vec()).map_err(crypto_err)?,
    };
    request.to_der().map_err(crypto_err)
}

pub(crate) fn sha256_with_rsa() -> AlgorithmIdentifierOwned {
    AlgorithmIdentifierOwned {
        oid: OID_SHA256_WITH_RSA,
        parameters: Some(Any::null()),
    }
}
