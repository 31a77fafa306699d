//! Throwaway self-signed signer identity for SCEP PKCS#7 envelopes.

use der::asn1::{BitString, ObjectIdentifier, OctetString};
use der::{Decode as _, Encode as _};
use rand::RngCore as _;
use rsa::RsaPrivateKey;
use rsa::pkcs1v15::SigningKey;
use rsa::pkcs8::EncodePublicKey as _;
use rsa::signature::{SignatureEncoding as _, Signer as _};
use sha2::Sha256;
use x509_cert::Certificate;
use x509_cert::certificate::{TbsCertificate, Version};
use x509_cert::ext::Extension;
use x509_cert::name::RdnSequence;
use x509_cert::serial_number::SerialNumber;
use x509_cert::spki::SubjectPublicKeyInfoOwned;
use x509_cert::time::Validity;

use mdmsim_core::Result;

use crate::crypto_err;
use crate::csr::{rdn, sha256_with_rsa};
use crate::keyusage::{
    KEY_USAGE_DIGITAL_SIGNATURE, KEY_USAGE_KEY_ENCIPHERMENT, key_usage_extension,
};

const OID_AT_COMMON_NAME: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.4.3");
const OID_EXT_KEY_USAGE: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.29.37");
const OID_BASIC_CONSTRAINTS: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.29.19");
const OID_EKU_SERVER_AUTH: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.6.1.5.5.7.3.1");

const SIGNER_KEY_BITS: usize = 2048;
const SIGNER_LIFETIME_SECS: u64 = 3600;

/// Ephemeral key and certificate used only to sign and decrypt the
/// SCEP exchange while the real identity is still being issued.
pub struct SignerIdentity {
    pub private_key: RsaPrivateKey,
    pub certificate_der: Vec<u8>,
}

/// Generate a fresh one-hour self-signed identity (CN "SCEP SIGNER").
pub fn self_signed_signer() -> Result<SignerIdentity> {
    let mut rng = rand::thread_rng();
    let private_key = RsaPrivateKey::new(&mut rng, SIGNER_KEY_BITS).map_err(crypto_err)?;

    let mut serial = [0u8; 16];
    rng.fill_bytes(&mut serial);
    // keep the INTEGER positive
    serial[0] &= 0x7f;

    let subject = RdnSequence::from(vec![rdn(OID_AT_COMMON_NAME, "SCEP SIGNER")?]);

    let public_key_der = private_key
        .to_public_key()
        .to_public_key_der()
        .map_err(crypto_err)?;

    let extensions = vec![
        key_usage_extension(KEY_USAGE_DIGITAL_SIGNATURE | KEY_USAGE_KEY_ENCIPHERMENT)?,
        extended_key_usage(&[OID_EKU_SERVER_AUTH])?,
        basic_constraints_not_ca()?,
    ];

    let tbs = TbsCertificate {
        version: Version::V3,
        serial_number: SerialNumber::new(&serial).map_err(crypto_err)?,
        signature: sha256_with_rsa(),
        issuer: subject.clone(),
        validity: Validity::from_now(std::time::Duration::from_secs(SIGNER_LIFETIME_SECS))
            .map_err(crypto_err)?,
        subject,
        subject_public_key_info: SubjectPublicKeyInfoOwned::from_der(public_key_der.as_bytes())
            .map_err(crypto_err)?,
        issuer_unique_id: None,
        subject_unique_id: None,
        extensions: Some(extensions),
    };

    let message = tbs.to_der().map_err(crypto_err)?;
    let signer = SigningKey::<Sha256>::new(private_key.clone());
    let signature = signer.try_sign(&message).map_err(crypto_err)?;

    let certificate = Certificate {
        tbs_certificate: tbs,
        signature_algorithm: sha256_with_rsa(),
        signature: BitString::from_bytes(&signature.to_vec()).map_err(crypto_err)?,
    };

    Ok(SignerIdentity {
        private_key,
        certificate_der: certificate.to_der().map_err(crypto_err)?,
    })
}

fn extended_key_usage(purposes: &[ObjectIdentifier]) -> Result<Extension> {
    let sequence: Vec<ObjectIdentifier> = purposes.to_vec();
    Ok(Extension {
        extn_id: OID_EXT_KEY_USAGE,
        critical: false,
        extn_value: OctetString::new(sequence.to_der().map_err(crypto_err)?).map_err(crypto_err)?,
    })
}

fn basic_constraints_not_ca() -> Result<Extension> {
    use x509_cert::ext::pkix::BasicConstraints;
    let value = BasicConstraints {
        ca: false,
        path_len_constraint: None,
    };
    Ok(Extension {
        extn_id: OID_BASIC_CONSTRAINTS,
        critical: true,
        extn_value: OctetString::new(value.to_der().map_err(crypto_err)?).map_err(crypto_err)?,
    })
}
