//! GetCACert / PKCSReq client flow.

use der::Decode as _;
use x509_cert::Certificate;

use mdmsim_core::{Error, Result};
use mdmsim_crypto::{FingerprintKind, fingerprint_matches, self_signed_signer};

use crate::traits::{PkcsRequest, PkiMessageCodec, PkiStatus, TransportFactory};

/// SCEP enrollment driver; transport and pkiMessage codec are injected.
pub struct EnrollmentClient<'a> {
    pub transports: &'a dyn TransportFactory,
    pub codec: &'a dyn PkiMessageCodec,
}

impl EnrollmentClient<'_> {
    /// Submit `csr_der` to the CA at `url` and return the issued
    /// certificate in DER form.
    ///
    /// `ca_message` is the GetCACert issuer hint; `ca_fingerprint`
    /// optionally pins the recipient CA certificate by digest.
    pub fn issue_certificate(
        &self,
        url: &str,
        ca_message: &str,
        ca_fingerprint: Option<&[u8]>,
        csr_der: &[u8],
    ) -> Result<Vec<u8>> {
        let transport = self.transports.transport_for(url)?;

        let ca = transport.get_ca_cert(ca_message)?;
        let certificates = if ca.cert_count > 1 {
            self.codec.decode_ca_cert_bundle(&ca.body)?
        } else {
            Certificate::from_der(&ca.body)
                .map_err(|e| Error::transport(format!("invalid GetCACert certificate: {e}")))?;
            vec![ca.body]
        };

        let recipients = select_recipients(certificates, ca_fingerprint);
        if recipients.is_empty() {
            return Err(Error::not_found(
                "no CA certificate matched the expected fingerprint",
            ));
        }

        let signer = self_signed_signer()?;
        let request = self.codec.encode_pkcs_req(&PkcsRequest {
            csr_der,
            signer_key: &signer.private_key,
            signer_cert_der: &signer.certificate_der,
            recipients: &recipients,
        })?;

        let body = transport.pki_operation(&request)?;
        let response = self
            .codec
            .decode_cert_rep(&body, &signer.private_key, &signer.certificate_der)?;

        match response.status {
            PkiStatus::Success => response.certificate_der.ok_or_else(|| {
                Error::transport("CertRep reported success but carried no certificate")
            }),
            status => Err(Error::EnrollmentRejected {
                status: status.to_string(),
                reason: response.fail_info.unwrap_or_default(),
            }),
        }
    }
}

/// Filter CA certificates by the payload's pinned fingerprint. No
/// fingerprint, or one of unrecognized length, accepts everything.
fn select_recipients(certificates: Vec<Vec<u8>>, fingerprint: Option<&[u8]>) -> Vec<Vec<u8>> {
    let fingerprint = match fingerprint {
        Some(fp) if !fp.is_empty() => fp,
        _ => return certificates,
    };

    let Some(kind) = FingerprintKind::for_len(fingerprint.len()) else {
        tracing::warn!(
            len = fingerprint.len(),
            "unrecognized CA fingerprint length, accepting all certificates"
        );
        return certificates;
    };

    certificates
        .into_iter()
        .filter(|cert| fingerprint_matches(kind, fingerprint, cert))
        .collect()
}
