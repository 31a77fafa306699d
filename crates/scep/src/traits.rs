//! Transport and codec seams of the SCEP exchange.

use rsa::RsaPrivateKey;

use mdmsim_core::Result;

/// GetCACert response: raw body plus the server's declared certificate
/// count. More than one certificate means the body is a degenerate
/// PKCS#7 bundle rather than a bare certificate.
#[derive(Debug, Clone)]
pub struct CaCertResponse {
    pub body: Vec<u8>,
    pub cert_count: usize,
}

/// One SCEP server endpoint.
pub trait ScepTransport {
    /// GetCACert with an optional CA issuer hint.
    fn get_ca_cert(&self, message: &str) -> Result<CaCertResponse>;

    /// PKIOperation carrying an encoded pkiMessage.
    fn pki_operation(&self, body: &[u8]) -> Result<Vec<u8>>;
}

/// Produces a transport for a SCEP URL.
pub trait TransportFactory {
    fn transport_for(&self, url: &str) -> Result<Box<dyn ScepTransport + '_>>;
}

/// Disposition of a CertRep pkiMessage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PkiStatus {
    Success,
    Failure,
    Pending,
}

impl std::fmt::Display for PkiStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            PkiStatus::Success => "SUCCESS",
            PkiStatus::Failure => "FAILURE",
            PkiStatus::Pending => "PENDING",
        })
    }
}

/// Decoded CertRep.
#[derive(Debug, Clone)]
pub struct PkiResponse {
    pub status: PkiStatus,
    /// failInfo text accompanying a FAILURE status.
    pub fail_info: Option<String>,
    /// Issued certificate when the status is SUCCESS.
    pub certificate_der: Option<Vec<u8>>,
}

/// Inputs of a PKCSReq pkiMessage.
pub struct PkcsRequest<'a> {
    pub csr_der: &'a [u8],
    pub signer_key: &'a RsaPrivateKey,
    pub signer_cert_der: &'a [u8],
    /// CA/RA certificates the request envelope is encrypted to.
    pub recipients: &'a [Vec<u8>],
}

/// PKCS#7 pkiMessage encoding and decoding.
pub trait PkiMessageCodec {
    /// Encode a signed-and-enveloped PKCSReq.
    fn encode_pkcs_req(&self, request: &PkcsRequest<'_>) -> Result<Vec<u8>>;

    /// Decode a CertRep, decrypting with the self-signed signer.
    fn decode_cert_rep(
        &self,
        body: &[u8],
        signer_key: &RsaPrivateKey,
        signer_cert_der: &[u8],
    ) -> Result<PkiResponse>;

    /// Split a degenerate PKCS#7 GetCACert bundle into certificates.
    fn decode_ca_cert_bundle(&self, body: &[u8]) -> Result<Vec<Vec<u8>>>;
}
