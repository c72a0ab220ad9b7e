//! RFC3161 timestamping service.
//!
//! Builds `TimeStampReq` with a random nonce and `certReq`, posts it through
//! [`TimestampHttpClient`] and validates the granted token against the
//! requested imprint and nonce.

use crate::adapters::timestamp_http_client::TimestampHttpClient;
use crate::domain::asn1::{self, read_children, read_tlv};
use crate::domain::constants::{
    ASN1_CONTEXT_0_CONSTRUCTED, ASN1_GENERALIZED_TIME_TAG, ASN1_INTEGER_TAG,
    ASN1_OCTET_STRING_TAG, ASN1_SEQUENCE_TAG, CERT_REQ_TRUE, OID_SHA256, OID_SIGNED_DATA,
    OID_TST_INFO, SHA256_DIGEST_LEN, TS_REQ_NONCE_LENGTH, TS_REQ_VERSION_1, ASN1_NULL,
};
use crate::domain::crypto::sha256;
use crate::infra::error::{SigningError, SigningResult};
use async_trait::async_trait;
use rand::RngCore;

/// Request DER and the nonce it carries.
#[derive(Debug, Clone)]
pub struct TimestampRequest {
    pub der: Vec<u8>,
    pub nonce: Vec<u8>,
}

/// Build `TimeStampReq` over a SHA-256 imprint.
///
/// ```text
/// TimeStampReq ::= SEQUENCE {
///    version INTEGER { v1(1) },
///    messageImprint MessageImprint,
///    nonce INTEGER OPTIONAL,
///    certReq BOOLEAN DEFAULT FALSE }
/// ```
pub fn build_request(imprint: &[u8]) -> SigningResult<TimestampRequest> {
    if imprint.len() != SHA256_DIGEST_LEN {
        return Err(SigningError::TimestampError(format!(
            "message imprint must be {SHA256_DIGEST_LEN} bytes, got {}",
            imprint.len()
        )));
    }
    let mut nonce = vec![0u8; TS_REQ_NONCE_LENGTH];
    rand::thread_rng().fill_bytes(&mut nonce);
    // Positive, minimal INTEGER content.
    nonce[0] &= 0x7F;
    nonce[0] |= 0x01;

    let algorithm = asn1::sequence(&[&asn1::oid(OID_SHA256), ASN1_NULL]);
    let message_imprint = asn1::sequence(&[&algorithm, &asn1::octet_string(imprint)]);
    let der = asn1::sequence(&[
        TS_REQ_VERSION_1,
        &message_imprint,
        &asn1::unsigned_integer(&nonce),
        CERT_REQ_TRUE,
    ]);
    log::debug!("Built RFC3161 request: {} bytes", der.len());
    Ok(TimestampRequest { der, nonce })
}

/// Granted timestamp token (a CMS `ContentInfo`).
#[derive(Debug, Clone)]
pub struct TimestampToken {
    der: Vec<u8>,
    imprint: Vec<u8>,
    nonce: Option<Vec<u8>>,
    gen_time: String,
}

impl TimestampToken {
    /// Parse a `ContentInfo` holding `SignedData` over `TSTInfo`.
    pub fn from_der(der: Vec<u8>) -> SigningResult<Self> {
        let tst_info = extract_tst_info(&der)?;
        let fields = read_children(read_tlv(&tst_info)?.content)?;
        // version, policy, messageImprint, serialNumber, genTime, ...
        if fields.len() < 5 || fields[2].tag != ASN1_SEQUENCE_TAG {
            return Err(SigningError::TimestampError("malformed TSTInfo".into()));
        }
        let imprint_fields = read_children(fields[2].content)?;
        let imprint = match imprint_fields.get(1) {
            Some(t) if t.tag == ASN1_OCTET_STRING_TAG => t.content.to_vec(),
            _ => return Err(SigningError::TimestampError("TSTInfo without imprint".into())),
        };
        if fields[4].tag != ASN1_GENERALIZED_TIME_TAG {
            return Err(SigningError::TimestampError("TSTInfo without genTime".into()));
        }
        let gen_time = String::from_utf8_lossy(fields[4].content).to_string();
        let nonce = fields[5..]
            .iter()
            .find(|t| t.tag == ASN1_INTEGER_TAG)
            .map(|t| trim_integer(t.content).to_vec());
        Ok(Self {
            der,
            imprint,
            nonce,
            gen_time,
        })
    }

    #[must_use]
    pub fn der(&self) -> &[u8] {
        &self.der
    }

    #[must_use]
    pub fn message_imprint(&self) -> &[u8] {
        &self.imprint
    }

    /// `GeneralizedTime` text, e.g. `20240101120000Z`.
    #[must_use]
    pub fn gen_time(&self) -> &str {
        &self.gen_time
    }

    /// Check imprint and, when the TSA echoed one, the nonce.
    pub fn validate(&self, imprint: &[u8], nonce: &[u8]) -> SigningResult<()> {
        if self.imprint != imprint {
            return Err(SigningError::TimestampError(
                "message imprint does not match the timestamped data".into(),
            ));
        }
        if let Some(echoed) = &self.nonce {
            if echoed.as_slice() != trim_integer(nonce) {
                return Err(SigningError::TimestampError("nonce mismatch".into()));
            }
        }
        Ok(())
    }
}

fn trim_integer(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    &bytes[start..]
}

/// `ContentInfo -> SignedData -> encapContentInfo -> eContent` as DER.
fn extract_tst_info(content_info: &[u8]) -> SigningResult<Vec<u8>> {
    let malformed = || SigningError::TimestampError("malformed timestamp token".into());
    let outer = read_children(read_tlv(content_info)?.content)?;
    match outer.first() {
        Some(t) if t.content == OID_SIGNED_DATA => {}
        _ => return Err(malformed()),
    }
    let explicit = outer.get(1).filter(|t| t.tag == ASN1_CONTEXT_0_CONSTRUCTED).ok_or_else(malformed)?;
    let signed_data = read_tlv(explicit.content)?;
    let sd_fields = read_children(signed_data.content)?;
    // version, digestAlgorithms, encapContentInfo, ...
    let encap = sd_fields.get(2).ok_or_else(malformed)?;
    let encap_fields = read_children(encap.content)?;
    match encap_fields.first() {
        Some(t) if t.content == OID_TST_INFO => {}
        _ => return Err(SigningError::TimestampError("token does not carry TSTInfo".into())),
    }
    let econtent = encap_fields
        .get(1)
        .filter(|t| t.tag == ASN1_CONTEXT_0_CONSTRUCTED)
        .ok_or_else(malformed)?;
    let octets = read_tlv(econtent.content)?;
    if octets.tag != ASN1_OCTET_STRING_TAG {
        return Err(malformed());
    }
    Ok(octets.content.to_vec())
}

/// Extract the token from a `TimeStampResp`, failing unless status is
/// granted (0) or grantedWithMods (1).
pub fn parse_response(resp: &[u8]) -> SigningResult<Vec<u8>> {
    let fields = read_children(read_tlv(resp)?.content)?;
    let status_info = fields
        .first()
        .ok_or_else(|| SigningError::TimestampError("empty TimeStampResp".into()))?;
    let status_fields = read_children(status_info.content)?;
    let status = status_fields
        .first()
        .filter(|t| t.tag == ASN1_INTEGER_TAG)
        .map(|t| t.content.iter().fold(0u32, |acc, b| (acc << 8) | u32::from(*b)))
        .ok_or_else(|| SigningError::TimestampError("TimeStampResp without status".into()))?;
    if status > 1 {
        return Err(SigningError::TimestampError(format!(
            "TSA rejected the request (status {status})"
        )));
    }
    let token = fields
        .get(1)
        .ok_or_else(|| SigningError::TimestampError("TimeStampResp without token".into()))?;
    Ok(token.raw.to_vec())
}

/// Source of signature timestamps.
#[async_trait]
pub trait TimestampAuthority: Send + Sync {
    /// Timestamp token over `data` (hashed with SHA-256 here).
    async fn timestamp(&self, data: &[u8]) -> SigningResult<TimestampToken>;
}

/// RFC3161 over HTTP.
pub struct TimestampService {
    client: TimestampHttpClient,
}

impl TimestampService {
    #[must_use]
    pub fn new(client: TimestampHttpClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl TimestampAuthority for TimestampService {
    async fn timestamp(&self, data: &[u8]) -> SigningResult<TimestampToken> {
        let imprint = sha256(data);
        let request = build_request(&imprint)?;
        let response = self.client.post_request(&request.der).await?;
        let token = TimestampToken::from_der(parse_response(&response)?)?;
        token.validate(&imprint, &request.nonce)?;
        log::info!("Timestamp granted at {}", token.gen_time());
        Ok(token)
    }
}
