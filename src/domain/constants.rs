//! Protocol constants: ASN.1 tags and OIDs, XML-DSig/XAdES URIs, defaults.

// ASN.1 tags
pub const ASN1_BOOLEAN_TAG: u8 = 0x01;
pub const ASN1_INTEGER_TAG: u8 = 0x02;
pub const ASN1_OCTET_STRING_TAG: u8 = 0x04;
pub const ASN1_NULL: &[u8] = &[0x05, 0x00];
pub const ASN1_OID_TAG: u8 = 0x06;
pub const ASN1_UTC_TIME_TAG: u8 = 0x17;
pub const ASN1_SEQUENCE_TAG: u8 = 0x30;
pub const ASN1_SET_TAG: u8 = 0x31;
pub const ASN1_CONTEXT_0_CONSTRUCTED: u8 = 0xA0;
pub const ASN1_CONTEXT_1_CONSTRUCTED: u8 = 0xA1;

/// DigestInfo prefix for SHA-256 (SEQUENCE { AlgorithmIdentifier sha256 NULL, OCTET STRING(32) }).
pub const SHA256_DIGEST_INFO_PREFIX: &[u8] = &[
    0x30, 0x31, 0x30, 0x0d, 0x06, 0x09, 0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02, 0x01,
    0x05, 0x00, 0x04, 0x20,
];
pub const SHA256_DIGEST_LEN: usize = 32;

// Object identifier contents (DER value bytes, without tag/length)
/// 2.16.840.1.101.3.4.2.1
pub const OID_SHA256: &[u8] = &[0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02, 0x01];
/// 1.2.840.113549.1.1.1
pub const OID_RSA_ENCRYPTION: &[u8] = &[0x2A, 0x86, 0x48, 0x86, 0xF7, 0x0D, 0x01, 0x01, 0x01];
/// 1.2.840.113549.1.7.1
pub const OID_DATA: &[u8] = &[0x2A, 0x86, 0x48, 0x86, 0xF7, 0x0D, 0x01, 0x07, 0x01];
/// 1.2.840.113549.1.7.2
pub const OID_SIGNED_DATA: &[u8] = &[0x2A, 0x86, 0x48, 0x86, 0xF7, 0x0D, 0x01, 0x07, 0x02];
/// 1.2.840.113549.1.9.3
pub const OID_CONTENT_TYPE: &[u8] = &[0x2A, 0x86, 0x48, 0x86, 0xF7, 0x0D, 0x01, 0x09, 0x03];
/// 1.2.840.113549.1.9.4
pub const OID_MESSAGE_DIGEST: &[u8] = &[0x2A, 0x86, 0x48, 0x86, 0xF7, 0x0D, 0x01, 0x09, 0x04];
/// 1.2.840.113549.1.9.16.2.47
pub const OID_SIGNING_CERTIFICATE_V2: &[u8] = &[
    0x2A, 0x86, 0x48, 0x86, 0xF7, 0x0D, 0x01, 0x09, 0x10, 0x02, 0x2F,
];
/// 1.2.840.113549.1.9.16.2.14
pub const OID_TIMESTAMP_TOKEN: &[u8] = &[
    0x2A, 0x86, 0x48, 0x86, 0xF7, 0x0D, 0x01, 0x09, 0x10, 0x02, 0x0E,
];

/// 1.2.840.113549.1.9.16.1.4
pub const OID_TST_INFO: &[u8] = &[
    0x2A, 0x86, 0x48, 0x86, 0xF7, 0x0D, 0x01, 0x09, 0x10, 0x01, 0x04,
];

pub const ASN1_GENERALIZED_TIME_TAG: u8 = 0x18;

// Certificate extension OIDs (dotted form, compared against x509-cert OIDs)
pub const OID_EXT_KEY_USAGE: &str = "2.5.29.15";
pub const OID_EXT_CERTIFICATE_POLICIES: &str = "2.5.29.32";
pub const OID_EXT_QC_STATEMENTS: &str = "1.3.6.1.5.5.7.1.3";
pub const OID_EXT_AUTHORITY_INFO_ACCESS: &str = "1.3.6.1.5.5.7.1.1";
pub const OID_EXT_AUTHORITY_KEY_ID: &str = "2.5.29.35";
pub const OID_EXT_SUBJECT_KEY_ID: &str = "2.5.29.14";
pub const OID_EXT_CRL_DISTRIBUTION_POINTS: &str = "2.5.29.31";
pub const OID_AD_CA_ISSUERS: &str = "1.3.6.1.5.5.7.48.2";
pub const OID_AD_OCSP: &str = "1.3.6.1.5.5.7.48.1";

// RFC 3161 request fields
pub const TS_REQ_VERSION_1: &[u8] = &[0x02, 0x01, 0x01];
pub const CERT_REQ_TRUE: &[u8] = &[0x01, 0x01, 0xFF];
pub const TS_REQ_NONCE_LENGTH: usize = 8;

// XML-DSig / XAdES
pub const XMLDSIG_NS: &str = "http://www.w3.org/2000/09/xmldsig#";
pub const XADES_NS: &str = "http://uri.etsi.org/01903/v1.3.2#";
pub const XML_NS: &str = "http://www.w3.org/XML/1998/namespace";
pub const C14N_INCLUSIVE_URI: &str = "http://www.w3.org/TR/2001/REC-xml-c14n-20010315";
pub const C14N_EXCLUSIVE_URI: &str = "http://www.w3.org/2001/10/xml-exc-c14n#";
pub const RSA_SHA256_URI: &str = "http://www.w3.org/2001/04/xmldsig-more#rsa-sha256";
pub const SHA256_DIGEST_URI: &str = "http://www.w3.org/2001/04/xmlenc#sha256";
pub const SIGNED_PROPERTIES_TYPE_URI: &str = "http://uri.etsi.org/01903#SignedProperties";
pub const BASE64_ENCODING_URI: &str = "http://www.w3.org/2000/09/xmldsig#base64";
pub const XML_PAYLOAD_MIME_TYPE: &str = "text/xml";

// Retry policy
pub const DEFAULT_MAX_SESSION_RETRIES: u32 = 2;
pub const DEFAULT_XML_BACKOFF_STEP_MS: u64 = 1500;
pub const DEFAULT_PDF_BACKOFF_STEP_MS: u64 = 600;

// Trust chain repair
pub const MAX_CHAIN_REPAIR_ROUNDS: usize = 6;
pub const DEFAULT_NETWORK_TIMEOUT_SECS: u64 = 8;

// PDF signing defaults
pub const DEFAULT_SIGNATURE_RESERVED_BYTES: usize = 24_000;
pub const DEFAULT_PDF_REASON: &str = "Elektronik imza";
pub const DEFAULT_PDF_LOCATION: &str = "Türkiye";
pub const DEFAULT_PDF_FILE_BASE: &str = "signed-document";
pub const PDF_CREATOR_NAME: &str = "esign-agent";
pub const MAX_FIELD_NAME_LEN: usize = 64;

pub const USER_AGENT: &str = concat!("esign-agent/", env!("CARGO_PKG_VERSION"));
