//! Token enumeration for device pickers.

use crate::domain::crypto::CertificateInfo;
use crate::domain::national_id::{extract_national_id, mask_national_id, mask_serial};
use crate::domain::types::DeviceInfo;
use crate::infra::error::SigningResult;
use crate::services::cert_selector::{best_certificate, token_certificates};
use crate::services::token_session::TokenSessionPool;

const NO_CERTIFICATE: &str = "(no certificate found)";
const EXPIRED_CERTIFICATE: &str = "(certificate not within its validity period)";

/// Certificates of a slot read through an uncached read-only session.
pub fn slot_certificates(pool: &TokenSessionPool, slot_index: usize) -> SigningResult<Vec<CertificateInfo>> {
    let session = pool.open_read_only(slot_index)?;
    let certificates = token_certificates(pool, session);
    if let Err(e) = pool.close(session) {
        log::debug!("closing read-only session on slot {slot_index} failed: {e}");
    }
    certificates
}

/// Best signing certificate of a slot, if any.
pub fn slot_signer(pool: &TokenSessionPool, slot_index: usize) -> SigningResult<Option<CertificateInfo>> {
    let certificates = slot_certificates(pool, slot_index)?;
    Ok(best_certificate(&certificates).cloned())
}

/// Describe one slot. Callers hold the slot gate.
pub fn describe_device(pool: &TokenSessionPool, slot_index: usize) -> SigningResult<DeviceInfo> {
    let info = pool.token_info(slot_index)?;
    let label = info.label.trim().to_string();
    let serial = info.serial.trim().to_string();

    let (subject, national_id) = match slot_signer(pool, slot_index)? {
        Some(cert) if cert.is_time_valid() => {
            let subject = cert.common_name().unwrap_or_else(|| cert.subject().to_string());
            let national_id = extract_national_id(cert.subject());
            log::info!(
                "Slot {slot_index}: {label} ({}) subject={subject} national_id={}",
                mask_serial(&serial),
                national_id.as_deref().map(mask_national_id).unwrap_or_default()
            );
            (subject, national_id)
        }
        Some(cert) => {
            log::warn!("Slot {slot_index}: certificate {} is outside its validity period", cert.subject());
            (EXPIRED_CERTIFICATE.to_string(), None)
        }
        None => {
            log::warn!("Slot {slot_index}: no certificate on token {label}");
            (NO_CERTIFICATE.to_string(), None)
        }
    };

    Ok(DeviceInfo {
        slot_id: slot_index,
        label: format!("{label} ({serial}) - {subject}"),
        serial_masked: mask_serial(&serial),
        subject_name: subject,
        national_id,
    })
}
