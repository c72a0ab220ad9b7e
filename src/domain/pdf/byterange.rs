//! ByteRange arithmetic for PDF signatures.
//!
//! A signature dictionary carries `/ByteRange [0 len1 off2 len2]` covering
//! the whole file except the hex `/Contents` value (angle brackets
//! included). Both the range array and the contents placeholder are written
//! with a fixed width so they can be patched in place.

use crate::infra::error::{SigningError, SigningResult};

/// Width of the ByteRange array text, brackets included.
pub const BYTE_RANGE_FIELD_LEN: usize = 60;

/// Calculator for a `/Contents` placeholder of fixed size.
#[derive(Debug, Clone, Copy)]
pub struct ByteRangeCalculator {
    /// Hex digits plus the two angle brackets.
    placeholder_size: usize,
}

impl ByteRangeCalculator {
    /// Placeholder able to hold a DER container of `estimated_signature_size` bytes.
    #[must_use]
    pub fn new(estimated_signature_size: usize) -> Self {
        Self {
            placeholder_size: estimated_signature_size * 2 + 2,
        }
    }

    #[must_use]
    pub fn placeholder_size(&self) -> usize {
        self.placeholder_size
    }

    /// Largest container (in bytes) the placeholder can hold.
    #[must_use]
    pub fn capacity(&self) -> usize {
        (self.placeholder_size - 2) / 2
    }

    /// `<000...0>`
    #[must_use]
    pub fn generate_placeholder(&self) -> String {
        format!("<{}>", "0".repeat(self.placeholder_size - 2))
    }

    /// `[0, before, after_start, after_len]` for a `/Contents` value starting
    /// at `contents_offset` (the `<`).
    #[must_use]
    pub fn calculate_byte_range(&self, file_size: usize, contents_offset: usize) -> [i64; 4] {
        let before = contents_offset as i64;
        let after_start = (contents_offset + self.placeholder_size) as i64;
        [0, before, after_start, file_size as i64 - after_start]
    }

    /// Write `signature` hex-encoded (zero padded) over the placeholder.
    pub fn insert_signature(
        &self,
        pdf: &mut [u8],
        contents_offset: usize,
        signature: &[u8],
    ) -> SigningResult<()> {
        if signature.len() > self.capacity() {
            return Err(SigningError::PdfError(format!(
                "signature container ({} bytes) exceeds reserved space ({} bytes)",
                signature.len(),
                self.capacity()
            )));
        }
        let end = contents_offset + self.placeholder_size;
        if end > pdf.len() || pdf[contents_offset] != b'<' || pdf[end - 1] != b'>' {
            return Err(SigningError::PdfError(
                "contents placeholder not found at recorded offset".into(),
            ));
        }
        let hex = hex::encode_upper(signature);
        let digits = &mut pdf[contents_offset + 1..end - 1];
        digits.fill(b'0');
        digits[..hex.len()].copy_from_slice(hex.as_bytes());
        Ok(())
    }
}

/// Placeholder for the ByteRange array.
#[must_use]
pub fn byte_range_placeholder() -> String {
    format!("[{}]", " ".repeat(BYTE_RANGE_FIELD_LEN - 2))
}

/// Fixed-width text of a ByteRange array.
pub fn format_byte_range(range: &[i64; 4]) -> SigningResult<String> {
    let body = format!("{} {} {} {}", range[0], range[1], range[2], range[3]);
    if body.len() > BYTE_RANGE_FIELD_LEN - 2 {
        return Err(SigningError::PdfError("ByteRange does not fit its field".into()));
    }
    Ok(format!("[{body:<width$}]", width = BYTE_RANGE_FIELD_LEN - 2))
}

/// Overwrite the array placeholder at `offset` (the `[`).
pub fn patch_byte_range(pdf: &mut [u8], offset: usize, range: &[i64; 4]) -> SigningResult<()> {
    let text = format_byte_range(range)?;
    let end = offset + text.len();
    if end > pdf.len() || pdf[offset] != b'[' {
        return Err(SigningError::PdfError(
            "ByteRange placeholder not found at recorded offset".into(),
        ));
    }
    pdf[offset..end].copy_from_slice(text.as_bytes());
    Ok(())
}

/// Concatenation of the two signed ranges.
pub fn extract_signed_bytes(pdf: &[u8], range: &[i64; 4]) -> SigningResult<Vec<u8>> {
    let [o1, l1, o2, l2] = checked_range(range)?;
    if o1 + l1 > pdf.len() || o2 + l2 > pdf.len() {
        return Err(SigningError::PdfError(format!(
            "ByteRange {range:?} exceeds file size {}",
            pdf.len()
        )));
    }
    let mut out = Vec::with_capacity(l1 + l2);
    out.extend_from_slice(&pdf[o1..o1 + l1]);
    out.extend_from_slice(&pdf[o2..o2 + l2]);
    Ok(out)
}

/// True when the ranges start at 0, end at the file end and leave only the
/// contents gap uncovered.
#[must_use]
pub fn covers_whole_document(range: &[i64; 4], file_size: usize) -> bool {
    range[0] == 0 && range[1] <= range[2] && range[2] + range[3] == file_size as i64
}

fn checked_range(range: &[i64; 4]) -> SigningResult<[usize; 4]> {
    let mut out = [0usize; 4];
    for (slot, value) in out.iter_mut().zip(range) {
        *slot = usize::try_from(*value)
            .map_err(|_| SigningError::PdfError(format!("negative ByteRange entry {value}")))?;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholder_geometry() {
        let calc = ByteRangeCalculator::new(100);
        assert_eq!(calc.placeholder_size(), 202);
        assert_eq!(calc.capacity(), 100);
        let p = calc.generate_placeholder();
        assert!(p.starts_with('<') && p.ends_with('>'));
        assert_eq!(p.len(), 202);
    }

    #[test]
    fn range_math_and_coverage() {
        let calc = ByteRangeCalculator::new(100);
        let range = calc.calculate_byte_range(1000, 300);
        assert_eq!(range, [0, 300, 502, 498]);
        assert!(covers_whole_document(&range, 1000));
        assert!(!covers_whole_document(&range, 1200));
    }

    #[test]
    fn byte_range_text_keeps_fixed_width() {
        let text = format_byte_range(&[0, 12, 345, 6789]).unwrap();
        assert_eq!(text.len(), BYTE_RANGE_FIELD_LEN);
        assert_eq!(byte_range_placeholder().len(), BYTE_RANGE_FIELD_LEN);
        assert!(text.starts_with("[0 12 345 6789 "));
        assert!(text.ends_with(']'));
    }

    #[test]
    fn insert_and_extract() {
        let calc = ByteRangeCalculator::new(4);
        let mut pdf = b"head<00000000>tail".to_vec();
        calc.insert_signature(&mut pdf, 4, &[0xAB, 0x01]).unwrap();
        assert_eq!(&pdf, b"head<AB010000>tail");

        let range = calc.calculate_byte_range(pdf.len(), 4);
        assert_eq!(extract_signed_bytes(&pdf, &range).unwrap(), b"headtail");
        assert!(calc.insert_signature(&mut pdf, 4, &[0u8; 5]).is_err());
        assert!(calc.insert_signature(&mut pdf, 3, &[0u8; 1]).is_err());
    }

    #[test]
    fn rejects_out_of_bounds_ranges() {
        assert!(extract_signed_bytes(b"abc", &[0, 2, 2, 5]).is_err());
        assert!(extract_signed_bytes(b"abc", &[0, -1, 2, 1]).is_err());
    }
}
