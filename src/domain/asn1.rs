//! Minimal DER writer and reader used for CMS, TSP and DigestInfo assembly.
//!
//! Structures are concatenated from pre-encoded children; the reader only
//! walks TLV boundaries and never interprets content.

use crate::domain::constants::{
    ASN1_INTEGER_TAG, ASN1_OCTET_STRING_TAG, ASN1_OID_TAG, ASN1_SEQUENCE_TAG, ASN1_SET_TAG,
};
use crate::infra::error::{SigningError, SigningResult};

/// DER definite length octets.
#[must_use]
pub fn encode_len(len: usize) -> Vec<u8> {
    if len < 0x80 {
        vec![len as u8]
    } else {
        let bytes = len.to_be_bytes();
        let first = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len() - 1);
        let significant = &bytes[first..];
        let mut out = Vec::with_capacity(1 + significant.len());
        out.push(0x80 | significant.len() as u8);
        out.extend_from_slice(significant);
        out
    }
}

#[must_use]
pub fn tlv(tag: u8, content: &[u8]) -> Vec<u8> {
    let len = encode_len(content.len());
    let mut out = Vec::with_capacity(1 + len.len() + content.len());
    out.push(tag);
    out.extend_from_slice(&len);
    out.extend_from_slice(content);
    out
}

#[must_use]
pub fn sequence(items: &[&[u8]]) -> Vec<u8> {
    tlv(ASN1_SEQUENCE_TAG, &items.concat())
}

/// SET OF with members in DER canonical (sorted) order.
#[must_use]
pub fn set_of(mut items: Vec<Vec<u8>>) -> Vec<u8> {
    items.sort();
    tlv(ASN1_SET_TAG, &items.concat())
}

#[must_use]
pub fn oid(value: &[u8]) -> Vec<u8> {
    tlv(ASN1_OID_TAG, value)
}

#[must_use]
pub fn octet_string(content: &[u8]) -> Vec<u8> {
    tlv(ASN1_OCTET_STRING_TAG, content)
}

/// INTEGER from unsigned big-endian magnitude.
#[must_use]
pub fn unsigned_integer(magnitude: &[u8]) -> Vec<u8> {
    let trimmed = match magnitude.iter().position(|b| *b != 0) {
        Some(i) => &magnitude[i..],
        None => &[0u8][..],
    };
    let mut content = Vec::with_capacity(trimmed.len() + 1);
    if trimmed[0] & 0x80 != 0 {
        content.push(0x00);
    }
    content.extend_from_slice(trimmed);
    tlv(ASN1_INTEGER_TAG, &content)
}

#[must_use]
pub fn small_integer(value: u8) -> Vec<u8> {
    unsigned_integer(&[value])
}

/// Context-specific tag over already encoded content.
#[must_use]
pub fn context(tag: u8, content: &[u8]) -> Vec<u8> {
    tlv(tag, content)
}

/// One decoded TLV boundary.
#[derive(Debug, Clone, Copy)]
pub struct Tlv<'a> {
    pub tag: u8,
    pub content: &'a [u8],
    /// Header plus content.
    pub raw: &'a [u8],
}

/// Read the TLV at the start of `data`.
pub fn read_tlv(data: &[u8]) -> SigningResult<Tlv<'_>> {
    if data.len() < 2 {
        return Err(SigningError::Asn1Error("truncated TLV header".into()));
    }
    let tag = data[0];
    let first = data[1];
    let (len, header) = if first & 0x80 == 0 {
        (first as usize, 2)
    } else {
        let n = (first & 0x7F) as usize;
        if n == 0 || n > 4 || data.len() < 2 + n {
            return Err(SigningError::Asn1Error(format!(
                "unsupported DER length form 0x{first:02x}"
            )));
        }
        let len = data[2..2 + n]
            .iter()
            .fold(0usize, |acc, b| (acc << 8) | *b as usize);
        (len, 2 + n)
    };
    let end = header
        .checked_add(len)
        .filter(|end| *end <= data.len())
        .ok_or_else(|| SigningError::Asn1Error("TLV length exceeds buffer".into()))?;
    Ok(Tlv {
        tag,
        content: &data[header..end],
        raw: &data[..end],
    })
}

/// Split a constructed value's content into consecutive child TLVs.
pub fn read_children(content: &[u8]) -> SigningResult<Vec<Tlv<'_>>> {
    let mut children = Vec::new();
    let mut rest = content;
    while !rest.is_empty() {
        let child = read_tlv(rest)?;
        rest = &rest[child.raw.len()..];
        children.push(child);
    }
    Ok(children)
}

/// Length of the first complete DER object, tolerating trailing padding.
pub fn der_object_len(data: &[u8]) -> SigningResult<usize> {
    read_tlv(data).map(|t| t.raw.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn length_forms() {
        assert_eq!(encode_len(0x7F), vec![0x7F]);
        assert_eq!(encode_len(0x80), vec![0x81, 0x80]);
        assert_eq!(encode_len(0x1234), vec![0x82, 0x12, 0x34]);
    }

    #[test]
    fn integer_sign_padding() {
        assert_eq!(unsigned_integer(&[0x80]), vec![0x02, 0x02, 0x00, 0x80]);
        assert_eq!(unsigned_integer(&[0x00, 0x01]), vec![0x02, 0x01, 0x01]);
        assert_eq!(unsigned_integer(&[]), vec![0x02, 0x01, 0x00]);
    }

    #[test]
    fn set_members_are_sorted() {
        let set = set_of(vec![vec![0x04, 0x01, 0x02], vec![0x04, 0x01, 0x01]]);
        assert_eq!(set, vec![0x31, 0x06, 0x04, 0x01, 0x01, 0x04, 0x01, 0x02]);
    }

    #[test]
    fn reader_walks_children_and_ignores_padding() {
        let inner = sequence(&[&small_integer(1), &octet_string(&[0xAA; 200])]);
        let mut padded = inner.clone();
        padded.extend_from_slice(&[0u8; 16]);
        assert_eq!(der_object_len(&padded).unwrap(), inner.len());

        let outer = read_tlv(&padded).unwrap();
        let children = read_children(outer.content).unwrap();
        assert_eq!(children.len(), 2);
        assert_eq!(children[1].content.len(), 200);
    }

    #[test]
    fn reader_rejects_truncation() {
        assert!(read_tlv(&[0x30, 0x05, 0x01]).is_err());
        assert!(read_tlv(&[0x30]).is_err());
    }
}
