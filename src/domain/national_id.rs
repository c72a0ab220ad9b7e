//! National identity number (TCKN) extraction from certificate subjects.
//!
//! Best-effort convenience field: the final fallback accepts any standalone
//! run of 11 digits, so the result is not a verified identity attribute.

use regex::Regex;
use std::sync::OnceLock;

fn patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            r"(?i)(?:SERIALNUMBER|2\.5\.4\.5)\s*=\s*(?:TR)?(\d{11})\b",
            r"(?i)\bUID\s*=\s*(\d{11})\b",
            r"(?i)\bTCKN\s*=\s*(\d{11})\b",
            r"(?:^|\D)(\d{11})(?:\D|$)",
        ]
        .iter()
        .filter_map(|p| match Regex::new(p) {
            Ok(re) => Some(re),
            Err(e) => {
                log::error!("invalid national id pattern {p}: {e}");
                None
            }
        })
        .collect()
    })
}

/// Extract an 11-digit national id from a subject DN string.
#[must_use]
pub fn extract_national_id(subject: &str) -> Option<String> {
    if subject.trim().is_empty() {
        return None;
    }
    patterns()
        .iter()
        .find_map(|re| re.captures(subject))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// `12345678901` → `123****8901`; other lengths pass through unchanged.
#[must_use]
pub fn mask_national_id(id: &str) -> String {
    if id.len() == 11 && id.chars().all(|c| c.is_ascii_digit()) {
        format!("{}****{}", &id[..3], &id[7..])
    } else {
        id.to_string()
    }
}

/// Keep the last four characters of a token serial visible.
#[must_use]
pub fn mask_serial(serial: &str) -> String {
    let chars: Vec<char> = serial.trim().chars().collect();
    if chars.len() <= 4 {
        return chars.iter().collect();
    }
    let hidden = chars.len() - 4;
    std::iter::repeat('*')
        .take(hidden)
        .chain(chars[hidden..].iter().copied())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefers_serial_number_attribute() {
        let subject = "CN=AHMET YILMAZ,serialNumber=TR12345678901,UID=99999999999,C=TR";
        assert_eq!(extract_national_id(subject).as_deref(), Some("12345678901"));
    }

    #[test]
    fn accepts_numeric_oid_form() {
        let subject = "CN=Test,2.5.4.5=10987654321";
        assert_eq!(extract_national_id(subject).as_deref(), Some("10987654321"));
    }

    #[test]
    fn falls_back_through_uid_and_tckn() {
        assert_eq!(
            extract_national_id("CN=A,UID=11122233344").as_deref(),
            Some("11122233344")
        );
        assert_eq!(
            extract_national_id("CN=A,OU=TCKN=55566677788").as_deref(),
            Some("55566677788")
        );
    }

    #[test]
    fn standalone_digits_fallback_and_length_guard() {
        assert_eq!(
            extract_national_id("CN=Ayse 12312312312 Kaya").as_deref(),
            Some("12312312312")
        );
        assert_eq!(extract_national_id("CN=123456789012"), None);
        assert_eq!(extract_national_id(""), None);
    }

    #[test]
    fn masking() {
        assert_eq!(mask_national_id("12345678901"), "123****8901");
        assert_eq!(mask_national_id("abc"), "abc");
        assert_eq!(mask_serial("AKIS0012345678"), "**********5678");
        assert_eq!(mask_serial("123"), "123");
    }
}
