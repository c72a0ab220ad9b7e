//! PDF primitives for signature preparation: widget placement, ByteRange
//! arithmetic and incremental-update serialization.

pub mod appearance;
pub mod byterange;
pub mod placement;
pub mod writer;

pub use byterange::{
    byte_range_placeholder, covers_whole_document, extract_signed_bytes, patch_byte_range,
    ByteRangeCalculator, BYTE_RANGE_FIELD_LEN,
};
pub use appearance::{card_xobject, AppearanceText};
pub use placement::{resolve_page_number, resolve_placement, SignaturePlacement};
pub use writer::{find_startxref, serialize, text_string, IncrementalWriter};

use chrono::{DateTime, Offset, TimeZone};

/// `D:YYYYMMDDHHmmSS+HH'mm'`
#[must_use]
pub fn pdf_date<Tz: TimeZone>(time: &DateTime<Tz>) -> String {
    let offset_secs = time.offset().fix().local_minus_utc();
    let sign = if offset_secs < 0 { '-' } else { '+' };
    let minutes = offset_secs.abs() / 60;
    format!(
        "D:{}{sign}{:02}'{:02}'",
        time.naive_local().format("%Y%m%d%H%M%S"),
        minutes / 60,
        minutes % 60
    )
}

/// Keep `[A-Za-z0-9_.-]`, replace everything else with `_`, cap the length.
#[must_use]
pub fn sanitize_field_name(name: &str, max_len: usize) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') {
                c
            } else {
                '_'
            }
        })
        .take(max_len)
        .collect()
}
