//! Incremental update writer.
//!
//! Appends new or replaced objects after the original bytes, followed by a
//! cross-reference section chained to the previous one through `/Prev`.
//! The section takes the form of the one it extends: a classic table and
//! trailer, or an uncompressed `/Type /XRef` stream. Original bytes are
//! never rewritten, which keeps earlier signatures intact.

use crate::infra::error::{SigningError, SigningResult};
use lopdf::{Dictionary, Object, ObjectId, Stream, StringFormat};
use std::io::Write;

/// Trailer keys carried into the update trailer.
const CARRIED_TRAILER_KEYS: [&[u8]; 3] = [b"Root", b"Info", b"ID"];

pub struct IncrementalWriter {
    buf: Vec<u8>,
    prev_startxref: usize,
    xref_stream: bool,
    entries: Vec<(ObjectId, usize)>,
}

impl IncrementalWriter {
    pub fn new(original: &[u8]) -> SigningResult<Self> {
        let prev_startxref = find_startxref(original)?;
        let xref_stream = section_is_stream(original, prev_startxref);
        let mut buf = Vec::with_capacity(original.len() + 64 * 1024);
        buf.extend_from_slice(original);
        if !buf.ends_with(b"\n") {
            buf.push(b'\n');
        }
        Ok(Self {
            buf,
            prev_startxref,
            xref_stream,
            entries: Vec::new(),
        })
    }

    /// Whether `finish` writes an xref stream, which takes one object number
    /// past `size`.
    #[must_use]
    pub fn appends_xref_stream(&self) -> bool {
        self.xref_stream
    }

    /// Current end of output; the next object starts here.
    #[must_use]
    pub fn position(&self) -> usize {
        self.buf.len()
    }

    /// Serialize and append an indirect object.
    pub fn write_object(&mut self, id: ObjectId, object: &Object) -> usize {
        let mut body = Vec::new();
        serialize(object, &mut body);
        self.write_raw_object(id, &body)
    }

    /// Append an indirect object whose body is already serialized and return
    /// the absolute offset of the first body byte.
    pub fn write_raw_object(&mut self, id: ObjectId, body: &[u8]) -> usize {
        let offset = self.buf.len();
        self.entries.push((id, offset));
        // Writing into a Vec cannot fail.
        let _ = write!(self.buf, "{} {} obj\n", id.0, id.1);
        let body_start = self.buf.len();
        self.buf.extend_from_slice(body);
        self.buf.extend_from_slice(b"\nendobj\n");
        body_start
    }

    /// Write the cross-reference section and trailer. `size` is the object
    /// count of the updated document.
    #[must_use]
    pub fn finish(mut self, previous_trailer: &Dictionary, size: u32) -> Vec<u8> {
        let mut trailer = Dictionary::new();
        for key in CARRIED_TRAILER_KEYS {
            if let Ok(value) = previous_trailer.get(key) {
                trailer.set(key, value.clone());
            }
        }
        let max_written = self.entries.iter().map(|((n, _), _)| *n + 1).max().unwrap_or(0);
        let size = size.max(max_written);
        trailer.set("Prev", self.prev_startxref as i64);

        let xref_offset = self.buf.len();
        if self.xref_stream {
            self.write_xref_stream(trailer, size, xref_offset);
        } else {
            self.entries.sort_by_key(|(id, _)| *id);
            self.buf.extend_from_slice(b"xref\n");
            for ((num, gen), offset) in &self.entries {
                let _ = write!(self.buf, "{num} 1\n{offset:010} {gen:05} n\r\n");
            }
            trailer.set("Size", i64::from(size));
            self.buf.extend_from_slice(b"trailer\n");
            serialize(&Object::Dictionary(trailer), &mut self.buf);
            self.buf.push(b'\n');
        }
        let _ = write!(self.buf, "startxref\n{xref_offset}\n%%EOF\n");
        self.buf
    }

    /// Cross-reference stream numbered `size`, listing itself.
    fn write_xref_stream(&mut self, mut dict: Dictionary, size: u32, offset: usize) {
        let id = (size, 0);
        let mut entries = self.entries.clone();
        entries.push((id, offset));
        entries.sort_by_key(|(id, _)| *id);

        let offset_width = (usize::BITS - offset.leading_zeros()).div_ceil(8).max(1) as usize;
        let mut index = Vec::with_capacity(entries.len() * 2);
        let mut content = Vec::with_capacity(entries.len() * (offset_width + 3));
        for ((num, gen), entry_offset) in &entries {
            index.push(Object::Integer(i64::from(*num)));
            index.push(Object::Integer(1));
            content.push(1);
            content.extend_from_slice(&entry_offset.to_be_bytes()[std::mem::size_of::<usize>() - offset_width..]);
            content.extend_from_slice(&gen.to_be_bytes());
        }

        dict.set("Type", Object::Name(b"XRef".to_vec()));
        dict.set("Size", i64::from(size + 1));
        dict.set(
            "W",
            vec![Object::Integer(1), Object::Integer(offset_width as i64), Object::Integer(2)],
        );
        dict.set("Index", index);
        self.write_object(id, &Object::Stream(Stream::new(dict, content)));
    }
}

/// The section at `offset` is an object header rather than the `xref` keyword.
fn section_is_stream(pdf: &[u8], offset: usize) -> bool {
    pdf.get(offset..)
        .and_then(|rest| rest.iter().find(|b| !b.is_ascii_whitespace()))
        .is_some_and(u8::is_ascii_digit)
}

/// Offset named by the last `startxref` keyword.
pub fn find_startxref(pdf: &[u8]) -> SigningResult<usize> {
    const KEYWORD: &[u8] = b"startxref";
    let tail_start = pdf.len().saturating_sub(2048);
    let tail = &pdf[tail_start..];
    let pos = tail
        .windows(KEYWORD.len())
        .rposition(|w| w == KEYWORD)
        .ok_or_else(|| SigningError::PdfError("startxref not found".into()))?;
    let digits: String = tail[pos + KEYWORD.len()..]
        .iter()
        .skip_while(|b| b.is_ascii_whitespace())
        .take_while(|b| b.is_ascii_digit())
        .map(|b| char::from(*b))
        .collect();
    digits
        .parse()
        .map_err(|_| SigningError::PdfError("malformed startxref offset".into()))
}

/// PDF text string: literal for ASCII, UTF-16BE with BOM otherwise.
#[must_use]
pub fn text_string(text: &str) -> Object {
    if text.is_ascii() {
        Object::String(text.as_bytes().to_vec(), StringFormat::Literal)
    } else {
        let mut bytes = vec![0xFE, 0xFF];
        for unit in text.encode_utf16() {
            bytes.extend_from_slice(&unit.to_be_bytes());
        }
        Object::String(bytes, StringFormat::Hexadecimal)
    }
}

/// Write an object in PDF syntax.
pub fn serialize(object: &Object, out: &mut Vec<u8>) {
    match object {
        Object::Null => out.extend_from_slice(b"null"),
        Object::Boolean(b) => out.extend_from_slice(if *b { &b"true"[..] } else { &b"false"[..] }),
        Object::Integer(i) => out.extend_from_slice(i.to_string().as_bytes()),
        Object::Real(r) => out.extend_from_slice(format_real(f64::from(*r)).as_bytes()),
        Object::Name(name) => write_name(name, out),
        Object::String(bytes, StringFormat::Literal) => write_literal(bytes, out),
        Object::String(bytes, StringFormat::Hexadecimal) => {
            out.push(b'<');
            out.extend_from_slice(hex::encode_upper(bytes).as_bytes());
            out.push(b'>');
        }
        Object::Array(items) => {
            out.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(b' ');
                }
                serialize(item, out);
            }
            out.push(b']');
        }
        Object::Dictionary(dict) => write_dictionary(dict, out),
        Object::Stream(stream) => {
            let mut dict = stream.dict.clone();
            dict.set("Length", stream.content.len() as i64);
            write_dictionary(&dict, out);
            out.extend_from_slice(b"\nstream\n");
            out.extend_from_slice(&stream.content);
            out.extend_from_slice(b"\nendstream");
        }
        Object::Reference((num, gen)) => {
            let _ = write!(out, "{num} {gen} R");
        }
    }
}

fn write_dictionary(dict: &Dictionary, out: &mut Vec<u8>) {
    out.extend_from_slice(b"<<");
    for (key, value) in dict.iter() {
        out.push(b' ');
        write_name(key, out);
        out.push(b' ');
        serialize(value, out);
    }
    out.extend_from_slice(b" >>");
}

fn write_name(name: &[u8], out: &mut Vec<u8>) {
    out.push(b'/');
    for &b in name {
        let delimiter = matches!(
            b,
            b'(' | b')' | b'<' | b'>' | b'[' | b']' | b'{' | b'}' | b'/' | b'%' | b'#'
        );
        if (0x21..=0x7E).contains(&b) && !delimiter {
            out.push(b);
        } else {
            let _ = write!(out, "#{b:02X}");
        }
    }
}

fn write_literal(bytes: &[u8], out: &mut Vec<u8>) {
    out.push(b'(');
    for &b in bytes {
        match b {
            b'(' | b')' | b'\\' => {
                out.push(b'\\');
                out.push(b);
            }
            b'\r' => out.extend_from_slice(b"\\r"),
            b'\n' => out.extend_from_slice(b"\\n"),
            _ => out.push(b),
        }
    }
    out.push(b')');
}

fn format_real(value: f64) -> String {
    if value.fract() == 0.0 {
        return format!("{value:.0}");
    }
    let text = format!("{value:.4}");
    text.trim_end_matches('0').trim_end_matches('.').to_string()
}
