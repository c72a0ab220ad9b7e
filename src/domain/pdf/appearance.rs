//! Visible signature card drawn into the widget's normal appearance.
//!
//! Text uses the standard Helvetica faces with WinAnsi encoding. Turkish
//! letters outside Latin-1 are folded to their base letter.

use lopdf::{dictionary, Dictionary, Object, Stream};

/// Lines shown on the card.
#[derive(Debug, Clone)]
pub struct AppearanceText {
    pub signer_name: String,
    pub national_id: Option<String>,
    pub signing_date: String,
    pub timestamp_enabled: bool,
}

struct Line {
    font: &'static str,
    size: f32,
    text: String,
}

/// Byte in WinAnsiEncoding, folding characters the encoding lacks.
fn win_ansi(c: char) -> u8 {
    match c {
        'İ' => b'I',
        'ı' => b'i',
        'Ş' => b'S',
        'ş' => b's',
        'Ğ' => b'G',
        'ğ' => b'g',
        c if (c as u32) < 0x100 => c as u32 as u8,
        _ => b'?',
    }
}

fn push_literal(text: &str, out: &mut Vec<u8>) {
    out.push(b'(');
    for byte in text.chars().map(win_ansi) {
        if matches!(byte, b'(' | b')' | b'\\') {
            out.push(b'\\');
        }
        out.push(byte);
    }
    out.push(b')');
}

fn lines(text: &AppearanceText) -> Vec<Line> {
    let mut lines = vec![
        Line {
            font: "F2",
            size: 8.3,
            text: "ELEKTRONİK İMZA".into(),
        },
        Line {
            font: "F2",
            size: 9.7,
            text: format!("İmza Sahibi: {}", text.signer_name),
        },
    ];
    if let Some(id) = &text.national_id {
        lines.push(Line {
            font: "F1",
            size: 8.8,
            text: format!("TCKN: {id}"),
        });
    }
    lines.push(Line {
        font: "F1",
        size: 8.0,
        text: format!("İmza Tarihi: {}", text.signing_date),
    });
    lines.push(Line {
        font: "F1",
        size: 8.0,
        text: "Bu belge elektronik imza ile imzalanmıştır.".into(),
    });
    if text.timestamp_enabled {
        lines.push(Line {
            font: "F1",
            size: 7.8,
            text: "Zaman damgası eklenmiştir.".into(),
        });
    }
    lines
}

/// Content stream of the card for a `width` x `height` box.
#[must_use]
pub fn card_content(text: &AppearanceText, width: f32, height: f32) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(
        format!(
            "q 0.973 0.984 1 rg 0 0 {width:.2} {height:.2} re f \
             0.11 0.271 0.471 RG 0.8 w 0.4 0.4 {:.2} {:.2} re S Q\n",
            width - 0.8,
            height - 0.8
        )
        .as_bytes(),
    );
    out.extend_from_slice(b"BT\n");
    let mut y = height - 4.0;
    for line in lines(text) {
        y -= line.size + 2.0;
        out.extend_from_slice(format!("/{} {:.1} Tf 1 0 0 1 6 {y:.2} Tm ", line.font, line.size).as_bytes());
        push_literal(&line.text, &mut out);
        out.extend_from_slice(b" Tj\n");
    }
    out.extend_from_slice(b"ET\n");
    out
}

fn font(base: &str) -> Dictionary {
    dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => base,
        "Encoding" => "WinAnsiEncoding",
    }
}

/// Form XObject holding the card.
#[must_use]
pub fn card_xobject(text: &AppearanceText, width: f32, height: f32) -> Stream {
    let resources = dictionary! {
        "Font" => dictionary! {
            "F1" => font("Helvetica"),
            "F2" => font("Helvetica-Bold"),
        },
    };
    let dict = dictionary! {
        "Type" => "XObject",
        "Subtype" => "Form",
        "BBox" => vec![
            Object::Integer(0),
            Object::Integer(0),
            Object::Real(width),
            Object::Real(height),
        ],
        "Resources" => resources,
    };
    Stream::new(dict, card_content(text, width, height))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(timestamp_enabled: bool) -> AppearanceText {
        AppearanceText {
            signer_name: "Ayşe (Test)".into(),
            national_id: Some("12345678901".into()),
            signing_date: "01.02.2026 10:00:00 +03:00".into(),
            timestamp_enabled,
        }
    }

    #[test]
    fn turkish_letters_fold_and_parentheses_escape() {
        let content = String::from_utf8_lossy(&card_content(&sample(false), 300.0, 128.0)).to_string();
        assert!(content.contains("(ELEKTRONIK IMZA) Tj"));
        assert!(content.contains(r"(Imza Sahibi: Ayse \(Test\)) Tj"));
        assert!(!content.contains("Zaman"));
    }

    #[test]
    fn timestamp_line_is_optional() {
        let content = card_content(&sample(true), 300.0, 128.0);
        let text = String::from_utf8_lossy(&content);
        assert!(text.contains("(Zaman damgasi eklenmistir.) Tj"));
    }
}
