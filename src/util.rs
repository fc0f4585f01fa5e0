//! Text decoding and escaping helpers shared by the reader and writers.

use std::borrow::Cow;

/// Decode bytes to a string, handling various encodings.
///
/// 1. UTF-8 (a BOM is handled by encoding_rs)
/// 2. The hint encoding, usually from `<?xml encoding="..."?>`
/// 3. Windows-1252, common in old ebooks
pub fn decode_text<'a>(bytes: &'a [u8], hint_encoding: Option<&str>) -> Cow<'a, str> {
    let (result, _encoding, malformed) = encoding_rs::UTF_8.decode(bytes);

    if !malformed {
        return result;
    }

    if let Some(name) = hint_encoding
        && let Some(encoding) = encoding_rs::Encoding::for_label(name.as_bytes())
    {
        let (result, _, _) = encoding.decode(bytes);
        return result;
    }

    let (result, _, _) = encoding_rs::WINDOWS_1252.decode(bytes);
    result
}

/// Encoding named in an XML declaration or `<meta charset>` near the start of a document.
pub fn encoding_hint(bytes: &[u8]) -> Option<String> {
    let head = &bytes[..bytes.len().min(1024)];
    let head = String::from_utf8_lossy(head).to_ascii_lowercase();

    for marker in ["encoding=", "charset="] {
        if let Some(pos) = head.find(marker) {
            let rest = head[pos + marker.len()..].trim_start_matches(['"', '\'']);
            let value: String = rest
                .chars()
                .take_while(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
                .collect();
            if !value.is_empty() {
                return Some(value);
            }
        }
    }
    None
}

/// Strip a UTF-8 BOM if present.
pub fn strip_bom(data: &[u8]) -> &[u8] {
    if data.starts_with(&[0xEF, 0xBB, 0xBF]) {
        &data[3..]
    } else {
        data
    }
}

pub fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_bom() {
        assert_eq!(strip_bom(&[0xEF, 0xBB, 0xBF, b'h', b'i']), b"hi");
        assert_eq!(strip_bom(b"hello"), b"hello");
        assert_eq!(strip_bom(&[]), &[] as &[u8]);
        let partial = &[0xEF, 0xBB, b'x'];
        assert_eq!(strip_bom(partial), partial);
    }

    #[test]
    fn test_decode_falls_back_to_hint_then_cp1252() {
        // "café" in Latin-1
        let latin1 = b"caf\xe9";
        assert_eq!(decode_text(latin1, Some("iso-8859-1")), "café");
        assert_eq!(decode_text(latin1, None), "café");
        assert_eq!(decode_text("naïve".as_bytes(), Some("windows-1252")), "naïve");
    }

    #[test]
    fn test_encoding_hint() {
        assert_eq!(
            encoding_hint(b"<?xml version=\"1.0\" encoding=\"ISO-8859-1\"?><html/>").as_deref(),
            Some("iso-8859-1")
        );
        assert_eq!(
            encoding_hint(b"<html><head><meta charset='utf-8'/></head></html>").as_deref(),
            Some("utf-8")
        );
        assert_eq!(encoding_hint(b"<html></html>"), None);
    }

    #[test]
    fn test_escape_xml() {
        assert_eq!(escape_xml("a & <b> \"c\" 'd'"), "a &amp; &lt;b&gt; &quot;c&quot; &apos;d&apos;");
    }
}
