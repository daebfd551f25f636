//! Inline base64 payload detection and decoding.
//!
//! Quiz pages sometimes carry their real content in an `atob(...)` call
//! embedded in a script tag. We pull out the first such payload, decode it
//! permissively, and let the pipeline inspect whatever falls out: a JSON
//! object with a direct `answer`, a pointer `url`, or raw URLs in free text.

use base64::Engine;
use regex::Regex;

/// Find the first base64 string wrapped in an `atob(...)` call.
///
/// Delimiters are tried in priority order: backtick, double quote, single
/// quote. First match wins.
pub fn find_encoded_payload(html: &str) -> Option<String> {
    for pat in [
        r"(?s)atob\(`([^`]+)`\)",
        r#"(?s)atob\("([^"]+)"\)"#,
        r"(?s)atob\('([^']+)'\)",
    ] {
        let Ok(re) = Regex::new(pat) else { continue };
        if let Some(c) = re.captures(html) {
            return Some(c[1].to_string());
        }
    }
    None
}

/// Permissive base64 decode to raw bytes.
///
/// Whitespace is stripped first; if strict decoding still fails, retry after
/// filtering to the standard alphabet. Returns None only when nothing
/// decodable remains.
pub fn decode_base64_bytes(s: &str) -> Option<Vec<u8>> {
    let compact: String = s.chars().filter(|c| !c.is_whitespace()).collect();
    let engine = &base64::engine::general_purpose::STANDARD;
    engine
        .decode(compact.as_bytes())
        .or_else(|_| {
            let filtered: String = compact
                .chars()
                .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '/' | '='))
                .collect();
            engine.decode(filtered.as_bytes())
        })
        .ok()
}

/// Decode base64 to text, discarding undecodable byte sequences.
pub fn decode_base64_text(s: &str) -> Option<String> {
    let bytes = decode_base64_bytes(s)?;
    let text = String::from_utf8_lossy(&bytes).replace('\u{FFFD}', "");
    Some(text)
}

/// Parse JSON, tolerating a single class of malformation: trailing commas
/// before a closing brace/bracket. One cleanup pass, then give up.
pub fn parse_json_lenient(text: &str) -> Option<serde_json::Value> {
    let trimmed = text.trim();
    serde_json::from_str(trimmed)
        .ok()
        .or_else(|| serde_json::from_str(&strip_trailing_commas(trimmed)).ok())
}

fn strip_trailing_commas(text: &str) -> String {
    let Ok(re) = Regex::new(r",\s*([}\]])") else {
        return text.to_string();
    };
    re.replace_all(text, "$1").into_owned()
}

/// Raw URLs in free text, in order of appearance. Includes `data:` URIs so
/// inline assets survive the same dispatch path as real downloads.
pub fn find_raw_urls(text: &str) -> Vec<String> {
    let Ok(re) = Regex::new(r#"(?i)(https?://[^\s'"<>]+|data:[^\s'"<>]+)"#) else {
        return Vec::new();
    };
    re.captures_iter(text).map(|c| c[1].to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn finds_backtick_payload_first() {
        let html = r#"<script>const a = atob("c2Vjb25k"); const b = atob(`Zmlyc3Q=`);</script>"#;
        // Backtick delimiter outranks double quotes even when it appears later.
        assert_eq!(find_encoded_payload(html).as_deref(), Some("Zmlyc3Q="));
    }

    #[test]
    fn falls_back_to_double_then_single_quotes() {
        let html = r#"<script>atob('c2luZ2xl')</script>"#;
        assert_eq!(find_encoded_payload(html).as_deref(), Some("c2luZ2xl"));
        let html2 = r#"<script>atob("ZG91Ymxl"); atob('c2luZ2xl')</script>"#;
        assert_eq!(find_encoded_payload(html2).as_deref(), Some("ZG91Ymxl"));
    }

    #[test]
    fn no_atob_means_no_payload() {
        assert_eq!(find_encoded_payload("<html><body>plain</body></html>"), None);
    }

    #[test]
    fn decodes_despite_embedded_whitespace_and_junk() {
        // "hello" with a line break and stray characters in the middle.
        let got = decode_base64_text("aGVs\n bG8=").unwrap();
        assert_eq!(got, "hello");
    }

    #[test]
    fn invalid_utf8_sequences_are_dropped_not_fatal() {
        // 0xff 0xfe then "ok": lossy decode drops the bad prefix.
        let b64 = base64::engine::general_purpose::STANDARD.encode([0xff, 0xfe, b'o', b'k']);
        assert_eq!(decode_base64_text(&b64).unwrap(), "ok");
    }

    #[test]
    fn lenient_json_accepts_trailing_commas() {
        let v = parse_json_lenient(r#"{"answer": 42, "notes": [1, 2,],}"#).unwrap();
        assert_eq!(v["answer"], 42);
        assert_eq!(v["notes"][1], 2);
    }

    #[test]
    fn lenient_json_matches_manually_fixed_text() {
        let defective = r#"{"url": "https://x.test/r.csv",}"#;
        let fixed = r#"{"url": "https://x.test/r.csv"}"#;
        assert_eq!(
            parse_json_lenient(defective).unwrap(),
            serde_json::from_str::<serde_json::Value>(fixed).unwrap()
        );
    }

    #[test]
    fn genuinely_broken_json_stays_broken() {
        assert_eq!(parse_json_lenient(r#"{"answer": "#), None);
        assert_eq!(parse_json_lenient("not json at all"), None);
    }

    #[test]
    fn raw_urls_come_back_in_document_order() {
        let text = "see https://a.test/one.csv then data:text/csv;base64,QQ== and https://b.test/two.pdf";
        let urls = find_raw_urls(text);
        assert_eq!(
            urls,
            vec![
                "https://a.test/one.csv",
                "data:text/csv;base64,QQ==",
                "https://b.test/two.pdf",
            ]
        );
    }

    proptest! {
        // Round-trip law: whatever bytes we encode, the permissive decoder
        // recovers them even when whitespace is injected.
        #[test]
        fn permissive_decode_round_trips(data in proptest::collection::vec(any::<u8>(), 0..200)) {
            let mut b64 = base64::engine::general_purpose::STANDARD.encode(&data);
            if b64.len() > 4 {
                b64.insert(2, '\n');
                b64.insert(5, ' ');
            }
            prop_assert_eq!(decode_base64_bytes(&b64), Some(data));
        }

        // A single trailing comma before a closing brace never changes the
        // parsed object (relative to the defect-free text).
        #[test]
        fn trailing_comma_is_invisible(n in any::<i64>(), key in "[a-z]{1,8}") {
            let clean = format!("{{\"{key}\": {n}}}");
            let defective = format!("{{\"{key}\": {n},}}");
            prop_assert_eq!(
                parse_json_lenient(&defective),
                serde_json::from_str::<serde_json::Value>(&clean).ok()
            );
        }
    }
}
