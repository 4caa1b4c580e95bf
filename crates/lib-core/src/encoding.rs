use encoding_rs::{EUC_KR, Encoding, GB18030, SHIFT_JIS};

/// Decode raw source bytes into a string.
///
/// Legacy client sources predate UTF-8 conventions and commonly ship in an
/// East-Asian codepage. The fallback chain is deterministic: UTF-8 first,
/// then EUC-KR, Shift_JIS and GB18030; the first encoding that decodes the
/// whole input without replacement characters is adopted. If none does,
/// the UTF-8 lossy decoding is returned so the parser can still make
/// fail-soft progress.
pub fn decode_source(bytes: &[u8]) -> (String, &'static str) {
    if let Ok(text) = std::str::from_utf8(bytes) {
        return (text.to_owned(), "utf-8");
    }

    const FALLBACKS: &[&Encoding] = &[EUC_KR, SHIFT_JIS, GB18030];
    for encoding in FALLBACKS {
        let (text, _, had_errors) = encoding.decode(bytes);
        if !had_errors {
            log::debug!("decoded source as {}", encoding.name());
            return (text.into_owned(), encoding.name());
        }
    }

    log::debug!("no lossless encoding found, decoding as lossy utf-8");
    (String::from_utf8_lossy(bytes).into_owned(), "utf-8(lossy)")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn utf8_wins_when_valid() {
        let (text, name) = decode_source("select * from t".as_bytes());
        assert_eq!(name, "utf-8");
        assert_eq!(text, "select * from t");
    }

    #[test]
    fn euc_kr_fallback() {
        // "고객" in EUC-KR, invalid as UTF-8.
        let bytes = [0xb0, 0xed, 0xb0, 0xb4];
        let (text, name) = decode_source(&bytes);
        assert_eq!(name, "EUC-KR");
        assert_eq!(text, "고객");
    }

    #[test]
    fn garbage_still_produces_text() {
        let bytes = [0xff, 0x00, 0xfe];
        let (text, _) = decode_source(&bytes);
        assert!(!text.is_empty());
    }
}
