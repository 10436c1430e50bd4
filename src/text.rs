//! Shared text normalization helpers.
//!
//! Scanned Turkish contracts come back from OCR with a mix of Turkish
//! letters, Latin-1 mojibake and stray control characters. Everything
//! downstream (fuzzy matching, blacklist checks, CSV export) works on
//! the cleaned forms produced here.

/// Fold accented and Turkish characters to their ASCII base letter.
/// Unmapped characters pass through unchanged.
pub fn ascii_fold(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            'ç' | 'Ç' => 'c',
            'ğ' | 'Ğ' => 'g',
            'ı' | 'İ' => 'i',
            'ö' | 'Ö' => 'o',
            'ş' | 'Ş' => 's',
            'ü' | 'Ü' => 'u',
            'á' | 'à' | 'â' | 'ä' | 'Á' | 'À' | 'Â' | 'Ä' => 'a',
            'é' | 'è' | 'ê' | 'ë' | 'É' | 'È' | 'Ê' | 'Ë' => 'e',
            'í' | 'ì' | 'î' | 'ï' | 'Í' | 'Ì' | 'Î' | 'Ï' => 'i',
            'ó' | 'ò' | 'ô' | 'Ó' | 'Ò' | 'Ô' => 'o',
            'ú' | 'ù' | 'û' | 'Ú' | 'Ù' | 'Û' => 'u',
            'ñ' | 'Ñ' => 'n',
            other => {
                if other.is_uppercase() {
                    other.to_ascii_lowercase()
                } else {
                    other
                }
            }
        })
        .collect()
}

/// Repair the common UTF-8-read-as-Latin-1 sequences that poppler
/// produces for Turkish text, then drop control characters.
pub fn clean_mojibake(s: &str) -> String {
    const REPAIRS: &[(&str, &str)] = &[
        ("Ã§", "ç"),
        ("Ã‡", "Ç"),
        ("ÄŸ", "ğ"),
        ("Äž", "Ğ"),
        ("Ä±", "ı"),
        ("Ä°", "İ"),
        ("Ã¶", "ö"),
        ("Ã–", "Ö"),
        ("ÅŸ", "ş"),
        ("Åž", "Ş"),
        ("Ã¼", "ü"),
        ("Ãœ", "Ü"),
        ("â€™", "'"),
        ("â€œ", "\""),
        ("â€\u{9d}", "\""),
        ("â€“", "-"),
        ("â€”", "-"),
        ("Â", ""),
    ];
    let mut out = s.to_string();
    for (broken, fixed) in REPAIRS {
        if out.contains(broken) {
            out = out.replace(broken, fixed);
        }
    }
    out.chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
        .collect()
}

/// Collapse runs of whitespace into single spaces and trim.
pub fn squash_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn folds_turkish_letters() {
        assert_eq!(ascii_fold("Büyükdere Çağrı Şirketi"), "buyukdere cagri sirketi");
        assert_eq!(ascii_fold("İstanbul"), "istanbul");
    }

    #[test]
    fn repairs_common_mojibake() {
        assert_eq!(clean_mojibake("Åžirketi"), "Şirketi");
        assert_eq!(clean_mojibake("TÃ¼rkiye"), "Türkiye");
    }

    #[test]
    fn squashes_whitespace() {
        assert_eq!(squash_whitespace("  a\n\tb   c  "), "a b c");
    }
}
